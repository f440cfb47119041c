use sa_domain::config::DaemonConfig;

#[test]
fn default_listen_is_localhost() {
    let config = DaemonConfig::default();
    assert_eq!(config.listen.host, "127.0.0.1");
    assert_eq!(config.listen.port, 6767);
}

#[test]
fn explicit_listen_parses_from_toml() {
    let toml_str = r#"
[listen]
host = "0.0.0.0"
port = 9000
"#;
    let config: DaemonConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.listen.host, "0.0.0.0");
    assert_eq!(config.listen.port, 9000);
}

#[test]
fn auto_wake_window_defaults_to_ten_minutes() {
    let config = DaemonConfig::default();
    assert_eq!(config.auto_wake_window_secs, 600);
}
