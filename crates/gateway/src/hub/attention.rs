//! Attention policy (spec §4.4/§8): a deterministic pure function mapping
//! connected clients' heartbeats to a per-client `shouldNotify` decision for
//! a turn-completion or error on a given agent.
//!
//! Grounded on nothing in the prior daemon — it had no multi-client
//! notification concept (one human on one terminal). Built from spec.md's
//! seven-rule description directly, same style as the rest of this crate's
//! pure-function reducers (`sa_timeline::reduce`): take a snapshot, return a
//! decision, no I/O.

use chrono::{DateTime, Utc};

use sa_protocol::DeviceType;

/// A recency window; anything fresher than this counts as "at the desk".
const RECENT_WINDOW_SECS: i64 = 120;

/// One connected client's last-known heartbeat, as tracked by the
/// [`super::registry::ClientRegistry`].
#[derive(Debug, Clone)]
pub struct ClientHeartbeat {
    pub client_id: String,
    pub device_type: DeviceType,
    pub focused_agent_id: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub app_visible: bool,
}

fn is_recent(heartbeat: &ClientHeartbeat, now: DateTime<Utc>) -> bool {
    (now - heartbeat.last_activity_at).num_seconds() < RECENT_WINDOW_SECS
}

fn is_watching(heartbeat: &ClientHeartbeat, agent_id: &str, now: DateTime<Utc>) -> bool {
    heartbeat.focused_agent_id.as_deref() == Some(agent_id)
        && heartbeat.app_visible
        && is_recent(heartbeat, now)
}

/// Decide `shouldNotify` for every client in `heartbeats` for a completion
/// or error on `agent_id`. A client with no entry in `heartbeats` (i.e. it
/// never sent one) is assumed absent and defaults to "notify" by the caller
/// — this function only ranks clients that *have* a heartbeat on file.
pub fn should_notify(
    heartbeats: &[ClientHeartbeat],
    agent_id: &str,
    now: DateTime<Utc>,
) -> Vec<(String, bool)> {
    let any_watching = heartbeats.iter().any(|h| is_watching(h, agent_id, now));

    heartbeats
        .iter()
        .map(|h| {
            let notify = if is_watching(h, agent_id, now) {
                // Rule 3: this client is watching right now.
                false
            } else if any_watching {
                // Rule 4: someone else is watching.
                false
            } else if h.device_type == DeviceType::Web && !is_recent(h, now) {
                // Rule 5: stale web client, prefer mobile.
                false
            } else if is_recent(h, now)
                && heartbeats.iter().any(|other| {
                    other.client_id != h.client_id
                        && other.device_type != h.device_type
                        && is_recent(other, now)
                })
            {
                // Rule 6: present across devices, don't nag either.
                false
            } else {
                // Rule 7: nothing suppressed it. Only mobile gets the
                // push-equivalent fallback notification; web/cli/unknown
                // default to staying quiet.
                h.device_type == DeviceType::Mobile
            };
            (h.client_id.clone(), notify)
        })
        .collect()
}

/// `shouldNotify` for a single client with no heartbeat on file (rule 1):
/// safe default is to notify.
pub const NO_HEARTBEAT_NOTIFY: bool = true;

#[cfg(test)]
mod tests {
    use super::*;

    fn hb(id: &str, device: DeviceType, focused: Option<&str>, age_secs: i64, visible: bool) -> ClientHeartbeat {
        ClientHeartbeat {
            client_id: id.to_string(),
            device_type: device,
            focused_agent_id: focused.map(str::to_string),
            last_activity_at: Utc::now() - chrono::Duration::seconds(age_secs),
            app_visible: visible,
        }
    }

    #[test]
    fn s4_web_focused_on_agent_suppresses_notification() {
        let now = Utc::now();
        let clients = vec![hb("web1", DeviceType::Web, Some("A"), 0, true)];
        let result = should_notify(&clients, "A", now);
        assert_eq!(result, vec![("web1".to_string(), false)]);
    }

    #[test]
    fn s5_stale_web_present_mobile_absent_notifies_mobile_only() {
        let now = Utc::now();
        let clients = vec![
            hb("web1", DeviceType::Web, Some("A"), 125, true),
            hb("mobile1", DeviceType::Mobile, None, 300, false),
        ];
        let result = should_notify(&clients, "A", now);
        let web = result.iter().find(|(id, _)| id == "web1").unwrap().1;
        let mobile = result.iter().find(|(id, _)| id == "mobile1").unwrap().1;
        assert!(!web);
        assert!(mobile);
    }

    #[test]
    fn s6_tab_switched_moments_ago_still_suppresses() {
        let now = Utc::now();
        let clients = vec![hb("web1", DeviceType::Web, Some("A"), 10, false)];
        let result = should_notify(&clients, "A", now);
        assert_eq!(result, vec![("web1".to_string(), false)]);
    }

    #[test]
    fn two_recent_clients_on_different_devices_both_suppressed() {
        let now = Utc::now();
        let clients = vec![
            hb("web1", DeviceType::Web, None, 5, false),
            hb("cli1", DeviceType::Cli, None, 5, false),
        ];
        let result = should_notify(&clients, "A", now);
        assert!(result.iter().all(|(_, notify)| !notify));
    }

    #[test]
    fn single_stale_mobile_client_with_no_one_watching_notifies() {
        let now = Utc::now();
        let clients = vec![hb("mobile1", DeviceType::Mobile, None, 300, false)];
        let result = should_notify(&clients, "A", now);
        assert_eq!(result, vec![("mobile1".to_string(), true)]);
    }
}
