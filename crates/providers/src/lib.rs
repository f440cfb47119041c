pub mod claude;
pub mod codex;
pub mod dispatch;
pub mod mapper;
pub mod opencode;
pub mod registry;
pub mod subprocess;
pub mod traits;

pub use dispatch::to_timeline_events;
pub use registry::ProviderRegistry;
pub use traits::ProviderAdapter;
