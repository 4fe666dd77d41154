pub mod api_observability;
pub mod app_config;
pub mod dispatcher_agent;
pub mod platform;
pub mod store;

pub use api_observability::{ApiConfig, LogFormat, ObservabilityConfig};
pub use app_config::AppConfig;
pub use dispatcher_agent::{AgentConfig, DispatcherConfig, ResolverKind};
pub use platform::{PlatformConfig, SchedulerBackend, TokenSource};
pub use store::{StoreBackend, StoreConfig};
