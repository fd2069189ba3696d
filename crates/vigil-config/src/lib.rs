pub mod global;
pub mod loader;

pub use global::{
    AggregationConfig, AlertsConfig, HealthConfig, MetricsConfig, SchedulerConfig, ServiceConfig,
    SystemConfig, VigilConfig, WebhookConfig,
};
pub use loader::{ConfigLoader, CONFIG_FILE, ENV_PREFIX};
