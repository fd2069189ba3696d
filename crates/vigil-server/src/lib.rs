//! Vigil 服务装配：组件初始化、周期调度和告警通知

pub mod engine;
pub mod notifier;
pub mod scheduler;

pub use engine::{AggregationRule, Engine, SweepReport};
pub use notifier::{LogNotifier, NotificationDispatcher, Notifier, NotifierError, WebhookNotifier};
pub use scheduler::{spawn_health_checks, Scheduler};
