//! 告警生命周期管理
//!
//! 健康状态变化、聚合阈值越界和严重安全事件都汇聚到 [`AlertManager`]，
//! 状态变化以 [`AlertEvent`] 的形式在事件总线上发布。

pub mod bus;
pub mod manager;
pub mod model;
pub mod repository;

pub use bus::{AlertEvent, AlertEventBus};
pub use manager::{AggregationThreshold, AlertManager, AlertPolicy};
pub use model::{AlertFilter, AlertKey, AlertState, AlertType, HealthAlert, Metadata};
pub use repository::{AlertRepository, InMemoryAlertRepository};
