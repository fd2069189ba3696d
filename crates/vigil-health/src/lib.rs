//! 服务健康评估
//!
//! 每个服务注册一个探针和一组阈值，评估结果按状态变化转发给告警。

pub mod evaluator;
pub mod http;
pub mod probe;
pub mod status;
pub mod threshold;

pub use evaluator::{
    HealthEvaluator, HealthEventSink, ServiceInfo, ServiceRegistration, PROBE_FAILURE_METRIC,
};
pub use http::HttpProbe;
pub use probe::{probe_fn, FnProbe, Probe, ProbeSignal, SharedProbe};
pub use status::{HealthEvent, HealthStatus};
pub use threshold::{HealthThreshold, ThresholdSet};
