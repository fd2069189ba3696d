use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// 探针返回的健康信号
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProbeSignal {
    Numeric(f64),
    Boolean(bool),
}

impl ProbeSignal {
    /// 布尔信号按 1/0 参与阈值比较
    pub fn as_f64(&self) -> f64 {
        match self {
            ProbeSignal::Numeric(v) => *v,
            ProbeSignal::Boolean(true) => 1.0,
            ProbeSignal::Boolean(false) => 0.0,
        }
    }
}

impl From<f64> for ProbeSignal {
    fn from(v: f64) -> Self {
        ProbeSignal::Numeric(v)
    }
}

impl From<bool> for ProbeSignal {
    fn from(v: bool) -> Self {
        ProbeSignal::Boolean(v)
    }
}

/// 外部健康探针
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> anyhow::Result<ProbeSignal>;

    fn name(&self) -> &str {
        "probe"
    }
}

pub type SharedProbe = Arc<dyn Probe>;

/// 闭包探针
pub struct FnProbe<F> {
    f: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ProbeSignal>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ProbeSignal>> + Send + 'static,
{
    async fn check(&self) -> anyhow::Result<ProbeSignal> {
        (self.f)().await
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// 用闭包构造共享探针
pub fn probe_fn<F, Fut>(f: F) -> SharedProbe
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ProbeSignal>> + Send + 'static,
{
    Arc::new(FnProbe::new(f))
}
