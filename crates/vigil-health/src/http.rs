use crate::probe::{Probe, ProbeSignal};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

/// HTTP 探针
///
/// 对目标地址发起 GET 请求，成功（2xx）时返回响应耗时（毫秒），
/// 非 2xx 或请求失败视为探针失败。
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> anyhow::Result<ProbeSignal> {
        let started = Instant::now();
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{} responded with {}", self.url, status));
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(url = %self.url, elapsed_ms, "HTTP probe succeeded");
        Ok(ProbeSignal::Numeric(elapsed_ms))
    }

    fn name(&self) -> &str {
        "http"
    }
}
