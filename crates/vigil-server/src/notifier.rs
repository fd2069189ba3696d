use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_alert::AlertEvent;
use vigil_config::AlertsConfig;
use vigil_core::Level;

/// 通知错误
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Endpoint rejected notification with status {0}")]
    Rejected(u16),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// 告警通知渠道
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifierError>;

    fn name(&self) -> &str;
}

/// 把告警事件写入日志
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        let alert = event.alert();
        match alert.level {
            Level::Critical => warn!(
                event = event.kind(),
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                service = %alert.service_name,
                level = %alert.level,
                "{}",
                alert.message
            ),
            _ => info!(
                event = event.kind(),
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                service = %alert.service_name,
                level = %alert.level,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Webhook 通知器，以 JSON 推送告警事件
pub struct WebhookNotifier {
    url: String,
    min_level: Level,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration, min_level: Level) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::ConfigError(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            min_level,
            client,
        })
    }

    pub fn accepts(&self, event: &AlertEvent) -> bool {
        event.alert().level >= self.min_level
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        if !self.accepts(event) {
            debug!(url = %self.url, level = %event.alert().level, "Below webhook level, skipped");
            return Ok(());
        }

        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| NotifierError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifierError::Rejected(response.status().as_u16()));
        }

        info!(url = %self.url, event = event.kind(), "Webhook notification sent");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// 订阅告警事件总线并分发给所有通知渠道
#[derive(Default)]
pub struct NotificationDispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置创建通知渠道
    pub fn from_config(config: &AlertsConfig) -> Result<Self, NotifierError> {
        let mut dispatcher = Self::new();
        if config.log_events {
            dispatcher.register(Arc::new(LogNotifier));
        }
        for webhook in &config.webhooks {
            dispatcher.register(Arc::new(WebhookNotifier::new(
                webhook.url.clone(),
                webhook.timeout(),
                webhook.min_level,
            )?));
        }
        Ok(dispatcher)
    }

    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        info!(notifier = notifier.name(), "Notifier registered");
        self.notifiers.push(notifier);
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// 把事件交给每个通知渠道，单个渠道失败只记录日志
    pub async fn dispatch(&self, event: &AlertEvent) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event).await {
                warn!(
                    notifier = notifier.name(),
                    alert_id = %event.alert().id,
                    error = %e,
                    "Failed to deliver alert notification"
                );
            }
        }
    }

    /// 在后台持续分发，直到收到停止信号或总线关闭
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<AlertEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => self.dispatch(&event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Notification dispatcher lagged behind alert events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Notification dispatcher stopped");
        })
    }
}
