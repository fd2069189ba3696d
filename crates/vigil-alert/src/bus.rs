use crate::model::HealthAlert;
use serde::Serialize;
use tokio::sync::broadcast;

/// 告警状态变化事件，在变化持久化后发布
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "alert", rename_all = "lowercase")]
pub enum AlertEvent {
    Raised(HealthAlert),
    Updated(HealthAlert),
    Acknowledged(HealthAlert),
    Resolved(HealthAlert),
}

impl AlertEvent {
    pub fn alert(&self) -> &HealthAlert {
        match self {
            AlertEvent::Raised(a)
            | AlertEvent::Updated(a)
            | AlertEvent::Acknowledged(a)
            | AlertEvent::Resolved(a) => a,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AlertEvent::Raised(_) => "raised",
            AlertEvent::Updated(_) => "updated",
            AlertEvent::Acknowledged(_) => "acknowledged",
            AlertEvent::Resolved(_) => "resolved",
        }
    }
}

/// 告警事件总线
#[derive(Clone)]
pub struct AlertEventBus {
    sender: broadcast::Sender<AlertEvent>,
}

impl AlertEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }

    /// 发布事件，返回接收者数量；没有订阅者时事件被丢弃
    pub fn publish(&self, event: AlertEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for AlertEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
