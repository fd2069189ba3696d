use crate::model::{AlertFilter, AlertKey, HealthAlert};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use vigil_core::Result;

/// 告警持久化接口
///
/// `save` 为整条记录的覆盖写入，一次调用要么全部生效要么不生效。
#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn save(&self, alert: &HealthAlert) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<HealthAlert>>;

    /// 指定键下未解决的告警
    async fn find_open(&self, key: &AlertKey) -> Result<Option<HealthAlert>>;

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<HealthAlert>>;
}

/// 内存告警存储
#[derive(Clone, Default)]
pub struct InMemoryAlertRepository {
    alerts: Arc<RwLock<HashMap<Uuid, HealthAlert>>>,
    open: Arc<RwLock<HashMap<AlertKey, Uuid>>>,
}

impl InMemoryAlertRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertRepository for InMemoryAlertRepository {
    async fn save(&self, alert: &HealthAlert) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        let mut open = self.open.write().await;

        let key = alert.key();
        if alert.is_open() {
            open.insert(key, alert.id);
        } else if open.get(&key) == Some(&alert.id) {
            open.remove(&key);
        }
        alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<HealthAlert>> {
        let alerts = self.alerts.read().await;
        Ok(alerts.get(&id).cloned())
    }

    async fn find_open(&self, key: &AlertKey) -> Result<Option<HealthAlert>> {
        let alerts = self.alerts.read().await;
        let open = self.open.read().await;
        Ok(open.get(key).and_then(|id| alerts.get(id)).cloned())
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<HealthAlert>> {
        let alerts = self.alerts.read().await;
        Ok(alerts.values().filter(|a| filter.matches(a)).cloned().collect())
    }
}
