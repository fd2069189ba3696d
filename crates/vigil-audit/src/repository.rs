use crate::model::{ReviewStatus, SecurityLogEntry};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use vigil_core::{Result, TimeRange};

/// 审计日志持久化接口
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: &SecurityLogEntry) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<SecurityLogEntry>>;

    /// 时间范围内的条目，按 created_at 升序（相同时间保持写入顺序）
    async fn range(&self, range: TimeRange) -> Result<Vec<SecurityLogEntry>>;

    /// 修改处理状态，条目不存在时返回 `None`
    async fn update_status(
        &self,
        id: Uuid,
        status: ReviewStatus,
    ) -> Result<Option<SecurityLogEntry>>;
}

/// 内存审计存储
#[derive(Clone, Default)]
pub struct InMemoryAuditRepository {
    entries: Arc<RwLock<Vec<SecurityLogEntry>>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, entry: &SecurityLogEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        let pos = entries.partition_point(|e| e.created_at <= entry.created_at);
        entries.insert(pos, entry.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SecurityLogEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn range(&self, range: TimeRange) -> Result<Vec<SecurityLogEntry>> {
        let entries = self.entries.read().await;
        let start = entries.partition_point(|e| e.created_at < range.start);
        let end = entries.partition_point(|e| e.created_at < range.end);
        Ok(entries[start..end.max(start)].to_vec())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ReviewStatus,
    ) -> Result<Option<SecurityLogEntry>> {
        let mut entries = self.entries.write().await;
        Ok(entries.iter_mut().find(|e| e.id == id).map(|e| {
            e.status = status;
            e.clone()
        }))
    }
}
