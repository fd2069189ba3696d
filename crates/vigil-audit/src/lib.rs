//! 安全审计日志

pub mod audit;
pub mod model;
pub mod query;
pub mod repository;

pub use audit::SecurityAuditLog;
pub use model::{NewSecurityEvent, ReviewStatus, SecurityLogEntry};
pub use query::{AuditFilter, AuditTrail, SeverityFilter};
pub use repository::{AuditRepository, InMemoryAuditRepository};
