// Audit log persistence
pub mod sqlite;

pub use sqlite::{AuditLog, CommittedIds, CycleCommit, META_LAST_PRICE, META_LAST_SENTIMENT};
