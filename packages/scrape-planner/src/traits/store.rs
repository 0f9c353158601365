//! Durable key-value store contract.
//!
//! Modeled on a hash + list store (Redis-like). Keys used by the lifecycle:
//! - `plan:{plan_id}:{version}`: field `plan` (immutable once written)
//! - `plan_status:{plan_id}`: field `record`
//! - `plan_events:{plan_id}`: list of audit events, newest first
//! - `execution:{run_id}`: field `record`

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::StoreResult;

/// Hash-field and list operations over string values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read one hash field.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Write one hash field, creating the hash if needed.
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Atomically write a field only if its current value equals `expected`
    /// (`None` = field must be absent). Returns whether the write happened.
    async fn hset_if(
        &self,
        key: &str,
        field: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StoreResult<bool>;

    /// Read all fields of a hash (empty if missing).
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Push a value to the head of a list; returns the new length.
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize>;

    /// Keep only the first `keep` entries of a list.
    async fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()>;

    /// Read up to `limit` entries from the head of a list.
    async fn lrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>>;
}

/// Key of a persisted plan version.
pub fn plan_key(plan_id: &str, version: u32) -> String {
    format!("plan:{}:{}", plan_id, version)
}

/// Key of a plan's status record.
pub fn plan_status_key(plan_id: &str) -> String {
    format!("plan_status:{}", plan_id)
}

/// Key of a plan's audit trail.
pub fn plan_events_key(plan_id: &str) -> String {
    format!("plan_events:{}", plan_id)
}

/// Key of an execution record.
pub fn execution_key(run_id: &str) -> String {
    format!("execution:{}", run_id)
}
