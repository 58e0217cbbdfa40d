//! Key encoding utilities for `RocksDB`.
//!
//! Entity rows are keyed by their 16-byte UUID. Ledger rows (usage records
//! and purchases) are keyed by `workspace_id || ulid`, so a prefix scan
//! returns one workspace's entries in creation order.

use chrono::{DateTime, Utc};
use ulid::Ulid;

use credit_ledger_core::{AgentId, PlanId, WorkspaceId};

use crate::error::{Result, StoreError};

/// Length of a ledger key.
pub const LEDGER_KEY_LEN: usize = 32;

/// Create a workspace key.
#[must_use]
pub fn workspace_key(workspace_id: &WorkspaceId) -> Vec<u8> {
    workspace_id.as_bytes().to_vec()
}

/// Create an agent key.
#[must_use]
pub fn agent_key(agent_id: &AgentId) -> Vec<u8> {
    agent_id.as_bytes().to_vec()
}

/// Create a plan key.
#[must_use]
pub fn plan_key(plan_id: &PlanId) -> Vec<u8> {
    plan_id.as_bytes().to_vec()
}

/// Create a key for an external reference (customer, price, dedup key).
#[must_use]
pub fn reference_key(reference: &str) -> Vec<u8> {
    reference.as_bytes().to_vec()
}

/// Create a ledger key.
///
/// Format: `workspace_id (16 bytes) || entry ULID (16 bytes, big-endian)`
#[must_use]
pub fn ledger_key(workspace_id: &WorkspaceId, entry: [u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(LEDGER_KEY_LEN);
    key.extend_from_slice(workspace_id.as_bytes());
    key.extend_from_slice(&entry);
    key
}

/// Create a prefix for iterating all ledger entries of a workspace.
#[must_use]
pub fn ledger_prefix(workspace_id: &WorkspaceId) -> Vec<u8> {
    workspace_id.as_bytes().to_vec()
}

/// The smallest ledger key whose entry was created at or after `at`.
#[must_use]
pub fn ledger_seek_key(workspace_id: &WorkspaceId, at: DateTime<Utc>) -> Vec<u8> {
    let ms = u64::try_from(at.timestamp_millis()).unwrap_or(0);
    ledger_key(workspace_id, Ulid::from_parts(ms, 0).to_bytes())
}

/// Millisecond timestamp of the ULID in a ledger key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is not a ledger key.
pub fn ledger_key_timestamp_ms(key: &[u8]) -> Result<u64> {
    let entry: [u8; 16] = key
        .get(16..LEDGER_KEY_LEN)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| StoreError::Serialization(format!("bad ledger key length {}", key.len())))?;
    Ok(Ulid::from_bytes(entry).timestamp_ms())
}

/// Decode a workspace ID stored as an index value.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the bytes are not a UUID.
pub fn decode_workspace_id(bytes: &[u8]) -> Result<WorkspaceId> {
    uuid::Uuid::from_slice(bytes)
        .map(WorkspaceId::from_uuid)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Decode a plan ID stored as an index value.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the bytes are not a UUID.
pub fn decode_plan_id(bytes: &[u8]) -> Result<PlanId> {
    uuid::Uuid::from_slice(bytes)
        .map(PlanId::from_uuid)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}
