//! Storage layer for thought tree persistence.
//!
//! This module provides:
//! - The [`Storage`] trait: one durable record per tree, keyed by tree id
//! - [`FileStorage`]: JSON records in a directory, atomically replaced on write
//! - [`TreeRepository`]: the in-process cache in front of a [`Storage`]
//! - Record decoding with schema migration

mod file;
mod repository;

pub use file::FileStorage;
pub use repository::TreeRepository;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::tree::{Strategy, ThoughtTree, SCHEMA_VERSION};

/// Durable storage of whole thought trees.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create or atomically replace the record for `tree.id`.
    async fn save_tree(&self, tree: &ThoughtTree) -> StorageResult<()>;

    /// Load a tree record, `None` if no record exists.
    async fn load_tree(&self, id: &str) -> StorageResult<Option<ThoughtTree>>;

    /// Ids of every stored tree.
    async fn list_tree_ids(&self) -> StorageResult<Vec<String>>;

    /// Remove a tree record; returns whether one existed.
    async fn delete_tree(&self, id: &str) -> StorageResult<bool>;

    /// Human-readable location of a tree's record.
    fn location(&self, id: &str) -> String;
}

/// Whether `key` is safe to use as a record name.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Decode a stored record, migrating older layouts to the current schema.
pub fn decode_record(key: &str, bytes: &[u8]) -> StorageResult<ThoughtTree> {
    let mut value: Value = serde_json::from_slice(bytes)?;

    let raw_version = value
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let version = u32::try_from(raw_version).map_err(|_| StorageError::Corrupt {
        key: key.to_string(),
        reason: format!("schema_version {} out of range", raw_version),
    })?;
    if version > SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchema {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }
    if version == 0 {
        debug!(key = %key, "Migrating unversioned tree record");
        migrate_v0(&mut value);
    }

    let mut tree: ThoughtTree = serde_json::from_value(value)?;
    tree.schema_version = SCHEMA_VERSION;

    tree.check_invariants()
        .map_err(|reason| StorageError::Corrupt {
            key: key.to_string(),
            reason,
        })?;
    Ok(tree)
}

/// Upgrade an unversioned record.
///
/// Unversioned records name the cursor `current_id`, keep thoughts in an
/// id-keyed object, accept any strategy string and use naive timestamps.
fn migrate_v0(value: &mut Value) {
    let Some(record) = value.as_object_mut() else {
        return;
    };

    if let Some(current) = record.remove("current_id") {
        record.entry("cursor_id").or_insert(current);
    }

    if let Some(Value::Object(map)) = record.remove("thoughts") {
        let mut thoughts: Vec<Value> = map.into_iter().map(|(_, t)| t).collect();
        for thought in thoughts.iter_mut() {
            if let Some(obj) = thought.as_object_mut() {
                normalize_timestamp(obj.entry("created_at").or_insert(Value::Null));
            }
        }
        thoughts.sort_by(|a, b| {
            let key = |t: &Value| {
                (
                    t.get("created_at")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    t.get("depth").and_then(Value::as_u64).unwrap_or(0),
                )
            };
            key(a).cmp(&key(b))
        });
        record.insert("thoughts".to_string(), Value::Array(thoughts));
    } else if let Some(Value::Array(thoughts)) = record.get_mut("thoughts") {
        for thought in thoughts.iter_mut() {
            if let Some(obj) = thought.as_object_mut() {
                normalize_timestamp(obj.entry("created_at").or_insert(Value::Null));
            }
        }
    }

    if let Some(strategy) = record.get("strategy").and_then(Value::as_str) {
        let parsed = Strategy::parse_or_greedy(strategy);
        record.insert("strategy".to_string(), Value::String(parsed.as_str().to_string()));
    }

    for field in ["created_at", "updated_at"] {
        normalize_timestamp(record.entry(field).or_insert(Value::Null));
    }
}

/// Rewrite a timestamp as RFC 3339 UTC, substituting now when unreadable.
fn normalize_timestamp(value: &mut Value) {
    let parsed = value.as_str().and_then(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    });
    *value = Value::String(parsed.unwrap_or_else(Utc::now).to_rfc3339());
}
