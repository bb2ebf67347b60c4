//! MemoryStore trait: namespaced key/value storage for long-term memory.
//!
//! Every record lives under a [`Namespace`] made of the record kind, a
//! category and a user ID. All reads and writes name exactly one namespace,
//! so a to-do written for one user can never surface for another user or
//! under the instruction namespace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;

/// Which kind of record a namespace holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// To-do items, one record per task.
    Todo,
    /// The single free-text instruction blob.
    Instructions,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Todo => "todo",
            RecordKind::Instructions => "instructions",
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(RecordKind::Todo),
            "instructions" => Ok(RecordKind::Instructions),
            other => Err(MemoryError::Corrupt(format!("unknown record kind '{other}'"))),
        }
    }
}

/// Partition key: (kind, category, user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub kind: RecordKind,
    pub category: String,
    pub user_id: String,
}

impl Namespace {
    pub fn new(kind: RecordKind, category: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            kind,
            category: category.into(),
            user_id: user_id.into(),
        }
    }

    /// The to-do namespace for a category and user.
    pub fn todo(category: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(RecordKind::Todo, category, user_id)
    }

    /// The instruction namespace for a category and user.
    pub fn instructions(category: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(RecordKind::Instructions, category, user_id)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind.as_str(), self.category, self.user_id)
    }
}

/// A stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub namespace: Namespace,

    /// Key, unique within the namespace
    pub key: String,

    /// The record body
    pub value: serde_json::Value,

    /// When the key was first written
    pub created_at: DateTime<Utc>,

    /// When the key was last overwritten
    pub updated_at: DateTime<Utc>,
}

/// The core MemoryStore trait.
///
/// Implementations: in-memory (for tests and ephemeral sessions) and SQLite.
/// Records are only ever overwritten, never deleted, by the agent.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// All items in the namespace, oldest first.
    async fn search(&self, namespace: &Namespace) -> std::result::Result<Vec<Item>, MemoryError>;

    /// Get one item by key.
    async fn get(&self, namespace: &Namespace, key: &str) -> std::result::Result<Option<Item>, MemoryError>;

    /// Insert or overwrite the value under `key`.
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: serde_json::Value,
    ) -> std::result::Result<(), MemoryError>;
}
