//! Persistent storage for board records.
//!
//! Architecture:
//! ```text
//! ┌────────────────────┐   MutationBatch   ┌──────────────────────────────────┐
//! │ TransactionalMutator│ ────────────────► │ PositionStore                    │
//! └────────────────────┘                   │  ├─ RocksStore  (column families)│
//!                                          │  └─ MemoryStore (tests, scratch) │
//!                                          └──────────────────────────────────┘
//! ```
//!
//! A store holds projects, columns and tasks plus one version counter per
//! ordering scope. [`PositionStore::commit`] applies a whole batch at once
//! and refuses it when any scope it read has moved on since; stores
//! without multi-record atomicity answer
//! [`StoreError::TransactionUnavailable`] and are written op by op through
//! [`PositionStore::apply`] instead.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use serde::{Deserialize, Serialize};
use std::fmt;
use taskboard_core::{Column, ColumnId, Positioned, Project, ProjectId, Task, TaskId};

/// An ordering scope: the project for columns, the column for tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKey {
    Project(ProjectId),
    Column(ColumnId),
}

impl ScopeKey {
    /// 1 tag byte + 16 id bytes.
    pub fn to_key(&self) -> [u8; 17] {
        let (tag, id) = match self {
            ScopeKey::Project(id) => (b'p', id),
            ScopeKey::Column(id) => (b'c', id),
        };
        let mut key = [0u8; 17];
        key[0] = tag;
        key[1..].copy_from_slice(id.as_bytes());
        key
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Project(id) => write!(f, "project:{id}"),
            ScopeKey::Column(id) => write!(f, "column:{id}"),
        }
    }
}

/// One record-level write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    PutProject(Project),
    DeleteProject(ProjectId),
    PutColumn(Column),
    DeleteColumn(ColumnId),
    PutTask(Task),
    DeleteTask(TaskId),
    BumpScope(ScopeKey),
}

/// A set of writes that must land together.
///
/// Each record appears at most once per batch. Every scope registered with
/// [`MutationBatch::expect`] is version-checked on commit and bumped after
/// the writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationBatch {
    expected: Vec<(ScopeKey, u64)>,
    ops: Vec<WriteOp>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `scope` to still be at `version` when the batch commits.
    pub fn expect(&mut self, scope: ScopeKey, version: u64) -> &mut Self {
        if !self.expected.iter().any(|(s, _)| *s == scope) {
            self.expected.push((scope, version));
        }
        self
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn put_columns<'a>(&mut self, columns: impl IntoIterator<Item = &'a Column>) -> &mut Self {
        for column in columns {
            self.ops.push(WriteOp::PutColumn(column.clone()));
        }
        self
    }

    pub fn put_tasks<'a>(&mut self, tasks: impl IntoIterator<Item = &'a Task>) -> &mut Self {
        for task in tasks {
            self.ops.push(WriteOp::PutTask(task.clone()));
        }
        self
    }

    pub fn expectations(&self) -> &[(ScopeKey, u64)] {
        &self.expected
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The writes followed by one bump per expected scope, in the order a
    /// store applies them.
    pub fn sequence(&self) -> Vec<WriteOp> {
        let mut ops = self.ops.clone();
        ops.extend(self.expected.iter().map(|(s, _)| WriteOp::BumpScope(*s)));
        ops
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("scope {scope} moved from version {expected} to {found}")]
    Conflict {
        scope: ScopeKey,
        expected: u64,
        found: u64,
    },
    #[error("store does not support atomic multi-record writes")]
    TransactionUnavailable,
    #[error("store lock poisoned")]
    Poisoned,
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Record store for everything that carries an `order_index`.
///
/// Sibling listings come back sorted by `order_index`.
pub trait PositionStore: Send + Sync {
    /// Whether [`PositionStore::commit`] is all-or-nothing.
    fn supports_transactions(&self) -> bool;

    fn project(&self, id: ProjectId) -> Result<Option<Project>, StoreError>;
    fn column(&self, id: ColumnId) -> Result<Option<Column>, StoreError>;
    fn task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    fn columns_in(&self, project: ProjectId) -> Result<Vec<Column>, StoreError>;
    fn tasks_in(&self, column: ColumnId) -> Result<Vec<Task>, StoreError>;

    fn scope_version(&self, scope: ScopeKey) -> Result<u64, StoreError>;

    /// Check every expectation, then apply the whole batch atomically.
    fn commit(&self, batch: &MutationBatch) -> Result<(), StoreError>;

    /// Apply a single write with no version check.
    fn apply(&self, op: WriteOp) -> Result<(), StoreError>;

    fn put_project(&self, project: &Project) -> Result<(), StoreError> {
        self.apply(WriteOp::PutProject(project.clone()))
    }

    /// All tasks of a project, grouped by column order then task order.
    fn tasks_in_project(&self, project: ProjectId) -> Result<Vec<Task>, StoreError> {
        let mut tasks = Vec::new();
        for column in self.columns_in(project)? {
            tasks.extend(self.tasks_in(column.id)?);
        }
        Ok(tasks)
    }
}

/// Sort siblings the way listings promise.
pub(crate) fn sort_by_position<T: Positioned>(records: &mut [T]) {
    records.sort_by(|a, b| {
        a.order_index()
            .cmp(&b.order_index())
            .then(a.created_at().cmp(&b.created_at()))
            .then(a.id().cmp(&b.id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_scope_key_bytes_distinguish_kind() {
        let id = Uuid::new_v4();
        let p = ScopeKey::Project(id).to_key();
        let c = ScopeKey::Column(id).to_key();
        assert_ne!(p, c);
        assert_eq!(&p[1..], id.as_bytes());
    }

    #[test]
    fn test_batch_sequence_appends_bumps() {
        let scope = ScopeKey::Column(Uuid::new_v4());
        let mut batch = MutationBatch::new();
        batch.expect(scope, 3).expect(scope, 4);
        batch.push(WriteOp::DeleteTask(Uuid::new_v4()));

        assert_eq!(batch.expectations(), &[(scope, 3)]);
        let seq = batch.sequence();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[1], WriteOp::BumpScope(scope));
    }

    #[test]
    fn test_scope_display() {
        let id = Uuid::nil();
        assert_eq!(
            ScopeKey::Project(id).to_string(),
            "project:00000000-0000-0000-0000-000000000000"
        );
    }
}
