//! In-memory store, used by tests and ephemeral servers.
//!
//! `MemoryStore::without_transactions()` behaves like a backend that cannot
//! commit several records atomically, which drives the mutator into its
//! sequential fallback.

use std::collections::HashMap;
use std::sync::RwLock;
use taskboard_core::{Column, ColumnId, Project, ProjectId, Task, TaskId};

use super::{sort_by_position, MutationBatch, PositionStore, ScopeKey, StoreError, WriteOp};

#[derive(Debug, Default)]
struct Tables {
    projects: HashMap<ProjectId, Project>,
    columns: HashMap<ColumnId, Column>,
    tasks: HashMap<TaskId, Task>,
    versions: HashMap<ScopeKey, u64>,
}

impl Tables {
    fn version(&self, scope: &ScopeKey) -> u64 {
        self.versions.get(scope).copied().unwrap_or(0)
    }

    fn check(&self, expected: &[(ScopeKey, u64)]) -> Result<(), StoreError> {
        for (scope, version) in expected {
            let found = self.version(scope);
            if found != *version {
                return Err(StoreError::Conflict {
                    scope: *scope,
                    expected: *version,
                    found,
                });
            }
        }
        Ok(())
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::PutProject(p) => {
                self.projects.insert(p.id, p);
            }
            WriteOp::DeleteProject(id) => {
                self.projects.remove(&id);
            }
            WriteOp::PutColumn(c) => {
                self.columns.insert(c.id, c);
            }
            WriteOp::DeleteColumn(id) => {
                self.columns.remove(&id);
            }
            WriteOp::PutTask(t) => {
                self.tasks.insert(t.id, t);
            }
            WriteOp::DeleteTask(id) => {
                self.tasks.remove(&id);
            }
            WriteOp::BumpScope(scope) => {
                *self.versions.entry(scope).or_insert(0) += 1;
            }
        }
    }
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    transactional: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            transactional: true,
        }
    }

    /// A store whose `commit` always reports `TransactionUnavailable`.
    pub fn without_transactions() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            transactional: false,
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionStore for MemoryStore {
    fn supports_transactions(&self) -> bool {
        self.transactional
    }

    fn project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.read()?.projects.get(&id).cloned())
    }

    fn column(&self, id: ColumnId) -> Result<Option<Column>, StoreError> {
        Ok(self.read()?.columns.get(&id).cloned())
    }

    fn task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.read()?.tasks.get(&id).cloned())
    }

    fn columns_in(&self, project: ProjectId) -> Result<Vec<Column>, StoreError> {
        let mut columns: Vec<Column> = self
            .read()?
            .columns
            .values()
            .filter(|c| c.project_id == project)
            .cloned()
            .collect();
        sort_by_position(&mut columns);
        Ok(columns)
    }

    fn tasks_in(&self, column: ColumnId) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .read()?
            .tasks
            .values()
            .filter(|t| t.column_id == column)
            .cloned()
            .collect();
        sort_by_position(&mut tasks);
        Ok(tasks)
    }

    fn scope_version(&self, scope: ScopeKey) -> Result<u64, StoreError> {
        Ok(self.read()?.version(&scope))
    }

    fn commit(&self, batch: &MutationBatch) -> Result<(), StoreError> {
        if !self.transactional {
            return Err(StoreError::TransactionUnavailable);
        }
        let mut tables = self.write()?;
        tables.check(batch.expectations())?;
        for op in batch.sequence() {
            tables.apply(op);
        }
        Ok(())
    }

    fn apply(&self, op: WriteOp) -> Result<(), StoreError> {
        self.write()?.apply(op);
        Ok(())
    }
}
