//! Every write that touches an `order_index` goes through here.
//!
//! ```text
//!  load entry ─► AccessGate ─► read scope version + siblings ─► Reindexer
//!                                                                  │
//!        retry on Conflict ◄── WriteBoundary::commit(batch) ◄──────┘
//! ```
//!
//! A sibling snapshot that is not `0..n` is compacted before use and the
//! repaired indexes ride along in the same batch, so reads and mutations
//! both heal a scope left broken by an interrupted sequential write.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use taskboard_core::reindex::{self, IndexShift, Placement};
use taskboard_core::{
    apply_shifts, now_secs, placements, Column, ColumnId, Positioned, ProjectId, Task,
    TaskDraft, TaskId, TaskPatch, UserId,
};

use crate::access::AccessGate;
use crate::error::{BoardError, EntityKind};
use crate::storage::{MutationBatch, PositionStore, ScopeKey, StoreError, WriteOp};

#[derive(Debug, Clone)]
pub struct MutatorConfig {
    /// Recomputations allowed after a version conflict before giving up
    pub max_conflict_retries: u32,
}

impl Default for MutatorConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// One all-or-nothing store batch
    Atomic,
    /// Op by op, no version check
    Sequential,
}

/// How a batch reaches the store.
pub trait WriteBoundary: Send + Sync {
    fn mode(&self) -> CommitMode;
    fn commit(&self, store: &dyn PositionStore, batch: &MutationBatch) -> Result<(), StoreError>;
}

pub struct AtomicBoundary;

impl WriteBoundary for AtomicBoundary {
    fn mode(&self) -> CommitMode {
        CommitMode::Atomic
    }

    fn commit(&self, store: &dyn PositionStore, batch: &MutationBatch) -> Result<(), StoreError> {
        store.commit(batch)
    }
}

/// Best-effort fallback. An interrupted sequence can leave a gap or a
/// duplicate behind; the next read of the scope compacts it.
pub struct SequentialBoundary;

impl WriteBoundary for SequentialBoundary {
    fn mode(&self) -> CommitMode {
        CommitMode::Sequential
    }

    fn commit(&self, store: &dyn PositionStore, batch: &MutationBatch) -> Result<(), StoreError> {
        let ops = batch.sequence();
        let total = ops.len();
        for (applied, op) in ops.into_iter().enumerate() {
            if let Err(e) = store.apply(op) {
                log::warn!(
                    "Sequential write stopped after {applied} of {total} ops: {e}; \
                     affected scopes will be compacted on next access"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Result of a task deletion, enough to address the broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRemoval {
    pub task_id: TaskId,
    pub column_id: ColumnId,
    pub project_id: ProjectId,
}

/// Result of a column deletion and its cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRemoval {
    pub column_id: ColumnId,
    pub project_id: ProjectId,
    /// Column that received the orphaned tasks, if any column remained
    pub relocated_to: Option<ColumnId>,
    /// Relocated tasks with their new column and index
    pub relocated_tasks: Vec<Task>,
    pub deleted_tasks: Vec<TaskId>,
}

/// One computed attempt: the writes plus what to hand back if they land.
struct Planned<T> {
    batch: MutationBatch,
    value: T,
}

impl<T> Planned<T> {
    fn new(batch: MutationBatch, value: T) -> Self {
        Self { batch, value }
    }

    fn read_only(value: T) -> Self {
        Self::new(MutationBatch::new(), value)
    }
}

/// A scope's siblings as read at `version`, kept sorted by position.
struct Siblings<T> {
    scope: ScopeKey,
    version: u64,
    before: Vec<T>,
    records: Vec<T>,
}

impl<T: Positioned + Clone + PartialEq> Siblings<T> {
    fn new(scope: ScopeKey, version: u64, records: Vec<T>) -> Self {
        let before = records.clone();
        let mut siblings = Self {
            scope,
            version,
            before,
            records,
        };
        let observed = siblings.placements();
        if !reindex::is_contiguous(&observed) {
            let shifts = reindex::compact(&observed);
            log::warn!(
                "{} is not contiguous; re-sequencing {} entries",
                siblings.scope,
                shifts.len()
            );
            siblings.shift(&shifts);
        }
        siblings
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn placements(&self) -> Vec<Placement> {
        placements(&self.records)
    }

    fn shift(&mut self, shifts: &[IndexShift]) {
        apply_shifts(&mut self.records, shifts);
        self.records.sort_by_key(|r| r.order_index());
    }

    fn get(&self, id: uuid::Uuid) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    fn take(&mut self, id: uuid::Uuid) -> Option<T> {
        let position = self.records.iter().position(|r| r.id() == id)?;
        Some(self.records.remove(position))
    }

    /// Records that differ from what was read.
    fn changed(&self) -> Vec<&T> {
        self.records
            .iter()
            .filter(|r| !self.before.iter().any(|b| b == *r))
            .collect()
    }

    fn expect_in(&self, batch: &mut MutationBatch) {
        batch.expect(self.scope, self.version);
    }
}

/// Applies board mutations against a [`PositionStore`].
pub struct TransactionalMutator {
    store: Arc<dyn PositionStore>,
    gate: Arc<dyn AccessGate>,
    config: MutatorConfig,
    degraded: AtomicBool,
}

impl TransactionalMutator {
    pub fn new(store: Arc<dyn PositionStore>, gate: Arc<dyn AccessGate>) -> Self {
        Self::with_config(store, gate, MutatorConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn PositionStore>,
        gate: Arc<dyn AccessGate>,
        config: MutatorConfig,
    ) -> Self {
        let degraded = !store.supports_transactions();
        if degraded {
            log::warn!("Store has no atomic batches; ordering writes will be applied sequentially");
        }
        Self {
            store,
            gate,
            config,
            degraded: AtomicBool::new(degraded),
        }
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<dyn AccessGate> {
        &self.gate
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.boundary().mode()
    }

    fn boundary(&self) -> &'static dyn WriteBoundary {
        if self.degraded.load(Ordering::Acquire) {
            &SequentialBoundary
        } else {
            &AtomicBoundary
        }
    }

    // ─── Columns ──────────────────────────────────────────────────────

    pub async fn create_column(
        &self,
        project: ProjectId,
        name: impl Into<String>,
        actor: UserId,
    ) -> Result<Column, BoardError> {
        let name = name.into();
        self.require_project(project)?;
        self.require_access(project, actor).await?;

        let column = self.run(|| {
            self.require_project(project)?;
            let columns = self.column_siblings(project)?;
            let created = Column::new(project, name.clone(), reindex::append_index(columns.len()));

            let mut batch = MutationBatch::new();
            columns.expect_in(&mut batch);
            batch.put_columns(columns.changed());
            batch.push(WriteOp::PutColumn(created.clone()));
            Ok(Planned::new(batch, created))
        })?;

        log::info!("Created column {} at {} in project {project}", column.id, column.order_index);
        Ok(column)
    }

    pub async fn rename_column(
        &self,
        id: ColumnId,
        name: impl Into<String>,
        actor: UserId,
    ) -> Result<Column, BoardError> {
        let name = name.into();
        let column = self.load_column(id)?;
        self.require_access(column.project_id, actor).await?;

        self.run(|| {
            let columns = self.column_siblings(column.project_id)?;
            let mut renamed = columns
                .get(id)
                .cloned()
                .ok_or_else(|| BoardError::not_found(EntityKind::Column, id))?;
            renamed.name = name.clone();
            renamed.updated_at = now_secs();

            let mut batch = MutationBatch::new();
            columns.expect_in(&mut batch);
            batch.put_columns(columns.changed().into_iter().filter(|c| c.id != id));
            batch.push(WriteOp::PutColumn(renamed.clone()));
            Ok(Planned::new(batch, renamed))
        })
    }

    pub async fn reorder_column(
        &self,
        id: ColumnId,
        target: i64,
        actor: UserId,
    ) -> Result<Column, BoardError> {
        let column = self.load_column(id)?;
        self.require_access(column.project_id, actor).await?;

        let moved = self.run(|| {
            let mut columns = self.column_siblings(column.project_id)?;
            let shifts = reindex::reorder(&columns.placements(), id, target)
                .map_err(|e| BoardError::from_order(e, EntityKind::Column))?;
            columns.shift(&shifts);
            let moved = columns
                .get(id)
                .cloned()
                .ok_or_else(|| BoardError::not_found(EntityKind::Column, id))?;

            let mut batch = MutationBatch::new();
            columns.expect_in(&mut batch);
            batch.put_columns(columns.changed());
            Ok(Planned::new(batch, moved))
        })?;

        log::debug!("Reordered column {id} to {}", moved.order_index);
        Ok(moved)
    }

    /// Delete a column. Its tasks are appended, in order, to the remaining
    /// column with the lowest index, or deleted when none remains.
    pub async fn delete_column(
        &self,
        id: ColumnId,
        actor: UserId,
    ) -> Result<ColumnRemoval, BoardError> {
        let column = self.load_column(id)?;
        self.require_owner(column.project_id, actor).await?;
        let project = column.project_id;

        let removal = self.run(|| {
            let mut columns = self.column_siblings(project)?;
            let orphans = self.task_siblings(id)?;

            let shifts = reindex::remove(&columns.placements(), id)
                .map_err(|e| BoardError::from_order(e, EntityKind::Column))?;
            columns.take(id);
            columns.shift(&shifts);

            let mut batch = MutationBatch::new();
            columns.expect_in(&mut batch);
            orphans.expect_in(&mut batch);

            let mut removal = ColumnRemoval {
                column_id: id,
                project_id: project,
                relocated_to: None,
                relocated_tasks: Vec::new(),
                deleted_tasks: Vec::new(),
            };

            match columns.records.first().map(|c| c.id) {
                Some(target) => {
                    let destination = self.task_siblings(target)?;
                    destination.expect_in(&mut batch);
                    batch.put_tasks(destination.changed());

                    let appended = reindex::append_all(destination.len(), &orphans.placements());
                    let mut moved = orphans.records.clone();
                    apply_shifts(&mut moved, &appended);
                    let now = now_secs();
                    for task in &mut moved {
                        task.column_id = target;
                        task.updated_at = now;
                    }
                    batch.put_tasks(&moved);

                    removal.relocated_to = Some(target);
                    removal.relocated_tasks = moved;
                }
                None => {
                    for task in &orphans.records {
                        batch.push(WriteOp::DeleteTask(task.id));
                    }
                    removal.deleted_tasks = orphans.records.iter().map(|t| t.id).collect();
                }
            }

            batch.put_columns(columns.changed());
            batch.push(WriteOp::DeleteColumn(id));
            Ok(Planned::new(batch, removal))
        })?;

        log::info!(
            "Deleted column {id}: {} tasks relocated, {} deleted",
            removal.relocated_tasks.len(),
            removal.deleted_tasks.len()
        );
        Ok(removal)
    }

    pub async fn list_columns(
        &self,
        project: ProjectId,
        actor: UserId,
    ) -> Result<Vec<Column>, BoardError> {
        self.require_project(project)?;
        self.require_access(project, actor).await?;
        self.run(|| {
            let columns = self.column_siblings(project)?;
            Ok(Self::repairing(&columns, |batch, changed| {
                batch.put_columns(changed);
            })
            .map_or_else(
                || Planned::read_only(columns.records.clone()),
                |batch| Planned::new(batch, columns.records.clone()),
            ))
        })
    }

    // ─── Tasks ────────────────────────────────────────────────────────

    /// Append a task to `column`, which must belong to `project`.
    pub async fn create_task(
        &self,
        project: ProjectId,
        column: ColumnId,
        draft: TaskDraft,
        actor: UserId,
    ) -> Result<Task, BoardError> {
        self.require_project(project)?;
        self.require_access(project, actor).await?;

        let task = self.run(|| {
            self.column_in(column, project)?;
            let tasks = self.task_siblings(column)?;
            let created = Task::from_draft(
                project,
                column,
                draft.clone(),
                reindex::append_index(tasks.len()),
            );

            let mut batch = MutationBatch::new();
            tasks.expect_in(&mut batch);
            batch.put_tasks(tasks.changed());
            batch.push(WriteOp::PutTask(created.clone()));
            Ok(Planned::new(batch, created))
        })?;

        log::info!("Created task {} at {} in column {column}", task.id, task.order_index);
        Ok(task)
    }

    /// Edit a task's own fields. Position is left alone.
    pub async fn update_task(
        &self,
        id: TaskId,
        patch: TaskPatch,
        actor: UserId,
    ) -> Result<Task, BoardError> {
        let task = self.load_task(id)?;
        self.require_access(task.project_id, actor).await?;
        if patch.is_empty() {
            return Ok(task);
        }

        self.run(|| {
            let current = self.load_task(id)?;
            let tasks = self.task_siblings(current.column_id)?;
            let mut updated = tasks
                .get(id)
                .cloned()
                .ok_or_else(|| BoardError::not_found(EntityKind::Task, id))?;
            patch.clone().apply_to(&mut updated);

            let mut batch = MutationBatch::new();
            tasks.expect_in(&mut batch);
            batch.put_tasks(tasks.changed().into_iter().filter(|t| t.id != id));
            batch.push(WriteOp::PutTask(updated.clone()));
            Ok(Planned::new(batch, updated))
        })
    }

    /// Relocate a task to the end of `column`. Moving to the column it is
    /// already in changes nothing.
    pub async fn move_task(
        &self,
        id: TaskId,
        column: ColumnId,
        actor: UserId,
    ) -> Result<Task, BoardError> {
        let task = self.load_task(id)?;
        self.require_access(task.project_id, actor).await?;
        if task.column_id == column {
            return Ok(task);
        }
        self.column_in(column, task.project_id)?;

        let moved = self.run(|| {
            let current = self.load_task(id)?;
            if current.column_id == column {
                return Ok(Planned::read_only(current));
            }
            self.column_in(column, current.project_id)?;

            let mut source = self.task_siblings(current.column_id)?;
            let destination = self.task_siblings(column)?;
            let relocation =
                reindex::relocate(&source.placements(), &destination.placements(), id)
                    .map_err(|e| BoardError::from_order(e, EntityKind::Task))?;

            let mut moved = source
                .take(id)
                .ok_or_else(|| BoardError::not_found(EntityKind::Task, id))?;
            source.shift(&relocation.source_shifts);
            moved.column_id = column;
            moved.order_index = relocation.index;
            moved.updated_at = now_secs();

            let mut batch = MutationBatch::new();
            source.expect_in(&mut batch);
            destination.expect_in(&mut batch);
            batch.put_tasks(source.changed());
            batch.put_tasks(destination.changed());
            batch.push(WriteOp::PutTask(moved.clone()));
            Ok(Planned::new(batch, moved))
        })?;

        log::debug!("Moved task {id} to column {column} at {}", moved.order_index);
        Ok(moved)
    }

    pub async fn reorder_task(
        &self,
        id: TaskId,
        target: i64,
        actor: UserId,
    ) -> Result<Task, BoardError> {
        let task = self.load_task(id)?;
        self.require_access(task.project_id, actor).await?;

        let moved = self.run(|| {
            let current = self.load_task(id)?;
            let mut tasks = self.task_siblings(current.column_id)?;
            let shifts = reindex::reorder(&tasks.placements(), id, target)
                .map_err(|e| BoardError::from_order(e, EntityKind::Task))?;
            tasks.shift(&shifts);
            let moved = tasks
                .get(id)
                .cloned()
                .ok_or_else(|| BoardError::not_found(EntityKind::Task, id))?;

            let mut batch = MutationBatch::new();
            tasks.expect_in(&mut batch);
            batch.put_tasks(tasks.changed());
            Ok(Planned::new(batch, moved))
        })?;

        log::debug!("Reordered task {id} to {}", moved.order_index);
        Ok(moved)
    }

    pub async fn delete_task(&self, id: TaskId, actor: UserId) -> Result<TaskRemoval, BoardError> {
        let task = self.load_task(id)?;
        self.require_access(task.project_id, actor).await?;

        let removal = self.run(|| {
            let current = self.load_task(id)?;
            let mut tasks = self.task_siblings(current.column_id)?;
            let shifts = reindex::remove(&tasks.placements(), id)
                .map_err(|e| BoardError::from_order(e, EntityKind::Task))?;
            tasks.take(id);
            tasks.shift(&shifts);

            let mut batch = MutationBatch::new();
            tasks.expect_in(&mut batch);
            batch.put_tasks(tasks.changed());
            batch.push(WriteOp::DeleteTask(id));
            Ok(Planned::new(
                batch,
                TaskRemoval {
                    task_id: id,
                    column_id: current.column_id,
                    project_id: current.project_id,
                },
            ))
        })?;

        log::info!("Deleted task {id} from column {}", removal.column_id);
        Ok(removal)
    }

    /// One task, after repairing its column if the ordering there is broken.
    pub async fn get_task(&self, id: TaskId, actor: UserId) -> Result<Task, BoardError> {
        let task = self.load_task(id)?;
        self.require_access(task.project_id, actor).await?;

        self.run(|| {
            let current = self.load_task(id)?;
            let siblings = self.task_siblings(current.column_id)?;
            let repaired = siblings
                .get(id)
                .cloned()
                .ok_or_else(|| BoardError::not_found(EntityKind::Task, id))?;
            Ok(match Self::repairing(&siblings, |batch, changed| {
                batch.put_tasks(changed);
            }) {
                Some(batch) => Planned::new(batch, repaired),
                None => Planned::read_only(repaired),
            })
        })
    }

    /// Tasks of one column, or of the whole project grouped by column order.
    pub async fn list_tasks(
        &self,
        project: ProjectId,
        column: Option<ColumnId>,
        actor: UserId,
    ) -> Result<Vec<Task>, BoardError> {
        self.require_project(project)?;
        self.require_access(project, actor).await?;

        let columns = match column {
            Some(id) => vec![self.column_in(id, project)?],
            None => self.store.columns_in(project)?,
        };

        let mut tasks = Vec::new();
        for column in columns {
            tasks.extend(self.run(|| {
                let siblings = self.task_siblings(column.id)?;
                Ok(Self::repairing(&siblings, |batch, changed| {
                    batch.put_tasks(changed);
                })
                .map_or_else(
                    || Planned::read_only(siblings.records.clone()),
                    |batch| Planned::new(batch, siblings.records.clone()),
                ))
            })?);
        }
        Ok(tasks)
    }

    // ─── Maintenance ──────────────────────────────────────────────────

    /// Re-sequence a scope to `0..n` if it is broken. Returns how many
    /// entries changed index.
    pub fn compact_scope(&self, scope: ScopeKey) -> Result<usize, BoardError> {
        self.run(|| {
            let planned = match scope {
                ScopeKey::Project(project) => {
                    let columns = self.column_siblings(project)?;
                    let count = columns.changed().len();
                    Self::repairing(&columns, |batch, changed| {
                        batch.put_columns(changed);
                    })
                    .map(|batch| Planned::new(batch, count))
                }
                ScopeKey::Column(column) => {
                    let tasks = self.task_siblings(column)?;
                    let count = tasks.changed().len();
                    Self::repairing(&tasks, |batch, changed| {
                        batch.put_tasks(changed);
                    })
                    .map(|batch| Planned::new(batch, count))
                }
            };
            Ok(planned.unwrap_or_else(|| Planned::read_only(0)))
        })
    }

    /// Remove a project with all of its columns and tasks. Owner only.
    pub async fn delete_project(&self, project: ProjectId, actor: UserId) -> Result<(), BoardError> {
        self.require_project(project)?;
        self.require_owner(project, actor).await?;

        self.run(|| {
            let mut batch = MutationBatch::new();
            batch.expect(
                ScopeKey::Project(project),
                self.store.scope_version(ScopeKey::Project(project))?,
            );
            for column in self.store.columns_in(project)? {
                let scope = ScopeKey::Column(column.id);
                batch.expect(scope, self.store.scope_version(scope)?);
                for task in self.store.tasks_in(column.id)? {
                    batch.push(WriteOp::DeleteTask(task.id));
                }
                batch.push(WriteOp::DeleteColumn(column.id));
            }
            batch.push(WriteOp::DeleteProject(project));
            Ok(Planned::new(batch, ()))
        })?;

        log::info!("Deleted project {project}");
        Ok(())
    }

    // ─── Internals ────────────────────────────────────────────────────

    /// Compute, commit, and recompute from a fresh snapshot on conflict.
    fn run<T>(
        &self,
        mut plan: impl FnMut() -> Result<Planned<T>, BoardError>,
    ) -> Result<T, BoardError> {
        let attempts = self.config.max_conflict_retries + 1;
        let mut last_conflict = None;

        for attempt in 1..=attempts {
            let Planned { batch, value } = plan()?;
            if batch.is_empty() {
                return Ok(value);
            }
            match self.commit(&batch) {
                Ok(()) => return Ok(value),
                Err(StoreError::Conflict { scope, expected, found }) => {
                    log::debug!(
                        "Conflict on {scope} (expected v{expected}, found v{found}), attempt {attempt}/{attempts}"
                    );
                    last_conflict = Some(scope);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let scope = last_conflict.ok_or_else(|| {
            BoardError::Store(StoreError::Database("no commit attempted".to_string()))
        })?;
        log::warn!("Giving up on {scope} after {attempts} conflicting attempts");
        Err(BoardError::Conflict { scope, attempts })
    }

    fn commit(&self, batch: &MutationBatch) -> Result<(), StoreError> {
        match self.boundary().commit(self.store.as_ref(), batch) {
            Err(StoreError::TransactionUnavailable) => {
                log::warn!(
                    "Store refused an atomic batch; switching to sequential writes for good"
                );
                self.degraded.store(true, Ordering::Release);
                SequentialBoundary.commit(self.store.as_ref(), batch)
            }
            other => other,
        }
    }

    /// A batch writing back the records compaction changed, if any.
    fn repairing<'a, T: Positioned + Clone + PartialEq + 'a>(
        siblings: &'a Siblings<T>,
        put: impl FnOnce(&mut MutationBatch, Vec<&'a T>),
    ) -> Option<MutationBatch> {
        let changed = siblings.changed();
        if changed.is_empty() {
            return None;
        }
        let mut batch = MutationBatch::new();
        siblings.expect_in(&mut batch);
        put(&mut batch, changed);
        Some(batch)
    }

    fn column_siblings(&self, project: ProjectId) -> Result<Siblings<Column>, StoreError> {
        let scope = ScopeKey::Project(project);
        let version = self.store.scope_version(scope)?;
        Ok(Siblings::new(scope, version, self.store.columns_in(project)?))
    }

    fn task_siblings(&self, column: ColumnId) -> Result<Siblings<Task>, StoreError> {
        let scope = ScopeKey::Column(column);
        let version = self.store.scope_version(scope)?;
        Ok(Siblings::new(scope, version, self.store.tasks_in(column)?))
    }

    fn require_project(&self, project: ProjectId) -> Result<(), BoardError> {
        match self.store.project(project)? {
            Some(_) => Ok(()),
            None => Err(BoardError::not_found(EntityKind::Project, project)),
        }
    }

    fn load_column(&self, id: ColumnId) -> Result<Column, BoardError> {
        self.store
            .column(id)?
            .ok_or_else(|| BoardError::not_found(EntityKind::Column, id))
    }

    fn load_task(&self, id: TaskId) -> Result<Task, BoardError> {
        self.store
            .task(id)?
            .ok_or_else(|| BoardError::not_found(EntityKind::Task, id))
    }

    /// A column that exists and belongs to `project`.
    fn column_in(&self, id: ColumnId, project: ProjectId) -> Result<Column, BoardError> {
        match self.store.column(id)? {
            Some(column) if column.project_id == project => Ok(column),
            Some(_) => Err(BoardError::InvalidScope(format!(
                "column {id} belongs to another project"
            ))),
            None => Err(BoardError::InvalidScope(format!("column {id} does not exist"))),
        }
    }

    async fn require_access(&self, project: ProjectId, user: UserId) -> Result<(), BoardError> {
        if self.gate.check_access(project, user).await? {
            Ok(())
        } else {
            Err(BoardError::Forbidden { user, project })
        }
    }

    async fn require_owner(&self, project: ProjectId, user: UserId) -> Result<(), BoardError> {
        if self.gate.check_owner(project, user).await? {
            Ok(())
        } else {
            Err(BoardError::Forbidden { user, project })
        }
    }
}
