//! # taskboard-core — board records and ordering rules
//!
//! Projects own an ordered list of columns, columns own an ordered list of
//! tasks. Every entry carries an `order_index` that is only meaningful
//! inside its scope (the project for a column, the column for a task).
//!
//! ```text
//! Project ─┬─ Column(0) ─┬─ Task(0)
//!          │             └─ Task(1)
//!          ├─ Column(1) ─── Task(0)
//!          └─ Column(2)
//! ```
//!
//! The [`reindex`] module holds the pure position arithmetic. Nothing in
//! this crate performs I/O.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

pub mod parent;
pub mod reindex;

pub use parent::ParentRef;
pub use reindex::{IndexShift, OrderError, Placement};

pub type UserId = Uuid;
pub type ProjectId = Uuid;
pub type ColumnId = Uuid;
pub type TaskId = Uuid;

/// Seconds since the UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// An entry that lives at a position inside a scope.
pub trait Positioned {
    fn id(&self) -> Uuid;
    fn order_index(&self) -> u32;
    fn set_order_index(&mut self, index: u32);
    fn created_at(&self) -> u64;

    fn placement(&self) -> Placement {
        Placement {
            id: self.id(),
            order_index: self.order_index(),
            created_at: self.created_at(),
        }
    }
}

/// Apply index shifts to the matching records. Returns the ids that moved.
pub fn apply_shifts<T: Positioned>(records: &mut [T], shifts: &[IndexShift]) -> Vec<Uuid> {
    let mut touched = Vec::with_capacity(shifts.len());
    for shift in shifts {
        if let Some(record) = records.iter_mut().find(|r| r.id() == shift.id) {
            record.set_order_index(shift.to);
            touched.push(shift.id);
        }
    }
    touched
}

/// Collect the placements of a sibling list.
pub fn placements<T: Positioned>(records: &[T]) -> Vec<Placement> {
    records.iter().map(Positioned::placement).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// A project as far as the board core cares: who may touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub owner_id: UserId,
    pub member_ids: Vec<UserId>,
}

impl Project {
    pub fn new(name: impl Into<String>, owner_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner_id,
            member_ids: Vec::new(),
        }
    }

    pub fn with_members(mut self, members: impl IntoIterator<Item = UserId>) -> Self {
        self.member_ids.extend(members);
        self
    }

    pub fn is_owner(&self, user: UserId) -> bool {
        self.owner_id == user
    }

    /// Owner or listed member.
    pub fn has_member(&self, user: UserId) -> bool {
        self.is_owner(user) || self.member_ids.contains(&user)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: ColumnId,
    pub project_id: ProjectId,
    pub name: String,
    pub order_index: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Column {
    pub fn new(project_id: ProjectId, name: impl Into<String>, order_index: u32) -> Self {
        let now = now_secs();
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.into(),
            order_index,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Positioned for Column {
    fn id(&self) -> Uuid {
        self.id
    }
    fn order_index(&self) -> u32 {
        self.order_index
    }
    fn set_order_index(&mut self, index: u32) {
        self.order_index = index;
    }
    fn created_at(&self) -> u64 {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub column_id: ColumnId,
    pub project_id: ProjectId,
    pub title: String,
    pub description: String,
    pub order_index: u32,
    pub assignees: Vec<UserId>,
    pub priority: Priority,
    /// UNIX seconds
    pub due_date: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Task {
    /// Build a task from a draft, placed at `order_index` of `column_id`.
    pub fn from_draft(
        project_id: ProjectId,
        column_id: ColumnId,
        draft: TaskDraft,
        order_index: u32,
    ) -> Self {
        let now = now_secs();
        Self {
            id: Uuid::new_v4(),
            column_id,
            project_id,
            title: draft.title,
            description: draft.description,
            order_index,
            assignees: draft.assignees,
            priority: draft.priority,
            due_date: draft.due_date,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Positioned for Task {
    fn id(&self) -> Uuid {
        self.id
    }
    fn order_index(&self) -> u32 {
        self.order_index
    }
    fn set_order_index(&mut self, index: u32) {
        self.order_index = index;
    }
    fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// Fields a client supplies when creating a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub assignees: Vec<UserId>,
    pub priority: Priority,
    pub due_date: Option<u64>,
}

impl TaskDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial edit of a task's own fields. Position fields are not editable here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub assignees: Option<Vec<UserId>>,
    pub priority: Option<Priority>,
    pub due_date: Option<u64>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.assignees.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
    }

    /// Write the present fields into `task`, bumping `updated_at`.
    pub fn apply_to(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(assignees) = self.assignees {
            task.assignees = assignees;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due) = self.due_date {
            task.due_date = Some(due);
        }
        task.updated_at = now_secs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_membership() {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let project = Project::new("Roadmap", owner).with_members([member]);

        assert!(project.is_owner(owner));
        assert!(!project.is_owner(member));
        assert!(project.has_member(owner));
        assert!(project.has_member(member));
        assert!(!project.has_member(Uuid::new_v4()));
    }

    #[test]
    fn test_task_from_draft() {
        let project = Uuid::new_v4();
        let column = Uuid::new_v4();
        let draft = TaskDraft {
            title: "Write docs".into(),
            priority: Priority::High,
            ..TaskDraft::default()
        };

        let task = Task::from_draft(project, column, draft, 3);
        assert_eq!(task.order_index, 3);
        assert_eq!(task.column_id, column);
        assert_eq!(task.project_id, project);
        assert_eq!(task.priority, Priority::High);
        assert!(task.description.is_empty());
    }

    #[test]
    fn test_patch_leaves_position_alone() {
        let mut task = Task::from_draft(Uuid::new_v4(), Uuid::new_v4(), TaskDraft::titled("a"), 2);
        let patch = TaskPatch {
            title: Some("b".into()),
            due_date: Some(1_700_000_000),
            ..TaskPatch::default()
        };
        assert!(!patch.is_empty());

        patch.apply_to(&mut task);
        assert_eq!(task.title, "b");
        assert_eq!(task.due_date, Some(1_700_000_000));
        assert_eq!(task.order_index, 2);
    }

    #[test]
    fn test_apply_shifts_only_touches_listed() {
        let project = Uuid::new_v4();
        let mut columns = vec![
            Column::new(project, "Todo", 0),
            Column::new(project, "Doing", 1),
        ];
        let shifts = vec![IndexShift {
            id: columns[1].id,
            from: 1,
            to: 0,
        }];

        let touched = apply_shifts(&mut columns, &shifts);
        assert_eq!(touched, vec![columns[1].id]);
        assert_eq!(columns[0].order_index, 0);
        assert_eq!(columns[1].order_index, 0);
    }

    #[test]
    fn test_priority_wire_names() {
        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, "\"high\"");
        let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(parsed, Priority::Low);
    }

    #[test]
    fn test_draft_defaults_from_json() {
        let draft: TaskDraft = serde_json::from_str(r#"{"title":"Ship it"}"#).unwrap();
        assert_eq!(draft.title, "Ship it");
        assert_eq!(draft.priority, Priority::Medium);
        assert!(draft.assignees.is_empty());
        assert!(draft.due_date.is_none());
    }
}
