//! Operation-level errors shared by the HTTP surface and the realtime gateway.

use std::fmt;
use taskboard_core::{OrderError, ProjectId, UserId};
use uuid::Uuid;

use crate::storage::{ScopeKey, StoreError};

/// Record kinds named in `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Project,
    Column,
    Task,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Project => "project",
            EntityKind::Column => "column",
            EntityKind::Task => "task",
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoardError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    #[error("user {user} is not allowed to do that in project {project}")]
    Forbidden { user: UserId, project: ProjectId },

    #[error("index {target} is outside 0..{len}")]
    InvalidIndex { target: i64, len: usize },

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("{scope} kept changing underneath the write; gave up after {attempts} attempts")]
    Conflict { scope: ScopeKey, attempts: u32 },

    #[error("missing or invalid credential")]
    Unauthorized,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BoardError {
    pub fn not_found(kind: EntityKind, id: Uuid) -> Self {
        BoardError::NotFound { kind, id }
    }

    /// Stable machine-readable code used on both wire surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            BoardError::NotFound { .. } => "not_found",
            BoardError::Forbidden { .. } => "forbidden",
            BoardError::InvalidIndex { .. } => "invalid_index",
            BoardError::InvalidScope(_) => "invalid_scope",
            BoardError::Conflict { .. } => "conflict",
            BoardError::Unauthorized => "unauthorized",
            BoardError::InvalidCommand(_) => "invalid_command",
            BoardError::Store(_) => "store",
        }
    }

    /// Map a Reindexer failure, naming the record kind that went missing.
    pub(crate) fn from_order(err: OrderError, kind: EntityKind) -> Self {
        match err {
            OrderError::InvalidIndex { target, len } => BoardError::InvalidIndex { target, len },
            OrderError::UnknownEntry(id) => BoardError::NotFound { kind, id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let id = Uuid::new_v4();
        let errors = [
            BoardError::not_found(EntityKind::Task, id),
            BoardError::Forbidden { user: id, project: id },
            BoardError::InvalidIndex { target: 9, len: 3 },
            BoardError::InvalidScope("x".into()),
            BoardError::Conflict {
                scope: ScopeKey::Column(id),
                attempts: 6,
            },
            BoardError::Unauthorized,
            BoardError::InvalidCommand("x".into()),
            BoardError::Store(StoreError::Poisoned),
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_order_error_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(
            BoardError::from_order(OrderError::InvalidIndex { target: -1, len: 2 }, EntityKind::Column),
            BoardError::InvalidIndex { target: -1, len: 2 }
        );
        assert_eq!(
            BoardError::from_order(OrderError::UnknownEntry(id), EntityKind::Task),
            BoardError::not_found(EntityKind::Task, id)
        );
    }

    #[test]
    fn test_not_found_message() {
        let id = Uuid::nil();
        assert_eq!(
            BoardError::not_found(EntityKind::Column, id).to_string(),
            format!("column {id} not found")
        );
    }
}
