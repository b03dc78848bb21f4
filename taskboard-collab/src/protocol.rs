//! JSON protocol for the realtime channel.
//!
//! Every frame is a WebSocket text message:
//! ```text
//! { "event": "task:move", "data": { "taskId": "...", "columnId": "..." } }
//! ```
//!
//! Inbound commands are [`ClientCommand`]; everything the gateway emits is
//! a [`ServerEvent`]. Room events carry the full entity so every member,
//! the originator included, converges on the stored state.

use serde::{Deserialize, Serialize};
use taskboard_core::{Column, ParentRef, ProjectId, Task, TaskDraft, TaskId, TaskPatch};

use crate::error::BoardError;
use crate::mutator::{ColumnRemoval, TaskRemoval};

/// Commands a client sends over the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    #[serde(rename = "task:join-project")]
    JoinProject { project_id: ProjectId },

    #[serde(rename = "task:leave-project")]
    LeaveProject { project_id: ProjectId },

    #[serde(rename = "task:create")]
    CreateTask {
        project_id: ProjectId,
        column_id: ParentRef,
        #[serde(flatten)]
        draft: TaskDraft,
    },

    #[serde(rename = "task:update")]
    UpdateTask {
        task_id: TaskId,
        #[serde(flatten)]
        patch: TaskPatch,
    },

    #[serde(rename = "task:delete")]
    DeleteTask { task_id: TaskId },

    #[serde(rename = "task:move")]
    MoveTask { task_id: TaskId, column_id: ParentRef },

    #[serde(rename = "task:reorder")]
    ReorderTask { task_id: TaskId, order_index: i64 },
}

impl ClientCommand {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Wire name of the command, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::JoinProject { .. } => "task:join-project",
            ClientCommand::LeaveProject { .. } => "task:leave-project",
            ClientCommand::CreateTask { .. } => "task:create",
            ClientCommand::UpdateTask { .. } => "task:update",
            ClientCommand::DeleteTask { .. } => "task:delete",
            ClientCommand::MoveTask { .. } => "task:move",
            ClientCommand::ReorderTask { .. } => "task:reorder",
        }
    }
}

/// Events the server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    // Originator only
    #[serde(rename = "task:joined-project")]
    JoinedProject { project_id: ProjectId },

    #[serde(rename = "task:left-project")]
    LeftProject { project_id: ProjectId },

    #[serde(rename = "task:error")]
    Error { message: String, code: String },

    // Room-wide
    #[serde(rename = "task:created")]
    TaskCreated(Task),

    #[serde(rename = "task:updated")]
    TaskUpdated(Task),

    #[serde(rename = "task:deleted")]
    TaskDeleted(TaskRemoval),

    #[serde(rename = "task:moved")]
    TaskMoved(Task),

    #[serde(rename = "task:reordered")]
    TaskReordered(Task),

    #[serde(rename = "column:created")]
    ColumnCreated(Column),

    #[serde(rename = "column:updated")]
    ColumnUpdated(Column),

    #[serde(rename = "column:reordered")]
    ColumnReordered(Column),

    #[serde(rename = "column:deleted")]
    ColumnDeleted(ColumnRemoval),
}

impl ServerEvent {
    pub fn error(err: &BoardError) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
            code: err.code().to_string(),
        }
    }

    /// The room a room-wide event belongs to; `None` for originator-only events.
    pub fn project_id(&self) -> Option<ProjectId> {
        match self {
            ServerEvent::JoinedProject { .. }
            | ServerEvent::LeftProject { .. }
            | ServerEvent::Error { .. } => None,
            ServerEvent::TaskCreated(t)
            | ServerEvent::TaskUpdated(t)
            | ServerEvent::TaskMoved(t)
            | ServerEvent::TaskReordered(t) => Some(t.project_id),
            ServerEvent::TaskDeleted(r) => Some(r.project_id),
            ServerEvent::ColumnCreated(c)
            | ServerEvent::ColumnUpdated(c)
            | ServerEvent::ColumnReordered(c) => Some(c.project_id),
            ServerEvent::ColumnDeleted(r) => Some(r.project_id),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("handshake rejected: {0}")]
    Handshake(String),
    #[error("connection closed")]
    ConnectionClosed,
}
