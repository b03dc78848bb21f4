//! # taskboard-collab — Storage, mutation and realtime fan-out for boards
//!
//! Keeps columns and tasks densely ordered under concurrent edits and
//! pushes every committed change to the members of the project.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   REST (axum)    ┌──────────────────────┐
//! │ HTTP client │ ───────────────► │                      │
//! └─────────────┘                  │ TransactionalMutator │
//! ┌─────────────┐   WebSocket      │ (reindex + retries)  │
//! │ BoardClient │ ◄──────────────► │                      │
//! └─────────────┘  RealtimeGateway └──────────┬───────────┘
//!                                             │ MutationBatch
//!                                             ▼
//!                                  ┌──────────────────────┐
//!                                  │ PositionStore        │
//!                                  │ (RocksDB / memory)   │
//!                                  └──────────────────────┘
//!        committed event
//!   ───────────────────────► RoomManager ── project:{id} ── BroadcastGroup
//! ```
//!
//! ## Modules
//!
//! - [`storage`] — `PositionStore` trait, RocksDB and in-memory stores
//! - [`mutator`] — Atomic read-reindex-write operations, degraded fallback
//! - [`access`] — Project membership and credential seams
//! - [`protocol`] — JSON realtime events
//! - [`broadcast`] — Per-project rooms with backpressure
//! - [`server`] — WebSocket gateway and server configuration
//! - [`http`] — REST routes
//! - [`client`] — WebSocket client

pub mod access;
pub mod broadcast;
pub mod client;
pub mod error;
pub mod http;
pub mod mutator;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use access::{AccessGate, CredentialVerifier, StaticTokenVerifier, StoreAccessGate};
pub use broadcast::{BroadcastGroup, BroadcastStats, PeerInfo, RoomManager, SessionId};
pub use client::{BoardClient, ClientEvent, ConnectionState};
pub use error::{BoardError, EntityKind};
pub use http::{router, AppState};
pub use mutator::{
    ColumnRemoval, CommitMode, MutatorConfig, TaskRemoval, TransactionalMutator,
};
pub use protocol::{ClientCommand, ProtocolError, ServerEvent};
pub use server::{ConfigError, RealtimeGateway, ServerConfig, ServerStats, SessionState};
pub use storage::{
    MemoryStore, MutationBatch, PositionStore, RocksStore, ScopeKey, StoreConfig, StoreError,
    WriteOp,
};
