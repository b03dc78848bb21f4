//! Project rooms: fan-out of board events to every joined session.
//!
//! Each room owns one tokio broadcast channel. Events are encoded once and
//! shared as `Arc<str>`; every member session holds its own receiver that
//! buffers up to `capacity` frames. A session that falls further behind
//! loses the oldest frames and the loss is logged.
//!
//! Delivery is fire-and-forget: no acknowledgment, no retry. Members
//! include the originator of the event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use taskboard_core::{ProjectId, UserId};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerEvent};

pub type SessionId = Uuid;

/// A session's membership entry in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub session_id: SessionId,
    pub user_id: UserId,
}

impl PeerInfo {
    pub fn new(session_id: SessionId, user_id: UserId) -> Self {
        Self {
            session_id,
            user_id,
        }
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Counters updated on the send path without taking the peers lock.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// The broadcast group of a single project room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<str>>,
    peers: RwLock<HashMap<SessionId, PeerInfo>>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` frames are buffered per member before the slowest
    /// members start losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            capacity,
            atomic_stats: AtomicBroadcastStats::new(),
        }
    }

    /// Add a member. The receiver sees every frame sent from now on.
    pub async fn add_peer(&self, info: PeerInfo) -> broadcast::Receiver<Arc<str>> {
        let mut peers = self.peers.write().await;
        peers.insert(info.session_id, info);
        self.sender.subscribe()
    }

    pub async fn remove_peer(&self, session_id: &SessionId) -> Option<PeerInfo> {
        self.peers.write().await.remove(session_id)
    }

    /// Encode once and send to every member. Returns the receiver count.
    pub fn broadcast(&self, event: &ServerEvent) -> Result<usize, ProtocolError> {
        let encoded: Arc<str> = Arc::from(event.encode()?);
        Ok(self.broadcast_raw(encoded))
    }

    /// Send a pre-encoded frame.
    pub fn broadcast_raw(&self, encoded: Arc<str>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn record_dropped(&self, count: u64) {
        self.atomic_stats
            .messages_dropped
            .fetch_add(count, Ordering::Relaxed);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn has_peer(&self, session_id: &SessionId) -> bool {
        self.peers.read().await.contains_key(session_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        let peers = self.peers.read().await;
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: peers.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Registry from project to room.
///
/// One registry per gateway; join, leave and room cleanup all run under
/// the registry write lock so a room is never dropped while being joined.
pub struct RoomManager {
    rooms: RwLock<HashMap<ProjectId, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the room for `project`.
    pub async fn get_or_create(&self, project: ProjectId) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&project) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(project)
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone()
    }

    pub async fn get(&self, project: &ProjectId) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(project).cloned()
    }

    /// Add a session to a project's room, creating the room if needed.
    pub async fn join(
        &self,
        project: ProjectId,
        info: PeerInfo,
    ) -> (Arc<BroadcastGroup>, broadcast::Receiver<Arc<str>>) {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(project)
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone();
        let rx = room.add_peer(info).await;
        (room, rx)
    }

    /// Remove a session from a room; the room goes away once empty.
    pub async fn leave(&self, project: &ProjectId, session_id: &SessionId) -> Option<PeerInfo> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get(project)?.clone();
        let removed = room.remove_peer(session_id).await;
        if room.peer_count().await == 0 {
            rooms.remove(project);
            log::debug!("Closed empty room for project {project}");
        }
        removed
    }

    /// Deliver an event to the project's room. No room, no delivery.
    pub async fn broadcast(
        &self,
        project: ProjectId,
        event: &ServerEvent,
    ) -> Result<usize, ProtocolError> {
        match self.get(&project).await {
            Some(room) => room.broadcast(event),
            None => Ok(0),
        }
    }

    /// Route a room-wide event to the room it names. Encoding failures are
    /// logged and count as no delivery.
    pub async fn publish(&self, event: &ServerEvent) -> usize {
        let Some(project) = event.project_id() else {
            return 0;
        };
        match self.broadcast(project, event).await {
            Ok(count) => {
                log::trace!("Delivered event to {count} sessions in project {project}");
                count
            }
            Err(e) => {
                log::error!("Failed to broadcast to project {project}: {e}");
                0
            }
        }
    }

    pub async fn remove_if_empty(&self, project: &ProjectId) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(project) {
            if room.peer_count().await == 0 {
                rooms.remove(project);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_projects(&self) -> Vec<ProjectId> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

/// Pump a room receiver into a session's outbound queue until either end
/// goes away.
pub fn forward(
    mut rx: broadcast::Receiver<Arc<str>>,
    outbound: mpsc::Sender<Arc<str>>,
    room: Arc<BroadcastGroup>,
    session_id: SessionId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    if outbound.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Session {session_id} lagged by {n} messages");
                    room.record_dropped(n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskboard_core::{Column, TaskDraft, Task};

    fn peer() -> PeerInfo {
        PeerInfo::new(Uuid::new_v4(), Uuid::new_v4())
    }

    fn created_in(project: ProjectId) -> ServerEvent {
        let column = Column::new(project, "Todo", 0);
        ServerEvent::TaskCreated(Task::from_draft(project, column.id, TaskDraft::titled("t"), 0))
    }

    #[tokio::test]
    async fn test_broadcast_group_add_remove() {
        let group = BroadcastGroup::new(16);
        let alice = peer();

        let _rx = group.add_peer(alice.clone()).await;
        assert_eq!(group.peer_count().await, 1);
        assert!(group.has_peer(&alice.session_id).await);

        assert_eq!(group.remove_peer(&alice.session_id).await, Some(alice.clone()));
        assert_eq!(group.peer_count().await, 0);
        assert!(!group.has_peer(&alice.session_id).await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_originator_too() {
        let group = BroadcastGroup::new(16);
        let mut rx1 = group.add_peer(peer()).await;
        let mut rx2 = group.add_peer(peer()).await;

        let event = created_in(Uuid::new_v4());
        assert_eq!(group.broadcast(&event).unwrap(), 2);

        let frame1 = rx1.recv().await.unwrap();
        let frame2 = rx2.recv().await.unwrap();
        assert_eq!(frame1, frame2);
        assert_eq!(ServerEvent::decode(&frame1).unwrap(), event);
    }

    #[tokio::test]
    async fn test_broadcast_stats() {
        let group = BroadcastGroup::new(16);
        let _rx = group.add_peer(peer()).await;

        group.broadcast_raw(Arc::from("a"));
        group.broadcast_raw(Arc::from("b"));
        group.record_dropped(3);

        let stats = group.stats().await;
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_dropped, 3);
        assert_eq!(stats.active_peers, 1);
        assert_eq!(group.capacity(), 16);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let rooms = RoomManager::new(16);
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();

        let (_, mut in_p1) = rooms.join(p1, peer()).await;
        let (_, mut also_p1) = rooms.join(p1, peer()).await;
        let (_, mut in_p2) = rooms.join(p2, peer()).await;

        let event = created_in(p1);
        assert_eq!(rooms.broadcast(p1, &event).await.unwrap(), 2);

        assert!(in_p1.recv().await.is_ok());
        assert!(also_p1.recv().await.is_ok());
        assert!(matches!(
            in_p2.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_broadcast_without_room_is_dropped() {
        let rooms = RoomManager::new(16);
        let project = Uuid::new_v4();
        assert_eq!(rooms.broadcast(project, &created_in(project)).await.unwrap(), 0);
        assert_eq!(rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_closes_empty_room() {
        let rooms = RoomManager::new(16);
        let project = Uuid::new_v4();
        let alice = peer();
        let bob = peer();

        rooms.join(project, alice.clone()).await;
        rooms.join(project, bob.clone()).await;
        assert_eq!(rooms.room_count().await, 1);

        assert_eq!(rooms.leave(&project, &alice.session_id).await, Some(alice));
        assert_eq!(rooms.room_count().await, 1);
        rooms.leave(&project, &bob.session_id).await;
        assert_eq!(rooms.room_count().await, 0);
        assert!(rooms.leave(&project, &bob.session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_room_manager_get_or_create() {
        let rooms = RoomManager::new(16);
        let project = Uuid::new_v4();

        let a = rooms.get_or_create(project).await;
        let b = rooms.get_or_create(project).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(rooms.active_projects().await, vec![project]);

        assert!(rooms.remove_if_empty(&project).await);
        assert!(rooms.get(&project).await.is_none());
    }

    #[tokio::test]
    async fn test_forwarder_delivers_and_counts_lag() {
        let rooms = RoomManager::new(2);
        let project = Uuid::new_v4();
        let me = peer();
        let (room, rx) = rooms.join(project, me.clone()).await;

        // Overrun the 2-slot channel before the forwarder starts reading
        for frame in ["1", "2", "3", "4"] {
            room.broadcast_raw(Arc::from(frame));
        }

        let (tx, mut out) = mpsc::channel(8);
        let handle = forward(rx, tx, room.clone(), me.session_id);

        assert_eq!(&*out.recv().await.unwrap(), "3");
        assert_eq!(&*out.recv().await.unwrap(), "4");
        assert_eq!(room.stats().await.messages_dropped, 2);

        handle.abort();
    }
}
