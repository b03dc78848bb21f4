//! REST mutations reach realtime sessions.
//!
//! The router and the gateway share one mutator and one room registry, as
//! the server binary wires them.

use axum::body::Body;
use axum::http::{header::AUTHORIZATION, Method, Request, StatusCode};
use std::sync::Arc;
use taskboard_collab::access::{StaticTokenVerifier, StoreAccessGate};
use taskboard_collab::broadcast::RoomManager;
use taskboard_collab::client::{BoardClient, ClientEvent};
use taskboard_collab::http::{router, AppState};
use taskboard_collab::mutator::TransactionalMutator;
use taskboard_collab::protocol::ServerEvent;
use taskboard_collab::server::{RealtimeGateway, ServerConfig};
use taskboard_collab::storage::{MemoryStore, PositionStore};
use taskboard_core::{Column, Project};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tower::ServiceExt;
use uuid::Uuid;

async fn next(events: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

#[tokio::test]
async fn test_http_mutation_reaches_realtime_session() {
    let store: Arc<dyn PositionStore> = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let viewer = Uuid::new_v4();
    let project = Project::new("Shared", owner).with_members([viewer]);
    store.put_project(&project).unwrap();

    let gate = Arc::new(StoreAccessGate::new(store.clone()));
    let mutator = Arc::new(TransactionalMutator::new(store, gate));
    let rooms = Arc::new(RoomManager::new(32));
    let verifier = Arc::new(
        StaticTokenVerifier::new()
            .with_token("owner", owner)
            .with_token("viewer", viewer),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let gateway = RealtimeGateway::new(
        ServerConfig::default(),
        mutator.clone(),
        rooms.clone(),
        verifier.clone(),
    );
    tokio::spawn(async move {
        gateway.serve(listener).await.unwrap();
    });
    let app = router(AppState::new(mutator, rooms, verifier, true));

    // Viewer follows the board over the socket
    let mut client = BoardClient::new(format!("ws://127.0.0.1:{port}"), "viewer");
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    client.join(project.id).await.unwrap();
    assert_eq!(next(&mut events).await, ClientEvent::Connected);
    assert_eq!(
        next(&mut events).await,
        ClientEvent::Server(ServerEvent::JoinedProject {
            project_id: project.id
        })
    );

    // Owner edits over REST
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/columns/projects/{}/columns", project.id))
        .header(AUTHORIZATION, "Bearer owner")
        .body(Body::from(r#"{"name":"Inbox"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let column: Column = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(
        next(&mut events).await,
        ClientEvent::Server(ServerEvent::ColumnCreated(column))
    );
}
