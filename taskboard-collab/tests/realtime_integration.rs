//! Integration tests for the realtime gateway.
//!
//! These tests start a real gateway and connect real clients, verifying
//! authentication, room routing and originator-only errors end to end.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use taskboard_collab::access::{StaticTokenVerifier, StoreAccessGate};
use taskboard_collab::broadcast::RoomManager;
use taskboard_collab::client::{BoardClient, ClientEvent, ConnectionState};
use taskboard_collab::mutator::TransactionalMutator;
use taskboard_collab::protocol::{ClientCommand, ProtocolError, ServerEvent};
use taskboard_collab::server::{RealtimeGateway, ServerConfig};
use taskboard_collab::storage::{MemoryStore, PositionStore};
use taskboard_core::{Column, ParentRef, Project, TaskDraft, UserId};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

struct Board {
    url: String,
    gateway: Arc<RealtimeGateway>,
    mutator: Arc<TransactionalMutator>,
    project: Project,
    other_project: Project,
    todo: Column,
    done: Column,
}

/// Start a gateway on a free port with two projects:
/// `alice` owns the main one with `bob` as member, `carol` owns the other,
/// `eve` has a valid token but no membership.
async fn start_board() -> Board {
    let store: Arc<dyn PositionStore> = Arc::new(MemoryStore::new());
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let carol = Uuid::new_v4();
    let eve = Uuid::new_v4();

    let project = Project::new("Main", alice).with_members([bob]);
    let other_project = Project::new("Other", carol);
    store.put_project(&project).unwrap();
    store.put_project(&other_project).unwrap();

    let gate = Arc::new(StoreAccessGate::new(store.clone()));
    let mutator = Arc::new(TransactionalMutator::new(store, gate));
    let todo = mutator.create_column(project.id, "Todo", alice).await.unwrap();
    let done = mutator.create_column(project.id, "Done", alice).await.unwrap();

    let verifier = StaticTokenVerifier::new()
        .with_token("alice", alice)
        .with_token("bob", bob)
        .with_token("carol", carol)
        .with_token("eve", eve);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ServerConfig {
        ws_bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
        ..ServerConfig::default()
    };
    let gateway = Arc::new(RealtimeGateway::new(
        config,
        mutator.clone(),
        Arc::new(RoomManager::new(64)),
        Arc::new(verifier),
    ));
    let serving = gateway.clone();
    tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });

    Board {
        url: format!("ws://127.0.0.1:{port}"),
        gateway,
        mutator,
        project,
        other_project,
        todo,
        done,
    }
}

/// Connect as `token` and drain the `Connected` event.
async fn connect(board: &Board, token: &str) -> (BoardClient, mpsc::Receiver<ClientEvent>) {
    let mut client = BoardClient::new(&board.url, token);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    assert_eq!(next(&mut events).await, ClientEvent::Connected);
    (client, events)
}

async fn next(events: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

async fn next_server(events: &mut mpsc::Receiver<ClientEvent>) -> ServerEvent {
    match next(events).await {
        ClientEvent::Server(event) => event,
        other => panic!("Expected a server event, got {other:?}"),
    }
}

async fn assert_silent(events: &mut mpsc::Receiver<ClientEvent>) {
    let result = timeout(Duration::from_millis(200), events.recv()).await;
    assert!(result.is_err(), "Expected no event, got {result:?}");
}

/// Connect as `token` and join the main project.
async fn joined(board: &Board, token: &str) -> (BoardClient, mpsc::Receiver<ClientEvent>) {
    let (client, mut events) = connect(board, token).await;
    client.join(board.project.id).await.unwrap();
    assert_eq!(
        next_server(&mut events).await,
        ServerEvent::JoinedProject {
            project_id: board.project.id
        }
    );
    (client, events)
}

fn create_in(board: &Board, title: &str) -> ClientCommand {
    ClientCommand::CreateTask {
        project_id: board.project.id,
        column_id: ParentRef::Unresolved(board.todo.id),
        draft: TaskDraft::titled(title),
    }
}

#[tokio::test]
async fn test_client_connects_with_query_token() {
    let board = start_board().await;
    let (client, _events) = joined(&board, "alice").await;
    assert_eq!(client.connection_state().await, ConnectionState::Connected);

    let stats = board.gateway.stats().await;
    assert_eq!(stats.total_connections, 1);
}

#[tokio::test]
async fn test_both_members_receive_created_task() {
    let board = start_board().await;
    let (alice, mut alice_events) = joined(&board, "alice").await;
    let (_bob, mut bob_events) = joined(&board, "bob").await;

    alice.send(&create_in(&board, "Write release notes")).await.unwrap();

    let seen_by_alice = next_server(&mut alice_events).await;
    let seen_by_bob = next_server(&mut bob_events).await;
    assert_eq!(seen_by_alice, seen_by_bob);

    match seen_by_alice {
        ServerEvent::TaskCreated(task) => {
            assert_eq!(task.title, "Write release notes");
            assert_eq!(task.column_id, board.todo.id);
            assert_eq!(task.order_index, 0);
        }
        other => panic!("Expected task:created, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_command_reaches_only_originator() {
    let board = start_board().await;
    let (alice, mut alice_events) = joined(&board, "alice").await;
    let (_bob, mut bob_events) = joined(&board, "bob").await;

    alice.send(&create_in(&board, "only task")).await.unwrap();
    let task = match next_server(&mut alice_events).await {
        ServerEvent::TaskCreated(task) => task,
        other => panic!("Expected task:created, got {other:?}"),
    };
    next_server(&mut bob_events).await;

    alice
        .send(&ClientCommand::ReorderTask {
            task_id: task.id,
            order_index: 4,
        })
        .await
        .unwrap();

    match next_server(&mut alice_events).await {
        ServerEvent::Error { code, .. } => assert_eq!(code, "invalid_index"),
        other => panic!("Expected task:error, got {other:?}"),
    }
    assert_silent(&mut bob_events).await;
}

#[tokio::test]
async fn test_move_is_broadcast_with_resolved_column() {
    let board = start_board().await;
    let (alice, mut alice_events) = joined(&board, "alice").await;
    let (_bob, mut bob_events) = joined(&board, "bob").await;

    alice.send(&create_in(&board, "ship it")).await.unwrap();
    let task = match next_server(&mut alice_events).await {
        ServerEvent::TaskCreated(task) => task,
        other => panic!("Expected task:created, got {other:?}"),
    };
    next_server(&mut bob_events).await;

    alice
        .send(&ClientCommand::MoveTask {
            task_id: task.id,
            column_id: ParentRef::Resolved {
                id: board.done.id,
                name: "Done".to_string(),
            },
        })
        .await
        .unwrap();

    match next_server(&mut bob_events).await {
        ServerEvent::TaskMoved(moved) => {
            assert_eq!(moved.id, task.id);
            assert_eq!(moved.column_id, board.done.id);
            assert_eq!(moved.order_index, 0);
        }
        other => panic!("Expected task:moved, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let board = start_board().await;
    let (alice, mut alice_events) = joined(&board, "alice").await;

    let (carol, mut carol_events) = connect(&board, "carol").await;
    carol.join(board.other_project.id).await.unwrap();
    next_server(&mut carol_events).await;

    alice.send(&create_in(&board, "private")).await.unwrap();
    next_server(&mut alice_events).await;
    assert_silent(&mut carol_events).await;
}

#[tokio::test]
async fn test_join_requires_membership() {
    let board = start_board().await;
    let (eve, mut eve_events) = connect(&board, "eve").await;

    eve.join(board.project.id).await.unwrap();
    match next_server(&mut eve_events).await {
        ServerEvent::Error { code, .. } => assert_eq!(code, "forbidden"),
        other => panic!("Expected task:error, got {other:?}"),
    }
    assert_eq!(board.gateway.rooms().room_count().await, 0);
}

#[tokio::test]
async fn test_leave_stops_delivery() {
    let board = start_board().await;
    let (alice, mut alice_events) = joined(&board, "alice").await;
    let (bob, mut bob_events) = joined(&board, "bob").await;

    bob.leave(board.project.id).await.unwrap();
    assert_eq!(
        next_server(&mut bob_events).await,
        ServerEvent::LeftProject {
            project_id: board.project.id
        }
    );

    alice.send(&create_in(&board, "after leave")).await.unwrap();
    next_server(&mut alice_events).await;
    assert_silent(&mut bob_events).await;
}

#[tokio::test]
async fn test_disconnect_closes_empty_room() {
    let board = start_board().await;
    let (mut alice, _events) = joined(&board, "alice").await;
    assert_eq!(board.gateway.rooms().room_count().await, 1);

    alice.disconnect().await;
    for _ in 0..40 {
        if board.gateway.rooms().room_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(board.gateway.rooms().room_count().await, 0);
    assert_eq!(board.gateway.stats().await.active_connections, 0);
}

#[tokio::test]
async fn test_bad_token_rejected_at_handshake() {
    let board = start_board().await;

    let mut client = BoardClient::new(&board.url, "forged");
    match client.connect().await {
        Err(ProtocolError::Handshake(status)) => assert!(status.contains("401")),
        other => panic!("Expected handshake rejection, got {other:?}"),
    }
    assert_eq!(client.connection_state().await, ConnectionState::Disconnected);

    let result = tokio_tungstenite::connect_async(board.url.as_str()).await;
    assert!(result.is_err(), "Connection without a token must fail");

    // The gateway counts the rejection after writing the 401
    for _ in 0..40 {
        if board.gateway.stats().await.rejected_handshakes == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(board.gateway.stats().await.rejected_handshakes, 2);
}

#[tokio::test]
async fn test_bearer_header_accepted() {
    let board = start_board().await;

    let mut request = board.url.as_str().into_client_request().unwrap();
    request
        .headers_mut()
        .insert(AUTHORIZATION, "Bearer bob".parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let join = ClientCommand::JoinProject {
        project_id: board.project.id,
    };
    ws.send(Message::text(join.encode().unwrap())).await.unwrap();

    let reply = timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let event = ServerEvent::decode(reply.to_text().unwrap()).unwrap();
    assert_eq!(
        event,
        ServerEvent::JoinedProject {
            project_id: board.project.id
        }
    );
}

#[tokio::test]
async fn test_undecodable_frame_answered_with_error() {
    let board = start_board().await;
    let url = format!("{}/?token=alice", board.url);
    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    ws.send(Message::text(r#"{"event":"task:explode","data":{}}"#))
        .await
        .unwrap();

    let reply = timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match ServerEvent::decode(reply.to_text().unwrap()).unwrap() {
        ServerEvent::Error { code, .. } => assert_eq!(code, "invalid_command"),
        other => panic!("Expected task:error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_realtime_writes_visible_to_readers() {
    let board = start_board().await;
    let (alice, mut alice_events) = joined(&board, "alice").await;

    for title in ["a", "b", "c"] {
        alice.send(&create_in(&board, title)).await.unwrap();
        next_server(&mut alice_events).await;
    }

    let owner: UserId = board.project.owner_id;
    let tasks = board
        .mutator
        .list_tasks(board.project.id, Some(board.todo.id), owner)
        .await
        .unwrap();
    let order: Vec<(&str, u32)> = tasks
        .iter()
        .map(|t| (t.title.as_str(), t.order_index))
        .collect();
    assert_eq!(order, vec![("a", 0), ("b", 1), ("c", 2)]);
}
