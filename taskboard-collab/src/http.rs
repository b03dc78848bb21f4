//! REST surface for columns and tasks.
//!
//! Every request carries `Authorization: Bearer <token>`. Handlers call the
//! same [`TransactionalMutator`] operations as the realtime gateway and, when
//! enabled, announce the result to the project room.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use taskboard_core::{ColumnId, ParentRef, ProjectId, TaskDraft, TaskId, TaskPatch, UserId};
use tokio::net::TcpListener;

use crate::access::{bearer_token, CredentialVerifier};
use crate::broadcast::RoomManager;
use crate::error::BoardError;
use crate::mutator::TransactionalMutator;
use crate::protocol::ServerEvent;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    mutator: Arc<TransactionalMutator>,
    rooms: Arc<RoomManager>,
    verifier: Arc<dyn CredentialVerifier>,
    broadcast_mutations: bool,
}

impl AppState {
    pub fn new(
        mutator: Arc<TransactionalMutator>,
        rooms: Arc<RoomManager>,
        verifier: Arc<dyn CredentialVerifier>,
        broadcast_mutations: bool,
    ) -> Self {
        Self {
            mutator,
            rooms,
            verifier,
            broadcast_mutations,
        }
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .and_then(|token| self.verifier.verify(token))
            .ok_or(ApiError(BoardError::Unauthorized))
    }

    async fn announce(&self, event: ServerEvent) {
        if self.broadcast_mutations {
            self.rooms.publish(&event).await;
        }
    }
}

/// Build the REST router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/columns/projects/:project_id/columns",
            get(list_columns).post(create_column),
        )
        .route("/columns/:id", patch(rename_column).delete(delete_column))
        .route("/columns/:id/reorder", patch(reorder_column))
        .route(
            "/tasks/projects/:project_id/tasks",
            get(list_tasks).post(create_task),
        )
        .route(
            "/tasks/:id",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/tasks/:id/move", patch(move_task))
        .route("/tasks/:id/reorder", patch(reorder_task))
        .with_state(state)
}

/// Bind `addr` and serve the router until the listener fails.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("REST surface listening on {addr}");
    axum::serve(listener, router(state)).await
}

/// A [`BoardError`] rendered as `{ "error": <kind>, "message": <text> }`.
#[derive(Debug)]
pub struct ApiError(pub BoardError);

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &BoardError) -> StatusCode {
    match err {
        BoardError::NotFound { .. } => StatusCode::NOT_FOUND,
        BoardError::Forbidden { .. } => StatusCode::FORBIDDEN,
        BoardError::Unauthorized => StatusCode::UNAUTHORIZED,
        BoardError::InvalidIndex { .. }
        | BoardError::InvalidScope(_)
        | BoardError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
        BoardError::Conflict { .. } => StatusCode::CONFLICT,
        BoardError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        }
        let body = serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_body<T: DeserializeOwned>(body: &str) -> ApiResult<T> {
    serde_json::from_str(body)
        .map_err(|e| ApiError(BoardError::InvalidCommand(format!("invalid request body: {e}"))))
}

/// [`Path`] whose rejection keeps the JSON error shape.
pub struct IdPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for IdPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError(BoardError::InvalidCommand(format!(
                "invalid path: {}",
                rejection.body_text()
            )))),
        }
    }
}

/// [`Query`] whose rejection keeps the JSON error shape.
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError(BoardError::InvalidCommand(format!(
                "invalid query: {}",
                rejection.body_text()
            )))),
        }
    }
}

#[derive(Deserialize)]
struct NameBody {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderBody {
    order_index: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskBody {
    column_id: ParentRef,
    #[serde(flatten)]
    draft: TaskDraft,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveBody {
    column_id: ParentRef,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskFilter {
    column_id: Option<ColumnId>,
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "taskboard",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_columns(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(project_id): IdPath<ProjectId>,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let columns = state.mutator.list_columns(project_id, user).await?;
    Ok(Json(columns))
}

async fn create_column(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(project_id): IdPath<ProjectId>,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let NameBody { name } = parse_body(&body)?;
    let column = state.mutator.create_column(project_id, name, user).await?;
    state.announce(ServerEvent::ColumnCreated(column.clone())).await;
    Ok((StatusCode::CREATED, Json(column)))
}

async fn rename_column(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(id): IdPath<ColumnId>,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let NameBody { name } = parse_body(&body)?;
    let column = state.mutator.rename_column(id, name, user).await?;
    state.announce(ServerEvent::ColumnUpdated(column.clone())).await;
    Ok(Json(column))
}

async fn reorder_column(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(id): IdPath<ColumnId>,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let ReorderBody { order_index } = parse_body(&body)?;
    let column = state.mutator.reorder_column(id, order_index, user).await?;
    state.announce(ServerEvent::ColumnReordered(column.clone())).await;
    Ok(Json(column))
}

async fn delete_column(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(id): IdPath<ColumnId>,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let removal = state.mutator.delete_column(id, user).await?;
    state.announce(ServerEvent::ColumnDeleted(removal.clone())).await;
    Ok(Json(removal))
}

async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(project_id): IdPath<ProjectId>,
    QueryParams(filter): QueryParams<TaskFilter>,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let tasks = state
        .mutator
        .list_tasks(project_id, filter.column_id, user)
        .await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(project_id): IdPath<ProjectId>,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let CreateTaskBody { column_id, draft } = parse_body(&body)?;
    let task = state
        .mutator
        .create_task(project_id, column_id.id(), draft, user)
        .await?;
    state.announce(ServerEvent::TaskCreated(task.clone())).await;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(id): IdPath<TaskId>,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    Ok(Json(state.mutator.get_task(id, user).await?))
}

async fn update_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(id): IdPath<TaskId>,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let patch: TaskPatch = parse_body(&body)?;
    let task = state.mutator.update_task(id, patch, user).await?;
    state.announce(ServerEvent::TaskUpdated(task.clone())).await;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(id): IdPath<TaskId>,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let removal = state.mutator.delete_task(id, user).await?;
    state.announce(ServerEvent::TaskDeleted(removal.clone())).await;
    Ok(Json(removal))
}

async fn move_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(id): IdPath<TaskId>,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let MoveBody { column_id } = parse_body(&body)?;
    let task = state.mutator.move_task(id, column_id.id(), user).await?;
    state.announce(ServerEvent::TaskMoved(task.clone())).await;
    Ok(Json(task))
}

async fn reorder_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    IdPath(id): IdPath<TaskId>,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let user = state.authenticate(&headers)?;
    let ReorderBody { order_index } = parse_body(&body)?;
    let task = state.mutator.reorder_task(id, order_index, user).await?;
    state.announce(ServerEvent::TaskReordered(task.clone())).await;
    Ok(Json(task))
}
