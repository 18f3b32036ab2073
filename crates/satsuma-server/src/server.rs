use std::convert::Infallible;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use satsuma_catalog::{CatalogError, TrackNode};
use satsuma_queue::{QueueError, QueueHandle, QueueSnapshot, SelectedFile};

/// Everything a request handler needs: the coordinator handle for
/// request/response traffic and the snapshot watch for the push stream.
#[derive(Debug, Clone)]
pub struct AppState {
    queue: QueueHandle,
    snapshots: watch::Receiver<QueueSnapshot>,
}

impl AppState {
    pub fn new(queue: QueueHandle, snapshots: watch::Receiver<QueueSnapshot>) -> Self {
        Self { queue, snapshots }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/queue", get(get_queue).post(add_item))
        .route("/api/queue/clear-completed", post(clear_completed))
        .route("/api/queue/{id}", delete(cancel_item))
        .route("/api/queue/{id}/pause", post(pause_item))
        .route("/api/queue/{id}/resume", post(resume_item))
        .route("/api/queue/{id}/retry", post(retry_item))
        .route("/api/tracks/{id}", get(get_tracks))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/events", get(events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRequest {
    pub id: String,
    #[serde(default)]
    pub files: Option<Vec<SelectedFile>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsPayload {
    pub root: String,
}

struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueueError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            QueueError::Catalog(CatalogError::NotFound(_)) => StatusCode::NOT_FOUND,
            QueueError::Catalog(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn get_queue(State(state): State<AppState>) -> Result<Json<QueueSnapshot>, ApiError> {
    Ok(Json(state.queue.get_queue().await?))
}

async fn add_item(
    State(state): State<AppState>,
    Json(request): Json<AddRequest>,
) -> Result<Json<QueueSnapshot>, ApiError> {
    Ok(Json(state.queue.add(request.id, request.files).await?))
}

async fn pause_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueueSnapshot>, ApiError> {
    Ok(Json(state.queue.pause(id).await?))
}

async fn resume_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueueSnapshot>, ApiError> {
    Ok(Json(state.queue.resume(id).await?))
}

async fn retry_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueueSnapshot>, ApiError> {
    Ok(Json(state.queue.retry(id).await?))
}

async fn cancel_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueueSnapshot>, ApiError> {
    Ok(Json(state.queue.cancel(id).await?))
}

async fn clear_completed(State(state): State<AppState>) -> Result<Json<QueueSnapshot>, ApiError> {
    Ok(Json(state.queue.clear_completed().await?))
}

async fn get_tracks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TrackNode>>, ApiError> {
    Ok(Json(state.queue.get_tracks(id).await?))
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<SettingsPayload>, ApiError> {
    let snapshot = state.queue.get_queue().await?;
    Ok(Json(SettingsPayload {
        root: snapshot.root,
    }))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(payload): Json<SettingsPayload>,
) -> Result<Json<SettingsPayload>, ApiError> {
    let root = state.queue.update_settings(payload.root).await?;
    Ok(Json(SettingsPayload { root }))
}

/// Push stream: the current snapshot on connect, then one `queue-update`
/// event per change. Observers that fall behind only ever miss
/// intermediate snapshots, never the latest one.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.snapshots.clone();
    let initial = snapshot_event(&rx.borrow().clone());
    let updates = futures::stream::unfold(rx, |mut rx| async move {
        match rx.changed().await {
            Ok(()) => {
                let snapshot = rx.borrow_and_update().clone();
                Some((Ok::<_, Infallible>(snapshot_event(&snapshot)), rx))
            }
            Err(_) => None,
        }
    });
    let stream = futures::StreamExt::chain(
        futures::stream::iter([Ok::<_, Infallible>(initial)]),
        updates,
    );
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn snapshot_event(snapshot: &QueueSnapshot) -> Event {
    Event::default()
        .event("queue-update")
        .json_data(snapshot)
        .unwrap_or_default()
}
