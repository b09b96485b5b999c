//! Management REST surface.
//!
//! Thin handlers over the engine traits and the profile store; every error
//! funnels through [`ApiError`].

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use stevedore_core::{
    EngineConnector, EngineManager,
    types::{ContainerFilter, ContainerSpec, ContainerSummary, ImageSummary, LogOptions},
};
use stevedore_session::{ExecSessionManager, LogSink};
use stevedore_transport::ExecBody;

use crate::error::ApiError;
use crate::store::{NewProfile, ProfileStore};

/// Shared REST state.
pub struct AppState<E> {
    pub engine: Arc<E>,
    pub store: Arc<dyn ProfileStore>,
    pub connector: Arc<dyn EngineConnector>,
    pub sessions: Arc<ExecSessionManager>,
}

impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            store: Arc::clone(&self.store),
            connector: Arc::clone(&self.connector),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

/// Build the management REST router.
#[must_use]
pub fn create_api_router<E>(state: AppState<E>) -> Router
where
    E: EngineManager + 'static,
{
    Router::new()
        .route("/ping", get(ping))
        .route("/version", get(version))
        .route("/containers", get(container_list::<E>))
        .route("/containers/create", post(container_create::<E>))
        .route("/containers/run", post(container_run::<E>))
        .route(
            "/container/{id}",
            get(container_get::<E>).delete(container_remove::<E>),
        )
        .route("/container/{id}/inspect", get(container_inspect::<E>))
        .route("/container/{id}/start", post(container_start::<E>))
        .route("/container/{id}/stop", put(container_stop::<E>))
        .route("/container/{id}/restart", post(container_restart::<E>))
        .route("/container/{id}/kill", put(container_kill::<E>))
        .route("/container/{id}/pause", put(container_pause::<E>))
        .route("/container/{id}/unpause", put(container_unpause::<E>))
        .route("/container/{id}/rename", patch(container_rename::<E>))
        .route("/container/{id}/logs", get(container_logs::<E>))
        .route("/container/{id}/top", get(container_top::<E>))
        .route("/container/{id}/stats", get(container_stats::<E>))
        .route("/container/{id}/diff", get(container_diff::<E>))
        .route("/container/{id}/export", post(container_export::<E>))
        .route("/container/{id}/exec", post(container_exec::<E>))
        .route("/images", get(image_list::<E>))
        .route("/images/pull", post(image_pull::<E>))
        .route("/image/{id}/inspect", get(image_inspect::<E>))
        .route("/volumes", get(volume_list::<E>))
        .route("/volume/{id}/inspect", get(volume_inspect::<E>))
        .route("/networks", get(network_list::<E>))
        .route("/network/{id}/inspect", get(network_inspect::<E>))
        .route(
            "/connections",
            get(connection_list::<E>).post(connection_create::<E>),
        )
        .route("/connections/default", get(connection_get_default::<E>))
        .route("/connections/test", post(connection_test::<E>))
        .route(
            "/connections/{id}",
            get(connection_get::<E>)
                .put(connection_update::<E>)
                .delete(connection_delete::<E>),
        )
        .route(
            "/connections/{id}/default",
            patch(connection_set_default::<E>),
        )
        .with_state(state)
}

async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

async fn version() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Debug, Deserialize)]
struct ContainerListQuery {
    #[serde(default)]
    all: bool,
}

async fn container_list<E: EngineManager>(
    State(state): State<AppState<E>>,
    Query(query): Query<ContainerListQuery>,
) -> Result<Json<Vec<ContainerSummary>>, ApiError> {
    let filter = ContainerFilter {
        all: query.all,
        ..ContainerFilter::default()
    };
    Ok(Json(state.engine.container_list(filter).await?))
}

async fn container_create<E: EngineManager>(
    State(state): State<AppState<E>>,
    Json(spec): Json<ContainerSpec>,
) -> Result<Json<Value>, ApiError> {
    let id = state.engine.container_create(spec).await?;
    Ok(Json(json!({ "id": id })))
}

async fn container_run<E: EngineManager>(
    State(state): State<AppState<E>>,
    Json(spec): Json<ContainerSpec>,
) -> Result<Json<Value>, ApiError> {
    let id = state.engine.container_create(spec).await?;
    state.engine.container_start(&id).await?;
    Ok(Json(json!({ "id": id })))
}

#[derive(Debug, Deserialize)]
struct ContainerGetQuery {
    name: Option<String>,
}

async fn container_get<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
    Query(query): Query<ContainerGetQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = ContainerFilter {
        name: query.name,
        ..ContainerFilter::by_id(id.clone())
    };
    let container = state
        .engine
        .container_list(filter)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found(format!("container {id}")))?;
    Ok(Json(json!({ "data": container })))
}

async fn container_inspect<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let container = state.engine.container_inspect(&id).await?;
    Ok(Json(json!(container)))
}

async fn container_start<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.container_start(&id).await?;
    let summary = state
        .engine
        .container_list(ContainerFilter::by_id(id.clone()))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found(format!("container {id}")))?;
    Ok(Json(
        json!({ "id": summary.id, "state": summary.state, "status": summary.status }),
    ))
}

async fn container_stop<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.container_stop(&id, Some(0)).await?;
    Ok(Json(json!({ "status": "exited" })))
}

async fn container_restart<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.container_restart(&id).await?;
    Ok(StatusCode::OK)
}

async fn container_kill<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.container_kill(&id, "SIGKILL").await?;
    Ok(StatusCode::OK)
}

async fn container_pause<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.container_pause(&id).await?;
    Ok(StatusCode::OK)
}

async fn container_unpause<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.container_unpause(&id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct RenameBody {
    new_name: String,
}

async fn container_rename<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<StatusCode, ApiError> {
    state.engine.container_rename(&id, &body.new_name).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Default, Deserialize)]
struct RemoveBody {
    #[serde(default)]
    force: bool,
}

async fn container_remove<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
    body: Option<Json<RemoveBody>>,
) -> Result<StatusCode, ApiError> {
    let force = body.map(|Json(b)| b.force).unwrap_or_default();
    state.engine.container_remove(&id, force).await?;
    Ok(StatusCode::OK)
}

async fn container_logs<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
    Query(opts): Query<LogOptions>,
) -> Result<Json<Value>, ApiError> {
    let logs = state.engine.container_logs(&id, opts).await?;
    Ok(Json(json!({ "logs": logs })))
}

async fn container_top<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let top = state.engine.container_processes(&id).await?;
    Ok(Json(
        json!({ "top": { "titles": top.titles, "processes": top.processes } }),
    ))
}

async fn container_stats<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let stats = state.engine.container_stats(&id).await?;
    Ok(Json(json!({ "stats": stats })))
}

async fn container_diff<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let diffs = state.engine.container_changes(&id).await?;
    Ok(Json(json!({ "diffs": diffs })))
}

async fn container_export<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Vec<u8>, ApiError> {
    Ok(state.engine.container_export(&id).await?)
}

async fn container_exec<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
    Json(body): Json<ExecBody>,
) -> Result<Json<Value>, ApiError> {
    // HTTP-initiated sessions pump into the process log; interactive
    // WebSocket sessions get their output routed back over the channel.
    let started = state
        .sessions
        .exec(state.engine.as_ref(), &id, body.to_spec(), Arc::new(LogSink))
        .await?;
    Ok(Json(
        json!({ "exec_id": started.exec_id, "attached": started.attached }),
    ))
}

async fn image_list<E: EngineManager>(
    State(state): State<AppState<E>>,
) -> Result<Json<Vec<ImageSummary>>, ApiError> {
    Ok(Json(state.engine.image_list().await?))
}

#[derive(Debug, Deserialize)]
struct PullBody {
    repo: String,
    tag: Option<String>,
}

async fn image_pull<E: EngineManager>(
    State(state): State<AppState<E>>,
    Json(body): Json<PullBody>,
) -> Result<Json<Value>, ApiError> {
    let logs = state
        .engine
        .image_pull(&body.repo, body.tag.as_deref())
        .await?;
    Ok(Json(json!({ "logs": logs, "status": "ok" })))
}

async fn image_inspect<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.engine.image_inspect(&id).await?))
}

async fn volume_list<E: EngineManager>(
    State(state): State<AppState<E>>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!(state.engine.volume_list().await?)))
}

async fn volume_inspect<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.engine.volume_inspect(&id).await?))
}

async fn network_list<E: EngineManager>(
    State(state): State<AppState<E>>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!(state.engine.network_list().await?)))
}

async fn network_inspect<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.engine.network_inspect(&id).await?))
}

async fn connection_list<E: EngineManager>(
    State(state): State<AppState<E>>,
) -> Result<Json<Value>, ApiError> {
    let list = state.store.list().await?;
    Ok(Json(json!({ "list": list })))
}

async fn connection_create<E: EngineManager>(
    State(state): State<AppState<E>>,
    Json(body): Json<NewProfile>,
) -> Result<Json<Value>, ApiError> {
    let profile = state.store.save(body).await?;
    Ok(Json(json!({ "data": profile })))
}

async fn connection_get<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let profile = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("profile {id}")))?;
    Ok(Json(json!({ "data": profile })))
}

async fn connection_update<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
    Json(body): Json<NewProfile>,
) -> Result<Json<Value>, ApiError> {
    let mut profile = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("profile {id}")))?;
    profile.name = body.name;
    profile.scheme = body.scheme;
    profile.address = body.address;
    profile.is_default = body.is_default;
    state.store.update(&profile).await?;
    Ok(Json(json!({ "data": profile })))
}

async fn connection_set_default<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store.set_default(&id).await?;
    Ok(Json(json!({ "id": id })))
}

async fn connection_get_default<E: EngineManager>(
    State(state): State<AppState<E>>,
) -> Result<Json<Value>, ApiError> {
    let profile = state
        .store
        .get_default()
        .await?
        .ok_or_else(|| ApiError::not_found("no default profile"))?;
    Ok(Json(json!({ "data": profile })))
}

async fn connection_delete<E: EngineManager>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete(&id).await? {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::not_found(format!("profile {id}")))
    }
}

#[derive(Debug, Deserialize)]
struct TestBody {
    #[serde(default)]
    connection: String,
    #[serde(default)]
    exact: bool,
}

async fn connection_test<E: EngineManager>(
    State(state): State<AppState<E>>,
    Json(body): Json<TestBody>,
) -> Result<Json<Value>, ApiError> {
    let endpoint = if body.exact {
        Some(body.connection.clone())
    } else {
        let profile = if body.connection.is_empty() {
            state.store.get_default().await?
        } else {
            state.store.get(&body.connection).await?
        };
        profile.map(|p| p.endpoint())
    };

    let Some(endpoint) = endpoint else {
        return Ok(Json(json!({ "ok": false, "error": "No connection found" })));
    };
    // Probe failures are the answer, not an error.
    match state.connector.probe(&endpoint).await {
        Ok(()) => Ok(Json(json!({ "ok": true, "error": "" }))),
        Err(e) => Ok(Json(json!({ "ok": false, "error": e.to_string() }))),
    }
}
