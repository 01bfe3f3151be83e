use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::{
    seal::{InitResponse, KeyStatus, LeaderStatus, Phase, SealStatus},
    AppState, Error, Result,
};

/// Unwrap a JSON body, reporting a bad body in the server's error format.
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| Error::malformed(e.body_text()))
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Response {
    let status = match state.core.phase() {
        Phase::Uninitialized => StatusCode::NOT_IMPLEMENTED,
        Phase::Unsealed => StatusCode::OK,
        Phase::Sealed | Phase::Unsealing { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(state.core.health())).into_response()
}

// ── Init ──────────────────────────────────────────────────────────────────────

pub async fn init_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "initialized": state.core.is_initialized() }))
}

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    pub secret_shares: u32,
    pub secret_threshold: u32,
}

pub async fn do_init(
    State(state): State<AppState>,
    payload: std::result::Result<Json<InitRequest>, JsonRejection>,
) -> Result<Json<InitResponse>> {
    let req = body(payload)?;
    let resp = state
        .core
        .initialize(req.secret_shares, req.secret_threshold)?;
    Ok(Json(resp))
}

// ── Seal / unseal ─────────────────────────────────────────────────────────────

pub async fn seal_status(State(state): State<AppState>) -> Result<Json<SealStatus>> {
    Ok(Json(state.core.seal_status()?))
}

#[derive(Debug, Default, Deserialize)]
pub struct UnsealRequest {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub reset: Option<bool>,
}

pub async fn do_unseal(
    State(state): State<AppState>,
    payload: std::result::Result<Json<UnsealRequest>, JsonRejection>,
) -> Result<Json<SealStatus>> {
    let req = body(payload)?;
    let reset = req.reset.unwrap_or(false);
    let key = req.key.unwrap_or_default();
    Ok(Json(state.core.unseal(&key, reset)?))
}

pub async fn seal(State(state): State<AppState>) -> Result<StatusCode> {
    state.core.seal()?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn key_status(State(state): State<AppState>) -> Result<Json<KeyStatus>> {
    Ok(Json(state.core.key_status()?))
}

pub async fn leader_status(State(state): State<AppState>) -> Result<Json<LeaderStatus>> {
    Ok(Json(state.core.leader_status()?))
}

// ── Mounts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct MountsQuery {
    #[serde(default)]
    pub all: bool,
}

pub async fn list_mounts(
    State(state): State<AppState>,
    Query(q): Query<MountsQuery>,
) -> Result<Json<Value>> {
    let mounts = if q.all {
        state.core.list_all_mounts()?
    } else {
        state.core.list_secret_mounts()?
    };
    Ok(Json(json!({ "mounts": mounts })))
}

#[derive(Debug, Deserialize)]
pub struct MountRequest {
    #[serde(rename = "type")]
    pub kind: String,
}

pub async fn create_mount(
    State(state): State<AppState>,
    Path(path): Path<String>,
    payload: std::result::Result<Json<MountRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let mount = state.core.mount(&path, &req.kind)?;
    Ok((StatusCode::CREATED, Json(mount)).into_response())
}

/// Auth providers are not supported; the table is always empty.
pub async fn auth_list(State(state): State<AppState>) -> Result<Json<Value>> {
    state.core.require_unsealed()?;
    Ok(Json(json!({ "auth": {} })))
}

// ── Secrets ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub list: bool,
}

pub async fn read_secret(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(q): Query<ReadQuery>,
) -> Result<Json<Value>> {
    if q.list {
        let keys = state.core.list_secrets(&path)?;
        if keys.is_empty() {
            return Err(Error::NotFound(path));
        }
        return Ok(Json(json!({ "data": { "keys": keys } })));
    }
    let data = state.core.read_secret(&path)?;
    Ok(Json(json!({ "data": data })))
}

pub async fn write_secret(
    State(state): State<AppState>,
    Path(path): Path<String>,
    payload: std::result::Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<StatusCode> {
    let data = body(payload)?;
    state.core.write_secret(&path, data)?;
    info!(path = %path, "secret written");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_secret(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<StatusCode> {
    state.core.delete_secret(&path)?;
    info!(path = %path, "secret deleted");
    Ok(StatusCode::NO_CONTENT)
}
