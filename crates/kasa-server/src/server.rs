use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::require_root_token,
    handlers::{
        auth_list, create_mount, delete_secret, do_init, do_unseal, health, init_status,
        key_status, leader_status, list_mounts, read_secret, seal, seal_status, write_secret,
    },
    seal::Core,
    storage::{Physical, StorageKind},
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `file` or `inmem` ($KASA_STORAGE).
    pub storage: String,
    pub data_dir: Option<PathBuf>,
    /// Cluster name recorded at initialization; generated when unset.
    pub cluster_name: Option<String>,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("KASA_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("KASA_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8200),
            storage: std::env::var("KASA_STORAGE").unwrap_or_else(|_| "file".into()),
            data_dir: std::env::var("KASA_DATA_DIR").ok().map(PathBuf::from),
            cluster_name: std::env::var("KASA_CLUSTER_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            cors_origins: std::env::var("KASA_CORS_ORIGINS").ok(),
        }
    }
}

/// The full route table. Everything except the bootstrap endpoints sits
/// behind [`require_root_token`].
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/v1/sys/health", get(health))
        .route("/v1/sys/init", get(init_status).put(do_init).post(do_init))
        .route("/v1/sys/seal-status", get(seal_status))
        .route("/v1/sys/unseal", post(do_unseal).put(do_unseal))
        .route("/v1/sys/leader", get(leader_status));

    let protected = Router::new()
        .route("/v1/sys/key-status", get(key_status))
        .route("/v1/sys/seal", post(seal).put(seal))
        .route("/v1/sys/mounts", get(list_mounts))
        .route("/v1/sys/mounts/{*path}", post(create_mount))
        .route("/v1/sys/auth", get(auth_list))
        .route(
            "/v1/{*path}",
            get(read_secret)
                .put(write_secret)
                .post(write_secret)
                .delete(delete_secret),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_root_token,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let kind: StorageKind = cfg.storage.parse()?;
    let root = match kind {
        StorageKind::File => {
            let dir = crate::dirs::data_dir(cfg.data_dir.as_deref())?;
            info!(data_dir = %dir.display(), "using data directory");
            Some(dir)
        }
        StorageKind::InMemory => {
            info!("using in-memory storage; nothing survives a restart");
            None
        }
    };

    let physical = Physical::open(kind, root).context("open storage")?;
    let core = Core::new(physical, cfg.cluster_name).context("load server state")?;
    let state = AppState {
        core: Arc::new(core),
    };

    let app = router(state)
        .layer(build_cors(cfg.cors_origins.as_deref()))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, storage = %kind, "kasa server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::PUT,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
