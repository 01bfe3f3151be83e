use std::sync::Arc;

pub mod auth;
pub mod backend;
pub mod dirs;
pub mod error;
pub mod handlers;
pub mod mount;
pub mod seal;
pub mod server;
pub mod shamir;
pub mod storage;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<seal::Core>,
}

pub use error::{Error, Result};
pub use seal::Core;
pub use server::{router, run, ServerConfig};
