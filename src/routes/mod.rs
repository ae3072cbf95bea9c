//! API Routes
//!
//! Producer-facing HTTP endpoints:
//! - `POST /upload-json` - Queue a job file
//! - `GET /count` - Job files per folder
//! - `POST /invalidate/{hours}` - Drop stale queued jobs
//! - `GET /health` - Health check

pub mod health;
pub mod intake;

use axum::Router;
use tracing::info;

use crate::queue::FolderQueue;

#[derive(Clone)]
pub struct AppState {
    pub queue: FolderQueue,
}

impl AppState {
    pub fn new(queue: FolderQueue) -> Self {
        Self { queue }
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    Router::new()
        .merge(intake::router(state))
        .merge(health::router())
}
