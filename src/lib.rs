// Oxidized Queue - file-based LLM job queue with HTTP callbacks

pub mod config;
pub mod types;
pub mod queue;
pub mod prompt;
pub mod llm;
pub mod reconcile;
pub mod routes;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use queue::Worker;
pub use routes::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
