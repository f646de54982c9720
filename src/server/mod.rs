pub mod middleware;
pub mod routes;

use axum::Router;
use std::sync::Arc;

use crate::inspect::Inspector;
use crate::lifecycle::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub inspector: Arc<Inspector>,
    /// Shared bearer secret. `None` disables the check.
    pub api_secret: Option<Arc<str>>,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
