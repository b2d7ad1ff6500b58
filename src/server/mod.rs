pub mod middleware;
pub mod proxy_routes;
pub mod routes;
pub mod testflow_routes;

use axum::Router;
use std::sync::Arc;

use crate::proxy::HttpExecutor;
use crate::testflow::registry::RunRegistry;
use crate::testflow::runner::TestflowRunner;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<dyn HttpExecutor>,
    pub runner: Arc<TestflowRunner>,
    pub registry: Arc<RunRegistry>,
}

impl AppState {
    pub fn new(executor: Arc<dyn HttpExecutor>) -> Self {
        Self {
            runner: Arc::new(TestflowRunner::new(executor.clone())),
            executor,
            registry: Arc::new(RunRegistry::new()),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
