//! meterline-api — REST API for meterline.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/analyses` | List available analyses |
//! | GET | `/api/v1/analyses/{kind}` | Run an analysis, returns a report |
//! | GET | `/api/v1/query` | Run one PromQL query through the fetcher |
//! | GET | `/api/v1/stack/health` | Check the observability stack |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use meterline_core::config::StackConfig;
use meterline_engine::Engine;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub stack: StackConfig,
}

/// Build the complete API router.
pub fn build_router(engine: Arc<Engine>) -> Router {
    let state = ApiState {
        stack: engine.config().stack.clone(),
        engine,
    };

    let api_routes = Router::new()
        .route("/analyses", get(handlers::list_analyses))
        .route("/analyses/{kind}", get(handlers::run_analysis))
        .route("/query", get(handlers::raw_query))
        .route("/stack/health", get(handlers::stack_health))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
