//! berth-api: REST API for Berth.
//!
//! Provides axum route handlers for attaching a production to a cluster,
//! patching it, and reading back the record and its last deploy outcome.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/projects/{project}/cluster-production` | Create a production and deploy it |
//! | GET | `/api/v1/cluster-production/{namespace}` | Get a production |
//! | PATCH | `/api/v1/cluster-production/{namespace}` | Patch a production and redeploy |
//! | GET | `/api/v1/cluster-production/{namespace}/deploy` | Last deploy outcome |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use berth_deploy::ProductionOrchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: ProductionOrchestrator,
}

/// Build the API router.
pub fn build_router(orchestrator: ProductionOrchestrator) -> Router {
    let api_state = ApiState { orchestrator };

    let api_routes = Router::new()
        .route(
            "/projects/{project}/cluster-production",
            post(handlers::create_production),
        )
        .route(
            "/cluster-production/{namespace}",
            get(handlers::get_production).patch(handlers::patch_production),
        )
        .route(
            "/cluster-production/{namespace}/deploy",
            get(handlers::get_deploy_outcome),
        )
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
