//! REST API handlers.
//!
//! Each handler goes through the `ProductionOrchestrator` and returns JSON
//! responses. Validation errors map to 404/409; deploy failures happen in
//! the background and only show up on the `/deploy` route.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use berth_deploy::DeployError;
use berth_state::{NewProduction, ProductionPatch};
use tracing::{debug, error};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn deploy_error(e: DeployError) -> Response {
    let status = match &e {
        DeployError::ClusterNotFound(_) | DeployError::ProductionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        DeployError::ProductionAlreadyExists(_) => StatusCode::CONFLICT,
        DeployError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "request failed");
    } else {
        debug!(error = %e, %status, "request rejected");
    }
    error_response(&e.to_string(), status).into_response()
}

// ── Productions ────────────────────────────────────────────────

/// POST /api/v1/projects/:project/cluster-production
pub async fn create_production(
    State(state): State<ApiState>,
    Path(project): Path<String>,
    Json(spec): Json<NewProduction>,
) -> impl IntoResponse {
    match state.orchestrator.create(&project, spec).await {
        Ok(production) => (StatusCode::CREATED, ApiResponse::ok(production)).into_response(),
        Err(e) => deploy_error(e),
    }
}

/// GET /api/v1/cluster-production/:namespace
pub async fn get_production(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.get(&namespace) {
        Ok(production) => ApiResponse::ok(production).into_response(),
        Err(e) => deploy_error(e),
    }
}

/// PATCH /api/v1/cluster-production/:namespace
pub async fn patch_production(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
    Json(patch): Json<ProductionPatch>,
) -> impl IntoResponse {
    match state.orchestrator.patch(&namespace, patch).await {
        Ok(production) => ApiResponse::ok(production).into_response(),
        Err(e) => deploy_error(e),
    }
}

// ── Deploys ────────────────────────────────────────────────────

/// GET /api/v1/cluster-production/:namespace/deploy
pub async fn get_deploy_outcome(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.last_outcome(&namespace).await {
        Some(outcome) => ApiResponse::ok(outcome).into_response(),
        None => error_response("no deploy recorded", StatusCode::NOT_FOUND).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_deploy::capability::CapabilityFuture;
    use berth_deploy::{
        DeploymentEnvelope, DnsService, DockerService, ProductionOrchestrator, ProxyService,
    };
    use berth_proxy::ProdConfig;
    use berth_state::{Cluster, ClusterProduction, Container, GitBranch, StateStore};
    use std::sync::Arc;

    struct Noop;

    impl DockerService for Noop {
        fn deploy_cluster<'a>(
            &'a self,
            _: &'a Cluster,
            _: &'a ClusterProduction,
            _: &'a DeploymentEnvelope,
        ) -> CapabilityFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    impl DnsService for Noop {
        fn config_sync(&self) -> CapabilityFuture<'_> {
            Box::pin(async { Ok(()) })
        }
        fn restart_service(&self) -> CapabilityFuture<'_> {
            Box::pin(async { Ok(()) })
        }
    }

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_git_branch(&GitBranch {
                id: "b1".to_string(),
                name: "main".to_string(),
                last_commit_sha: "abc123".to_string(),
            })
            .unwrap();
        store
            .put_cluster(&Cluster {
                id: "c1".to_string(),
                namespace: "shop-main".to_string(),
                name: "main".to_string(),
                project_name: "shop".to_string(),
                git_branch_id: Some("b1".to_string()),
            })
            .unwrap();
        store
            .put_container(&Container {
                id: "web-0".to_string(),
                cluster_namespace: "shop-main".to_string(),
                name: "web-0".to_string(),
                port: Some(3000),
            })
            .unwrap();
        let noop = Arc::new(Noop);
        ApiState {
            orchestrator: ProductionOrchestrator::new(
                Arc::new(store),
                noop.clone(),
                Arc::new(NoopProxy),
                noop,
            ),
        }
    }

    struct NoopProxy;

    impl ProxyService for NoopProxy {
        fn sync_site<'a>(
            &'a self,
            _: &'a ProdConfig,
            _: Option<&'a ProdConfig>,
        ) -> CapabilityFuture<'a> {
            Box::pin(async { Ok(()) })
        }
        fn restart(&self) -> CapabilityFuture<'_> {
            Box::pin(async { Ok(()) })
        }
    }

    fn new_production(namespace: &str) -> NewProduction {
        NewProduction {
            cluster_namespace: namespace.to_string(),
            domain: "shop.example.com".to_string(),
            number_of_instances: 1,
        }
    }

    #[tokio::test]
    async fn create_and_get_production() {
        let state = test_state();
        let resp = create_production(
            State(state.clone()),
            Path("shop".to_string()),
            Json(new_production("shop-main")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = get_production(State(state), Path("shop-main".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_unknown_cluster_is_not_found() {
        let state = test_state();
        let resp = create_production(
            State(state),
            Path("shop".to_string()),
            Json(new_production("ghost")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let state = test_state();
        state
            .orchestrator
            .create("shop", new_production("shop-main"))
            .await
            .unwrap();
        let resp = create_production(
            State(state),
            Path("shop".to_string()),
            Json(new_production("shop-main")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn patch_nonexistent_production() {
        let state = test_state();
        let resp = patch_production(
            State(state),
            Path("shop-main".to_string()),
            Json(ProductionPatch::default()),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deploy_outcome_after_create() {
        let state = test_state();
        let resp = get_deploy_outcome(State(state.clone()), Path("shop-main".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        state
            .orchestrator
            .create("shop", new_production("shop-main"))
            .await
            .unwrap();
        state.orchestrator.wait("shop-main").await;
        let resp = get_deploy_outcome(State(state), Path("shop-main".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
