//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;

use axum::{
    Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use ventus_core::domain::job::JobKind;
use ventus_core::dto::job::CreateJob;

use crate::service::job_service::JobContext;

/// Create the main API router with all endpoints
pub fn create_router(ctx: JobContext) -> Router {
    let router = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Collections
        .route(
            "/api/jobs",
            get(|state: State<JobContext>| job::list_jobs(state, None)),
        )
        .route(
            "/api/simulations",
            post(|state: State<JobContext>, body: axum::Json<CreateJob>| {
                job::create_job(state, body, JobKind::Simulation)
            })
            .get(|state: State<JobContext>| job::list_jobs(state, Some(JobKind::Simulation))),
        )
        .route(
            "/api/meshes",
            post(|state: State<JobContext>, body: axum::Json<CreateJob>| {
                job::create_job(state, body, JobKind::Mesh)
            })
            .get(|state: State<JobContext>| job::list_jobs(state, Some(JobKind::Mesh))),
        );

    // Single-job endpoints, kind-agnostic and per kind
    let router = job_routes(router, "/api/jobs", None);
    let router = job_routes(router, "/api/simulations", Some(JobKind::Simulation));
    let router = job_routes(router, "/api/meshes", Some(JobKind::Mesh));

    // Add state and middleware
    router
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn job_routes(
    router: Router<JobContext>,
    prefix: &str,
    kind: Option<JobKind>,
) -> Router<JobContext> {
    router
        .route(
            &format!("{prefix}/{{id}}"),
            get(move |state: State<JobContext>, id: Path<Uuid>| job::get_job(state, id, kind)),
        )
        .route(
            &format!("{prefix}/{{id}}/cancel"),
            post(move |state: State<JobContext>, id: Path<Uuid>| {
                job::cancel_job(state, id, kind)
            }),
        )
        .route(
            &format!("{prefix}/{{id}}/download"),
            get(move |state: State<JobContext>, id: Path<Uuid>| {
                job::download_results(state, id, kind)
            }),
        )
        .route(
            &format!("{prefix}/{{id}}/log"),
            get(
                move |state: State<JobContext>, id: Path<Uuid>, query: Query<job::LogQuery>| {
                    job::get_job_log(state, id, query, kind)
                },
            ),
        )
}
