//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` and the
//! WebSocket endpoints live at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "pnp-gateway", description = "Machine status and camera streaming gateway"),
    paths(
        handlers::system::health_handler,
        handlers::system::ws_info_handler,
        handlers::camera::list_cameras,
        handlers::camera::list_streams,
        handlers::camera::camera_snapshot,
        handlers::machine::machine_status,
        handlers::machine::enable,
        handlers::machine::disable,
        handlers::machine::home,
        handlers::machine::emergency_stop,
        handlers::machine::move_to,
        handlers::job::job_info,
        handlers::job::job_status,
        handlers::job::load_job,
        handlers::job::start_job,
        handlers::job::pause_job,
        handlers::job::stop_job,
    ),
    tags(
        (name = "System", description = "Health and connection info"),
        (name = "Cameras", description = "Camera listing and snapshots"),
        (name = "Machine", description = "Machine status and commands"),
        (name = "Job", description = "Job loading and control"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

/// Builds the full application: REST, WebSocket, optional Swagger UI,
/// and the HTTP layers, bound to `state`.
pub fn build_app(state: AppState) -> Router {
    let router = build_router().merge(crate::ws::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
