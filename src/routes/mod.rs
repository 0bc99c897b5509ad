use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{docpolicy, error, state::AppState};

pub mod auth;
pub mod documents;
pub mod health;
pub mod queries;
pub mod users;
pub mod workflows;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let users_routes = Router::new()
        .route("/", post(users::create_user))
        .route("/:id", get(users::get_user))
        .route("/:id/roles", post(users::assign_roles))
        .route("/:id/plants", post(users::assign_plants))
        .route("/:id/status", patch(users::update_status));

    let workflows_routes = Router::new()
        .route(
            "/",
            get(workflows::list_workflows).post(workflows::create_workflow),
        )
        .route("/:id", get(workflows::get_workflow))
        .route("/:id/transition", post(workflows::transition_workflow))
        .route("/:id/answers", patch(workflows::submit_answers))
        .route("/:id/complete", post(workflows::complete_workflow))
        .route(
            "/:id/queries",
            get(queries::list_queries).post(queries::raise_query),
        )
        .route("/:id/documents", get(documents::list_workflow_documents));

    let queries_routes = Router::new()
        .route("/:id", get(queries::get_query))
        .route("/:id/responses", post(queries::respond_to_query))
        .route("/:id/close", post(queries::close_query))
        .route("/:id/documents", get(documents::list_query_documents));

    let documents_routes = Router::new()
        .route("/", post(documents::upload_documents))
        .route("/reusable", get(documents::search_reusable))
        .route(
            "/:id",
            get(documents::download_document).delete(documents::delete_document),
        )
        .route("/:id/reuse", post(documents::reuse_document));

    Router::new()
        .nest("/api/users", users_routes)
        .nest("/api/workflows", workflows_routes)
        .nest("/api/queries", queries_routes)
        .nest("/api/documents", documents_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(middleware::from_fn(error::attach_request_path))
        .layer(cors)
        .layer(DefaultBodyLimit::max(
            (docpolicy::MAX_UPLOAD_BYTES as usize) * 2,
        ))
}
