pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, patch, post},
};

use crate::infra::http::middleware::{log_responses, set_request_context};

/// Banner routes behind token auth, plus an unauthenticated health check.
pub fn build_router(state: ApiState) -> Router {
    let banners = Router::new()
        .route("/user_banner", get(handlers::get_user_banner))
        .route(
            "/banner",
            get(handlers::list_banners).post(handlers::create_banner),
        )
        .route(
            "/banner/{id}",
            patch(handlers::update_banner).delete(handlers::delete_banner),
        )
        .route("/banner/{id}/versions", get(handlers::list_banner_versions))
        .route(
            "/banner/{id}/versions/{updated_at}/restore",
            post(handlers::restore_banner_version),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::api_auth,
        ));

    Router::new()
        .merge(banners)
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
