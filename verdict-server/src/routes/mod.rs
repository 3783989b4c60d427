//! HTTP route handlers and router configuration.

mod data;
mod index;
mod policies;
mod query;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::state::AppState;

/// Build the main application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/", get(index::index))
        .route(
            "/v1/data",
            get(data::get_root).put(data::put_root).patch(data::patch_root),
        )
        .route(
            "/v1/data/*path",
            get(data::get_path).put(data::put_path).patch(data::patch_path),
        )
        .route("/v1/policies", get(policies::list))
        .route(
            "/v1/policies/:id",
            get(policies::get).put(policies::put).delete(policies::delete),
        )
        .route("/v1/policies/:id/raw", get(policies::get_raw))
        .route("/v1/query", get(query::query))
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http());

    if state.config.cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Encode a JSON response; `pretty` indents with two spaces.
pub(crate) fn json_response<T: Serialize>(
    status: StatusCode,
    value: &T,
    pretty: bool,
) -> Response {
    let body = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match body {
        Ok(body) => (
            status,
            [("content-type", "application/json")],
            body,
        )
            .into_response(),
        Err(e) => ServerError::internal(e.to_string()).into_response(),
    }
}

/// A status-only response (204, 304, bare 404).
pub(crate) fn no_body(status: StatusCode) -> Response {
    status.into_response()
}
