/*!
# Bond API

HTTP route layer over [`bond_engine::BondEngine`]. Identity is taken from the
`x-user-id` header or a bearer token and trusted as-is; engine errors are mapped
to stable statuses in a `{"error": {"message", "code"}}` envelope.
*/

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use state::{AppState, SharedState};

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(Any);

    let api_routes = Router::new()
        .merge(routes::bonds::routes())
        .merge(routes::contracts::routes())
        .merge(routes::points::routes())
        .merge(routes::notifications::routes());

    Router::new()
        .route("/health", get(health::check_health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
