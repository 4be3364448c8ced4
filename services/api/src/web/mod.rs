pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use state::AppState;
use std::sync::Arc;

pub use middleware::require_auth;
pub use rest::{
    can_download_handler, complete_page_handler, get_progress_handler, initialize_handler,
    page_progress_handler, start_page_handler, update_time_handler,
};

/// Builds the reading-progress router. Every route sits behind the auth
/// middleware; enrollment checks happen per-handler.
pub fn router(state: Arc<AppState>) -> Router {
    let reading_routes = Router::new()
        .route("/initialize", post(initialize_handler))
        .route("/pages/{page_number}/start", post(start_page_handler))
        .route("/pages/{page_number}/time", put(update_time_handler))
        .route("/pages/{page_number}/complete", post(complete_page_handler))
        .route("/progress", get(get_progress_handler))
        .route("/can-download", get(can_download_handler))
        .route("/pages/{page_number}/progress", get(page_progress_handler));

    Router::new()
        .nest("/materials/{material_id}/reading", reading_routes)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ))
        .with_state(state)
}
