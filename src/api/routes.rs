use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = (state.config.max_upload_size as usize).saturating_add(MULTIPART_OVERHEAD);

    let mut router = Router::new()
        // Files
        .route(
            "/files",
            post(handlers::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/files/*key",
            get(handlers::download_file).delete(handlers::delete_file),
        )
        .route("/preview/*key", get(handlers::preview_file))
        // Internal
        .route("/_internal/health", get(handlers::health))
        .route("/_internal/stats", get(handlers::pipeline_stats));

    // Presigned links issued by the local backend
    if state.local_store.is_some() {
        router = router.route("/blobs/:bucket/*key", get(handlers::serve_signed));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
