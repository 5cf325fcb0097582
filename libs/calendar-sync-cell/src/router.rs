use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::admin_middleware;

use crate::handlers;
use crate::services::CalendarSyncService;

/// Admin-only calendar sync console.
pub fn calendar_routes(sync: Arc<CalendarSyncService>) -> Router {
    let state = sync.state().clone();

    Router::new()
        .route("/settings", get(handlers::get_settings).put(handlers::update_settings))
        .route("/sync", post(handlers::sync_all))
        .route("/doctors/{doctor_id}/sync", post(handlers::sync_doctor))
        .route("/doctors/{doctor_id}/runs", get(handlers::list_runs))
        .route("/doctors/{doctor_id}/export.ics", get(handlers::export_calendar))
        .layer(middleware::from_fn_with_state(state, admin_middleware))
        .with_state(sync)
}
