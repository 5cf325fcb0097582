use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_database::AppState;
use shared_utils::extractor::admin_middleware;

use crate::handlers::*;

pub fn create_patient_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(search_patients).post(create_patient))
        .route("/{id}", get(get_patient).put(update_patient))
        .route("/{id}/appointments", get(get_patient_appointments))
        .layer(middleware::from_fn_with_state(state.clone(), admin_middleware))
        .with_state(state)
}
