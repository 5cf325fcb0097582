use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_database::AppState;
use shared_utils::extractor::admin_middleware;

use crate::handlers;

pub fn doctor_routes(state: Arc<AppState>) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/", get(handlers::list_doctors_public))
        .route("/{doctor_id}", get(handlers::get_doctor_public))
        .route("/{doctor_id}/availability", get(handlers::get_availability))
        .route("/{doctor_id}/available-slots", get(handlers::get_available_slots));

    // Back-office routes (approved administrators)
    let admin_routes = Router::new()
        .route("/manage", get(handlers::list_doctors_admin))
        .route("/", post(handlers::create_doctor))
        .route("/{doctor_id}", put(handlers::update_doctor).delete(handlers::deactivate_doctor))
        .route("/{doctor_id}/availability", put(handlers::set_availability))
        .layer(middleware::from_fn_with_state(state.clone(), admin_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}

pub fn specialty_routes(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::list_specialties))
        .route("/{specialty_id}", get(handlers::get_specialty));

    let admin_routes = Router::new()
        .route("/", post(handlers::create_specialty))
        .route("/{specialty_id}", put(handlers::update_specialty).delete(handlers::delete_specialty))
        .layer(middleware::from_fn_with_state(state.clone(), admin_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}
