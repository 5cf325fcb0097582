use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};

use shared_database::AppState;
use shared_utils::extractor::admin_middleware;

use crate::handlers;

// Public and admin routes share the `{id}` segment; public lookups also accept a slug.

pub fn product_routes(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::list_products))
        .route("/{id}", get(handlers::get_product));

    let admin_routes = Router::new()
        .route("/manage", get(handlers::list_products_admin))
        .route("/", post(handlers::create_product))
        .route("/{id}", put(handlers::update_product).delete(handlers::delete_product))
        .layer(middleware::from_fn_with_state(state.clone(), admin_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}

pub fn blog_routes(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::list_posts))
        .route("/{id}", get(handlers::get_post));

    let admin_routes = Router::new()
        .route("/manage", get(handlers::list_posts_admin))
        .route("/", post(handlers::create_post))
        .route("/{id}", put(handlers::update_post).delete(handlers::delete_post))
        .layer(middleware::from_fn_with_state(state.clone(), admin_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}

pub fn testimonial_routes(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::list_testimonials))
        .route("/{id}", get(handlers::get_testimonial));

    let admin_routes = Router::new()
        .route("/manage", get(handlers::list_testimonials_admin))
        .route("/", post(handlers::create_testimonial))
        .route("/{id}", put(handlers::update_testimonial).delete(handlers::delete_testimonial))
        .layer(middleware::from_fn_with_state(state.clone(), admin_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}

pub fn contact_routes(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/", post(handlers::submit_contact));

    let admin_routes = Router::new()
        .route("/", get(handlers::list_contact_messages))
        .route("/{id}", delete(handlers::delete_contact_message))
        .route("/{id}/read", patch(handlers::mark_contact_read))
        .layer(middleware::from_fn_with_state(state.clone(), admin_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}

pub fn legal_routes(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::list_legal_pages))
        .route("/{slug}", get(handlers::get_legal_page));

    let admin_routes = Router::new()
        .route("/{slug}", put(handlers::upsert_legal_page))
        .layer(middleware::from_fn_with_state(state.clone(), admin_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}
