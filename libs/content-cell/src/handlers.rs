use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_database::AppState;
use shared_models::error::AppError;

use crate::models::{
    ContactQuery, CreateBlogPostRequest, CreateContactMessageRequest, CreateProductRequest,
    CreateTestimonialRequest, MarkReadRequest, ProductQuery, UpdateBlogPostRequest, UpdateProductRequest,
    UpdateTestimonialRequest, UpsertLegalPageRequest,
};
use crate::services::{BlogService, ContactService, LegalService, ProductService, TestimonialService};

// ==============================================================================
// PRODUCTS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<Value>, AppError> {
    let products = ProductService::new(&state).list_published(query.category.as_deref())?;

    Ok(Json(json!({
        "products": products,
        "total": products.len()
    })))
}

#[axum::debug_handler]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Value>, AppError> {
    let product = ProductService::new(&state).get_published(&key)?;
    Ok(Json(json!(product)))
}

#[axum::debug_handler]
pub async fn list_products_admin(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let products = ProductService::new(&state).list_all()?;

    Ok(Json(json!({
        "products": products,
        "total": products.len()
    })))
}

#[axum::debug_handler]
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateProductRequest>,
) -> Result<Json<Value>, AppError> {
    let product = ProductService::new(&state).create_product(request)?;
    Ok(Json(json!(product)))
}

#[axum::debug_handler]
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<Json<Value>, AppError> {
    let product = ProductService::new(&state).update_product(product_id, request)?;
    Ok(Json(json!(product)))
}

#[axum::debug_handler]
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ProductService::new(&state).delete_product(product_id)?;
    Ok(Json(json!({ "deleted": true })))
}

// ==============================================================================
// BLOG
// ==============================================================================

#[axum::debug_handler]
pub async fn list_posts(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let posts = BlogService::new(&state).list_published()?;

    Ok(Json(json!({
        "posts": posts,
        "total": posts.len()
    })))
}

#[axum::debug_handler]
pub async fn get_post(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Result<Json<Value>, AppError> {
    let post = BlogService::new(&state).get_published(&key)?;
    Ok(Json(json!(post)))
}

#[axum::debug_handler]
pub async fn list_posts_admin(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let posts = BlogService::new(&state).list_all()?;

    Ok(Json(json!({
        "posts": posts,
        "total": posts.len()
    })))
}

#[axum::debug_handler]
pub async fn create_post(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBlogPostRequest>,
) -> Result<Json<Value>, AppError> {
    let post = BlogService::new(&state).create_post(request)?;
    Ok(Json(json!(post)))
}

#[axum::debug_handler]
pub async fn update_post(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<Uuid>,
    Json(request): Json<UpdateBlogPostRequest>,
) -> Result<Json<Value>, AppError> {
    let post = BlogService::new(&state).update_post(post_id, request)?;
    Ok(Json(json!(post)))
}

#[axum::debug_handler]
pub async fn delete_post(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    BlogService::new(&state).delete_post(post_id)?;
    Ok(Json(json!({ "deleted": true })))
}

// ==============================================================================
// TESTIMONIALS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_testimonials(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let testimonials = TestimonialService::new(&state).list_published()?;

    Ok(Json(json!({
        "testimonials": testimonials,
        "total": testimonials.len()
    })))
}

#[axum::debug_handler]
pub async fn get_testimonial(
    State(state): State<Arc<AppState>>,
    Path(testimonial_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let testimonial = TestimonialService::new(&state).get_published(testimonial_id)?;
    Ok(Json(json!(testimonial)))
}

#[axum::debug_handler]
pub async fn list_testimonials_admin(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let testimonials = TestimonialService::new(&state).list_all()?;

    Ok(Json(json!({
        "testimonials": testimonials,
        "total": testimonials.len()
    })))
}

#[axum::debug_handler]
pub async fn create_testimonial(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTestimonialRequest>,
) -> Result<Json<Value>, AppError> {
    let testimonial = TestimonialService::new(&state).create_testimonial(request)?;
    Ok(Json(json!(testimonial)))
}

#[axum::debug_handler]
pub async fn update_testimonial(
    State(state): State<Arc<AppState>>,
    Path(testimonial_id): Path<Uuid>,
    Json(request): Json<UpdateTestimonialRequest>,
) -> Result<Json<Value>, AppError> {
    let testimonial = TestimonialService::new(&state).update_testimonial(testimonial_id, request)?;
    Ok(Json(json!(testimonial)))
}

#[axum::debug_handler]
pub async fn delete_testimonial(
    State(state): State<Arc<AppState>>,
    Path(testimonial_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    TestimonialService::new(&state).delete_testimonial(testimonial_id)?;
    Ok(Json(json!({ "deleted": true })))
}

// ==============================================================================
// CONTACT
// ==============================================================================

#[axum::debug_handler]
pub async fn submit_contact(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateContactMessageRequest>,
) -> Result<Json<Value>, AppError> {
    let message = ContactService::new(&state).submit(request)?;

    Ok(Json(json!({
        "id": message.id,
        "message": "Thank you, we will get back to you soon"
    })))
}

#[axum::debug_handler]
pub async fn list_contact_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContactQuery>,
) -> Result<Json<Value>, AppError> {
    let messages = ContactService::new(&state).list_messages(query.unread.unwrap_or(false))?;

    Ok(Json(json!({
        "messages": messages,
        "total": messages.len()
    })))
}

#[axum::debug_handler]
pub async fn mark_contact_read(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
    request: Option<Json<MarkReadRequest>>,
) -> Result<Json<Value>, AppError> {
    let is_read = request.and_then(|Json(body)| body.is_read).unwrap_or(true);
    let message = ContactService::new(&state).mark_read(message_id, is_read)?;
    Ok(Json(json!(message)))
}

#[axum::debug_handler]
pub async fn delete_contact_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ContactService::new(&state).delete_message(message_id)?;
    Ok(Json(json!({ "deleted": true })))
}

// ==============================================================================
// LEGAL PAGES
// ==============================================================================

#[axum::debug_handler]
pub async fn list_legal_pages(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let pages = LegalService::new(&state).list_pages()?;

    Ok(Json(json!({
        "pages": pages,
        "total": pages.len()
    })))
}

#[axum::debug_handler]
pub async fn get_legal_page(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Value>, AppError> {
    let page = LegalService::new(&state).get_page(&slug)?;
    Ok(Json(json!(page)))
}

#[axum::debug_handler]
pub async fn upsert_legal_page(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(request): Json<UpsertLegalPageRequest>,
) -> Result<Json<Value>, AppError> {
    let page = LegalService::new(&state).upsert_page(&slug, request)?;
    Ok(Json(json!(page)))
}
