use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use auth_cell::router::auth_routes;
use calendar_sync_cell::{router::calendar_routes, CalendarSyncService};
use content_cell::router::{blog_routes, contact_routes, legal_routes, product_routes, testimonial_routes};
use doctor_cell::router::{doctor_routes, specialty_routes};
use patient_cell::router::create_patient_router;
use shared_database::AppState;

pub fn create_router(state: Arc<AppState>, sync: Arc<CalendarSyncService>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic API is running!" }))
        .nest("/auth", auth_routes(state.clone()))
        .nest("/doctors", doctor_routes(state.clone()))
        .nest("/specialties", specialty_routes(state.clone()))
        .nest("/patients", create_patient_router(state.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/calendar", calendar_routes(sync))
        .nest("/products", product_routes(state.clone()))
        .nest("/blog", blog_routes(state.clone()))
        .nest("/testimonials", testimonial_routes(state.clone()))
        .nest("/contact", contact_routes(state.clone()))
        .nest("/legal", legal_routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use shared_utils::test_utils::TestContext;
    use tower::ServiceExt;

    fn app(ctx: &TestContext) -> Router {
        let sync = Arc::new(CalendarSyncService::with_http(ctx.state()).unwrap());
        create_router(ctx.state(), sync)
    }

    async fn get_status(router: Router, uri: &str, token: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        router.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap().status()
    }

    #[tokio::test]
    async fn public_and_admin_prefixes_are_mounted() {
        let ctx = TestContext::new();
        let token = ctx.admin_token();

        assert_eq!(get_status(app(&ctx), "/", None).await, StatusCode::OK);
        for uri in ["/doctors", "/specialties", "/products", "/blog", "/testimonials", "/legal"] {
            assert_eq!(get_status(app(&ctx), uri, None).await, StatusCode::OK, "{}", uri);
        }
        for uri in ["/patients", "/calendar/settings", "/contact", "/auth/users"] {
            assert_eq!(get_status(app(&ctx), uri, None).await, StatusCode::UNAUTHORIZED, "{}", uri);
            assert_eq!(get_status(app(&ctx), uri, Some(&token)).await, StatusCode::OK, "{}", uri);
        }
    }
}
