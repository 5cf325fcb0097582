use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use doctor_cell::router::{doctor_routes, specialty_routes};
use shared_models::auth::UserRole;
use shared_utils::test_utils::{TestContext, TestUser};

async fn send(app: Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

fn doctor_body(name: &str) -> Value {
    json!({
        "name": name,
        "email": "ana.garcia@clinic.test",
        "timezone": "UTC",
        "external_calendar_url": "https://calendar.example/ana.ics"
    })
}

#[tokio::test]
async fn test_create_doctor_requires_authentication() {
    let ctx = TestContext::new();
    let app = doctor_routes(ctx.state());

    let (status, body) = send(app, Method::POST, "/", None, Some(doctor_body("Ana Garcia"))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_create_doctor_rejects_non_admin_and_pending_users() {
    let ctx = TestContext::new();

    let staff = TestUser::staff("desk@clinic.test");
    ctx.seed_user(&staff, UserRole::Staff, true);
    let (status, body) = send(
        doctor_routes(ctx.state()),
        Method::POST,
        "/",
        Some(&ctx.token_for(&staff)),
        Some(doctor_body("Ana Garcia")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Administrator role required");

    let pending = TestUser::admin("new-admin@clinic.test");
    ctx.seed_user(&pending, UserRole::Admin, false);
    let (status, body) = send(
        doctor_routes(ctx.state()),
        Method::POST,
        "/",
        Some(&ctx.token_for(&pending)),
        Some(doctor_body("Ana Garcia")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Account is pending approval");

    let unknown = TestUser::patient("visitor@clinic.test");
    let (status, _) = send(
        doctor_routes(ctx.state()),
        Method::POST,
        "/",
        Some(&ctx.token_for(&unknown)),
        Some(doctor_body("Ana Garcia")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_doctor_lifecycle() {
    let ctx = TestContext::new();
    let token = ctx.admin_token();

    let (status, created) = send(
        doctor_routes(ctx.state()),
        Method::POST,
        "/",
        Some(&token),
        Some(doctor_body("Ana Garcia")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let doctor_id = created["id"].as_str().unwrap().to_string();

    // Public view hides calendar URLs
    let (status, public) = send(doctor_routes(ctx.state()), Method::GET, &format!("/{}", doctor_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(public["name"], "Ana Garcia");
    assert!(public.get("external_calendar_url").is_none());

    let (status, _) = send(
        doctor_routes(ctx.state()),
        Method::DELETE,
        &format!("/{}", doctor_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = send(doctor_routes(ctx.state()), Method::GET, "/", None, None).await;
    assert_eq!(listed["total"], 0);

    let (_, managed) = send(doctor_routes(ctx.state()), Method::GET, "/manage", Some(&token), None).await;
    assert_eq!(managed["total"], 1);
    assert_eq!(managed["doctors"][0]["is_active"], false);
}

#[tokio::test]
async fn test_availability_and_slots() {
    let ctx = TestContext::new();
    let token = ctx.admin_token();

    let (_, created) = send(
        doctor_routes(ctx.state()),
        Method::POST,
        "/",
        Some(&token),
        Some(doctor_body("Ana Garcia")),
    )
    .await;
    let doctor_id = created["id"].as_str().unwrap().to_string();

    let (status, stored) = send(
        doctor_routes(ctx.state()),
        Method::PUT,
        &format!("/{}/availability", doctor_id),
        Some(&token),
        Some(json!({ "windows": [{ "day_of_week": 1, "start_time": "09:00", "end_time": "12:00" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["windows"][0]["start_time"], "09:00");

    let (status, body) = send(
        doctor_routes(ctx.state()),
        Method::GET,
        &format!("/{}/available-slots?date=2030-01-07&duration_minutes=60", doctor_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let slots = body["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[0]["start_time"], "2030-01-07T09:00:00Z");

    // Absurd slot lengths are refused and leave the service usable
    let (status, _) = send(
        doctor_routes(ctx.state()),
        Method::GET,
        &format!("/{}/available-slots?date=2030-01-07&duration_minutes=1000000000000", doctor_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        doctor_routes(ctx.state()),
        Method::GET,
        &format!("/{}/available-slots?date=2030-01-07&duration_minutes=1440", doctor_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["slots"].as_array().unwrap().is_empty());

    let (status, _) = send(doctor_routes(ctx.state()), Method::GET, &format!("/{}/availability", doctor_id), None, None).await;
    assert_eq!(status, StatusCode::OK);

    // Invalid schedules are rejected with 400
    let (status, _) = send(
        doctor_routes(ctx.state()),
        Method::PUT,
        &format!("/{}/availability", doctor_id),
        Some(&token),
        Some(json!({ "windows": [{ "day_of_week": 1, "start_time": "12:00", "end_time": "09:00" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_specialty_routes() {
    let ctx = TestContext::new();
    let token = ctx.admin_token();

    let (status, created) = send(
        specialty_routes(ctx.state()),
        Method::POST,
        "/",
        Some(&token),
        Some(json!({ "name": "Cardiology", "description": "Heart health" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        specialty_routes(ctx.state()),
        Method::POST,
        "/",
        Some(&token),
        Some(json!({ "name": "cardiology" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, listed) = send(specialty_routes(ctx.state()), Method::GET, "/", None, None).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["specialties"][0]["id"], created["id"]);

    let (status, _) = send(
        specialty_routes(ctx.state()),
        Method::GET,
        "/00000000-0000-0000-0000-000000000000",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
