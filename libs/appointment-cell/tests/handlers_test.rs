use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use chrono::NaiveTime;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::router::appointment_routes;
use doctor_cell::models::{AvailabilityWindowInput, CreateDoctorRequest};
use doctor_cell::services::{AvailabilityService, DoctorService};
use shared_utils::test_utils::TestContext;

async fn call(ctx: &TestContext, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
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

    let response = appointment_routes(ctx.state()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn seed_doctor(ctx: &TestContext) -> Uuid {
    let doctor = DoctorService::new(&ctx.state)
        .create_doctor(CreateDoctorRequest {
            name: "Tomas Ibarra".into(),
            email: None,
            bio: None,
            photo_url: None,
            timezone: Some("Europe/Madrid".into()),
            external_calendar_url: None,
            calendar_push_url: None,
            specialty_ids: Vec::new(),
        })
        .unwrap();

    AvailabilityService::new(&ctx.state)
        .set_windows(
            doctor.id,
            vec![AvailabilityWindowInput {
                day_of_week: 1,
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            }],
        )
        .unwrap();
    doctor.id
}

fn booking(doctor_id: Uuid, start: &str, end: &str) -> Value {
    json!({
        "first_name": "Nuria",
        "last_name": "Campos",
        "email": "nuria@example.com",
        "phone": "+34 622 000 111",
        "doctor_id": doctor_id,
        "start_time": start,
        "end_time": end
    })
}

#[tokio::test]
async fn test_public_booking_and_conflict() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);

    // 10:00 Madrid is 09:00 UTC in January
    let (status, body) = call(
        &ctx,
        Method::POST,
        "/book",
        None,
        Some(booking(doctor_id, "2030-01-07T09:00:00Z", "2030-01-07T09:30:00Z")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    let (status, body) = call(
        &ctx,
        Method::POST,
        "/book",
        None,
        Some(booking(doctor_id, "2030-01-07T09:15:00Z", "2030-01-07T09:45:00Z")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Appointment conflicts with an existing booking");

    // 12:00 Madrid is past the window
    let (status, _) = call(
        &ctx,
        Method::POST,
        "/book",
        None,
        Some(booking(doctor_id, "2030-01-07T11:00:00Z", "2030-01-07T11:30:00Z")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &ctx,
        Method::POST,
        "/book",
        None,
        Some(booking(Uuid::new_v4(), "2030-01-07T09:00:00Z", "2030-01-07T09:30:00Z")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let ctx = TestContext::new();

    let (status, _) = call(&ctx, Method::GET, "/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&ctx, Method::POST, &format!("/{}/cancel", Uuid::new_v4()), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_create_list_update_cancel() {
    let ctx = TestContext::new();
    let token = ctx.admin_token();
    let doctor_id = seed_doctor(&ctx);

    let (status, created) = call(
        &ctx,
        Method::POST,
        "/",
        Some(&token),
        Some(json!({
            "doctor_id": doctor_id,
            "start_time": "2030-01-07T08:00:00Z",
            "end_time": "2030-01-07T08:30:00Z",
            "status": "confirmed"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["status"], "confirmed");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, conflicts) = call(
        &ctx,
        Method::GET,
        &format!(
            "/conflicts?doctor_id={}&start_time=2030-01-07T08:15:00Z&end_time=2030-01-07T08:45:00Z",
            doctor_id
        ),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conflicts["has_conflict"], true);

    let (status, listed) = call(
        &ctx,
        Method::GET,
        &format!("/?doctor_id={}&status=confirmed", doctor_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);

    let (status, updated) = call(
        &ctx,
        Method::PATCH,
        &format!("/{}", id),
        Some(&token),
        Some(json!({ "notes": "Bring previous results" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["notes"], "Bring previous results");

    let (status, cancelled) = call(
        &ctx,
        Method::POST,
        &format!("/{}/cancel", id),
        Some(&token),
        Some(json!({ "reason": "Doctor unavailable" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["cancellation_reason"], "Doctor unavailable");

    // Cancelling without a body is accepted and idempotent
    let (status, again) = call(&ctx, Method::POST, &format!("/{}/cancel", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["cancellation_reason"], "Doctor unavailable");

    let (status, fetched) = call(&ctx, Method::GET, &format!("/{}", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "cancelled");
}
