use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use auth_cell::auth_routes;
use shared_models::auth::UserRole;
use shared_utils::test_utils::{JwtTestUtils, TestContext, TestUser};

async fn call(router: Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
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

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_validate_token() {
    let ctx = TestContext::new();
    let user = TestUser::staff("nurse@clinic.test");
    let token = ctx.token_for(&user);

    let (status, body) = call(auth_routes(ctx.state()), Method::POST, "/validate", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["user_id"], user.id);
    assert_eq!(body["email"], "nurse@clinic.test");
    assert_eq!(body["role"], "staff");

    let (status, body) = call(auth_routes(ctx.state()), Method::POST, "/validate", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_validate_rejects_foreign_signature() {
    let ctx = TestContext::new();
    let user = TestUser::default();
    let forged = JwtTestUtils::create_test_token(&user, "some-other-secret", Some(1));

    let (status, _) = call(auth_routes(ctx.state()), Method::POST, "/validate", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(auth_routes(ctx.state()), Method::POST, "/verify", Some(&forged), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn test_verify_token() {
    let ctx = TestContext::new();
    let token = ctx.token_for(&TestUser::default());

    let (status, body) = call(auth_routes(ctx.state()), Method::POST, "/verify", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn test_profile_registers_pending_user() {
    let ctx = TestContext::new();
    let user = TestUser::patient("maria@example.com");
    let token = ctx.token_for(&user);

    let (status, _) = call(auth_routes(ctx.state()), Method::GET, "/profile", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, profile) = call(auth_routes(ctx.state()), Method::GET, "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["user_id"], user.id);
    assert_eq!(profile["role"], "patient");
    assert_eq!(profile["approved"], false);

    // Registered but unapproved users are kept out of the console
    let (status, _) = call(auth_routes(ctx.state()), Method::GET, "/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_bootstrap_admin_profile() {
    let ctx = TestContext::new();
    let owner = TestUser::patient("owner@clinic.test");
    let token = ctx.token_for(&owner);

    let (status, profile) = call(auth_routes(ctx.state()), Method::GET, "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["role"], "admin");
    assert_eq!(profile["approved"], true);

    let (status, users) = call(auth_routes(ctx.state()), Method::GET, "/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users["total"], 1);
}

#[tokio::test]
async fn test_approval_flow() {
    let ctx = TestContext::new();
    let admin_token = ctx.admin_token();
    let applicant = TestUser::staff("doctor@clinic.test");
    ctx.seed_user(&applicant, UserRole::Patient, false);

    let (status, pending) = call(auth_routes(ctx.state()), Method::GET, "/users?pending=true", Some(&admin_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["total"], 1);
    assert_eq!(pending["users"][0]["email"], "doctor@clinic.test");

    let (status, _) = call(
        auth_routes(ctx.state()),
        Method::POST,
        &format!("/users/{}/approve", applicant.id),
        Some(&admin_token),
        Some(json!({ "role": "superuser" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, approved) = call(
        auth_routes(ctx.state()),
        Method::POST,
        &format!("/users/{}/approve", applicant.id),
        Some(&admin_token),
        Some(json!({ "role": "admin" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["role"], "admin");
    assert_eq!(approved["approved"], true);

    // The newly approved admin can use the console
    let applicant_token = ctx.token_for(&applicant);
    let (status, _) = call(auth_routes(ctx.state()), Method::GET, "/users", Some(&applicant_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, revoked) = call(
        auth_routes(ctx.state()),
        Method::POST,
        &format!("/users/{}/revoke", applicant.id),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revoked["approved"], false);

    let (status, _) = call(auth_routes(ctx.state()), Method::GET, "/users", Some(&applicant_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_cannot_revoke_self_or_unknown_user() {
    let ctx = TestContext::new();
    let admin = TestUser::admin("chief@clinic.test");
    ctx.seed_user(&admin, UserRole::Admin, true);
    let token = ctx.token_for(&admin);

    let (status, _) = call(
        auth_routes(ctx.state()),
        Method::POST,
        &format!("/users/{}/revoke", admin.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        auth_routes(ctx.state()),
        Method::POST,
        "/users/nobody/approve",
        Some(&token),
        Some(json!({ "role": "staff" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
