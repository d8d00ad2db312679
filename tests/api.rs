mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use storefront_api::routes;
use tower::ServiceExt;

fn app() -> Router {
    let (state, _) = common::test_state();
    routes::app(state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let app = app();
    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn unknown_paths_return_not_found() {
    let app = app();
    let (status, body) = send(&app, Request::get("/nope").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["data"]["path"], "/nope");
}

#[tokio::test]
async fn cart_requires_a_bearer_token() {
    let app = app();
    let (status, _) = send(&app, Request::get("/api/cart").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::get("/api/cart")
        .header(header::AUTHORIZATION, "Bearer not-a-token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn registered_user_can_reach_their_cart() {
    let app = app();
    let (status, _) = send(
        &app,
        post_json(
            "/api/auth/register",
            json!({
                "email": "http@example.com",
                "password": "password123",
                "first_name": "Http",
                "last_name": "Client"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        post_json(
            "/api/auth/login",
            json!({ "email": "http@example.com", "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let request = Request::get("/api/cart")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_empty"], true);

    // customers cannot use admin endpoints
    let request = Request::get("/api/admin/orders")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn product_listing_is_public() {
    let app = app();
    let (status, body) = send(&app, Request::get("/api/products?page=1&per_page=5").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["meta"]["per_page"], 5);
}

#[tokio::test]
async fn huge_page_numbers_are_clamped() {
    let app = app();
    let request = Request::get("/api/products?page=9223372036854775807&per_page=100")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["page"], storefront_api::routes::params::MAX_PAGE);
}

#[tokio::test]
async fn session_endpoints_follow_the_token() {
    let app = app();
    let (_, _) = send(
        &app,
        post_json(
            "/api/auth/register",
            json!({
                "email": "session@example.com",
                "password": "password123",
                "first_name": "Sam",
                "last_name": "Session"
            }),
        ),
    )
    .await;
    let (_, body) = send(
        &app,
        post_json(
            "/api/auth/login",
            json!({ "email": "session@example.com", "password": "password123" }),
        ),
    )
    .await;
    let token = body["data"]["token"].as_str().unwrap().to_string();
    let authed = |method: &str, uri: &str| {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(&app, authed("GET", "/api/auth/check")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "session@example.com");

    let (status, body) = send(&app, authed("POST", "/api/auth/refresh")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["token"].is_string());
    assert_eq!(body["data"]["user"]["email"], "session@example.com");

    let (status, body) = send(&app, authed("GET", "/api/users/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_orders"], 0);

    let uri = format!("/api/cart/quick-add/{}/100", uuid::Uuid::new_v4());
    let (status, body) = send(&app, authed("POST", &uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["error"], body["message"]);

    let (status, _) = send(
        &app,
        Request::get("/api/auth/verify-reset-token/unknown")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn best_sellers_are_public() {
    let app = app();
    let (status, body) = send(
        &app,
        Request::get("/api/products/best-sellers?limit=3")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}
