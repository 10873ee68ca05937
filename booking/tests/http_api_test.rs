//! HTTP API integration tests.
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`; no socket
//! is opened.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::{Harness, harness};
use serde_json::{Value, json};
use tower::ServiceExt;
use visit_booking::server::{AppState, build_router};

fn router(h: &Harness) -> Router {
    build_router(AppState::new(h.engine().clone(), "in_memory"))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, body)
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, user: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn booking_body(party: usize) -> Value {
    let visitors: Vec<Value> = (0..party)
        .map(|i| json!({ "name": format!("Visitor {i}"), "age": 30, "nationality": "Indian" }))
        .collect();
    json!({
        "site_id": "taj-mahal",
        "visit_date": "2025-03-15",
        "slot": { "start": "06:00", "end": "08:00" },
        "visitors": visitors,
    })
}

#[tokio::test]
async fn health_reports_components() {
    let h = harness().await;
    let (status, body) = send(&router(&h), get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["components"]["catalog"], "closed");
    assert_eq!(body["components"]["repository"], "in_memory");
    assert_eq!(body["components"]["payload_signing"], true);
}

#[tokio::test]
async fn metrics_without_recorder_is_not_found() {
    let h = harness().await;
    let (status, _) = send(&router(&h), get("/metrics", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn slots_lists_bookable_windows() {
    let h = harness().await;
    let (status, body) = send(&router(&h), get("/api/sites/taj-mahal/slots?date=2025-03-15", None)).await;

    assert_eq!(status, StatusCode::OK);
    let slots = body["slots"].as_array().unwrap();
    // 06:00-18:00 in two-hour windows
    assert_eq!(slots.len(), 6);
    assert_eq!(slots[0]["slot"]["start"], "06:00");
    assert_eq!(slots[0]["available"], 100);
    assert_eq!(body["total_available"], 600);
}

#[tokio::test]
async fn slots_for_unknown_site_is_not_found() {
    let h = harness().await;
    let (status, body) = send(&router(&h), get("/api/sites/atlantis/slots?date=2025-03-15", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn reserving_requires_caller_identity() {
    let h = harness().await;
    let (status, body) = send(&router(&h), post("/api/tickets", None, &booking_body(1))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn reserve_fetch_and_cancel() {
    let h = harness().await;
    let app = router(&h);

    let (status, ticket) = send(&app, post("/api/tickets", Some("user-1"), &booking_body(2))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ticket["status"], "booked");
    let reference = ticket["reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with("TAJ-20250315-"));

    let (status, fetched) = send(&app, get(&format!("/api/tickets/{reference}"), Some("user-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["reference"], reference.as_str());

    // Someone else's ticket looks like a missing one
    let (status, _) = send(&app, get(&format!("/api/tickets/{reference}"), Some("user-2"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, listed) = send(&app, get("/api/tickets?status=booked", Some("user-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);

    let (status, cancelled) = send(
        &app,
        post(
            &format!("/api/tickets/{reference}/cancel"),
            Some("user-1"),
            &json!({ "reason": "weather" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["ticket"]["status"], "cancelled");
    assert_eq!(cancelled["message"], "Ticket cancelled");
}

#[tokio::test]
async fn invalid_booking_is_unprocessable() {
    let h = harness().await;
    let (status, body) = send(&router(&h), post("/api/tickets", Some("user-1"), &booking_body(0))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn oversized_party_is_rejected() {
    let h = harness().await;
    let (status, _) = send(&router(&h), post("/api/tickets", Some("user-1"), &booking_body(11))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn payment_callback_confirms_ticket() {
    let h = harness().await;
    let app = router(&h);

    let (_, ticket) = send(&app, post("/api/tickets", Some("user-1"), &booking_body(1))).await;
    let reference = ticket["reference"].as_str().unwrap().to_string();
    h.settle().await;

    let stored = h
        .engine()
        .get_ticket(&reference.as_str().into())
        .await
        .unwrap();
    let order_id = stored.payment.order_id.unwrap();
    let payment_id = visit_booking::types::PaymentId::from("pay_http");
    let signature = h.signature(&order_id, &payment_id);

    let callback = json!({
        "reference": reference,
        "order_id": order_id.as_str(),
        "payment_id": "pay_http",
        "signature": signature,
    });
    let (status, body) = send(&app, post("/api/payments/callback", None, &callback)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");
    assert_eq!(body["payment_status"], "completed");

    // Replays are harmless
    let (status, body) = send(&app, post("/api/payments/callback", None, &callback)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");
}

#[tokio::test]
async fn forged_payment_callback_is_bad_request() {
    let h = harness().await;
    let app = router(&h);

    let (_, ticket) = send(&app, post("/api/tickets", Some("user-1"), &booking_body(1))).await;
    let callback = json!({
        "ticketId": ticket["reference"],
        "orderId": "order_fake",
        "paymentId": "pay_fake",
        "signature": "00",
    });
    let (status, body) = send(&app, post("/api/payments/callback", None, &callback)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PAYMENT_MISMATCH");
}

#[tokio::test]
async fn verify_rejects_garbage_payload() {
    let h = harness().await;
    let (status, body) = send(&router(&h), post("/api/verify", None, &json!({ "payload": "not-a-payload" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn check_in_before_visit_day_conflicts() {
    let h = harness().await;
    let ticket = h.paid_ticket("user-1", 1).await;

    let (status, body) = send(
        &router(&h),
        post(
            &format!("/api/tickets/{}/check-in", ticket.reference),
            None,
            &json!({ "staff_id": "staff-1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
}
