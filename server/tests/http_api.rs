mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use serde_json::Value;
use tower::ServiceExt;

use artconnect_server::models::{EventId, ReservationStatus, Role, User};
use artconnect_server::repository::Repositories;
use artconnect_server::routes::create_routes;
use artconnect_server::services::TicketSigner;
use artconnect_server::state::AppState;

use common::{FailingNotifier, TestApp, APP_SECRET};

fn router(app: &TestApp) -> Router {
    create_routes(app.state.clone(), &app.config)
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn organizer_and_participant(app: &TestApp) -> (User, User) {
    (
        app.user("Organizer", vec![Role::Artist]).await,
        app.participant("Alice").await,
    )
}

async fn book(app: &TestApp, user: &User, event_id: EventId) -> Value {
    let response = router(app)
        .oneshot(request(
            Method::POST,
            &format!("/events/{}/reservations", event_id),
            Some(&app.token(user)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await
}

async fn get_json(app: &TestApp, uri: &str, user: &User) -> (StatusCode, Value) {
    let response = router(app)
        .oneshot(request(Method::GET, uri, Some(&app.token(user)), None))
        .await
        .unwrap();
    let status = response.status();
    (status, json_body(response).await)
}

#[tokio::test]
async fn test_health_check_carries_security_headers() {
    let app = TestApp::new();
    let response = router(&app)
        .oneshot(request(Method::GET, "/health", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-store");

    let body = json_body(response).await;
    assert_eq!(body["data"]["service"], "artconnect-server");
}

#[tokio::test]
async fn test_booking_requires_a_valid_token() {
    let app = TestApp::new();
    let (organizer, _) = organizer_and_participant(&app).await;
    let event = app.event(&organizer, None, 10).await;
    let uri = format!("/events/{}/reservations", event.id);

    let response = router(&app)
        .oneshot(request(Method::POST, &uri, None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["code"], "AUTH_ERROR");

    let response = router(&app)
        .oneshot(request(Method::POST, &uri, Some("garbage"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_free_booking_over_http() {
    let app = TestApp::new();
    let (organizer, alice) = organizer_and_participant(&app).await;
    let event = app.event(&organizer, None, 1).await;
    let token = app.token(&alice);

    let response = router(&app)
        .oneshot(request(
            Method::POST,
            &format!("/events/{}/reservations", event.id),
            Some(&token),
            Some(serde_json::json!({})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "confirmed");
    assert_eq!(body["data"]["reservation"]["status"], "CONFIRMED");

    let response = router(&app)
        .oneshot(request(
            Method::GET,
            &format!("/events/{}/availability", event.id),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["reserved"], 1);
    assert_eq!(body["data"]["remaining"], 0);

    let bob = app.participant("Bob").await;
    let response = router(&app)
        .oneshot(request(
            Method::POST,
            &format!("/events/{}/reservations", event.id),
            Some(&app.token(&bob)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "EVENT_FULL");
    assert_eq!(body["error"]["message"], "Sorry, this event is full.");
}

#[tokio::test]
async fn test_paid_booking_returns_checkout_url() {
    let app = TestApp::new();
    let (organizer, alice) = organizer_and_participant(&app).await;
    let event = app.event(&organizer, Some(Decimal::new(1550, 2)), 10).await;

    let response = router(&app)
        .oneshot(request(
            Method::POST,
            &format!("/events/{}/reservations", event.id),
            Some(&app.token(&alice)),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "payment_required");
    assert!(body["data"]["checkout_url"]
        .as_str()
        .unwrap()
        .starts_with("https://checkout.stripe.test/pay/"));
    assert_eq!(app.provider.requests()[0].unit_amount, 1550);
}

#[tokio::test]
async fn test_provider_outage_is_a_503() {
    let app = TestApp::new();
    let (organizer, alice) = organizer_and_participant(&app).await;
    let event = app.event(&organizer, Some(Decimal::new(20, 0)), 10).await;
    app.provider.set_failing(true);

    let response = router(&app)
        .oneshot(request(
            Method::POST,
            &format!("/events/{}/reservations", event.id),
            Some(&app.token(&alice)),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "PAYMENT_UNAVAILABLE");
    // The provider's own message stays in the logs.
    assert!(!body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("mock provider"));
}

#[tokio::test]
async fn test_webhook_status_codes() {
    let app = TestApp::new();
    let post = |body: Body, signature: Option<&str>| {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/stripe");
        if let Some(signature) = signature {
            builder = builder.header("Stripe-Signature", signature);
        }
        builder.body(body).unwrap()
    };

    let response = router(&app)
        .oneshot(post(Body::empty(), Some("t=1,v1=00")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(text_body(response).await, "Empty payload");

    let response = router(&app)
        .oneshot(post(Body::from("{}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(text_body(response).await, "Missing signature");

    let response = router(&app)
        .oneshot(post(Body::from("{}"), Some("t=1,v1=00")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(text_body(response).await, "Invalid signature");

    let (payload, signature) =
        app.signed_checkout_completed("cs_test_http", 2000, serde_json::json!({}));
    let response = router(&app)
        .oneshot(post(Body::from(payload), Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "");
}

#[tokio::test]
async fn test_webhook_without_secret_is_a_500() {
    let app = TestApp::new();
    let mut config = app.config.clone();
    config.stripe_webhook_secret = None;
    let state = AppState::new(
        &config,
        Repositories::from_store(app.store.clone()),
        app.provider.clone(),
        app.notifier.clone(),
    );
    let router = create_routes(state, &config);

    let response = router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhooks/stripe")
                .header("Stripe-Signature", "t=1,v1=00")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(text_body(response).await, "Webhook not configured");
}

#[tokio::test]
async fn test_paid_flow_through_webhook_and_landing() {
    let app = TestApp::new();
    let (organizer, alice) = organizer_and_participant(&app).await;
    let event = app.event(&organizer, Some(Decimal::new(2000, 2)), 10).await;
    let token = app.token(&alice);

    let response = router(&app)
        .oneshot(request(
            Method::POST,
            &format!("/events/{}/reservations", event.id),
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    let reservation_id = json_body(response).await["data"]["reservation_id"]
        .as_i64()
        .unwrap();

    let response = router(&app)
        .oneshot(request(
            Method::GET,
            "/reservations/payment-success?session_id=cs_test_flow",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["status"], "processing");

    let (payload, signature) = app.signed_checkout_completed(
        "cs_test_flow",
        2000,
        common::metadata(event.id, alice.id, reservation_id),
    );
    let response = router(&app)
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhooks/stripe")
                .header("Stripe-Signature", signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router(&app)
        .oneshot(request(
            Method::GET,
            "/reservations/payment-success?session_id=cs_test_flow",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "confirmed");
    assert_eq!(body["data"]["reservation"]["amount_paid"], 2000);

    let response = router(&app)
        .oneshot(request(Method::GET, "/reservations/mine", Some(&token), None))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["data"]["total"], 1);
    let mine = body["data"]["reservations"].as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["price"], "20.00 EUR");
    assert_eq!(mine[0]["status"], "CONFIRMED");
}

#[tokio::test]
async fn test_payment_cancelled_discards_pending() {
    let app = TestApp::new();
    let (organizer, alice) = organizer_and_participant(&app).await;
    let event = app.event(&organizer, Some(Decimal::new(10, 0)), 10).await;
    let token = app.token(&alice);

    let response = router(&app)
        .oneshot(request(
            Method::POST,
            &format!("/events/{}/reservations", event.id),
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    let reservation_id = json_body(response).await["data"]["reservation_id"]
        .as_i64()
        .unwrap();

    let uri = format!("/reservations/{}/payment-cancelled", reservation_id);
    let bob = app.participant("Bob").await;
    let response = router(&app)
        .oneshot(request(Method::POST, &uri, Some(&app.token(&bob)), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router(&app)
        .oneshot(request(Method::POST, &uri, Some(&token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["outcome"], "discarded");

    let response = router(&app)
        .oneshot(request(Method::POST, &uri, Some(&token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ticket_download_and_scan_redirects() {
    let app = TestApp::new();
    let (organizer, alice) = organizer_and_participant(&app).await;
    let bob = app.participant("Bob").await;
    let event = app.event(&organizer, None, 10).await;

    let response = router(&app)
        .oneshot(request(
            Method::POST,
            &format!("/events/{}/reservations", event.id),
            Some(&app.token(&alice)),
            None,
        ))
        .await
        .unwrap();
    let reservation_id = json_body(response).await["data"]["reservation"]["id"]
        .as_i64()
        .unwrap();

    let ticket_uri = format!("/reservations/{}/ticket", reservation_id);
    for (user, expected) in [
        (&alice, StatusCode::OK),
        (&organizer, StatusCode::OK),
        (&bob, StatusCode::FORBIDDEN),
    ] {
        let response = router(&app)
            .oneshot(request(Method::GET, &ticket_uri, Some(&app.token(user)), None))
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }

    let response = router(&app)
        .oneshot(request(Method::GET, &ticket_uri, Some(&app.token(&alice)), None))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        &format!("inline; filename=\"ticket-artconnect-{}.pdf\"", reservation_id)
    );
    let pdf = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(pdf.starts_with(b"%PDF"));

    let response = router(&app)
        .oneshot(request(
            Method::GET,
            &format!("/reservations/{}/scan?token=forged", reservation_id),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "http://front.test/?scan=invalid"
    );

    let token = TicketSigner::new(APP_SECRET, "http://api.test").derive_scan_token(reservation_id);
    let response = router(&app)
        .oneshot(request(
            Method::GET,
            &format!("/reservations/{}/scan?token={}", reservation_id, token),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        &format!("http://front.test/events/{}?scan=success", event.id)
    );

    // A genuine ticket whose reservation was cancelled afterwards.
    let response = router(&app)
        .oneshot(request(
            Method::DELETE,
            &format!("/reservations/{}", reservation_id),
            Some(&app.token(&alice)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router(&app)
        .oneshot(request(
            Method::GET,
            &format!("/reservations/{}/scan?token={}", reservation_id, token),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "http://front.test/?scan=invalid"
    );
}

#[tokio::test]
async fn test_event_moderation_over_http() {
    let app = TestApp::new();
    let (organizer, alice) = organizer_and_participant(&app).await;
    let event = app.event(&organizer, None, 10).await;

    let response = router(&app)
        .oneshot(request(
            Method::POST,
            &format!("/events/{}/reservations", event.id),
            Some(&app.token(&alice)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router(&app)
        .oneshot(request(
            Method::DELETE,
            &format!("/events/{}", event.id),
            Some(&app.token(&organizer)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        json_body(response).await["error"]["code"],
        "EVENT_HAS_RESERVATIONS"
    );

    let response = router(&app)
        .oneshot(request(
            Method::POST,
            &format!("/events/{}/cancel", event.id),
            Some(&app.token(&organizer)),
            Some(serde_json::json!({ "reason": "Venue flooded" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["participants_notified"], 1);
}

#[tokio::test]
async fn test_cors_preflight_from_frontend() {
    let app = TestApp::new();
    let response = router(&app)
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/reservations/mine")
                .header(header::ORIGIN, "http://front.test")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "http://front.test"
    );
}

#[tokio::test]
async fn test_reservation_listings_over_http() {
    let app = TestApp::new();
    let (organizer, alice) = organizer_and_participant(&app).await;
    let curator = app.user("Curator", vec![Role::Artist]).await;
    let admin = app.user("Admin", vec![Role::Admin]).await;

    let gallery = app.event(&organizer, None, 20).await;
    let mut workshop = common::event_template(&organizer, None, 5);
    workshop.title = "Atelier poterie".into();
    workshop.location = "Sousse".into();
    workshop.starts_at = Utc::now() + Duration::days(2);
    let workshop = app.store.insert_event(workshop).await;

    for i in 0..11 {
        let guest = app.participant(&format!("Guest{}", i)).await;
        book(&app, &guest, gallery.id).await;
    }
    book(&app, &alice, gallery.id).await;
    book(&app, &alice, workshop.id).await;

    // Participants only see their own.
    let (status, body) = get_json(&app, "/reservations/mine", &alice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["page"], 1);
    assert_eq!(body["data"]["total_pages"], 1);

    let (_, body) = get_json(&app, "/reservations/mine?sort=event_date_asc", &alice).await;
    assert_eq!(body["data"]["reservations"][0]["event_id"], workshop.id);
    let (_, body) = get_json(&app, "/reservations/mine?sort=event_date_desc", &alice).await;
    assert_eq!(body["data"]["reservations"][0]["event_id"], gallery.id);

    let (_, body) = get_json(&app, "/reservations/mine?q=POTERIE", &alice).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["reservations"][0]["event_title"], "Atelier poterie");
    let (_, body) = get_json(&app, "/reservations/mine?status=pending", &alice).await;
    assert_eq!(body["data"]["total"], 0);
    let (_, body) = get_json(
        &app,
        "/reservations/mine?date_start=2000-01-01&date_end=2000-12-31",
        &alice,
    )
    .await;
    assert_eq!(body["data"]["total"], 0);

    // Administrators see everyone's, ten a page.
    let (_, body) = get_json(&app, "/reservations/mine", &admin).await;
    assert_eq!(body["data"]["total"], 13);
    assert_eq!(body["data"]["total_pages"], 2);
    assert_eq!(body["data"]["reservations"].as_array().unwrap().len(), 10);
    let (_, body) = get_json(&app, "/reservations/mine?page=9", &admin).await;
    assert_eq!(body["data"]["page"], 2);
    assert_eq!(body["data"]["reservations"].as_array().unwrap().len(), 3);
    let (_, body) = get_json(&app, "/reservations/mine?q=alice", &admin).await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(
        body["data"]["reservations"][0]["participant_email"],
        "alice@example.com"
    );

    // Organizers see the reservations on their own events.
    let (status, body) = get_json(&app, "/events/mine/reservations", &organizer).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 13);
    let (_, body) = get_json(&app, "/events/mine/reservations?q=guest1", &organizer).await;
    assert_eq!(body["data"]["total"], 2);
    let (_, body) = get_json(&app, "/events/mine/reservations", &curator).await;
    assert_eq!(body["data"]["total"], 0);
    assert_eq!(body["data"]["total_pages"], 1);

    let (status, _) = get_json(&app, "/events/mine/reservations", &alice).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_email_outage_does_not_undo_state_changes() {
    let notifier = Arc::new(FailingNotifier::default());
    let app = TestApp::with_notifier(notifier.clone());
    let (organizer, alice) = organizer_and_participant(&app).await;
    let bob = app.participant("Bob").await;
    let free = app.event(&organizer, None, 10).await;
    let paid = app.event(&organizer, Some(Decimal::new(2000, 2)), 10).await;

    let body = book(&app, &alice, free.id).await;
    assert_eq!(body["data"]["status"], "confirmed");
    assert_eq!(body["data"]["notifications_sent"], false);
    let reservation_id = body["data"]["reservation"]["id"].as_i64().unwrap();
    let stored = app
        .state
        .repos
        .reservations
        .find(reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ReservationStatus::Confirmed);

    let response = router(&app)
        .oneshot(request(
            Method::DELETE,
            &format!("/reservations/{}", reservation_id),
            Some(&app.token(&alice)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["notifications_sent"], false);
    assert!(app
        .state
        .repos
        .reservations
        .find(reservation_id)
        .await
        .unwrap()
        .is_none());

    let body = book(&app, &bob, paid.id).await;
    let pending_id = body["data"]["reservation_id"].as_i64().unwrap();
    let (payload, signature) = app.signed_checkout_completed(
        "cs_test_no_mail",
        2000,
        common::metadata(paid.id, bob.id, pending_id),
    );
    let response = router(&app)
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhooks/stripe")
                .header("Stripe-Signature", signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let confirmed = app
        .state
        .repos
        .reservations
        .find(pending_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    assert_eq!(confirmed.amount_paid, Some(2000));

    assert!(notifier.attempts() > 0);
    assert!(app.notifier.sent().is_empty());
}
