use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::handlers::{
    book_event, cancel_event, cancel_reservation, delete_event, download_ticket,
    event_availability, health_check, my_reservations, organizer_reservations, pay_reservation,
    payment_cancelled, payment_success, scan_ticket, stripe_webhook,
};
use crate::state::AppState;

pub fn create_routes(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events/mine/reservations", get(organizer_reservations))
        .route("/events/:id", delete(delete_event))
        .route("/events/:id/availability", get(event_availability))
        .route("/events/:id/reservations", post(book_event))
        .route("/events/:id/cancel", post(cancel_event))
        .route("/reservations/mine", get(my_reservations))
        .route("/reservations/payment-success", get(payment_success))
        .route("/reservations/:id", delete(cancel_reservation))
        .route("/reservations/:id/pay", post(pay_reservation))
        .route("/reservations/:id/ticket", get(download_ticket))
        .route("/reservations/:id/scan", get(scan_ticket))
        .route(
            "/reservations/:id/payment-cancelled",
            post(payment_cancelled),
        )
        .route("/webhooks/stripe", post(stripe_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(config))
        .layer(create_cors_layer(config))
}
