use axum::response::Response;
use serde::Serialize;

use crate::utils::response::success;

pub mod events;
pub mod reservations;
pub mod webhook;

pub use events::{cancel_event, delete_event, event_availability};
pub use reservations::{
    book_event, cancel_reservation, download_ticket, my_reservations, organizer_reservations,
    pay_reservation, payment_cancelled, payment_success, scan_ticket,
};
pub use webhook::stripe_webhook;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "artconnect-server",
    };

    success(payload, "Health check successful")
}
