use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::services::WebhookOutcome;
use crate::state::AppState;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Stripe retries anything that is not a 2xx, so every handled event
/// (including ones we ignore) is acknowledged with an empty 200.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.webhook.handle(&body, signature, Utc::now()).await {
        Ok(outcome) => {
            if let WebhookOutcome::Confirmed { reservation, .. } = &outcome {
                tracing::debug!(reservation_id = reservation.id, "Webhook acknowledged");
            }
            (StatusCode::OK, "").into_response()
        }
        Err(e) => e.into_response(),
    }
}
