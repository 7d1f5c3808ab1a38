use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::middleware::CurrentUser;
use crate::models::EventId;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{empty_success, success};

#[derive(Debug, Deserialize)]
pub struct CancelEventRequest {
    #[serde(default)]
    pub reason: String,
}

/// Public: the booking page polls this to grey out taken seats.
pub async fn event_availability(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> Result<Response, AppError> {
    let event = state
        .repos
        .events
        .find_event(event_id)
        .await?
        .ok_or_else(|| AppError::event_not_found(event_id))?;

    let availability = state.reservations.ledger().availability(&event).await?;
    Ok(success(availability, "Availability retrieved"))
}

pub async fn cancel_event(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CancelEventRequest>,
) -> Result<Response, AppError> {
    let report = state
        .reservations
        .cancel_event(event_id, &user, &request.reason, Utc::now())
        .await?;

    let message = format!(
        "The event has been cancelled and {} participant(s) were notified.",
        report.participants_notified
    );
    Ok(success(
        serde_json::json!({
            "event_id": report.event.id,
            "cancelled_at": report.event.cancellation.as_ref().map(|c| c.cancelled_at),
            "participants_notified": report.participants_notified,
            "notifications_failed": report.notifications.failed,
        }),
        message,
    ))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    state.reservations.delete_event(event_id, &user).await?;
    Ok(empty_success("Event deleted"))
}
