//! Stripe `checkout.session.completed` handling.
//!
//! Everything after signature verification answers 200 unless the store is
//! unreachable, so Stripe only retries deliveries that could still succeed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{EventId, Reservation, ReservationId, UserId};
use crate::repository::RepositoryError;
use crate::services::notifications::NotificationReport;
use crate::services::payment::{SignatureError, SignatureVerifier};
use crate::services::reservations::ReservationService;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Empty payload")]
    EmptyPayload,

    #[error("Missing signature")]
    MissingSignature,

    #[error("Webhook not configured")]
    NotConfigured,

    #[error("Invalid signature")]
    InvalidSignature(#[source] SignatureError),

    #[error("Invalid payload")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("Storage unavailable")]
    Storage(#[from] RepositoryError),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::NotConfigured | WebhookError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match &self {
            WebhookError::NotConfigured => {
                tracing::error!("Stripe webhook: STRIPE_WEBHOOK_SECRET is not set");
            }
            WebhookError::Storage(e) => {
                tracing::error!(error = %e, "Stripe webhook: store failure, asking for a retry");
            }
            WebhookError::InvalidSignature(e) => {
                tracing::warn!(reason = %e, "Stripe webhook: invalid signature");
            }
            WebhookError::InvalidPayload(e) => {
                tracing::warn!(reason = %e, "Stripe webhook: invalid payload");
            }
            other => tracing::warn!("Stripe webhook: {}", other),
        }
        (self.status_code(), self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationPath {
    /// The PENDING reservation named in the metadata was confirmed.
    Pending,
    /// No PENDING reservation; a CONFIRMED one was created from metadata.
    Fallback,
}

#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Ignored {
        event_type: String,
    },
    Confirmed {
        reservation: Reservation,
        path: ConfirmationPath,
        notifications: NotificationReport,
    },
    /// A reservation already exists for this payment or participant.
    AlreadyHandled,
    /// Nothing could be confirmed; logged and acknowledged.
    Unresolved,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    amount_total: Option<i64>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

/// Metadata as sent at checkout, tolerant of missing or malformed entries.
#[derive(Debug, Default, PartialEq, Eq)]
struct SessionMetadata {
    reservation_id: Option<ReservationId>,
    event_id: Option<EventId>,
    user_id: Option<UserId>,
    seat_label: String,
}

impl SessionMetadata {
    fn from_map(map: &HashMap<String, String>) -> Self {
        let id = |key: &str| map.get(key).and_then(|value| value.trim().parse().ok());
        Self {
            reservation_id: id("reservation_id"),
            event_id: id("event_id"),
            user_id: id("user_id"),
            seat_label: map
                .get("seat_label")
                .map(|seat| seat.trim().to_string())
                .unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct WebhookService {
    reservations: ReservationService,
    verifier: Option<SignatureVerifier>,
}

impl WebhookService {
    pub fn new(reservations: ReservationService, verifier: Option<SignatureVerifier>) -> Self {
        Self {
            reservations,
            verifier,
        }
    }

    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, WebhookError> {
        tracing::info!(
            content_length = payload.len(),
            has_signature = signature.is_some_and(|s| !s.is_empty()),
            secret_configured = self.verifier.is_some(),
            "Stripe webhook received"
        );

        if payload.is_empty() {
            return Err(WebhookError::EmptyPayload);
        }
        let signature = signature
            .filter(|s| !s.is_empty())
            .ok_or(WebhookError::MissingSignature)?;
        let verifier = self.verifier.as_ref().ok_or(WebhookError::NotConfigured)?;
        verifier
            .verify(payload, signature, now.timestamp())
            .map_err(WebhookError::InvalidSignature)?;

        let event: StripeEvent =
            serde_json::from_slice(payload).map_err(WebhookError::InvalidPayload)?;
        tracing::info!(
            stripe_event_id = event.id.as_deref().unwrap_or(""),
            event_type = %event.event_type,
            "Stripe webhook: event parsed"
        );

        if event.event_type != CHECKOUT_COMPLETED {
            tracing::info!(event_type = %event.event_type, "Stripe webhook: event type ignored");
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let session: CheckoutSessionObject =
            serde_json::from_value(event.data.object).map_err(WebhookError::InvalidPayload)?;
        self.checkout_completed(session, now).await
    }

    async fn checkout_completed(
        &self,
        session: CheckoutSessionObject,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let metadata = session
            .metadata
            .as_ref()
            .map(SessionMetadata::from_map)
            .unwrap_or_default();
        let amount = session.amount_total.unwrap_or(0);

        tracing::info!(
            session_id = %session.id,
            reservation_id = ?metadata.reservation_id,
            event_id = ?metadata.event_id,
            user_id = ?metadata.user_id,
            amount_total = amount,
            "Stripe webhook: checkout.session.completed"
        );

        let mut confirmed = None;
        if let Some(reservation_id) = metadata.reservation_id {
            confirmed = self
                .reservations
                .confirm(reservation_id, &session.id, amount)
                .await?
                .map(|reservation| (reservation, ConfirmationPath::Pending));
        }

        if confirmed.is_none() {
            if let (Some(event_id), Some(user_id)) = (metadata.event_id, metadata.user_id) {
                match self
                    .record_from_metadata(event_id, user_id, &metadata.seat_label, &session, amount, now)
                    .await?
                {
                    Some(reservation) => confirmed = Some((reservation, ConfirmationPath::Fallback)),
                    None => return Ok(WebhookOutcome::AlreadyHandled),
                }
            }
        }

        let Some((reservation, path)) = confirmed else {
            if metadata.reservation_id.is_none() && metadata.event_id.is_none() {
                tracing::warn!(
                    session_id = %session.id,
                    "Stripe webhook: no reservation_id or event_id in session metadata"
                );
            }
            return Ok(WebhookOutcome::Unresolved);
        };

        let notifications = self.reservations.notify_confirmed(reservation.clone()).await;
        if !notifications.all_sent() {
            tracing::error!(
                reservation_id = reservation.id,
                failed = ?notifications.failed,
                "Stripe webhook: confirmation notifications failed"
            );
        }

        Ok(WebhookOutcome::Confirmed {
            reservation,
            path,
            notifications,
        })
    }

    /// Fallback path. `Ok(None)` means the payment is acknowledged without a
    /// new reservation.
    async fn record_from_metadata(
        &self,
        event_id: EventId,
        user_id: UserId,
        seat_label: &str,
        session: &CheckoutSessionObject,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, WebhookError> {
        let repos = self.reservations.repositories();
        let event = repos.events.find_event(event_id).await?;
        let user = repos.users.find_user(user_id).await?;
        let (Some(event), Some(user)) = (event, user) else {
            tracing::warn!(event_id, user_id, "Stripe webhook: event or user not found");
            return Ok(None);
        };

        if self
            .reservations
            .ledger()
            .has_existing_reservation(event.id, user.id)
            .await?
        {
            tracing::info!(event_id, user_id, "Stripe webhook: reservation already exists for event+user");
            return Ok(None);
        }

        if event.uses_seat_layout()
            && !seat_label.is_empty()
            && self.reservations.ledger().is_seat_taken(event.id, seat_label).await?
        {
            tracing::warn!(event_id, seat = seat_label, "Stripe webhook: seat already taken");
            return Ok(None);
        }

        let seat = (!seat_label.is_empty()).then(|| seat_label.to_string());
        match self
            .reservations
            .record_paid(&event, user.id, seat, &session.id, amount, now)
            .await
        {
            Ok(reservation) => Ok(Some(reservation)),
            Err(RepositoryError::Conflict(conflict)) => {
                tracing::warn!(
                    event_id,
                    user_id,
                    session_id = %session.id,
                    conflict = %conflict,
                    "Stripe webhook: paid reservation rejected by the store"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
