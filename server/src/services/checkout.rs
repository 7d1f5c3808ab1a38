use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::models::{Event, EventId, Reservation, ReservationId, Role, User};
use crate::services::notifications::NotificationReport;
use crate::services::payment::{to_minor_units, CheckoutMetadata, CheckoutRequest, PaymentProvider};
use crate::services::reservations::{validate_seat, ReservationService};
use crate::utils::error::{AppError, BookingRejection};

#[derive(Debug, Clone)]
pub enum BookingOutcome {
    /// Free event: the seat is booked, no payment involved.
    Confirmed {
        reservation: Reservation,
        notifications: NotificationReport,
    },
    /// Paid event: a PENDING reservation holds the seat until the webhook.
    PaymentRequired {
        reservation_id: ReservationId,
        checkout_url: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentLanding {
    Confirmed { reservation: Reservation },
    /// The webhook has not landed yet.
    Processing,
}

/// Entry point of a booking: decides between the free path and the hosted
/// checkout, and undoes the PENDING reservation if checkout cannot start.
#[derive(Clone)]
pub struct CheckoutService {
    reservations: ReservationService,
    provider: Arc<dyn PaymentProvider>,
    frontend_url: String,
}

impl CheckoutService {
    pub fn new(
        reservations: ReservationService,
        provider: Arc<dyn PaymentProvider>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            reservations,
            provider,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn book(
        &self,
        event_id: EventId,
        actor: &User,
        seat: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, AppError> {
        if !actor.has_role(Role::Participant) {
            return Err(AppError::Forbidden(
                "Only participants can book events".to_string(),
            ));
        }

        let event = self
            .reservations
            .repositories()
            .events
            .find_event(event_id)
            .await?
            .ok_or_else(|| AppError::event_not_found(event_id))?;
        let seat = validate_seat(&event, seat)?;

        if event.is_free() {
            let reservation = self
                .reservations
                .create_confirmed(&event, actor, seat, now)
                .await?;
            let notifications = self.reservations.notify_confirmed(reservation.clone()).await;
            return Ok(BookingOutcome::Confirmed {
                reservation,
                notifications,
            });
        }

        let reservation = self
            .reservations
            .create_pending(&event, actor, seat, now)
            .await?;
        let cancel_url = format!(
            "{}/reservations/payment-cancelled/{}",
            self.frontend_url, reservation.id
        );
        let request = self.checkout_request(&event, &reservation, cancel_url);

        match self.provider.create_checkout_session(&request).await {
            Ok(session) => {
                tracing::info!(
                    reservation_id = reservation.id,
                    event_id,
                    session_id = %session.id,
                    unit_amount = request.unit_amount,
                    "Checkout started"
                );
                Ok(BookingOutcome::PaymentRequired {
                    reservation_id: reservation.id,
                    checkout_url: session.url,
                })
            }
            Err(e) => {
                tracing::error!(
                    reservation_id = reservation.id,
                    event_id,
                    error = %e,
                    "Checkout could not start, releasing the pending reservation"
                );
                self.release(reservation.id).await;
                Err(AppError::PaymentUnavailable(e.to_string()))
            }
        }
    }

    /// Restarts checkout for a reservation that is still waiting for its
    /// payment. The reservation survives a provider failure here.
    pub async fn resume_payment(
        &self,
        reservation_id: ReservationId,
        actor: &User,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let repos = self.reservations.repositories();
        let reservation = repos
            .reservations
            .find(reservation_id)
            .await?
            .ok_or_else(|| AppError::reservation_not_found(reservation_id))?;

        if reservation.participant_id != actor.id {
            return Err(AppError::Forbidden(
                "This reservation does not belong to you".to_string(),
            ));
        }
        if !reservation.is_pending() {
            return Err(BookingRejection::NotPending.into());
        }

        let event = repos
            .events
            .find_event(reservation.event_id)
            .await?
            .ok_or_else(|| AppError::event_not_found(reservation.event_id))?;
        if event.is_cancelled() {
            return Err(BookingRejection::EventCancelled.into());
        }
        if event.has_started(now) {
            return Err(BookingRejection::EventStarted.into());
        }
        if event.is_free() {
            return Err(BookingRejection::PaymentNotRequired.into());
        }

        let cancel_url = format!("{}/reservations/mine", self.frontend_url);
        let request = self.checkout_request(&event, &reservation, cancel_url);
        let session = self
            .provider
            .create_checkout_session(&request)
            .await
            .map_err(|e| AppError::PaymentUnavailable(e.to_string()))?;

        tracing::info!(reservation_id, session_id = %session.id, "Checkout resumed");
        Ok(session.url)
    }

    /// What the browser should show after returning from the provider.
    pub async fn payment_landing(
        &self,
        session_id: &str,
        actor: &User,
    ) -> Result<PaymentLanding, AppError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Ok(PaymentLanding::Processing);
        }

        let found = self
            .reservations
            .repositories()
            .reservations
            .find_by_session(session_id)
            .await?;
        Ok(match found {
            Some(reservation) if reservation.participant_id == actor.id => {
                PaymentLanding::Confirmed { reservation }
            }
            _ => PaymentLanding::Processing,
        })
    }

    fn checkout_request(
        &self,
        event: &Event,
        reservation: &Reservation,
        cancel_url: String,
    ) -> CheckoutRequest {
        // Paid events always carry a price; zero never reaches this point.
        let unit_amount = event.price.map(to_minor_units).unwrap_or(1);
        CheckoutRequest {
            product_name: event.title.clone(),
            description: format!(
                "Reservation for {} - {}",
                event.title,
                event.starts_at.format("%d/%m/%Y %H:%M")
            ),
            unit_amount,
            success_url: format!("{}/reservations/payment-success", self.frontend_url),
            cancel_url,
            metadata: CheckoutMetadata {
                event_id: event.id,
                user_id: reservation.participant_id,
                seat_label: reservation.seat_label.clone().unwrap_or_default(),
                reservation_id: reservation.id,
            },
        }
    }

    /// Compensation for a checkout that never started.
    async fn release(&self, reservation_id: ReservationId) {
        match self
            .reservations
            .repositories()
            .reservations
            .delete_if_pending(reservation_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(reservation_id, "Pending reservation was already gone or confirmed");
            }
            Err(e) => {
                tracing::error!(reservation_id, error = %e, "Failed to release pending reservation");
            }
        }
    }
}
