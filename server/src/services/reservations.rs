//! Reservation lifecycle: PENDING and CONFIRMED creation, confirmation,
//! cancellation (which deletes), and event-level moderation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::models::{
    Event, EventCancellation, EventId, NewReservation, PageRequest, Reservation,
    ReservationDetails, ReservationFilter, ReservationId, ReservationStatus, Role, User, UserId,
};
use crate::repository::{Repositories, RepositoryError, RepositoryResult};
use crate::services::ledger::SeatLedger;
use crate::services::notifications::{NotificationDispatcher, NotificationReport};
use crate::utils::error::{AppError, BookingRejection};

#[derive(Debug, Clone)]
pub struct CancellationReport {
    pub reservation: Reservation,
    pub event_title: String,
    /// An administrator removed someone else's reservation.
    pub removed_by_admin: bool,
    pub notifications: NotificationReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DiscardOutcome {
    Discarded { event_id: EventId },
    /// Confirmed (or confirming) in the meantime; nothing was deleted.
    AlreadyProcessed { event_id: EventId },
}

/// Reservation listings show ten entries a page.
pub const RESERVATIONS_PER_PAGE: u32 = 10;

#[derive(Debug, Clone)]
pub struct ReservationListing {
    pub items: Vec<ReservationDetails>,
    pub page: u32,
    pub total_pages: u32,
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct EventCancellationReport {
    pub event: Event,
    pub participants_notified: usize,
    pub notifications: NotificationReport,
}

/// Age bounds are inclusive. Events without bounds accept everyone,
/// including users who never entered a birth date.
pub fn age_gate(event: &Event, participant: &User, today: NaiveDate) -> Result<(), BookingRejection> {
    if event.age_min.is_none() && event.age_max.is_none() {
        return Ok(());
    }
    let age = participant
        .age_on(today)
        .ok_or(BookingRejection::BirthDateRequired)?;
    if let Some(min) = event.age_min {
        if age < min {
            return Err(BookingRejection::TooYoung { min, age });
        }
    }
    if let Some(max) = event.age_max {
        if age > max {
            return Err(BookingRejection::TooOld { max, age });
        }
    }
    Ok(())
}

/// Normalizes the requested seat against the event's seating plan.
pub fn validate_seat(event: &Event, seat: Option<&str>) -> Result<Option<String>, AppError> {
    let seat = seat.map(str::trim).filter(|seat| !seat.is_empty());
    match (event.uses_seat_layout(), seat) {
        (true, Some(seat)) => Ok(Some(seat.to_string())),
        (true, None) => Err(BookingRejection::SeatRequired.into()),
        (false, None) => Ok(None),
        (false, Some(_)) => Err(AppError::ValidationError(
            "This event has no seating plan; do not select a seat.".to_string(),
        )),
    }
}

pub fn can_manage_event(actor: &User, event: &Event) -> bool {
    actor.has_role(Role::Admin) || event.organizer_id == actor.id
}

#[derive(Clone)]
pub struct ReservationService {
    repos: Repositories,
    ledger: SeatLedger,
    notifications: NotificationDispatcher,
}

impl ReservationService {
    pub fn new(repos: Repositories, notifications: NotificationDispatcher) -> Self {
        let ledger = SeatLedger::new(repos.reservations.clone());
        Self {
            repos,
            ledger,
            notifications,
        }
    }

    pub fn ledger(&self) -> &SeatLedger {
        &self.ledger
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Every precondition of a booking, cheapest first. The store checks
    /// pair, seat and capacity again atomically when inserting.
    pub async fn check_bookable(
        &self,
        event: &Event,
        participant: &User,
        seat: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        age_gate(event, participant, now.date_naive())?;

        if event.is_cancelled() {
            return Err(BookingRejection::EventCancelled.into());
        }
        if self
            .ledger
            .has_existing_reservation(event.id, participant.id)
            .await?
        {
            return Err(BookingRejection::AlreadyReserved.into());
        }
        if let Some(seat) = seat {
            if self.ledger.is_seat_taken(event.id, seat).await? {
                return Err(BookingRejection::SeatTaken(seat.to_string()).into());
            }
        }
        if event.has_started(now) {
            return Err(BookingRejection::EventStarted.into());
        }
        if self.ledger.remaining_capacity(event).await? <= 0 {
            return Err(BookingRejection::EventFull.into());
        }
        Ok(())
    }

    /// Paid events: holds the seat until the provider reports the payment.
    pub async fn create_pending(
        &self,
        event: &Event,
        participant: &User,
        seat: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Reservation, AppError> {
        if event.is_free() {
            return Err(BookingRejection::PaymentNotRequired.into());
        }
        self.create(event, participant, seat, ReservationStatus::Pending, now)
            .await
    }

    /// Free events only; confirmed on the spot.
    pub async fn create_confirmed(
        &self,
        event: &Event,
        participant: &User,
        seat: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Reservation, AppError> {
        if !event.is_free() {
            return Err(AppError::ValidationError(
                "Paid events are confirmed by the payment provider".to_string(),
            ));
        }
        self.create(event, participant, seat, ReservationStatus::Confirmed, now)
            .await
    }

    async fn create(
        &self,
        event: &Event,
        participant: &User,
        seat: Option<String>,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<Reservation, AppError> {
        self.check_bookable(event, participant, seat.as_deref(), now)
            .await?;

        let reservation = self
            .repos
            .reservations
            .insert(NewReservation::new(event.id, participant.id, seat, status, now))
            .await?;

        tracing::info!(
            reservation_id = reservation.id,
            event_id = event.id,
            participant_id = participant.id,
            seat = reservation.seat_label.as_deref().unwrap_or(""),
            status = %reservation.status,
            "Reservation created"
        );
        Ok(reservation)
    }

    /// PENDING → CONFIRMED. `None` when there was nothing to confirm, which
    /// makes replayed webhooks harmless.
    pub async fn confirm(
        &self,
        reservation_id: ReservationId,
        session_id: &str,
        amount_paid: i64,
    ) -> RepositoryResult<Option<Reservation>> {
        let confirmed = match self
            .repos
            .reservations
            .confirm_pending(reservation_id, session_id, amount_paid)
            .await
        {
            Ok(confirmed) => confirmed,
            // The session already paid for another reservation.
            Err(RepositoryError::Conflict(conflict)) => {
                tracing::warn!(
                    reservation_id,
                    session_id,
                    conflict = %conflict,
                    "Reservation confirmation rejected by the store"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        match &confirmed {
            Some(_) => tracing::info!(reservation_id, session_id, amount_paid, "Reservation confirmed"),
            None => tracing::info!(reservation_id, session_id, "Reservation not confirmable, skipping"),
        }
        Ok(confirmed)
    }

    /// Records a payment that arrived without a PENDING reservation to attach
    /// it to. The store still enforces capacity and uniqueness.
    pub async fn record_paid(
        &self,
        event: &Event,
        participant_id: UserId,
        seat: Option<String>,
        session_id: &str,
        amount_paid: i64,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Reservation> {
        let reservation = self
            .repos
            .reservations
            .insert(
                NewReservation::new(
                    event.id,
                    participant_id,
                    seat,
                    ReservationStatus::Confirmed,
                    now,
                )
                .paid(session_id, amount_paid),
            )
            .await?;
        tracing::info!(
            reservation_id = reservation.id,
            event_id = event.id,
            session_id,
            "Paid reservation recorded"
        );
        Ok(reservation)
    }

    /// Participant or administrator. Only administrators may cancel once the
    /// event has started.
    pub async fn cancel(
        &self,
        reservation_id: ReservationId,
        actor: &User,
        now: DateTime<Utc>,
    ) -> Result<CancellationReport, AppError> {
        let reservation = self
            .repos
            .reservations
            .find(reservation_id)
            .await?
            .ok_or_else(|| AppError::reservation_not_found(reservation_id))?;

        let is_admin = actor.has_role(Role::Admin);
        let is_owner = reservation.participant_id == actor.id;
        if !is_admin && !is_owner {
            return Err(AppError::Forbidden(
                "You are not allowed to cancel this reservation".to_string(),
            ));
        }

        let details = self.repos.load_details(reservation).await?;
        if details.event.has_started(now) && !is_admin {
            return Err(BookingRejection::CancellationClosed.into());
        }

        if !self.repos.reservations.delete(reservation_id).await? {
            return Err(AppError::reservation_not_found(reservation_id));
        }
        tracing::info!(
            reservation_id,
            event_id = details.event.id,
            actor_id = actor.id,
            admin = is_admin,
            "Reservation cancelled"
        );

        let notifications = self.notifications.reservation_cancelled(&details).await;
        if !notifications.all_sent() {
            tracing::warn!(reservation_id, "Reservation cancelled but a notification failed");
        }

        Ok(CancellationReport {
            event_title: details.event.title.clone(),
            removed_by_admin: is_admin && !is_owner,
            reservation: details.reservation,
            notifications,
        })
    }

    /// The participant left the payment page. Deletes the reservation only
    /// while it is still PENDING so a concurrent confirmation wins.
    pub async fn discard_abandoned_pending(
        &self,
        reservation_id: ReservationId,
        actor: &User,
    ) -> Result<DiscardOutcome, AppError> {
        let reservation = self
            .repos
            .reservations
            .find(reservation_id)
            .await?
            .ok_or_else(|| AppError::reservation_not_found(reservation_id))?;

        if reservation.participant_id != actor.id {
            return Err(AppError::Forbidden(
                "This reservation does not belong to you".to_string(),
            ));
        }

        let event_id = reservation.event_id;
        if reservation.is_pending()
            && self
                .repos
                .reservations
                .delete_if_pending(reservation_id)
                .await?
        {
            tracing::info!(reservation_id, event_id, "Abandoned pending reservation discarded");
            return Ok(DiscardOutcome::Discarded { event_id });
        }

        tracing::info!(reservation_id, "Payment cancellation for a reservation already processed");
        Ok(DiscardOutcome::AlreadyProcessed { event_id })
    }

    /// One page of matching reservations with their event and participant.
    /// A page past the end shows the last one instead.
    pub async fn list(
        &self,
        filter: &ReservationFilter,
        page: u32,
    ) -> Result<ReservationListing, AppError> {
        let mut request = PageRequest::new(page, RESERVATIONS_PER_PAGE);
        let (mut reservations, mut total) =
            self.repos.reservations.search(filter, request).await?;

        let last_page = request.total_pages(total);
        if request.page > last_page {
            request = PageRequest::new(last_page, RESERVATIONS_PER_PAGE);
            (reservations, total) = self.repos.reservations.search(filter, request).await?;
        }

        let mut items = Vec::with_capacity(reservations.len());
        for reservation in reservations {
            items.push(self.repos.load_details(reservation).await?);
        }

        Ok(ReservationListing {
            items,
            page: request.page,
            total_pages: request.total_pages(total),
            total,
        })
    }

    /// Loads everything a confirmation needs and sends it. Never fails.
    pub async fn notify_confirmed(&self, reservation: Reservation) -> NotificationReport {
        let reservation_id = reservation.id;
        match self.repos.load_details(reservation).await {
            Ok(details) => self.notifications.reservation_confirmed(&details).await,
            Err(e) => {
                tracing::error!(reservation_id, error = %e, "Could not load reservation for notifications");
                NotificationReport {
                    sent: 0,
                    failed: vec!["reservation_confirmed".to_string()],
                }
            }
        }
    }

    /// Organizer or administrator. The event stays listed, cannot be booked
    /// any more, and every participant is told why.
    pub async fn cancel_event(
        &self,
        event_id: EventId,
        actor: &User,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EventCancellationReport, AppError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::ValidationError(
                "Please give a reason for the cancellation".to_string(),
            ));
        }

        let event = self.find_managed_event(event_id, actor).await?;
        if event.is_cancelled() {
            return Err(BookingRejection::EventAlreadyCancelled.into());
        }

        let event = self
            .repos
            .events
            .cancel_event(
                event_id,
                EventCancellation {
                    reason: reason.to_string(),
                    cancelled_at: now,
                },
            )
            .await?
            .ok_or(BookingRejection::EventAlreadyCancelled)?;

        tracing::info!(event_id, actor_id = actor.id, reason, "Event cancelled");

        let organizer = self.repos.users.find_user(event.organizer_id).await?;
        let mut participants = Vec::new();
        for reservation in self.repos.reservations.list_for_event(event_id).await? {
            match self.repos.users.find_user(reservation.participant_id).await? {
                Some(user) => participants.push((reservation.id, user)),
                None => tracing::warn!(
                    reservation_id = reservation.id,
                    participant_id = reservation.participant_id,
                    "Reservation without participant, not notified"
                ),
            }
        }

        let notifications = self
            .notifications
            .event_cancelled(&event, organizer.as_ref(), &participants, reason)
            .await;

        Ok(EventCancellationReport {
            participants_notified: notifications.sent,
            event,
            notifications,
        })
    }

    /// Organizer or administrator; only events nobody has booked.
    pub async fn delete_event(&self, event_id: EventId, actor: &User) -> Result<(), AppError> {
        self.find_managed_event(event_id, actor).await?;
        if !self.repos.events.delete_event(event_id).await? {
            return Err(AppError::event_not_found(event_id));
        }
        tracing::info!(event_id, actor_id = actor.id, "Event deleted");
        Ok(())
    }

    async fn find_managed_event(&self, event_id: EventId, actor: &User) -> Result<Event, AppError> {
        let event = self
            .repos
            .events
            .find_event(event_id)
            .await?
            .ok_or_else(|| AppError::event_not_found(event_id))?;
        if !can_manage_event(actor, &event) {
            return Err(AppError::Forbidden(
                "You are not allowed to manage this event".to_string(),
            ));
        }
        Ok(event)
    }
}
