//! Persistence seams for the reservation lifecycle.
//!
//! Services only see these traits. Entities reference each other by id;
//! the event → reservations relation lives in the store, never on `Event`.
//! `ReservationRepository::insert` is where the capacity, pair, seat and
//! session invariants are enforced atomically; callers' pre-checks only
//! give nicer messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    Event, EventCancellation, EventId, NewReservation, PageRequest, Reservation,
    ReservationDetails, ReservationFilter, ReservationId, User, UserId,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationConflict {
    #[error("participant already holds a reservation for this event")]
    AlreadyReserved,

    #[error("seat {0} is already taken")]
    SeatTaken(String),

    #[error("event is full")]
    EventFull,

    #[error("checkout session already recorded on another reservation")]
    SessionAlreadyUsed,

    #[error("event still has reservations")]
    EventHasReservations,

    #[error("event {0} not found")]
    EventNotFound(EventId),
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Conflict(#[from] ReservationConflict),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn find_event(&self, id: EventId) -> RepositoryResult<Option<Event>>;

    /// Marks the event cancelled. `None` when it does not exist or was
    /// already cancelled.
    async fn cancel_event(
        &self,
        id: EventId,
        cancellation: EventCancellation,
    ) -> RepositoryResult<Option<Event>>;

    /// Deletes an event without reservations. Fails with
    /// `ReservationConflict::EventHasReservations` otherwise.
    async fn delete_event(&self, id: EventId) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user(&self, id: UserId) -> RepositoryResult<Option<User>>;
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn find(&self, id: ReservationId) -> RepositoryResult<Option<Reservation>>;

    async fn find_by_session(&self, session_id: &str) -> RepositoryResult<Option<Reservation>>;

    async fn find_for_participant(
        &self,
        event_id: EventId,
        participant_id: UserId,
    ) -> RepositoryResult<Option<Reservation>>;

    async fn find_by_seat(
        &self,
        event_id: EventId,
        seat_label: &str,
    ) -> RepositoryResult<Option<Reservation>>;

    /// PENDING and CONFIRMED together; cancelled reservations no longer exist.
    async fn count_for_event(&self, event_id: EventId) -> RepositoryResult<i64>;

    async fn list_for_event(&self, event_id: EventId) -> RepositoryResult<Vec<Reservation>>;

    /// One page of the reservations matching `filter`, with the total
    /// number of matches across all pages.
    async fn search(
        &self,
        filter: &ReservationFilter,
        page: PageRequest,
    ) -> RepositoryResult<(Vec<Reservation>, i64)>;

    async fn insert(&self, reservation: NewReservation) -> RepositoryResult<Reservation>;

    /// PENDING → CONFIRMED, only while no session id has been recorded.
    /// `None` means nothing was confirmable (missing, already confirmed,
    /// or already paid by another session).
    async fn confirm_pending(
        &self,
        id: ReservationId,
        session_id: &str,
        amount_paid: i64,
    ) -> RepositoryResult<Option<Reservation>>;

    async fn delete(&self, id: ReservationId) -> RepositoryResult<bool>;

    /// Deletes only while still PENDING, so a concurrent confirmation wins.
    async fn delete_if_pending(&self, id: ReservationId) -> RepositoryResult<bool>;

    /// Sets `scanned_at` when unset. `None` when missing or already scanned.
    async fn mark_scanned(
        &self,
        id: ReservationId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Reservation>>;
}

/// Handles to the three repositories, usually backed by the same store.
#[derive(Clone)]
pub struct Repositories {
    pub events: Arc<dyn EventRepository>,
    pub reservations: Arc<dyn ReservationRepository>,
    pub users: Arc<dyn UserRepository>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: EventRepository + ReservationRepository + UserRepository + 'static,
    {
        Self {
            events: store.clone(),
            reservations: store.clone(),
            users: store,
        }
    }

    pub async fn load_details(&self, reservation: Reservation) -> RepositoryResult<ReservationDetails> {
        let event = self
            .events
            .find_event(reservation.event_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::Corrupt(format!(
                    "reservation {} points at missing event {}",
                    reservation.id, reservation.event_id
                ))
            })?;
        let participant = self
            .users
            .find_user(reservation.participant_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::Corrupt(format!(
                    "reservation {} points at missing user {}",
                    reservation.id, reservation.participant_id
                ))
            })?;
        let organizer = self.users.find_user(event.organizer_id).await?;

        Ok(ReservationDetails {
            reservation,
            event,
            participant,
            organizer,
        })
    }
}
