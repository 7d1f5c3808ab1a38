use serde::Serialize;
use std::sync::Arc;

use crate::models::{Event, EventId, SeatLayout, UserId};
use crate::repository::{RepositoryResult, ReservationRepository};

/// Public seat map of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub event_id: EventId,
    pub nb_places: i32,
    pub reserved: i64,
    pub remaining: i64,
    pub taken_seats: Vec<String>,
    pub layout: Option<SeatLayout>,
}

/// Read-side answers about how full an event is. Every stored reservation
/// counts, PENDING ones included, so an unpaid checkout still holds its seat.
#[derive(Clone)]
pub struct SeatLedger {
    reservations: Arc<dyn ReservationRepository>,
}

impl SeatLedger {
    pub fn new(reservations: Arc<dyn ReservationRepository>) -> Self {
        Self { reservations }
    }

    pub async fn remaining_capacity(&self, event: &Event) -> RepositoryResult<i64> {
        let reserved = self.reservations.count_for_event(event.id).await?;
        Ok(remaining(event.nb_places, reserved))
    }

    /// Exact, case-sensitive match against the seats already held.
    pub async fn is_seat_taken(&self, event_id: EventId, seat_label: &str) -> RepositoryResult<bool> {
        Ok(self
            .reservations
            .find_by_seat(event_id, seat_label)
            .await?
            .is_some())
    }

    pub async fn has_existing_reservation(
        &self,
        event_id: EventId,
        participant_id: UserId,
    ) -> RepositoryResult<bool> {
        Ok(self
            .reservations
            .find_for_participant(event_id, participant_id)
            .await?
            .is_some())
    }

    pub async fn availability(&self, event: &Event) -> RepositoryResult<Availability> {
        let reservations = self.reservations.list_for_event(event.id).await?;
        let reserved = reservations.len() as i64;

        let mut taken_seats: Vec<String> = reservations
            .into_iter()
            .filter_map(|r| r.seat_label)
            .filter(|seat| !seat.is_empty())
            .collect();
        taken_seats.sort();

        Ok(Availability {
            event_id: event.id,
            nb_places: event.nb_places,
            reserved,
            remaining: remaining(event.nb_places, reserved),
            taken_seats,
            layout: event.layout.clone(),
        })
    }
}

/// Never negative, even when capacity was lowered below the booked count.
fn remaining(nb_places: i32, reserved: i64) -> i64 {
    (i64::from(nb_places) - reserved).max(0)
}
