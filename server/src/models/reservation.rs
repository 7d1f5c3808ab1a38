use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::event::{Event, EventId};
use super::user::{User, UserId};

pub type ReservationId = i64;

/// Cancellation is modelled as deletion, so there is no `Cancelled` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(ReservationStatus::Pending),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            other => Err(format!("unknown reservation status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub created_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub participant_id: UserId,
    pub event_id: EventId,
    pub seat_label: Option<String>,
    /// Provider checkout session that paid for this seat. Written once.
    pub checkout_session_id: Option<String>,
    /// Minor currency units (cents).
    pub amount_paid: Option<i64>,
    pub scanned_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_pending(&self) -> bool {
        self.status == ReservationStatus::Pending
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }
}

/// Insert payload. The store assigns the id and enforces the pair, seat,
/// session and capacity invariants atomically.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub event_id: EventId,
    pub participant_id: UserId,
    pub seat_label: Option<String>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub checkout_session_id: Option<String>,
    pub amount_paid: Option<i64>,
}

impl NewReservation {
    pub fn new(
        event_id: EventId,
        participant_id: UserId,
        seat_label: Option<String>,
        status: ReservationStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            participant_id,
            seat_label,
            status,
            created_at,
            checkout_session_id: None,
            amount_paid: None,
        }
    }

    pub fn paid(mut self, session_id: impl Into<String>, amount: i64) -> Self {
        self.checkout_session_id = Some(session_id.into());
        self.amount_paid = Some(amount);
        self
    }
}

/// Ordering of reservation listings. Ties break on the newest id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationSort {
    #[default]
    DateDesc,
    DateAsc,
    EventDateDesc,
    EventDateAsc,
}

impl ReservationSort {
    /// Unknown or empty keys fall back to newest bookings first.
    pub fn from_key(key: &str) -> Self {
        match key.trim() {
            "date_asc" => ReservationSort::DateAsc,
            "event_date_desc" => ReservationSort::EventDateDesc,
            "event_date_asc" => ReservationSort::EventDateAsc,
            _ => ReservationSort::DateDesc,
        }
    }
}

/// Whose reservations a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationScope {
    Participant(UserId),
    /// Reservations on events this organizer owns.
    EventsOf(UserId),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationFilter {
    pub scope: ReservationScope,
    /// Case-insensitive substring of the event title or location, or of the
    /// participant's name or email.
    pub search: Option<String>,
    pub status: Option<ReservationStatus>,
    /// Inclusive bounds on the booking time.
    pub booked_from: Option<DateTime<Utc>>,
    pub booked_until: Option<DateTime<Utc>>,
    pub sort: ReservationSort,
}

impl ReservationFilter {
    pub fn new(scope: ReservationScope) -> Self {
        Self {
            scope,
            search: None,
            status: None,
            booked_from: None,
            booked_until: None,
            sort: ReservationSort::default(),
        }
    }
}

/// One-based page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }

    /// At least one page, even for an empty listing.
    pub fn total_pages(&self, total: i64) -> u32 {
        let per_page = i64::from(self.per_page);
        let pages = (total + per_page - 1) / per_page;
        u32::try_from(pages.max(1)).unwrap_or(u32::MAX)
    }
}

/// A reservation together with the entities notifications and tickets need.
#[derive(Debug, Clone)]
pub struct ReservationDetails {
    pub reservation: Reservation,
    pub event: Event,
    pub participant: User,
    pub organizer: Option<User>,
}

impl ReservationDetails {
    /// What the participant paid, falling back to the listed price.
    pub fn price_label(&self) -> String {
        match self.reservation.amount_paid {
            Some(cents) => format!("{}.{:02} EUR", cents / 100, cents % 100),
            None => self.event.price_label(),
        }
    }
}
