use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::user::UserId;

pub type EventId = i64;

/// Seating plan of a venue. When an event has one, its capacity is the
/// number of cells in the grid and every booking names a seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatLayout {
    pub kind: String,
    pub rows: i32,
    pub cols: i32,
}

impl SeatLayout {
    pub fn capacity(&self) -> i32 {
        self.rows.max(0) * self.cols.max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCancellation {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub organizer_id: UserId,
    pub title: String,
    pub description: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub nb_places: i32,
    pub age_min: Option<i32>,
    pub age_max: Option<i32>,
    pub price: Option<Decimal>,
    pub image: Option<String>,
    pub layout: Option<SeatLayout>,
    pub cancellation: Option<EventCancellation>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Free events skip the payment provider entirely.
    pub fn is_free(&self) -> bool {
        match self.price {
            Some(price) => price <= Decimal::ZERO,
            None => true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_some()
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at < now
    }

    pub fn uses_seat_layout(&self) -> bool {
        self.layout.is_some()
    }

    /// Re-derives `nb_places` from the layout, the way the event form does on save.
    pub fn normalized(mut self) -> Self {
        if let Some(layout) = &self.layout {
            if layout.rows > 0 && layout.cols > 0 {
                self.nb_places = layout.capacity();
            }
        }
        self
    }

    /// Price shown on tickets and emails, e.g. `20.00 EUR` or `Free`.
    pub fn price_label(&self) -> String {
        match self.price {
            Some(price) if price > Decimal::ZERO => format!("{:.2} EUR", price),
            _ => "Free".to_string(),
        }
    }
}
