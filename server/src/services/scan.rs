use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::models::{EventId, ReservationId};
use crate::repository::ReservationRepository;
use crate::services::tickets::TicketSigner;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Scanned { event_id: EventId },
    /// Shown to the door staff as a success, but worth a look in the logs.
    AlreadyScanned { event_id: EventId },
    Invalid,
}

impl ScanOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ScanOutcome::Invalid)
    }
}

#[derive(Clone)]
pub struct ScanService {
    reservations: Arc<dyn ReservationRepository>,
    signer: TicketSigner,
}

impl ScanService {
    pub fn new(reservations: Arc<dyn ReservationRepository>, signer: TicketSigner) -> Self {
        Self {
            reservations,
            signer,
        }
    }

    /// The token is checked before the store is touched, so a forged link
    /// learns nothing about which reservations exist.
    pub async fn scan(
        &self,
        id: ReservationId,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, AppError> {
        if !self.signer.verify(id, token) {
            tracing::warn!(reservation_id = id, "Ticket scan with an invalid token");
            return Ok(ScanOutcome::Invalid);
        }

        let Some(reservation) = self.reservations.find(id).await? else {
            tracing::warn!(reservation_id = id, "Ticket scan for a reservation that no longer exists");
            return Ok(ScanOutcome::Invalid);
        };
        let event_id = reservation.event_id;

        if let Some(scanned_at) = reservation.scanned_at {
            tracing::warn!(reservation_id = id, %scanned_at, "Ticket scanned again");
            return Ok(ScanOutcome::AlreadyScanned { event_id });
        }

        match self.reservations.mark_scanned(id, now).await? {
            Some(_) => {
                tracing::info!(reservation_id = id, event_id, "Ticket scanned");
                Ok(ScanOutcome::Scanned { event_id })
            }
            // Lost a race with another scanner, or the reservation vanished.
            None => match self.reservations.find(id).await? {
                Some(_) => {
                    tracing::warn!(reservation_id = id, "Ticket scanned concurrently");
                    Ok(ScanOutcome::AlreadyScanned { event_id })
                }
                None => {
                    tracing::warn!(reservation_id = id, "Reservation removed while scanning");
                    Ok(ScanOutcome::Invalid)
                }
            },
        }
    }
}
