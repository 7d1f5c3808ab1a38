use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::middleware::CurrentUser;
use crate::models::{
    EventId, Reservation, ReservationDetails, ReservationFilter, ReservationId, ReservationScope,
    ReservationSort, ReservationStatus, Role,
};
use crate::services::{
    BookingOutcome, DiscardOutcome, PaymentLanding, ReservationListing, ScanOutcome,
    TicketRenderer,
};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, pdf_inline, see_other, success};

#[derive(Debug, Default, Deserialize)]
pub struct BookRequest {
    pub seat: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum BookingPayload {
    Confirmed {
        reservation: Reservation,
        notifications_sent: bool,
    },
    PaymentRequired {
        reservation_id: ReservationId,
        checkout_url: String,
    },
}

#[derive(Debug, Serialize)]
struct ReservationSummary {
    id: ReservationId,
    status: ReservationStatus,
    event_id: EventId,
    event_title: String,
    starts_at: DateTime<Utc>,
    location: String,
    participant_name: String,
    participant_email: String,
    seat_label: Option<String>,
    price: String,
    created_at: DateTime<Utc>,
    scanned: bool,
}

impl From<ReservationDetails> for ReservationSummary {
    fn from(details: ReservationDetails) -> Self {
        Self {
            price: details.price_label(),
            participant_name: details.participant.full_name(),
            id: details.reservation.id,
            status: details.reservation.status,
            event_id: details.event.id,
            event_title: details.event.title,
            starts_at: details.event.starts_at,
            location: details.event.location,
            participant_email: details.participant.email,
            seat_label: details.reservation.seat_label,
            created_at: details.reservation.created_at,
            scanned: details.reservation.scanned_at.is_some(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReservationListPayload {
    reservations: Vec<ReservationSummary>,
    page: u32,
    total_pages: u32,
    total: i64,
}

impl From<ReservationListing> for ReservationListPayload {
    fn from(listing: ReservationListing) -> Self {
        Self {
            reservations: listing.items.into_iter().map(ReservationSummary::from).collect(),
            page: listing.page,
            total_pages: listing.total_pages,
            total: listing.total,
        }
    }
}

/// Listing filters. Blank or malformed values are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ReservationListQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub status: String,
    /// `YYYY-MM-DD`, from the start of that day.
    #[serde(default)]
    pub date_start: String,
    /// `YYYY-MM-DD`, up to the end of that day.
    #[serde(default)]
    pub date_end: String,
    #[serde(default)]
    pub sort: String,
    #[serde(default = "first_page")]
    pub page: u32,
}

const fn first_page() -> u32 {
    1
}

impl ReservationListQuery {
    pub fn filter(&self, scope: ReservationScope) -> ReservationFilter {
        let q = self.q.trim();
        ReservationFilter {
            scope,
            search: (!q.is_empty()).then(|| q.to_string()),
            status: self.status.trim().to_uppercase().parse().ok(),
            booked_from: parse_day(&self.date_start, 0, 0, 0),
            booked_until: parse_day(&self.date_end, 23, 59, 59),
            sort: ReservationSort::from_key(&self.sort),
        }
    }
}

fn parse_day(value: &str, hour: u32, min: u32, sec: u32) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()?
        .and_hms_opt(hour, min, sec)
        .map(|at| Utc.from_utc_datetime(&at))
}

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentSuccessQuery {
    #[serde(default)]
    pub session_id: String,
}

pub async fn book_event(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    CurrentUser(user): CurrentUser,
    body: Option<Json<BookRequest>>,
) -> Result<Response, AppError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let outcome = state
        .checkout
        .book(event_id, &user, request.seat.as_deref(), Utc::now())
        .await?;

    Ok(match outcome {
        BookingOutcome::Confirmed {
            reservation,
            notifications,
        } => {
            let message = match &reservation.seat_label {
                Some(seat) => format!("Seat {} is booked. A summary email is on its way.", seat),
                None => "Your reservation is confirmed. A summary email is on its way.".to_string(),
            };
            created(
                BookingPayload::Confirmed {
                    reservation,
                    notifications_sent: notifications.all_sent(),
                },
                message,
            )
        }
        BookingOutcome::PaymentRequired {
            reservation_id,
            checkout_url,
        } => created(
            BookingPayload::PaymentRequired {
                reservation_id,
                checkout_url,
            },
            "Redirecting to the payment page",
        ),
    })
}

/// Participants see their own reservations, administrators everyone's.
pub async fn my_reservations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ReservationListQuery>,
) -> Result<Response, AppError> {
    let scope = if user.has_role(Role::Admin) {
        ReservationScope::All
    } else {
        ReservationScope::Participant(user.id)
    };
    let listing = state
        .reservations
        .list(&query.filter(scope), query.page)
        .await?;

    Ok(success(
        ReservationListPayload::from(listing),
        "Reservations retrieved",
    ))
}

/// Reservations made on the caller's own events.
pub async fn organizer_reservations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ReservationListQuery>,
) -> Result<Response, AppError> {
    if !user.has_role(Role::Artist) && !user.has_role(Role::Admin) {
        return Err(AppError::Forbidden(
            "Only organizers can view reservations for their events".to_string(),
        ));
    }
    let listing = state
        .reservations
        .list(&query.filter(ReservationScope::EventsOf(user.id)), query.page)
        .await?;

    Ok(success(
        ReservationListPayload::from(listing),
        "Reservations for your events retrieved",
    ))
}

pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<ReservationId>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    let report = state
        .reservations
        .cancel(reservation_id, &user, Utc::now())
        .await?;

    let mut message = if report.removed_by_admin {
        format!(
            "The reservation for \"{}\" was removed.",
            report.event_title
        )
    } else {
        "Your reservation has been cancelled.".to_string()
    };
    if !report.notifications.all_sent() {
        message.push_str(" A notification email could not be sent.");
    }

    Ok(success(
        serde_json::json!({
            "reservation_id": report.reservation.id,
            "notifications_sent": report.notifications.all_sent(),
        }),
        message,
    ))
}

pub async fn pay_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<ReservationId>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    let checkout_url = state
        .checkout
        .resume_payment(reservation_id, &user, Utc::now())
        .await?;

    Ok(success(
        serde_json::json!({ "checkout_url": checkout_url }),
        "Redirecting to the payment page",
    ))
}

pub async fn download_ticket(
    State(state): State<AppState>,
    Path(reservation_id): Path<ReservationId>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    let reservation = state
        .repos
        .reservations
        .find(reservation_id)
        .await?
        .ok_or_else(|| AppError::reservation_not_found(reservation_id))?;
    let details = state.repos.load_details(reservation).await?;

    let allowed = details.reservation.participant_id == user.id
        || details.event.organizer_id == user.id
        || user.has_role(Role::Admin);
    if !allowed {
        return Err(AppError::Forbidden(
            "You are not allowed to view this ticket".to_string(),
        ));
    }

    let bytes = state.tickets.render(&details).map_err(|e| {
        AppError::InternalServerError(format!("Ticket rendering failed: {}", e))
    })?;

    Ok(pdf_inline(&TicketRenderer::filename(reservation_id), bytes))
}

/// Target of the QR code. Door staff land on the frontend either way.
pub async fn scan_ticket(
    State(state): State<AppState>,
    Path(reservation_id): Path<ReservationId>,
    Query(query): Query<ScanQuery>,
) -> Result<Response, AppError> {
    let outcome = state
        .scan
        .scan(reservation_id, &query.token, Utc::now())
        .await?;

    let location = match outcome {
        ScanOutcome::Scanned { event_id } | ScanOutcome::AlreadyScanned { event_id } => {
            format!("{}/events/{}?scan=success", state.frontend_url, event_id)
        }
        ScanOutcome::Invalid => format!("{}/?scan=invalid", state.frontend_url),
    };
    Ok(see_other(&location))
}

pub async fn payment_success(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PaymentSuccessQuery>,
) -> Result<Response, AppError> {
    let landing = state
        .checkout
        .payment_landing(&query.session_id, &user)
        .await?;

    let message = match &landing {
        PaymentLanding::Confirmed { .. } => {
            "Payment received. Your reservation is confirmed and an email has been sent."
        }
        PaymentLanding::Processing => {
            "Payment received. Your reservation will be confirmed in a few moments."
        }
    };
    Ok(success(landing, message))
}

pub async fn payment_cancelled(
    State(state): State<AppState>,
    Path(reservation_id): Path<ReservationId>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    let outcome = state
        .reservations
        .discard_abandoned_pending(reservation_id, &user)
        .await?;

    let message = match outcome {
        DiscardOutcome::Discarded { .. } => {
            "Payment cancelled. No reservation was recorded; you can try again."
        }
        DiscardOutcome::AlreadyProcessed { .. } => "This reservation has already been processed.",
    };
    Ok(success(outcome, message))
}
