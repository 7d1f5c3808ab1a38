use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::EventId;
use crate::repository::{RepositoryError, ReservationConflict};
use crate::utils::response::error as error_response;

/// Why a booking, cancellation or moderation request was refused.
/// These are recoverable and user facing; no state was changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingRejection {
    #[error("Please add your date of birth to your profile to book this event.")]
    BirthDateRequired,

    #[error("This event is restricted to people aged {min} and over. You are {age}.")]
    TooYoung { min: i32, age: i32 },

    #[error("This event is restricted to people aged {max} and under. You are {age}.")]
    TooOld { max: i32, age: i32 },

    #[error("You already have a reservation for this event.")]
    AlreadyReserved,

    #[error("Seat {0} is already taken. Please choose another one.")]
    SeatTaken(String),

    #[error("Please select a seat on the seating plan.")]
    SeatRequired,

    #[error("Sorry, this event is full.")]
    EventFull,

    #[error("This event has already started.")]
    EventStarted,

    #[error("This event has been cancelled.")]
    EventCancelled,

    #[error("This event is already cancelled.")]
    EventAlreadyCancelled,

    #[error("An event with reservations cannot be deleted; cancel it instead.")]
    EventHasReservations,

    #[error("A reservation for an event that has already started cannot be cancelled.")]
    CancellationClosed,

    #[error("This event is free; the reservation does not need a payment.")]
    PaymentNotRequired,

    #[error("This reservation is no longer awaiting payment.")]
    NotPending,
}

impl BookingRejection {
    pub fn code(&self) -> &'static str {
        match self {
            BookingRejection::BirthDateRequired => "BIRTH_DATE_REQUIRED",
            BookingRejection::TooYoung { .. } | BookingRejection::TooOld { .. } => {
                "AGE_RESTRICTED"
            }
            BookingRejection::AlreadyReserved => "ALREADY_RESERVED",
            BookingRejection::SeatTaken(_) => "SEAT_TAKEN",
            BookingRejection::SeatRequired => "SEAT_REQUIRED",
            BookingRejection::EventFull => "EVENT_FULL",
            BookingRejection::EventStarted => "EVENT_STARTED",
            BookingRejection::EventCancelled => "EVENT_CANCELLED",
            BookingRejection::EventAlreadyCancelled => "EVENT_ALREADY_CANCELLED",
            BookingRejection::EventHasReservations => "EVENT_HAS_RESERVATIONS",
            BookingRejection::CancellationClosed => "CANCELLATION_CLOSED",
            BookingRejection::PaymentNotRequired => "PAYMENT_NOT_REQUIRED",
            BookingRejection::NotPending => "NOT_PENDING",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rejected: {0}")]
    Rejected(#[from] BookingRejection),

    #[error("Payment unavailable: {0}")]
    PaymentUnavailable(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn event_not_found(id: EventId) -> Self {
        AppError::NotFound(format!("Event with id '{}' was not found", id))
    }

    pub fn reservation_not_found(id: i64) -> Self {
        AppError::NotFound(format!("Reservation with id '{}' was not found", id))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Rejected(_) => StatusCode::CONFLICT,
            AppError::PaymentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Rejected(rejection) => rejection.code(),
            AppError::PaymentUnavailable(_) => "PAYMENT_UNAVAILABLE",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::Rejected(rejection) => {
                warn!(code = rejection.code(), message = %rejection, "Request rejected");
            }
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::PaymentUnavailable(msg)
            | AppError::ExternalServiceError(msg)
            | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(conflict) => match conflict {
                ReservationConflict::AlreadyReserved => BookingRejection::AlreadyReserved.into(),
                ReservationConflict::SeatTaken(seat) => BookingRejection::SeatTaken(seat).into(),
                ReservationConflict::EventFull => BookingRejection::EventFull.into(),
                ReservationConflict::EventHasReservations => {
                    BookingRejection::EventHasReservations.into()
                }
                ReservationConflict::SessionAlreadyUsed => {
                    AppError::ValidationError("Checkout session already recorded".to_string())
                }
                ReservationConflict::EventNotFound(id) => AppError::event_not_found(id),
            },
            RepositoryError::Database(e) => AppError::DatabaseError(e),
            RepositoryError::Corrupt(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        // Payment and storage causes stay in the logs.
        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::ExternalServiceError(msg) => msg.clone(),
            AppError::Rejected(rejection) => rejection.to_string(),
            AppError::PaymentUnavailable(_) => {
                "The payment page could not be opened. Please try again later.".to_string()
            }
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        };

        let details = match &self {
            AppError::Rejected(BookingRejection::SeatTaken(seat)) => Some(json!({ "seat": seat })),
            _ => None,
        };

        error_response(code, public_message, details, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_conflicts_with_specific_codes() {
        let err = AppError::from(BookingRejection::EventFull);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "EVENT_FULL");

        let err = AppError::from(BookingRejection::TooYoung { min: 18, age: 16 });
        assert_eq!(err.code(), "AGE_RESTRICTED");
        assert_eq!(
            err.to_string(),
            "Rejected: This event is restricted to people aged 18 and over. You are 16."
        );
    }

    #[test]
    fn test_store_conflicts_map_to_rejections() {
        let err = AppError::from(RepositoryError::Conflict(ReservationConflict::SeatTaken(
            "B4".into(),
        )));
        assert!(matches!(
            err,
            AppError::Rejected(BookingRejection::SeatTaken(ref seat)) if seat == "B4"
        ));

        let err = AppError::from(RepositoryError::Conflict(ReservationConflict::EventNotFound(7)));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_payment_unavailable_is_service_unavailable() {
        let err = AppError::PaymentUnavailable("stripe: 401".into());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "PAYMENT_UNAVAILABLE");
    }
}
