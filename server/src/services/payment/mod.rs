//! Hosted checkout with an external payment provider.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::models::{EventId, ReservationId, UserId};

pub mod mock;
pub mod stripe;

pub use mock::MockPaymentProvider;
pub use stripe::{SignatureError, SignatureVerifier, StripeClient};

pub const CURRENCY: &str = "eur";

/// Placeholder the provider substitutes with the real session id on redirect.
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider is not configured")]
    NotConfigured,

    #[error("payment provider key is not a secret key")]
    InvalidKey,

    #[error("payment provider unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payment provider answered {status}: {message}")]
    Api { status: u16, message: String },

    #[error("payment provider returned a session without a URL")]
    MissingUrl,

    #[error("{0}")]
    Rejected(String),
}

/// Identifies who pays for what. Sent to the provider as string metadata and
/// echoed back in the completion webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub event_id: EventId,
    pub user_id: UserId,
    /// Empty when the event has no seating plan.
    pub seat_label: String,
    pub reservation_id: ReservationId,
}

impl CheckoutMetadata {
    pub fn pairs(&self) -> [(&'static str, String); 4] {
        [
            ("event_id", self.event_id.to_string()),
            ("user_id", self.user_id.to_string()),
            ("seat_label", self.seat_label.clone()),
            ("reservation_id", self.reservation_id.to_string()),
        ]
    }
}

/// One line item, quantity one.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub product_name: String,
    pub description: String,
    /// Minor units (cents).
    pub unit_amount: i64,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: CheckoutMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;
}

/// `price × 100`, half away from zero, never below one cent.
pub fn to_minor_units(price: Decimal) -> i64 {
    let cents = (price * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(i64::MAX);
    cents.max(1)
}

/// Appends the session placeholder with `?` or `&` as the URL requires.
pub fn with_session_placeholder(success_url: &str) -> String {
    let separator = if success_url.contains('?') { '&' } else { '?' };
    format!("{success_url}{separator}session_id={SESSION_ID_PLACEHOLDER}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_to_minor_units_rounds_half_away_from_zero() {
        assert_eq!(to_minor_units(Decimal::from_str("20.00").unwrap()), 2000);
        assert_eq!(to_minor_units(Decimal::from_str("12.345").unwrap()), 1235);
        assert_eq!(to_minor_units(Decimal::from_str("12.344").unwrap()), 1234);
    }

    #[test]
    fn test_to_minor_units_has_a_floor_of_one_cent() {
        assert_eq!(to_minor_units(Decimal::from_str("0.001").unwrap()), 1);
    }

    #[test]
    fn test_session_placeholder_separator() {
        assert_eq!(
            with_session_placeholder("http://front/reservations/payment-success"),
            "http://front/reservations/payment-success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(
            with_session_placeholder("http://front/ok?lang=fr"),
            "http://front/ok?lang=fr&session_id={CHECKOUT_SESSION_ID}"
        );
    }

    #[test]
    fn test_metadata_values_are_strings() {
        let metadata = CheckoutMetadata {
            event_id: 3,
            user_id: 9,
            seat_label: String::new(),
            reservation_id: 42,
        };
        let pairs = metadata.pairs();
        assert_eq!(pairs[0], ("event_id", "3".to_string()));
        assert_eq!(pairs[2], ("seat_label", String::new()));
        assert_eq!(pairs[3], ("reservation_id", "42".to_string()));
    }
}
