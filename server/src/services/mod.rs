pub mod checkout;
pub mod ledger;
pub mod notifications;
pub mod payment;
pub mod reservations;
pub mod scan;
pub mod tickets;
pub mod webhook;

pub use checkout::{BookingOutcome, CheckoutService, PaymentLanding};
pub use ledger::{Availability, SeatLedger};
pub use notifications::{
    LogNotifier, Notification, NotificationDispatcher, NotificationReport, Notifier, SmtpNotifier,
};
pub use payment::{MockPaymentProvider, PaymentProvider, SignatureVerifier, StripeClient};
pub use reservations::{
    DiscardOutcome, ReservationListing, ReservationService, RESERVATIONS_PER_PAGE,
};
pub use scan::{ScanOutcome, ScanService};
pub use tickets::{TicketRenderer, TicketSigner};
pub use webhook::{WebhookError, WebhookOutcome, WebhookService};
