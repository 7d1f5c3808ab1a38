//! Email side effects of the reservation lifecycle.
//!
//! Sending is best effort: the dispatcher logs failures and reports them,
//! it never fails the operation that triggered it.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use thiserror::Error;

use crate::config::SmtpConfig;
use crate::models::{Event, ReservationDetails, ReservationId, User};
use crate::services::tickets::TicketRenderer;

const DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("invalid address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("failed to build email: {0}")]
    Build(String),

    #[error("failed to send email: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Payload of every message the lifecycle sends.
#[derive(Debug, Clone)]
pub enum Notification {
    ReservationConfirmed {
        to: String,
        participant_name: String,
        event_title: String,
        event_date: String,
        location: String,
        seat_label: Option<String>,
        price: String,
        reservation_date: String,
        description: String,
        ticket: Option<Attachment>,
    },
    NewReservationForOrganizer {
        to: String,
        event_title: String,
        participant_name: String,
        participant_email: String,
        participant_phone: Option<String>,
        seat_label: Option<String>,
    },
    ReservationCancelledToParticipant {
        to: String,
        participant_name: String,
        event_title: String,
        paid: bool,
        organizer_email: Option<String>,
        organizer_phone: Option<String>,
    },
    ReservationCancelledToOrganizer {
        to: String,
        event_title: String,
        participant_name: String,
        participant_email: String,
        seat_label: Option<String>,
    },
    EventCancelledToParticipant {
        to: String,
        participant_name: String,
        event_title: String,
        organizer_email: Option<String>,
        organizer_phone: Option<String>,
        paid: bool,
        reason: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ReservationConfirmed { .. } => "reservation_confirmed",
            Notification::NewReservationForOrganizer { .. } => "new_reservation_for_organizer",
            Notification::ReservationCancelledToParticipant { .. } => {
                "reservation_cancelled_to_participant"
            }
            Notification::ReservationCancelledToOrganizer { .. } => {
                "reservation_cancelled_to_organizer"
            }
            Notification::EventCancelledToParticipant { .. } => "event_cancelled_to_participant",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Notification::ReservationConfirmed { to, .. }
            | Notification::NewReservationForOrganizer { to, .. }
            | Notification::ReservationCancelledToParticipant { to, .. }
            | Notification::ReservationCancelledToOrganizer { to, .. }
            | Notification::EventCancelledToParticipant { to, .. } => to,
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Notification::ReservationConfirmed { event_title, .. } => {
                format!("Your reservation is confirmed - {event_title}")
            }
            Notification::NewReservationForOrganizer { event_title, .. } => {
                format!("New reservation - {event_title}")
            }
            Notification::ReservationCancelledToParticipant { event_title, .. } => {
                format!("Your reservation was cancelled - {event_title}")
            }
            Notification::ReservationCancelledToOrganizer { event_title, .. } => {
                format!("Reservation cancelled - {event_title}")
            }
            Notification::EventCancelledToParticipant { event_title, .. } => {
                format!("Event cancelled - {event_title}")
            }
        }
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        match self {
            Notification::ReservationConfirmed { ticket, .. } => ticket.as_ref(),
            _ => None,
        }
    }

    /// Plain-text body. Template design lives with the mail provider.
    pub fn body(&self) -> String {
        match self {
            Notification::ReservationConfirmed {
                participant_name,
                event_title,
                event_date,
                location,
                seat_label,
                price,
                reservation_date,
                description,
                ticket,
                ..
            } => {
                let mut body = format!(
                    "Hello {participant_name},\n\n\
                     Your reservation for \"{event_title}\" is confirmed.\n\n\
                     Date: {event_date}\n\
                     Location: {location}\n"
                );
                if let Some(seat) = seat_label {
                    body.push_str(&format!("Seat: {seat}\n"));
                }
                body.push_str(&format!(
                    "Price: {price}\nBooked on: {reservation_date}\n"
                ));
                if !description.is_empty() {
                    body.push_str(&format!("\n{description}\n"));
                }
                if ticket.is_some() {
                    body.push_str("\nYour ticket is attached. Show its QR code at the entrance.\n");
                }
                body
            }
            Notification::NewReservationForOrganizer {
                event_title,
                participant_name,
                participant_email,
                participant_phone,
                seat_label,
                ..
            } => {
                let mut body = format!(
                    "{participant_name} ({participant_email}) booked a place for \"{event_title}\".\n"
                );
                if let Some(phone) = participant_phone {
                    body.push_str(&format!("Phone: {phone}\n"));
                }
                if let Some(seat) = seat_label {
                    body.push_str(&format!("Seat: {seat}\n"));
                }
                body
            }
            Notification::ReservationCancelledToParticipant {
                participant_name,
                event_title,
                paid,
                organizer_email,
                organizer_phone,
                ..
            } => {
                let mut body = format!(
                    "Hello {participant_name},\n\nYour reservation for \"{event_title}\" has been cancelled.\n"
                );
                if *paid {
                    body.push_str(&refund_contact(organizer_email, organizer_phone));
                }
                body
            }
            Notification::ReservationCancelledToOrganizer {
                event_title,
                participant_name,
                participant_email,
                seat_label,
                ..
            } => {
                let mut body = format!(
                    "{participant_name} ({participant_email}) cancelled their reservation for \"{event_title}\".\n"
                );
                if let Some(seat) = seat_label {
                    body.push_str(&format!("Seat {seat} is available again.\n"));
                }
                body
            }
            Notification::EventCancelledToParticipant {
                participant_name,
                event_title,
                organizer_email,
                organizer_phone,
                paid,
                reason,
                ..
            } => {
                let mut body = format!(
                    "Hello {participant_name},\n\n\"{event_title}\" has been cancelled by its organizer.\n\nReason: {reason}\n"
                );
                if *paid {
                    body.push_str(&refund_contact(organizer_email, organizer_phone));
                }
                body
            }
        }
    }
}

fn refund_contact(email: &Option<String>, phone: &Option<String>) -> String {
    let mut contact = String::from("\nFor a refund, please contact the organizer");
    match (email, phone) {
        (Some(email), Some(phone)) => contact.push_str(&format!(" at {email} or {phone}.\n")),
        (Some(email), None) => contact.push_str(&format!(" at {email}.\n")),
        (None, Some(phone)) => contact.push_str(&format!(" at {phone}.\n")),
        (None, None) => contact.push_str(".\n"),
    }
    contact
}

/// Mail transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpNotifier {
    pub fn new(smtp: &SmtpConfig, from: impl Into<String>) -> Result<Self, NotificationError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            .map_err(|e| NotificationError::Transport(format!("SMTP relay error: {e}")))?
            .port(smtp.port);
        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.into(),
        })
    }
}

fn build_message(from: &str, notification: &Notification) -> Result<Message, NotificationError> {
    let builder = Message::builder()
        .from(from.parse::<Mailbox>().map_err(|e| NotificationError::Address {
            address: from.to_string(),
            reason: format!("{e}"),
        })?)
        .to(notification
            .recipient()
            .parse::<Mailbox>()
            .map_err(|e| NotificationError::Address {
                address: notification.recipient().to_string(),
                reason: format!("{e}"),
            })?)
        .subject(notification.subject());

    let text = SinglePart::builder()
        .header(ContentType::TEXT_PLAIN)
        .body(notification.body());

    let message = match notification.attachment() {
        Some(attachment) => {
            let content_type = ContentType::parse(attachment.content_type)
                .map_err(|e| NotificationError::Build(e.to_string()))?;
            builder.multipart(
                MultiPart::mixed().singlepart(text).singlepart(
                    MailAttachment::new(attachment.filename.clone())
                        .body(attachment.bytes.clone(), content_type),
                ),
            )
        }
        None => builder.singlepart(text),
    };

    message.map_err(|e| NotificationError::Build(e.to_string()))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let message = build_message(&self.from, notification)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Used when no SMTP relay is configured: notifications only reach the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        tracing::info!(
            kind = notification.kind(),
            to = %notification.recipient(),
            subject = %notification.subject(),
            has_attachment = notification.attachment().is_some(),
            "Notification (SMTP disabled)"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationReport {
    pub sent: usize,
    pub failed: Vec<String>,
}

impl NotificationReport {
    pub fn all_sent(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, notification: &Notification, result: Result<(), NotificationError>) {
        match result {
            Ok(()) => self.sent += 1,
            Err(e) => {
                tracing::error!(
                    kind = notification.kind(),
                    to = %notification.recipient(),
                    error = %e,
                    "Failed to send notification"
                );
                self.failed.push(notification.kind().to_string());
            }
        }
    }
}

/// Builds payloads from domain entities and hands them to the transport.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    renderer: TicketRenderer,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, renderer: TicketRenderer) -> Self {
        Self { notifier, renderer }
    }

    async fn dispatch(&self, notification: Notification, report: &mut NotificationReport) {
        let result = self.notifier.send(&notification).await;
        report.record(&notification, result);
    }

    /// Ticket to the participant and a heads-up to the organizer.
    pub async fn reservation_confirmed(&self, details: &ReservationDetails) -> NotificationReport {
        let mut report = NotificationReport::default();
        let reservation = &details.reservation;
        let event = &details.event;

        let ticket = match self.renderer.render(details) {
            Ok(bytes) => Some(Attachment {
                filename: TicketRenderer::filename(reservation.id),
                content_type: "application/pdf",
                bytes,
            }),
            Err(e) => {
                tracing::error!(reservation_id = reservation.id, error = %e, "Ticket rendering failed, sending confirmation without it");
                None
            }
        };

        self.dispatch(
            Notification::ReservationConfirmed {
                to: details.participant.email.clone(),
                participant_name: details.participant.full_name(),
                event_title: event.title.clone(),
                event_date: event.starts_at.format(DATE_FORMAT).to_string(),
                location: event.location.clone(),
                seat_label: reservation.seat_label.clone(),
                price: details.price_label(),
                reservation_date: reservation.created_at.format(DATE_FORMAT).to_string(),
                description: event.description.clone(),
                ticket,
            },
            &mut report,
        )
        .await;

        match &details.organizer {
            Some(organizer) => {
                self.dispatch(
                    Notification::NewReservationForOrganizer {
                        to: organizer.email.clone(),
                        event_title: event.title.clone(),
                        participant_name: details.participant.full_name(),
                        participant_email: details.participant.email.clone(),
                        participant_phone: details.participant.phone.clone(),
                        seat_label: reservation.seat_label.clone(),
                    },
                    &mut report,
                )
                .await;
            }
            None => {
                tracing::warn!(event_id = event.id, "Event has no organizer to notify");
            }
        }

        report
    }

    pub async fn reservation_cancelled(&self, details: &ReservationDetails) -> NotificationReport {
        let mut report = NotificationReport::default();
        let event = &details.event;
        let organizer = details.organizer.as_ref();

        if let Some(organizer) = organizer {
            self.dispatch(
                Notification::ReservationCancelledToOrganizer {
                    to: organizer.email.clone(),
                    event_title: event.title.clone(),
                    participant_name: details.participant.full_name(),
                    participant_email: details.participant.email.clone(),
                    seat_label: details.reservation.seat_label.clone(),
                },
                &mut report,
            )
            .await;
        }

        self.dispatch(
            Notification::ReservationCancelledToParticipant {
                to: details.participant.email.clone(),
                participant_name: details.participant.full_name(),
                event_title: event.title.clone(),
                paid: details.reservation.amount_paid.is_some() || !event.is_free(),
                organizer_email: organizer.map(|o| o.email.clone()),
                organizer_phone: organizer.and_then(|o| o.phone.clone()),
            },
            &mut report,
        )
        .await;

        report
    }

    pub async fn event_cancelled(
        &self,
        event: &Event,
        organizer: Option<&User>,
        participants: &[(ReservationId, User)],
        reason: &str,
    ) -> NotificationReport {
        let mut report = NotificationReport::default();
        for (reservation_id, participant) in participants {
            if participant.email.is_empty() {
                tracing::warn!(reservation_id, "Participant has no email, skipping");
                continue;
            }
            let name = participant.full_name();
            self.dispatch(
                Notification::EventCancelledToParticipant {
                    to: participant.email.clone(),
                    participant_name: if name.is_empty() {
                        "Participant".to_string()
                    } else {
                        name
                    },
                    event_title: event.title.clone(),
                    organizer_email: organizer.map(|o| o.email.clone()),
                    organizer_phone: organizer.and_then(|o| o.phone.clone()),
                    paid: !event.is_free(),
                    reason: reason.to_string(),
                },
                &mut report,
            )
            .await;
        }
        report
    }
}
