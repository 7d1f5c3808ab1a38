//! Printable tickets and the signed scan links embedded in them.

use hmac::{Hmac, Mac};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use qrcode::types::{Color, QrError};
use qrcode::{EcLevel, QrCode};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::models::{ReservationDetails, ReservationId};

type HmacSha256 = Hmac<Sha256>;

/// A5 landscape, in points.
const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 420.0;

const QR_BOX: f32 = 150.0;
const QR_X: f32 = 415.0;
const QR_Y: f32 = 40.0;
/// Quiet zone around the code, in modules.
const QR_QUIET_ZONE: usize = 2;

const COVER_BOX: u32 = 150;
const COVER_Y: f32 = 200.0;

const TITLE_MAX_CHARS: usize = 42;
const DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("QR code encoding failed: {0}")]
    Qr(#[from] QrError),

    #[error("PDF generation failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("PDF serialization failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Derives and checks scan tokens: hex HMAC-SHA256 of the decimal
/// reservation id under the application secret.
#[derive(Clone)]
pub struct TicketSigner {
    mac: HmacSha256,
    public_base_url: String,
}

impl TicketSigner {
    pub fn new(secret: &str, public_base_url: impl Into<String>) -> Self {
        let mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts any key length"));
        Self {
            mac,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn derive_scan_token(&self, id: ReservationId) -> String {
        let mut mac = self.mac.clone();
        mac.update(id.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn build_scan_url(&self, id: ReservationId) -> String {
        format!(
            "{}/reservations/{}/scan?token={}",
            self.public_base_url,
            id,
            self.derive_scan_token(id)
        )
    }

    /// Constant-time comparison against the expected token.
    pub fn verify(&self, id: ReservationId, token: &str) -> bool {
        let Ok(candidate) = hex::decode(token.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(id.to_string().as_bytes());
        mac.verify_slice(&candidate).is_ok()
    }
}

/// Lays out the ticket PDF.
#[derive(Clone)]
pub struct TicketRenderer {
    signer: TicketSigner,
    public_dir: PathBuf,
}

impl TicketRenderer {
    pub fn new(signer: TicketSigner, public_dir: impl Into<PathBuf>) -> Self {
        Self {
            signer,
            public_dir: public_dir.into(),
        }
    }

    pub fn filename(id: ReservationId) -> String {
        format!("ticket-artconnect-{id}.pdf")
    }

    pub fn render(&self, details: &ReservationDetails) -> Result<Vec<u8>, TicketError> {
        let reservation = &details.reservation;
        let event = &details.event;

        let scan_url = self.signer.build_scan_url(reservation.id);
        let qr = QrCode::with_error_correction_level(scan_url.as_bytes(), EcLevel::H)?;

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut ops = Vec::new();

        // Header band
        ops.push(Operation::new("rg", vec![0.11f32.into(), 0.16f32.into(), 0.29f32.into()]));
        push_rect(&mut ops, 0.0, PAGE_HEIGHT - 60.0, PAGE_WIDTH, 60.0);
        ops.push(Operation::new("f", vec![]));
        ops.push(Operation::new("rg", vec![1i64.into(), 1i64.into(), 1i64.into()]));
        push_text(&mut ops, "F2", 18.0, 30.0, PAGE_HEIGHT - 38.0, "ART CONNECT - E-TICKET");

        ops.push(Operation::new("rg", vec![0i64.into(), 0i64.into(), 0i64.into()]));
        push_text(&mut ops, "F2", 16.0, 30.0, 325.0, &truncate(&event.title, TITLE_MAX_CHARS));

        let seat = reservation
            .seat_label
            .as_deref()
            .filter(|seat| !seat.is_empty())
            .unwrap_or("Free placement");
        let lines = [
            ("Starts", event.starts_at.format(DATE_FORMAT).to_string()),
            ("Ends", event.ends_at.format(DATE_FORMAT).to_string()),
            ("Location", event.location.clone()),
            ("Seat", seat.to_string()),
            ("Price", details.price_label()),
            ("Participant", details.participant.full_name()),
            ("Booked on", reservation.created_at.format(DATE_FORMAT).to_string()),
            ("Reservation no.", reservation.id.to_string()),
        ];
        let mut y = 295.0;
        for (label, value) in lines {
            push_text(&mut ops, "F2", 10.0, 30.0, y, &format!("{label}:"));
            push_text(&mut ops, "F1", 10.0, 125.0, y, &value);
            y -= 22.0;
        }

        push_text(
            &mut ops,
            "F1",
            8.0,
            30.0,
            30.0,
            "Present this ticket at the entrance. It is valid for one admission.",
        );

        push_qr(&mut ops, &qr);
        push_text(&mut ops, "F1", 8.0, QR_X + 30.0, QR_Y - 12.0, "Scan at the entrance");

        let mut xobjects = lopdf::Dictionary::new();
        if let Some(cover) = self.load_cover(details) {
            let (width, height) = (cover.width(), cover.height());
            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => i64::from(width),
                    "Height" => i64::from(height),
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                },
                cover.into_raw(),
            ));
            xobjects.set("Cover", image_id);

            ops.push(Operation::new("q", vec![]));
            ops.push(Operation::new(
                "cm",
                vec![
                    (width as f32).into(),
                    0i64.into(),
                    0i64.into(),
                    (height as f32).into(),
                    QR_X.into(),
                    COVER_Y.into(),
                ],
            ));
            ops.push(Operation::new("Do", vec!["Cover".into()]));
            ops.push(Operation::new("Q", vec![]));
        }

        let content = Content { operations: ops };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
                "F2" => bold_font_id,
            },
            "XObject" => xobjects,
        });

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0i64.into(), 0i64.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Cover image scaled into its box. Anything unreadable is skipped.
    fn load_cover(&self, details: &ReservationDetails) -> Option<image::RgbImage> {
        let relative = details.event.image.as_deref()?.trim();
        if relative.is_empty() {
            return None;
        }
        let Some(path) = resolve_public_path(&self.public_dir, relative) else {
            tracing::warn!(event_id = details.event.id, image = %relative, "Ticket cover path rejected");
            return None;
        };

        match image::open(&path) {
            Ok(cover) => Some(cover.thumbnail(COVER_BOX, COVER_BOX).to_rgb8()),
            Err(e) => {
                tracing::warn!(
                    event_id = details.event.id,
                    path = %path.display(),
                    error = %e,
                    "Ticket cover image unreadable, rendering without it"
                );
                None
            }
        }
    }
}

/// Joins a stored image path under the public directory, refusing anything
/// that would climb out of it.
fn resolve_public_path(public_dir: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative.trim_start_matches(['/', '\\']));
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return None;
    }
    Some(public_dir.join(relative))
}

fn push_rect(ops: &mut Vec<Operation>, x: f32, y: f32, width: f32, height: f32) {
    ops.push(Operation::new(
        "re",
        vec![x.into(), y.into(), width.into(), height.into()],
    ));
}

fn push_text(ops: &mut Vec<Operation>, font: &str, size: f32, x: f32, y: f32, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.into(), size.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(win_ansi(text), StringFormat::Literal)],
    ));
    ops.push(Operation::new("ET", vec![]));
}

fn push_qr(ops: &mut Vec<Operation>, qr: &QrCode) {
    let width = qr.width();
    let module = QR_BOX / (width + 2 * QR_QUIET_ZONE) as f32;
    let origin_x = QR_X + module * QR_QUIET_ZONE as f32;
    // PDF y grows upwards; QR rows are listed top to bottom.
    let top = QR_Y + QR_BOX - module * QR_QUIET_ZONE as f32;

    ops.push(Operation::new("rg", vec![0i64.into(), 0i64.into(), 0i64.into()]));
    for (index, color) in qr.to_colors().into_iter().enumerate() {
        if color != Color::Dark {
            continue;
        }
        let (row, col) = (index / width, index % width);
        push_rect(
            ops,
            origin_x + col as f32 * module,
            top - (row + 1) as f32 * module,
            module,
            module,
        );
    }
    ops.push(Operation::new("f", vec![]));
}

/// The standard Helvetica font only covers Latin-1; anything else becomes `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut shortened: String = text.chars().take(max_chars - 3).collect();
    shortened.push_str("...");
    shortened
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Event, Reservation, ReservationStatus, Role, User};
    use chrono::{TimeZone, Utc};

    fn signer() -> TicketSigner {
        TicketSigner::new("kernel-secret", "https://api.artconnect.tn/")
    }

    fn details(image: Option<&str>) -> ReservationDetails {
        let at = Utc.with_ymd_and_hms(2026, 12, 1, 20, 0, 0).unwrap();
        ReservationDetails {
            reservation: Reservation {
                id: 42,
                created_at: at,
                status: ReservationStatus::Confirmed,
                participant_id: 2,
                event_id: 1,
                seat_label: Some("B7".into()),
                checkout_session_id: Some("cs_test_1".into()),
                amount_paid: Some(2000),
                scanned_at: None,
            },
            event: Event {
                id: 1,
                organizer_id: 3,
                title: "Nuit du Malouf à la Médina".into(),
                description: String::new(),
                location: "Dar Lasram, Tunis".into(),
                starts_at: at,
                ends_at: at,
                nb_places: 50,
                age_min: None,
                age_max: None,
                price: None,
                image: image.map(str::to_string),
                layout: None,
                cancellation: None,
                created_at: at,
            },
            participant: User {
                id: 2,
                first_name: "Yasmine".into(),
                last_name: "Trabelsi".into(),
                email: "yasmine@example.com".into(),
                phone: None,
                birth_date: None,
                roles: vec![Role::Participant],
            },
            organizer: None,
        }
    }

    #[test]
    fn test_scan_token_is_deterministic_hex_hmac() {
        let signer = signer();
        let token = signer.derive_scan_token(42);
        assert_eq!(token.len(), 64);
        assert_eq!(token, signer.derive_scan_token(42));
        assert_ne!(token, signer.derive_scan_token(43));
        assert_ne!(
            token,
            TicketSigner::new("other-secret", "http://x").derive_scan_token(42)
        );
    }

    #[test]
    fn test_verify_accepts_only_the_derived_token() {
        let signer = signer();
        let token = signer.derive_scan_token(7);
        assert!(signer.verify(7, &token));
        assert!(!signer.verify(8, &token));
        assert!(!signer.verify(7, "not-hex"));
        assert!(!signer.verify(7, ""));
    }

    #[test]
    fn test_scan_url_uses_path_form() {
        let url = signer().build_scan_url(42);
        assert!(url.starts_with("https://api.artconnect.tn/reservations/42/scan?token="));
    }

    #[test]
    fn test_render_produces_a_pdf_without_cover() {
        let renderer = TicketRenderer::new(signer(), "/nonexistent");
        let bytes = renderer.render(&details(Some("images/missing.jpg"))).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
    }

    #[test]
    fn test_cover_paths_cannot_escape_public_dir() {
        let base = Path::new("/srv/public");
        assert_eq!(
            resolve_public_path(base, "/images/a.png"),
            Some(PathBuf::from("/srv/public/images/a.png"))
        );
        assert_eq!(resolve_public_path(base, "../secrets.png"), None);
    }

    #[test]
    fn test_text_helpers() {
        assert_eq!(win_ansi("Médina"), b"M\xe9dina".to_vec());
        assert_eq!(win_ansi("€"), b"?".to_vec());
        assert_eq!(truncate("abcdef", 5), "ab...");
        assert_eq!(TicketRenderer::filename(42), "ticket-artconnect-42.pdf");
    }
}
