use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use super::{
    with_session_placeholder, CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider,
    CURRENCY,
};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Webhooks older than this are refused as replays.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Stripe Checkout over the plain REST API.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: Option<String>,
    api_base: String,
}

impl StripeClient {
    pub fn new(secret_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            secret_key,
            api_base: STRIPE_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// A publishable key (`pk_…`) in place of the secret one is a common
    /// misconfiguration; refuse it before talking to Stripe.
    fn secret_key(&self) -> Result<&str, PaymentError> {
        match self.secret_key.as_deref() {
            None | Some("") => Err(PaymentError::NotConfigured),
            Some(key) if key.starts_with("pk_") => Err(PaymentError::InvalidKey),
            Some(key) => Ok(key),
        }
    }

    fn form_fields(request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            (
                "line_items[0][price_data][currency]".into(),
                CURRENCY.into(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                request.product_name.clone(),
            ),
            (
                "line_items[0][price_data][product_data][description]".into(),
                request.description.clone(),
            ),
            (
                "line_items[0][price_data][product_data][metadata][event_id]".into(),
                request.metadata.event_id.to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                request.unit_amount.to_string(),
            ),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "success_url".into(),
                with_session_placeholder(&request.success_url),
            ),
            ("cancel_url".into(), request.cancel_url.clone()),
        ];
        fields.extend(
            request
                .metadata
                .pairs()
                .into_iter()
                .map(|(key, value)| (format!("metadata[{key}]"), value)),
        );
        fields
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let secret_key = self.secret_key()?;

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(secret_key)
            .form(&Self::form_fields(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or(body);
            tracing::error!(status = status.as_u16(), %message, "Stripe checkout session creation failed");
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let session: SessionResponse = response.json().await?;
        let url = session.url.ok_or(PaymentError::MissingUrl)?;

        tracing::info!(
            session_id = %session.id,
            reservation_id = request.metadata.reservation_id,
            "Stripe checkout session created"
        );

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header has no timestamp")]
    MissingTimestamp,

    #[error("signature header has no v1 signature")]
    MissingSignature,

    #[error("timestamp outside the tolerance window")]
    TimestampOutOfTolerance,

    #[error("no signature matches the payload")]
    Mismatch,
}

/// Checks `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>…]` headers against
/// HMAC-SHA256(secret, "<t>.<raw body>").
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn verify(&self, payload: &[u8], header: &str, now_unix: i64) -> Result<(), SignatureError> {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<Vec<u8>> = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse().ok(),
                // Undecodable candidates can never match; skip them.
                "v1" => signatures.extend(hex::decode(value).ok()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
        if signatures.is_empty() {
            return Err(SignatureError::MissingSignature);
        }
        if (now_unix - timestamp).abs() > self.tolerance_secs {
            return Err(SignatureError::TimestampOutOfTolerance);
        }

        let matched = signatures.iter().any(|candidate| {
            let mut mac = self.mac();
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            mac.verify_slice(candidate).is_ok()
        });

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Header a test client would send for `payload`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let mut mac = self.mac();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        )
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        <HmacSha256 as Mac>::new_from_slice(self.secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts any key length"))
    }
}
