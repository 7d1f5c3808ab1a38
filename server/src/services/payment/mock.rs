use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider};

/// In-process provider for development and tests. Records every request and
/// can be switched into a failing mode to exercise compensation paths.
#[derive(Debug, Default)]
pub struct MockPaymentProvider {
    requests: Mutex<Vec<CheckoutRequest>>,
    failing: AtomicBool,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let provider = Self::default();
        provider.set_failing(true);
        provider
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(PaymentError::Rejected("mock provider is failing".to_string()));
        }

        let id = format!("cs_test_{}", Uuid::new_v4().simple());
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.test/pay/{id}"),
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payment::CheckoutMetadata;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            product_name: "Expo".into(),
            description: "Reservation for Expo".into(),
            unit_amount: 1500,
            success_url: "http://front/ok".into(),
            cancel_url: "http://front/ko".into(),
            metadata: CheckoutMetadata {
                event_id: 1,
                user_id: 2,
                seat_label: String::new(),
                reservation_id: 3,
            },
        }
    }

    #[tokio::test]
    async fn test_mock_records_and_fails_on_demand() {
        let provider = MockPaymentProvider::new();
        let session = provider.create_checkout_session(&request()).await.unwrap();
        assert!(session.id.starts_with("cs_test_"));
        assert!(session.url.ends_with(&session.id));

        provider.set_failing(true);
        assert!(provider.create_checkout_session(&request()).await.is_err());
        assert_eq!(provider.requests().len(), 2);
    }
}
