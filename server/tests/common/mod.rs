#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use artconnect_server::config::Config;
use artconnect_server::models::{Event, Role, SeatLayout, User};
use artconnect_server::repository::{InMemoryStore, Repositories};
use artconnect_server::services::notifications::NotificationError;
use artconnect_server::services::{MockPaymentProvider, Notification, Notifier, SignatureVerifier};
use artconnect_server::state::AppState;
use artconnect_server::utils::jwt::JwtKeys;

pub const APP_SECRET: &str = "test-app-secret";
pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const FRONTEND_URL: &str = "http://front.test";

/// Keeps what was sent instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, bool)>>,
}

impl RecordingNotifier {
    /// `(kind, recipient)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, to, _)| (kind.clone(), to.clone()))
            .collect()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.sent().into_iter().map(|(kind, _)| kind).collect()
    }

    /// Whether the confirmation mail carried a PDF ticket.
    pub fn confirmation_had_ticket(&self) -> bool {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .any(|(kind, _, ticket)| kind == "reservation_confirmed" && *ticket)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push((
            notification.kind().to_string(),
            notification.recipient().to_string(),
            notification.attachment().is_some(),
        ));
        Ok(())
    }
}

/// Every send fails, as with an unreachable SMTP relay.
#[derive(Default)]
pub struct FailingNotifier {
    attempts: Mutex<usize>,
}

impl FailingNotifier {
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _notification: &Notification) -> Result<(), NotificationError> {
        *self.attempts.lock().unwrap() += 1;
        Err(NotificationError::Transport("connection refused".into()))
    }
}

pub fn config() -> Config {
    Config {
        database_url: "postgres://unused".into(),
        port: 0,
        app_secret: APP_SECRET.into(),
        jwt_secret: JWT_SECRET.into(),
        public_base_url: "http://api.test".into(),
        frontend_url: FRONTEND_URL.into(),
        stripe_secret_key: None,
        stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
        public_dir: PathBuf::from("./does-not-exist"),
        mail_from: "Art Connect <no-reply@artconnect.test>".into(),
        smtp: None,
        production: false,
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<MockPaymentProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
    pub config: Config,
}

impl TestApp {
    pub fn new() -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        Self::build(notifier.clone(), notifier)
    }

    /// Sends through `sender`; the recording notifier stays empty.
    pub fn with_notifier(sender: Arc<dyn Notifier>) -> Self {
        Self::build(sender, Arc::new(RecordingNotifier::default()))
    }

    fn build(sender: Arc<dyn Notifier>, notifier: Arc<RecordingNotifier>) -> Self {
        let config = config();
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(MockPaymentProvider::new());
        let state = AppState::new(
            &config,
            Repositories::from_store(store.clone()),
            provider.clone(),
            sender,
        );
        Self {
            store,
            provider,
            notifier,
            state,
            config,
        }
    }

    pub async fn participant(&self, first_name: &str) -> User {
        self.user(first_name, vec![Role::Participant]).await
    }

    pub async fn user(&self, first_name: &str, roles: Vec<Role>) -> User {
        self.store
            .insert_user(User {
                id: 0,
                first_name: first_name.into(),
                last_name: "Test".into(),
                email: format!("{}@example.com", first_name.to_lowercase()),
                phone: None,
                birth_date: NaiveDate::from_ymd_opt(1995, 4, 12),
                roles,
            })
            .await
    }

    pub async fn event(&self, organizer: &User, price: Option<Decimal>, nb_places: i32) -> Event {
        self.store.insert_event(event_template(organizer, price, nb_places)).await
    }

    pub async fn seated_event(&self, organizer: &User, rows: i32, cols: i32) -> Event {
        let mut event = event_template(organizer, None, 0);
        event.layout = Some(SeatLayout {
            kind: "theatre".into(),
            rows,
            cols,
        });
        self.store.insert_event(event).await
    }

    pub fn token(&self, user: &User) -> String {
        JwtKeys::new(JWT_SECRET)
            .issue(user.id, &user.roles, Duration::hours(1))
            .unwrap()
    }

    /// A `checkout.session.completed` payload and its signature header.
    pub fn signed_checkout_completed(
        &self,
        session_id: &str,
        amount_total: i64,
        metadata: serde_json::Value,
    ) -> (Vec<u8>, String) {
        let payload = serde_json::json!({
            "id": "evt_test",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": session_id,
                    "amount_total": amount_total,
                    "metadata": metadata,
                }
            }
        })
        .to_string()
        .into_bytes();
        let header = SignatureVerifier::new(WEBHOOK_SECRET).sign(&payload, Utc::now().timestamp());
        (payload, header)
    }
}

pub fn event_template(organizer: &User, price: Option<Decimal>, nb_places: i32) -> Event {
    let now = Utc::now();
    Event {
        id: 0,
        organizer_id: organizer.id,
        title: "Nuit des galeries".into(),
        description: "Vernissage et concert".into(),
        location: "Tunis".into(),
        starts_at: now + Duration::days(7),
        ends_at: now + Duration::days(7) + Duration::hours(3),
        nb_places,
        age_min: None,
        age_max: None,
        price,
        image: None,
        layout: None,
        cancellation: None,
        created_at: now,
    }
}

pub fn metadata(event_id: i64, user_id: i64, reservation_id: i64) -> serde_json::Value {
    serde_json::json!({
        "event_id": event_id.to_string(),
        "user_id": user_id.to_string(),
        "seat_label": "",
        "reservation_id": reservation_id.to_string(),
    })
}
