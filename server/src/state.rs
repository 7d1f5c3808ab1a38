use std::sync::Arc;

use crate::config::Config;
use crate::repository::Repositories;
use crate::services::notifications::{NotificationDispatcher, Notifier};
use crate::services::payment::{PaymentProvider, SignatureVerifier};
use crate::services::{
    CheckoutService, ReservationService, ScanService, TicketRenderer, TicketSigner, WebhookService,
};
use crate::utils::jwt::JwtKeys;

/// Shared by every handler. Cloning is cheap: services hold `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub reservations: ReservationService,
    pub checkout: CheckoutService,
    pub webhook: WebhookService,
    pub scan: ScanService,
    pub tickets: TicketRenderer,
    pub jwt: JwtKeys,
    pub frontend_url: String,
}

impl AppState {
    pub fn new(
        config: &Config,
        repos: Repositories,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let signer = TicketSigner::new(&config.app_secret, config.public_base_url.clone());
        let tickets = TicketRenderer::new(signer.clone(), config.public_dir.clone());
        let notifications = NotificationDispatcher::new(notifier, tickets.clone());

        let reservations = ReservationService::new(repos.clone(), notifications);
        let checkout = CheckoutService::new(
            reservations.clone(),
            provider,
            config.frontend_url.clone(),
        );
        let webhook = WebhookService::new(
            reservations.clone(),
            config
                .stripe_webhook_secret
                .as_deref()
                .map(SignatureVerifier::new),
        );
        let scan = ScanService::new(repos.reservations.clone(), signer);

        Self {
            repos,
            reservations,
            checkout,
            webhook,
            scan,
            tickets,
            jwt: JwtKeys::new(&config.jwt_secret),
            frontend_url: config.frontend_url.clone(),
        }
    }
}
