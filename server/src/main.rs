use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use artconnect_server::config::Config;
use artconnect_server::repository::{PgStore, Repositories};
use artconnect_server::routes::create_routes;
use artconnect_server::services::{LogNotifier, Notifier, SmtpNotifier, StripeClient};
use artconnect_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("artconnect_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    tracing::info!("Successfully connected to database");

    sqlx::migrate!().run(&pool).await?;

    tracing::info!("Migrations run successfully");

    let repos = Repositories::from_store(Arc::new(PgStore::new(pool)));

    if config.stripe_secret_key.is_none() {
        tracing::warn!("STRIPE_SECRET_KEY is not set, paid bookings will be refused");
    }
    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET is not set, webhooks will be rejected");
    }
    let provider = Arc::new(StripeClient::new(config.stripe_secret_key.clone()));

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "Sending mail over SMTP");
            Arc::new(SmtpNotifier::new(smtp, config.mail_from.clone())?)
        }
        None => {
            tracing::warn!("SMTP_HOST is not set, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let state = AppState::new(&config, repos, provider, notifier);
    let app = create_routes(state, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
