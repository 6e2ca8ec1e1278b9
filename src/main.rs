use std::sync::Arc;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paygrid_core::config::Config;
use paygrid_core::domain::intent::TransitionPolicy;
use paygrid_core::gateways::GatewayRegistry;
use paygrid_core::gateways::cinetpay::{CinetPayAdapter, CinetPayConfig};
use paygrid_core::gateways::http::GatewayHttp;
use paygrid_core::gateways::nowpayments::{NowPaymentsAdapter, NowPaymentsConfig};
use paygrid_core::gateways::paydunya::{PayDunyaAdapter, PayDunyaConfig};
use paygrid_core::services::notifier::HttpCompletionNotifier;
use paygrid_core::services::reconciliation::ReconciliationEngine;
use paygrid_core::services::retry::RetryPolicy;
use paygrid_core::services::sweep::Sweeper;
use paygrid_core::store::postgres::{PgIntentStore, PgLedgerStore};
use paygrid_core::{AppState, create_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database pool
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    // Run migrations
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let http = GatewayHttp::new();
    let gateways = GatewayRegistry::new()
        .register(Arc::new(CinetPayAdapter::new(
            CinetPayConfig {
                api_key: config.cinetpay_api_key.clone(),
                site_id: config.cinetpay_site_id.clone(),
                secret_key: config.cinetpay_secret_key.clone(),
                base_url: config.cinetpay_base_url.clone(),
                notify_url: config.webhook_url("cinetpay"),
                return_url: format!("{}/return", config.public_base_url.trim_end_matches('/')),
            },
            http.clone(),
        )))
        .register(Arc::new(PayDunyaAdapter::new(
            PayDunyaConfig {
                master_key: config.paydunya_master_key.clone(),
                private_key: config.paydunya_private_key.clone(),
                token: config.paydunya_token.clone(),
                base_url: config.paydunya_base_url.clone(),
                callback_url: config.webhook_url("paydunya"),
                store_name: "paygrid".to_string(),
            },
            http.clone(),
        )))
        .register(Arc::new(NowPaymentsAdapter::new(
            NowPaymentsConfig {
                api_key: config.nowpayments_api_key.clone(),
                ipn_secret: config.nowpayments_ipn_secret.clone(),
                base_url: config.nowpayments_base_url.clone(),
                ipn_callback_url: config.webhook_url("nowpayments"),
                default_pay_currency: config.nowpayments_default_pay_currency.clone(),
            },
            http.clone(),
        )));

    let engine = Arc::new(ReconciliationEngine::new(
        Arc::new(PgIntentStore::new(pool.clone())),
        Arc::new(PgLedgerStore::new(pool.clone())),
        gateways,
        Arc::new(HttpCompletionNotifier::new(Duration::from_secs(10))),
        TransitionPolicy {
            underpay_epsilon: config.crypto_underpay_epsilon.clone(),
        },
        RetryPolicy::default(),
    ));

    // Sweep job: single instance on a timer, independent of request paths
    let sweeper = Arc::new(Sweeper::new(
        engine.clone(),
        chrono::Duration::seconds(config.sweep_stuck_after_secs),
        Duration::from_secs(config.sweep_interval_secs),
    ));
    tokio::spawn(sweeper.run());

    let app = create_app(AppState { engine });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
