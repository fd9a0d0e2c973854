//! Spotter server binary.
//!
//! Loads configuration, connects to Postgres, wires the Stripe gateway and
//! the reconciliation engine into the HTTP router, and serves it until a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spotter::adapters::http::{billing_router, BillingAppState};
use spotter::adapters::postgres::{PostgresEventLedger, PostgresMemberStore};
use spotter::adapters::stripe::{StripeConfig, StripeGateway};
use spotter::adapters::LogNotifier;
use spotter::config::AppConfig;
use spotter::domain::billing::{EventVerifier, ReconciliationEngine};
use spotter::ports::{EventLedger, MemberStore, Notifier, PaymentProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config);
    config.validate().context("configuration failed validation")?;

    info!(
        environment = ?config.server.environment,
        test_mode = config.payment.is_test_mode(),
        "starting spotter"
    );

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .idle_timeout(config.database.idle_timeout())
        .connect(&config.database.url)
        .await
        .context("failed to connect to postgres")?;

    if config.database.run_migrations {
        info!("running database migrations");
        sqlx::migrate!()
            .run(&pool)
            .await
            .context("failed to run migrations")?;
    }

    let store: Arc<dyn MemberStore> = Arc::new(PostgresMemberStore::new(pool.clone()));
    let ledger: Arc<dyn EventLedger> = Arc::new(
        PostgresEventLedger::new(pool.clone()).with_lease_secs(config.payment.ledger_lease_secs),
    );
    let provider: Arc<dyn PaymentProvider> = Arc::new(StripeGateway::new(StripeConfig::new(
        SecretString::new(config.payment.stripe_api_key.clone()),
    )));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new());

    let verifier = Arc::new(EventVerifier::new(
        config.payment.stripe_webhook_secret.clone(),
        config.payment.signature_tolerance_secs,
        config.payment.clock_skew_secs,
    ));
    let engine = Arc::new(
        ReconciliationEngine::new(store.clone(), provider.clone(), notifier).with_retry_policy(
            config.payment.transition_retry_limit,
            config.payment.retry_backoff(),
        ),
    );

    let state = BillingAppState {
        store,
        ledger,
        provider,
        verifier,
        engine,
        livemode: config.payment.is_live_mode(),
    };

    let app = billing_router().with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(cors_layer(&config))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.server.request_timeout_secs,
            ))),
    );

    let addr = config.server.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

/// Env filter from `RUST_LOG` when set, otherwise the configured directive.
/// Production gets JSON lines for the log pipeline.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_filter));
    if config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if origins.is_empty() {
        if config.is_production() {
            // No origins configured in production: browsers go through the
            // same-origin dashboard, so cross-origin stays off.
            CorsLayer::new()
        } else {
            CorsLayer::permissive()
        }
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT])
            .allow_headers([header::CONTENT_TYPE])
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
