use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use facepay::{AttemptLedger, HttpSponsorExecutor, SqliteAttemptLedger, TerminalSession};
use facepay_identity::{
    EnrollmentRegistry, HttpRecognitionOracle, IdentityDirectory, SqliteEnrollmentRegistry,
};
use facepay_terminal::{
    cors::build_cors, metrics, routes, AppState, HttpCredentialProvider, HttpPresenceChecks,
    TerminalConfig,
};

/// Base64 face images are large; everything else is small.
const JSON_LIMIT_BYTES: usize = 10 * 1024 * 1024;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match TerminalConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!(?config, "configuration loaded");

    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to create HTTP client");

    // The ledger guards against paying twice. Without it on disk a restart
    // forgets which transfers were already sent, so refuse to start.
    let ledger: Arc<dyn AttemptLedger> = match SqliteAttemptLedger::open(&config.db_path) {
        Ok(ledger) => {
            tracing::info!("Attempt ledger: SQLite at {}", config.db_path);
            Arc::new(ledger)
        }
        Err(e) => {
            tracing::error!("Failed to open attempt ledger at {}: {e}", config.db_path);
            std::process::exit(1);
        }
    };
    for entry in ledger.unresolved() {
        tracing::warn!(
            attempt_id = %entry.attempt_id,
            payer = %entry.payer.short(),
            amount = %entry.amount,
            claimed_at = %entry.claimed_at,
            "transfer outcome unresolved from a previous run, reconcile before charging this payer again"
        );
    }

    let registry: Arc<dyn EnrollmentRegistry> =
        match SqliteEnrollmentRegistry::open(&config.db_path) {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                tracing::error!("Failed to open enrollment registry at {}: {e}", config.db_path);
                std::process::exit(1);
            }
        };

    let oracle = HttpRecognitionOracle::new(
        http_client.clone(),
        config.oracle_url.clone(),
        config.oracle_token.clone(),
        Duration::from_secs(config.oracle_timeout_secs),
    );
    let directory = Arc::new(
        IdentityDirectory::new(oracle, registry)
            .with_match_threshold(config.match_threshold)
            .with_timeout(Duration::from_secs(config.oracle_timeout_secs)),
    );

    let checks = Arc::new(HttpPresenceChecks::new(
        http_client.clone(),
        config.proximity_url.clone(),
        config.security_url.clone(),
        Duration::from_secs(config.check_timeout_secs),
    ));

    let mut custody = HttpCredentialProvider::new(
        http_client.clone(),
        config.custody_url.clone(),
        Duration::from_secs(config.transfer_timeout_secs),
    );
    if let Some(token) = &config.custody_token {
        custody = custody.with_token(token.clone());
    }

    let sponsor = Arc::new(
        HttpSponsorExecutor::new(http_client.clone(), config.sponsor_url.clone())
            .with_shared_secret(config.sponsor_shared_secret.clone())
            .with_timeout(Duration::from_secs(config.transfer_timeout_secs)),
    );

    let session = TerminalSession::new(
        config.session_config(),
        directory.clone(),
        checks,
        Arc::new(custody),
        sponsor,
        ledger.clone(),
    )
    .with_observer(Arc::new(metrics::PrometheusObserver))
    .spawn();

    let state = web::Data::new(AppState {
        session,
        directory,
        ledger,
        metrics_token: config.metrics_token.clone(),
        admin_token: config.admin_token.clone(),
    });

    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();

    tracing::info!("Facepay terminal listening on port {port}");
    tracing::info!("Merchant address: {}", config.merchant_address);
    tracing::info!(
        "Currency: {}, biometric window: {}s, match threshold: {}",
        config.currency,
        config.biometric_window_secs,
        config.match_threshold
    );
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);
    tracing::info!("  GET  http://localhost:{port}/session/events");
    tracing::info!("  POST http://localhost:{port}/session/recognize");

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .expect("failed to build rate limiter config");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(build_cors(&allowed_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(JSON_LIMIT_BYTES))
            .configure(routes::configure::<HttpRecognitionOracle>)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
