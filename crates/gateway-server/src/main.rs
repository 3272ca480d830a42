use std::sync::Arc;

use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};
use gateway_facilitator::{EmbeddedRegistryOracle, FacilitatorHttpOracle};
use gateway_ledger::Ledger;
use gateway_payments::SettlementOracle;
use gateway_recovery::sources::{GitSnapshotSource, LocalWalSource, ObjectStoreSource, TemplateSource};
use gateway_recovery::RestoreSource;

use gateway_server::config::GatewayConfig;
use gateway_server::provider::{ChatProvider, EchoChatProvider, HttpChatProvider};
use gateway_server::{build_state, routes};

fn build_cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        Cors::default()
            .allowed_origin_fn(|origin, _| {
                origin.to_str().map(|o| o == "http://localhost" || o.starts_with("http://localhost:")).unwrap_or(false)
            })
            .allow_any_method()
            .allow_any_header()
            .max_age(3600)
    } else {
        let mut cors = Cors::default();
        for origin in origins {
            cors = cors.allowed_origin(origin);
        }
        cors.allow_any_method().allow_any_header().max_age(3600)
    }
}

fn build_oracle() -> Arc<dyn SettlementOracle> {
    match std::env::var("UPSTREAM_ORACLE_URL") {
        Ok(base_url) => {
            let hmac_secret = std::env::var("FACILITATOR_SHARED_SECRET").unwrap_or_default().into_bytes();
            tracing::info!(base_url, "settlement oracle: HTTP client to upstream facilitator");
            Arc::new(FacilitatorHttpOracle::new(reqwest::Client::new(), base_url, hmac_secret))
        }
        Err(_) => {
            tracing::info!("settlement oracle: embedded in-process registry (no UPSTREAM_ORACLE_URL set)");
            Arc::new(EmbeddedRegistryOracle::new())
        }
    }
}

fn build_chat_provider() -> Arc<dyn ChatProvider> {
    match std::env::var("UPSTREAM_CHAT_URL") {
        Ok(base_url) => {
            tracing::info!(base_url, "chat provider: HTTP client to upstream inference service");
            Arc::new(HttpChatProvider::new(base_url))
        }
        Err(_) => {
            tracing::warn!("UPSTREAM_CHAT_URL not set — using the echo chat provider (demo/dev mode)");
            Arc::new(EchoChatProvider)
        }
    }
}

/// Renews the WAL writer lock every `ttl/3` (§4.5). A lost lock logs once
/// via the `on_lost` callback and the loop keeps polling in case ownership
/// comes back around on a future acquire.
fn spawn_wal_keepalive(state: web::Data<gateway_server::AppState>) {
    let period = std::time::Duration::from_secs((state.config.wal_lock_ttl_seconds / 3).max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            state.wal_lock.keepalive(|| {
                tracing::error!("lost WAL writer lock ownership");
            });
        }
    });
}

fn seconds_until_next_2am_utc(now_unix: u64) -> u64 {
    use chrono::{TimeZone, Utc};
    let now = Utc.timestamp_opt(now_unix as i64, 0).single().expect("valid unix timestamp");
    let today_2am = now.date_naive().and_hms_opt(2, 0, 0).expect("valid time");
    let next = if now.naive_utc() < today_2am { today_2am } else { today_2am + chrono::Duration::days(1) };
    (next - now.naive_utc()).num_seconds().max(0) as u64
}

/// Daily reconciliation at 02:00 UTC (§4.7 C8). `reconcile` is infallible —
/// a run that finds nothing to correct still writes its summary entry — so
/// there is nothing for this loop to propagate; a failed KV read inside it
/// surfaces as a `tracing::error!` from `reconcile` itself, not a panic here.
fn spawn_reconciliation_cron(state: web::Data<gateway_server::AppState>) {
    tokio::spawn(async move {
        loop {
            let wait = seconds_until_next_2am_utc(gateway_core::clock::unix_now());
            tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
            let summary = gateway_ledger::reconcile(&state.ledger, &state.reconciliation_cache, state.config.reconciliation_rounding_threshold_micro);
            tracing::info!(
                divergences = summary.divergences.len(),
                rounding_drift_micro = summary.rounding_drift_micro,
                rounding_threshold_exceeded = summary.rounding_threshold_exceeded,
                "daily reconciliation complete"
            );
        }
    });
}

/// Priority-ordered restore sources for the boot cascade (C13): local WAL,
/// then a remote object-store snapshot, then a git-mirrored snapshot. The
/// template source is supplied separately and forced if all three fail.
fn build_restore_sources() -> Vec<Box<dyn RestoreSource>> {
    let mut sources: Vec<Box<dyn RestoreSource>> = Vec::new();

    let wal_path = std::env::var("LEDGER_WAL_PATH").unwrap_or_else(|_| "./data/ledger.wal".to_string());
    sources.push(Box::new(LocalWalSource::new(wal_path)));

    if let Ok(snapshot_url) = std::env::var("LEDGER_SNAPSHOT_URL") {
        sources.push(Box::new(ObjectStoreSource::new(reqwest::Client::new(), snapshot_url)));
    }

    if let Ok(repo_dir) = std::env::var("LEDGER_GIT_REPO_DIR") {
        let relative_path = std::env::var("LEDGER_GIT_SNAPSHOT_PATH").unwrap_or_else(|_| "ledger-snapshot.jsonl".to_string());
        sources.push(Box::new(GitSnapshotSource::new(repo_dir, relative_path)));
    }

    sources
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::from_env();
    tracing::info!(config = ?config, "loaded gateway configuration");

    let ledger = Arc::new(Ledger::new());
    let ledger_for_replay = ledger.clone();
    let boot_report = gateway_recovery::boot(build_restore_sources(), Box::new(TemplateSource), move |entry| {
        ledger_for_replay.replay_entry(entry);
    })
    .await;
    tracing::info!(
        source = boot_report.source,
        state = ?boot_report.state,
        entries_replayed = boot_report.entries_replayed,
        "recovery boot cascade complete"
    );

    let oracle = build_oracle();
    let chat_provider = build_chat_provider();

    let port = config.bind_port;
    let cors_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    let state = build_state(config, ledger, oracle, chat_provider, boot_report);
    let state = web::Data::from(state);

    match state.wal_lock.acquire() {
        Some(token) => tracing::info!(fence_token = token, "acquired WAL writer lock"),
        None => tracing::warn!("did not acquire WAL writer lock at boot — another instance holds it"),
    }
    spawn_wal_keepalive(state.clone());
    spawn_reconciliation_cron(state.clone());

    let governor_conf = GovernorConfigBuilder::default().requests_per_minute(rate_limit_rpm).finish().expect("failed to build rate limiter config");

    tracing::info!("Gateway server listening on port {port}");
    tracing::info!("  GET  http://localhost:{port}/health");
    tracing::info!("  GET  http://localhost:{port}/metrics");
    tracing::info!("  GET  http://localhost:{port}/.well-known/jwks.json");
    tracing::info!("  POST http://localhost:{port}/auth/nonce");
    tracing::info!("  POST http://localhost:{port}/auth/verify");
    tracing::info!("  POST http://localhost:{port}/keys");
    tracing::info!("  POST http://localhost:{port}/agent/chat");

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(65_536))
            .service(routes::health)
            .service(routes::metrics_endpoint)
            .service(routes::jwks)
            .service(routes::auth_nonce)
            .service(routes::auth_verify)
            .service(routes::issue_key)
            .service(routes::revoke_key)
            .service(routes::key_balance)
            .service(routes::agent_chat)
            .service(routes::admin_reconcile)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
