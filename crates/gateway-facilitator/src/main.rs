use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};

use gateway_facilitator::bootstrap::{bootstrap_embedded_facilitator, bootstrap_http_facilitator, BootstrapConfig};
use gateway_facilitator::routes;

fn parse_cors_origins() -> Vec<String> {
    match std::env::var("ALLOWED_ORIGINS") {
        Ok(origins) => origins.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        Err(_) => vec![],
    }
}

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

fn parse_urls(var: &str) -> Vec<String> {
    std::env::var(var)
        .ok()
        .map(|urls| urls.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let hmac_secret = std::env::var("FACILITATOR_SHARED_SECRET").ok().map(|s| s.into_bytes());
    let allow_insecure = std::env::var("ALLOW_UNAUTHENTICATED").map(|v| v == "true" || v == "1").unwrap_or(false);

    let hmac_secret = match hmac_secret {
        Some(secret) => secret,
        None if allow_insecure => {
            tracing::warn!("FACILITATOR_SHARED_SECRET not set — HMAC auth disabled (ALLOW_UNAUTHENTICATED=true)");
            Vec::new()
        }
        None => {
            tracing::error!("FACILITATOR_SHARED_SECRET not set. Set it for production, or set ALLOW_UNAUTHENTICATED=true for dev mode.");
            std::process::exit(1);
        }
    };

    let webhook_urls = parse_urls("WEBHOOK_URLS");
    let metrics_token = std::env::var("METRICS_TOKEN").ok().map(|s| s.into_bytes());

    let state = match std::env::var("UPSTREAM_ORACLE_URL") {
        Ok(base_url) => bootstrap_http_facilitator(base_url, hmac_secret, webhook_urls, metrics_token),
        Err(_) => bootstrap_embedded_facilitator(BootstrapConfig { hmac_secret, webhook_urls, metrics_token }),
    };
    let state = web::Data::from(state);

    let port: u16 = std::env::var("FACILITATOR_PORT").or_else(|_| std::env::var("PORT")).ok().and_then(|p| p.parse().ok()).unwrap_or(4022);
    let rate_limit_rpm: u64 = std::env::var("RATE_LIMIT_RPM").ok().and_then(|r| r.parse().ok()).unwrap_or(120);
    let cors_origins = parse_cors_origins();

    tracing::info!("Gateway facilitator listening on port {port}");
    tracing::info!("Rate limit: {rate_limit_rpm} req/min per IP");
    tracing::info!("  GET  http://localhost:{port}/health");
    tracing::info!("  POST http://localhost:{port}/verify");
    tracing::info!("  POST http://localhost:{port}/settlements");

    let governor_conf = GovernorConfigBuilder::default().requests_per_minute(rate_limit_rpm).finish().expect("failed to build rate limiter config");

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(65_536))
            .service(routes::health)
            .service(routes::metrics_endpoint)
            .service(routes::verify)
            .service(routes::register_settlement)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
