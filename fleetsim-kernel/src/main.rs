/**
 * FLEETSIM KERNEL - Main entry point of the simulation server
 *
 * ROLE : Wires config, the live fleet, the incident detector, MQTT, the demo
 * dataset and the HTTP API together.
 *
 * ARCHITECTURE : Fleet owner behind a shared lock, tick events over a
 * broadcast channel, background tasks per concern.
 */

mod config;
mod demo;
mod health;
mod http;
mod mqtt;
mod narrative;
mod state;
mod ticker;

use crate::config::{load_config, API_KEY_ENV};
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::state::new_state;
use anyhow::{Context, Result};
use fleetsim_engine::profiles::default_catalog;
use fleetsim_engine::{Fleet, IncidentDetector, ScenarioOverlay};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // missing .env is fine
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;
    let now = OffsetDateTime::now_utc();

    // demo dataset, also used to backfill 24h of history
    let scenarios = demo::load_scenarios(&cfg.demo);
    let overlay = Arc::new(
        ScenarioOverlay::new(default_catalog(), cfg.fleet.size, scenarios)
            .context("invalid demo scenarios")?,
    );
    let (frames, dataset) = demo::bake(&overlay, now);
    info!(records = dataset.records.len(), "demo dataset baked");

    let mut fleet = Fleet::new(cfg.fleet.engine(), now);
    fleet.seed_history(&frames);
    let events = fleet.subscribe();
    let fleet = new_state(fleet);

    let provider = narrative::provider_from_config(&cfg.narrative);
    let detector = Arc::new(IncidentDetector::new(provider, cfg.incidents.clone()));

    let health_tracker = HealthTracker::new();
    let publisher = cfg
        .mqtt
        .as_ref()
        .map(|m| mqtt::spawn_mqtt_publisher(m, health_tracker.clone()));
    if publisher.is_none() {
        info!("no MQTT broker configured, events stay local");
    }

    ticker::spawn_tick_loop(fleet.clone(), Duration::from_secs(cfg.fleet.tick_interval_secs.max(1)));
    ticker::spawn_incident_scanner(events, detector.clone(), publisher.clone());

    let demo_state = new_state(Some(dataset));
    demo::spawn_demo_refresher(
        overlay,
        demo_state.clone(),
        Duration::from_secs(cfg.demo.refresh_interval_secs.max(60)),
    );

    if let Some(p) = publisher {
        health_tracker.spawn_health_publisher(p, fleet.clone(), detector.clone());
    }

    let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("{API_KEY_ENV} not set, only /health will answer");
    }

    let app_state = AppState {
        fleet,
        detector,
        health_tracker,
        demo: demo_state,
        api_key: api_key.map(Arc::from),
    };
    let app = http::build_router(app_state);

    let addr: SocketAddr = cfg
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid http.bind address: {}", cfg.http.bind))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
