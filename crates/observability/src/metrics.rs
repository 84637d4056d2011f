//! Prometheus-kompatible Metriken fuer tvlink
//!
//! Registrierte Metriken:
//! - `tvlink_connected_devices` – Gauge: angemeldete Geraete
//! - `tvlink_anonymous_connections` – Gauge: Verbindungen vor der Anmeldung
//! - `tvlink_pending_requests` – Gauge: offene Anfragen ueber alle Verbindungen
//! - `tvlink_connections_total` – Counter: angenommene TCP-Verbindungen
//! - `tvlink_requests_sent_total` – Counter: gesendete Anfragen
//! - `tvlink_protocol_errors_total` – Counter: nicht dekodierbare Zeilen
//! - `tvlink_auth_failures_total` – Counter: fehlgeschlagene Anmeldungen
//! - `tvlink_requests_total` – Counter: eingehende Anfragen (command)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle tvlink-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Metriken.
#[derive(Clone)]
pub struct TvlinkMetrics {
    pub registry: Arc<Registry>,

    // Verbindungen
    pub connected_devices: IntGauge,
    pub anonymous_connections: IntGauge,
    pub connections_total: IntCounter,

    // Protokoll
    pub pending_requests: IntGauge,
    pub requests_sent_total: IntCounter,
    pub protocol_errors_total: IntCounter,
    pub requests_total: IntCounterVec,

    // Authentifizierung
    pub auth_failures_total: IntCounter,
}

impl TvlinkMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_devices = IntGauge::with_opts(Opts::new(
            "tvlink_connected_devices",
            "Anzahl angemeldeter Geraete",
        ))?;
        registry.register(Box::new(connected_devices.clone()))?;

        let anonymous_connections = IntGauge::with_opts(Opts::new(
            "tvlink_anonymous_connections",
            "Anzahl noch nicht angemeldeter Verbindungen",
        ))?;
        registry.register(Box::new(anonymous_connections.clone()))?;

        let connections_total = IntCounter::with_opts(Opts::new(
            "tvlink_connections_total",
            "Gesamtanzahl angenommener TCP-Verbindungen",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let pending_requests = IntGauge::with_opts(Opts::new(
            "tvlink_pending_requests",
            "Offene Anfragen ohne Antwort",
        ))?;
        registry.register(Box::new(pending_requests.clone()))?;

        let requests_sent_total = IntCounter::with_opts(Opts::new(
            "tvlink_requests_sent_total",
            "Gesamtanzahl gesendeter Anfragen",
        ))?;
        registry.register(Box::new(requests_sent_total.clone()))?;

        let protocol_errors_total = IntCounter::with_opts(Opts::new(
            "tvlink_protocol_errors_total",
            "Nicht dekodierbare Befehlszeilen",
        ))?;
        registry.register(Box::new(protocol_errors_total.clone()))?;

        let requests_total = IntCounterVec::new(
            Opts::new("tvlink_requests_total", "Eingehende Anfragen nach Befehl"),
            &["command"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let auth_failures_total = IntCounter::with_opts(Opts::new(
            "tvlink_auth_failures_total",
            "Fehlgeschlagene Anmeldeversuche",
        ))?;
        registry.register(Box::new(auth_failures_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_devices,
            anonymous_connections,
            connections_total,
            pending_requests,
            requests_sent_total,
            protocol_errors_total,
            requests_total,
            auth_failures_total,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: TvlinkMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<TvlinkMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(fehler = %err, "Metriken-Export fehlgeschlagen");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
