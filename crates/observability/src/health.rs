//! Health-Check-Endpunkt fuer tvlink
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime, Startzeit und ob der
//! Control-Kanal Verbindungen annimmt

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub host_running: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start: Arc<Instant>,
    gestartet_um: DateTime<Utc>,
    host_laeuft: Arc<AtomicBool>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start: Arc::new(Instant::now()),
            gestartet_um: Utc::now(),
            host_laeuft: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn host_laeuft(&self) -> bool {
        self.host_laeuft.load(Ordering::Relaxed)
    }

    pub fn host_status_setzen(&self, laeuft: bool) {
        self.host_laeuft.store(laeuft, Ordering::Relaxed);
    }

    pub fn antwort(&self) -> HealthResponse {
        let host_running = self.host_laeuft();
        HealthResponse {
            status: if host_running {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            started_at: self.gestartet_um,
            host_running,
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let antwort = state.antwort();
    let http_status = match antwort.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(antwort))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frischer_zustand() {
        let state = HealthState::neu();
        assert!(state.uptime_seconds() < 5);
        assert!(!state.host_laeuft());
        assert_eq!(state.antwort().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn host_status_umschalten() {
        let state = HealthState::neu();
        let klon = state.clone();
        klon.host_status_setzen(true);
        assert!(state.host_laeuft());
        assert_eq!(state.antwort().status, HealthStatus::Healthy);
    }

    #[test]
    fn antwort_serialisierung() {
        let state = HealthState::neu();
        state.host_status_setzen(true);

        let json = serde_json::to_string(&state.antwort()).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"host_running\":true"));
        assert!(json.contains("\"started_at\""));
    }

    #[test]
    fn antwort_deserialisierung() {
        let json = r#"{"status":"unhealthy","version":"0.1.0","uptime_seconds":100,"started_at":"2026-01-01T00:00:00Z","host_running":false}"#;
        let response: HealthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.uptime_seconds, 100);
        assert!(!response.host_running);
    }
}
