//! tvlink-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Credential-Store, `ServerHost` und den
//! Observability-Server.

pub mod config;

use std::sync::Arc;

use anyhow::Result;
use config::ServerConfig;
use tokio::sync::watch;
use tvlink_auth::SpeicherCredentialStore;
use tvlink_observability::{observability_server_starten, HealthState, TvlinkMetrics};
use tvlink_signaling::{HostZustand, ServerHost};

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Benutzer aus der Konfiguration in den Credential-Store laden
    /// 2. Observability-Server starten (falls aktiviert)
    /// 3. Control-Kanal binden
    /// 4. Auf Ctrl-C warten, dann Host und Observability herunterfahren
    pub async fn starten(self) -> Result<()> {
        let metriken = TvlinkMetrics::neu()?;
        let health = HealthState::neu();

        let store = SpeicherCredentialStore::aus_konfig(&self.config.benutzer)?;
        if store.anzahl() == 0 {
            tracing::warn!("Keine Benutzer konfiguriert, keine Anmeldung moeglich");
        }

        let host = Arc::new(ServerHost::neu(
            self.config.host_konfig()?,
            Arc::new(store),
            metriken.clone(),
        ));

        // Health-Status folgt dem Host-Zustand
        let mut zustand_rx = host.zustand_abonnieren();
        let health_klon = health.clone();
        tokio::spawn(async move {
            while zustand_rx.changed().await.is_ok() {
                let zustand = *zustand_rx.borrow_and_update();
                tracing::debug!(zustand = ?zustand, "Host-Zustand geaendert");
                health_klon.host_status_setzen(zustand == HostZustand::Running);
            }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let observability = if self.config.observability.aktiviert {
            let addr = self.config.observability_bind_adresse()?;
            Some(tokio::spawn(observability_server_starten(
                addr,
                metriken,
                health,
                shutdown_rx,
            )))
        } else {
            None
        };

        let addr = host.starten().await?;
        tracing::info!(
            server_name = %self.config.server.name,
            adresse = %addr,
            max_verbindungen = self.config.netzwerk.max_verbindungen,
            "Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)..."
        );

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        host.stoppen().await;
        let _ = shutdown_tx.send(true);
        if let Some(task) = observability {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(fehler = %e, "Observability-Server mit Fehler beendet"),
                Err(e) => tracing::warn!(fehler = %e, "Observability-Task abgebrochen"),
            }
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}
