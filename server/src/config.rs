//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist (dann allerdings ohne Benutzer).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tvlink_auth::BenutzerKonfig;
use tvlink_core::ServerInfo;
use tvlink_signaling::{HostKonfig, VerbindungsKonfig};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Zeitgrenzen und Limits des Control-Kanals
    pub protokoll: ProtokollEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
    /// Benutzer des Credential-Stores (`[[benutzer]]`)
    pub benutzer: Vec<BenutzerKonfig>,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// host:port des Bandbreiten-Messpunkts, geht per `get_server_info` an die Geraete
    pub bandwidth_host: String,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "tvlink".into(),
            bandwidth_host: String::new(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer den Control-Kanal
    pub bind_adresse: String,
    pub tcp_port: u16,
    /// Maximale Anzahl gleichzeitiger Verbindungen
    pub max_verbindungen: usize,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 7878,
            max_verbindungen: 512,
        }
    }
}

/// Zeitgrenzen und Limits des Control-Kanals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtokollEinstellungen {
    /// Anonyme Verbindungen werden danach getrennt
    pub auth_timeout_sek: u64,
    /// Abstand der Server-Pings an angemeldete Geraete
    pub keepalive_sek: u64,
    /// Ohne eingehende Zeile wird danach getrennt
    pub verbindungs_timeout_sek: u64,
    /// Frist fuer Anfragen des Servers an ein Geraet
    pub anfrage_timeout_sek: u64,
    pub max_protokollfehler: u32,
    /// Maximale Laenge einer Befehlszeile in Bytes
    pub max_zeilenlaenge: usize,
}

impl Default for ProtokollEinstellungen {
    fn default() -> Self {
        Self {
            auth_timeout_sek: 10,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            anfrage_timeout_sek: 30,
            max_protokollfehler: 8,
            max_zeilenlaenge: tvlink_protocol::wire::DEFAULT_MAX_ZEILENLAENGE,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Bind-Adresse des Control-Kanals
    pub fn tcp_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port);
        adresse
            .parse()
            .with_context(|| format!("Ungueltige Bind-Adresse '{adresse}'"))
    }

    /// Bind-Adresse fuer den Observability-Server
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port);
        adresse
            .parse()
            .with_context(|| format!("Ungueltige Observability-Adresse '{adresse}'"))
    }

    /// Konfiguration fuer den `ServerHost`
    pub fn host_konfig(&self) -> anyhow::Result<HostKonfig> {
        let p = &self.protokoll;
        anyhow::ensure!(p.max_zeilenlaenge > 0, "max_zeilenlaenge muss groesser 0 sein");
        anyhow::ensure!(
            p.keepalive_sek > 0 && p.keepalive_sek < p.verbindungs_timeout_sek,
            "keepalive_sek muss zwischen 0 und verbindungs_timeout_sek liegen"
        );

        Ok(HostKonfig {
            bind_addr: self.tcp_bind_adresse()?,
            max_verbindungen: self.netzwerk.max_verbindungen,
            server_info: ServerInfo {
                bandwidth_host: self.server.bandwidth_host.clone(),
            },
            verbindung: VerbindungsKonfig {
                auth_timeout: Duration::from_secs(p.auth_timeout_sek),
                keepalive: Duration::from_secs(p.keepalive_sek),
                verbindungs_timeout: Duration::from_secs(p.verbindungs_timeout_sek),
                anfrage_timeout: Duration::from_secs(p.anfrage_timeout_sek),
                max_protokollfehler: p.max_protokollfehler,
                max_zeilenlaenge: p.max_zeilenlaenge,
                ..VerbindungsKonfig::default()
            },
        })
    }
}
