//! Anwendungsbefehle des Control-Kanals
//!
//! Das erste Argument einer Anfrage ist der Befehlsname. Antworten mit
//! Nutzdaten sind `Response ok <daten...>` oder `Response fail <meldung>`,
//! reine Empfangsbestaetigungen sind `Approve`.
//!
//! | Richtung        | Anfrage                                       | Antwort                         |
//! |-----------------|-----------------------------------------------|---------------------------------|
//! | Client → Server | `auth <login> <passwort> <bandbreite> <geraet>` | `Response ok <user-id>` / `fail` |
//! | beide           | `ping`                                        | `Approve pong`                  |
//! | Client → Server | `get_server_info`                             | `Response ok <json>`            |
//! | Client → Server | `get_channels`                                | `Response ok <json>...`         |
//! | Server → Client | `channels_changed`                            | `Approve`                       |

use tvlink_core::{AuthCredential, ChannelInfo, DeviceId, ServerInfo, UserId};

use crate::error::{ProtokollFehler, ProtokollResult};

// ---------------------------------------------------------------------------
// Befehlsnamen
// ---------------------------------------------------------------------------

pub const AUTH: &str = "auth";
pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const GET_SERVER_INFO: &str = "get_server_info";
pub const GET_CHANNELS: &str = "get_channels";
pub const CHANNELS_CHANGED: &str = "channels_changed";

pub const OK: &str = "ok";
pub const FAIL: &str = "fail";

/// Einheitliche Meldung bei fehlgeschlagener Anmeldung
pub const AUTH_FEHLGESCHLAGEN: &str = "authentication failed";
pub const BEREITS_ANGEMELDET: &str = "already authenticated";
pub const GERAET_VERBUNDEN: &str = "device already connected";
pub const NICHT_ANGEMELDET: &str = "not authenticated";
pub const UNBEKANNTER_BEFEHL: &str = "unknown command";
/// Die eigentliche Antwort passt nicht in eine Zeile
pub const ANTWORT_ZU_GROSS: &str = "response too large";

/// Alle Befehlsnamen, die eine Anfrage tragen kann
pub const BEFEHLE: [&str; 5] = [AUTH, PING, GET_SERVER_INFO, GET_CHANNELS, CHANNELS_CHANGED];

/// Befehlsname als Metrik-Label, unbekannte Namen werden zusammengefasst
pub fn befehl_label(name: &str) -> &'static str {
    BEFEHLE
        .iter()
        .find(|b| **b == name)
        .copied()
        .unwrap_or("unknown")
}

// ---------------------------------------------------------------------------
// Auth-Anfrage
// ---------------------------------------------------------------------------

/// Inhalt einer `auth`-Anfrage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAnfrage {
    pub credential: AuthCredential,
    pub device_id: DeviceId,
}

impl AuthAnfrage {
    pub fn neu(credential: AuthCredential, device_id: DeviceId) -> Self {
        Self {
            credential,
            device_id,
        }
    }

    pub fn to_argv(&self) -> Vec<String> {
        vec![
            AUTH.to_string(),
            self.credential.login().to_string(),
            self.credential.password().to_string(),
            self.credential.bandwidth().to_string(),
            self.device_id.to_string(),
        ]
    }

    /// Wertet `auth <login> <passwort> <bandbreite> <geraet>` aus
    pub fn aus_argv(argv: &[String]) -> ProtokollResult<Self> {
        match argv {
            [name, login, passwort, bandbreite, geraet] if name == AUTH => {
                let bandwidth = bandbreite.parse::<u64>().map_err(|_| {
                    ProtokollFehler::argumente(AUTH, format!("ungueltige Bandbreite '{bandbreite}'"))
                })?;
                if geraet.is_empty() {
                    return Err(ProtokollFehler::argumente(AUTH, "Geraete-ID fehlt"));
                }
                Ok(Self {
                    credential: AuthCredential::neu(login.clone(), passwort.clone(), bandwidth),
                    device_id: DeviceId::neu(geraet.clone()),
                })
            }
            [name, ..] if name == AUTH => Err(ProtokollFehler::argumente(
                AUTH,
                format!("erwartet 4 Argumente, erhalten {}", argv.len() - 1),
            )),
            _ => Err(ProtokollFehler::argumente(AUTH, "kein auth-Befehl")),
        }
    }
}

// ---------------------------------------------------------------------------
// Antworten
// ---------------------------------------------------------------------------

/// `ok` gefolgt von Nutzdaten
pub fn ok_argv<I, S>(daten: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    std::iter::once(OK.to_string())
        .chain(daten.into_iter().map(Into::into))
        .collect()
}

/// `fail` gefolgt von einer Meldung
pub fn fail_argv(meldung: impl Into<String>) -> Vec<String> {
    vec![FAIL.to_string(), meldung.into()]
}

/// Trennt eine `ok`/`fail`-Antwort in Nutzdaten oder Fehlermeldung
pub fn antwort_auswerten(argv: &[String]) -> Result<&[String], String> {
    match argv.split_first() {
        Some((status, daten)) if status == OK => Ok(daten),
        Some((status, rest)) if status == FAIL => Err(rest.join(" ")),
        Some((status, _)) => Err(format!("unbekannter Antwortstatus '{status}'")),
        None => Err("leere Antwort".to_string()),
    }
}

pub fn auth_ok_argv(user_id: UserId) -> Vec<String> {
    ok_argv([user_id.to_string()])
}

pub fn auth_ok_auswerten(daten: &[String]) -> ProtokollResult<UserId> {
    match daten {
        [uid] => uid
            .parse::<UserId>()
            .map_err(|_| ProtokollFehler::argumente(AUTH, format!("ungueltige User-ID '{uid}'"))),
        _ => Err(ProtokollFehler::argumente(AUTH, "User-ID fehlt")),
    }
}

pub fn server_info_argv(info: &ServerInfo) -> ProtokollResult<Vec<String>> {
    Ok(ok_argv([serde_json::to_string(info)?]))
}

pub fn server_info_auswerten(daten: &[String]) -> ProtokollResult<ServerInfo> {
    match daten {
        [json] => Ok(serde_json::from_str(json)?),
        _ => Err(ProtokollFehler::argumente(
            GET_SERVER_INFO,
            "genau ein JSON-Argument erwartet",
        )),
    }
}

/// Ein JSON-Argument pro Kanal
pub fn kanaele_argv(kanaele: &[ChannelInfo]) -> ProtokollResult<Vec<String>> {
    let json = kanaele
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok_argv(json))
}

pub fn kanaele_auswerten(daten: &[String]) -> ProtokollResult<Vec<ChannelInfo>> {
    daten
        .iter()
        .map(|json| serde_json::from_str(json).map_err(ProtokollFehler::from))
        .collect()
}
