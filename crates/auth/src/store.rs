//! Credential-Store
//!
//! Der Server sieht den Store nur ueber den schmalen `CredentialStore`-Trait:
//! Anmeldedaten rein, User-ID und Profil raus. Wie der Store intern
//! speichert (Key-Value-Backend, Datei, Speicher) bleibt verborgen.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tvlink_core::{AuthCredential, ChannelInfo, UserId, UserProfile};

use crate::error::{AuthError, AuthResult};
use crate::password::{hash_pruefen, passwort_hashen_mit, passwort_verifizieren, HashKosten};

/// Schnittstelle zum externen Benutzer-/Profilspeicher
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loest Anmeldedaten zu User-ID und Profil auf
    ///
    /// Veraendert keinen Zustand. Unbekannter Benutzer und falsches Passwort
    /// sind unterschiedliche Fehler, der Aufrufer darf sie nach aussen nicht
    /// unterscheidbar machen.
    async fn aufloesen(&self, credential: &AuthCredential) -> AuthResult<(UserId, UserProfile)>;

    /// Aktuelles Profil eines Benutzers (z.B. fuer Kanal-Pushes)
    async fn profil(&self, user_id: UserId) -> AuthResult<Option<UserProfile>>;
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Ein Benutzer aus der Konfigurationsdatei (`[[benutzer]]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenutzerKonfig {
    pub user_id: u64,
    pub login: String,
    /// Argon2id-PHC-String
    pub passwort_hash: String,
    #[serde(default)]
    pub max_bandbreite: u64,
    #[serde(default)]
    pub kanaele: Vec<ChannelInfo>,
}

// ---------------------------------------------------------------------------
// SpeicherCredentialStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BenutzerEintrag {
    passwort_hash: String,
    profil: UserProfile,
}

/// Passwort hinter dem Vergleichshash fuer unbekannte Logins
const VERGLEICHS_PASSWORT: &str = "tvlink-unbekannter-benutzer";

/// In-Memory-Store, indiziert nach Login
///
/// Thread-safe via DashMap. Passwoerter liegen nur als Argon2id-Hash vor.
/// Auch ein unbekannter Login durchlaeuft eine Argon2-Verifikation (gegen
/// `vergleichs_hash`), damit die Antwortzeit keine Logins verraet.
pub struct SpeicherCredentialStore {
    benutzer: DashMap<String, BenutzerEintrag>,
    naechste_id: AtomicU64,
    kosten: HashKosten,
    vergleichs_hash: String,
}

impl SpeicherCredentialStore {
    /// Erstellt einen leeren Store mit Standard-Hashkosten
    pub fn neu() -> Self {
        Self::mit_kosten(HashKosten::default())
    }

    pub fn mit_kosten(kosten: HashKosten) -> Self {
        let vergleichs_hash =
            passwort_hashen_mit(VERGLEICHS_PASSWORT, kosten).unwrap_or_else(|e| {
                tracing::warn!(fehler = %e, "Vergleichshash nicht erzeugt");
                String::new()
            });
        Self {
            benutzer: DashMap::new(),
            naechste_id: AtomicU64::new(1),
            kosten,
            vergleichs_hash,
        }
    }

    /// Baut einen Store aus Konfigurationseintraegen
    pub fn aus_konfig(eintraege: &[BenutzerKonfig]) -> AuthResult<Self> {
        let store = Self::neu();
        for eintrag in eintraege {
            let profil = UserProfile {
                user_id: UserId(eintrag.user_id),
                login: eintrag.login.clone(),
                max_bandbreite: eintrag.max_bandbreite,
                kanaele: eintrag.kanaele.clone(),
            };
            store.mit_hash_einfuegen(profil, eintrag.passwort_hash.clone())?;
        }
        tracing::info!(anzahl = store.anzahl(), "Benutzer aus Konfiguration geladen");
        Ok(store)
    }

    /// Legt einen neuen Benutzer an und vergibt die naechste freie User-ID
    pub fn benutzer_anlegen(
        &self,
        login: &str,
        passwort: &str,
        kanaele: Vec<ChannelInfo>,
    ) -> AuthResult<UserProfile> {
        if login.is_empty() {
            return Err(AuthError::UngueltigeAnmeldedaten);
        }
        let passwort_hash = passwort_hashen_mit(passwort, self.kosten)?;

        let user_id = loop {
            let kandidat = UserId(self.naechste_id.fetch_add(1, Ordering::Relaxed));
            if !self.user_id_belegt(kandidat) {
                break kandidat;
            }
        };
        let mut profil = UserProfile::neu(user_id, login);
        profil.kanaele = kanaele;

        self.mit_hash_einfuegen(profil.clone(), passwort_hash)?;
        tracing::info!(user_id = %user_id, login = %login, "Benutzer angelegt");
        Ok(profil)
    }

    /// Fuegt einen Benutzer mit bereits gehashtem Passwort ein
    pub fn mit_hash_einfuegen(&self, profil: UserProfile, passwort_hash: String) -> AuthResult<()> {
        if profil.login.is_empty() {
            return Err(AuthError::UngueltigeAnmeldedaten);
        }
        hash_pruefen(&passwort_hash)?;
        if self.user_id_belegt(profil.user_id) {
            return Err(AuthError::UserIdVergeben(profil.user_id.inner()));
        }

        match self.benutzer.entry(profil.login.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(AuthError::BenutzernameVergeben(profil.login))
            }
            dashmap::mapref::entry::Entry::Vacant(frei) => {
                frei.insert(BenutzerEintrag {
                    passwort_hash,
                    profil,
                });
                Ok(())
            }
        }
    }

    /// Ersetzt die Kanalliste eines Benutzers
    ///
    /// Gibt `false` zurueck wenn der Login unbekannt ist.
    pub fn kanaele_setzen(&self, login: &str, kanaele: Vec<ChannelInfo>) -> bool {
        match self.benutzer.get_mut(login) {
            Some(mut eintrag) => {
                eintrag.profil.kanaele = kanaele;
                true
            }
            None => false,
        }
    }

    pub fn anzahl(&self) -> usize {
        self.benutzer.len()
    }

    fn user_id_belegt(&self, user_id: UserId) -> bool {
        self.benutzer.iter().any(|e| e.profil.user_id == user_id)
    }
}

impl Default for SpeicherCredentialStore {
    fn default() -> Self {
        Self::neu()
    }
}

#[async_trait]
impl CredentialStore for SpeicherCredentialStore {
    async fn aufloesen(&self, credential: &AuthCredential) -> AuthResult<(UserId, UserProfile)> {
        if !credential.ist_gueltig() {
            return Err(AuthError::UngueltigeAnmeldedaten);
        }

        // Eintrag klonen, damit kein DashMap-Guard ueber das await lebt
        let eintrag = self
            .benutzer
            .get(credential.login())
            .map(|e| e.value().clone());

        let passwort = credential.password().to_string();
        let hash = match &eintrag {
            Some(e) => e.passwort_hash.clone(),
            None => self.vergleichs_hash.clone(),
        };
        let ergebnis = tokio::task::spawn_blocking(move || passwort_verifizieren(&passwort, &hash))
            .await
            .map_err(|e| AuthError::intern(format!("Verifikations-Task abgebrochen: {e}")))?;

        // Ergebnis der Vergleichsverifikation wird ignoriert
        let Some(eintrag) = eintrag else {
            return Err(AuthError::UnbekannterBenutzer(credential.login().to_string()));
        };

        if !ergebnis? {
            tracing::warn!(login = %credential.login(), "Fehlgeschlagener Anmeldeversuch");
            return Err(AuthError::FalschesPasswort(credential.login().to_string()));
        }

        Ok((eintrag.profil.user_id, eintrag.profil))
    }

    async fn profil(&self, user_id: UserId) -> AuthResult<Option<UserProfile>> {
        Ok(self
            .benutzer
            .iter()
            .find(|e| e.profil.user_id == user_id)
            .map(|e| e.profil.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SpeicherCredentialStore {
        SpeicherCredentialStore::mit_kosten(HashKosten::minimal())
    }

    fn kanal(id: &str) -> ChannelInfo {
        ChannelInfo {
            id: id.into(),
            name: format!("Kanal {id}"),
            url: format!("http://tv.local/{id}.m3u8"),
        }
    }

    #[tokio::test]
    async fn anlegen_und_aufloesen() {
        let store = test_store();
        let profil = store.benutzer_anlegen("bob", "pw", vec![kanal("1")]).unwrap();

        let (uid, geladen) = store
            .aufloesen(&AuthCredential::neu("bob", "pw", 1000))
            .await
            .unwrap();
        assert_eq!(uid, profil.user_id);
        assert_eq!(geladen.kanaele.len(), 1);
    }

    #[tokio::test]
    async fn unbekannter_benutzer_und_falsches_passwort() {
        let store = test_store();
        store.benutzer_anlegen("bob", "pw", vec![]).unwrap();

        let unbekannt = store
            .aufloesen(&AuthCredential::neu("alice", "pw", 0))
            .await
            .unwrap_err();
        assert!(matches!(unbekannt, AuthError::UnbekannterBenutzer(_)));

        let falsch = store
            .aufloesen(&AuthCredential::neu("bob", "falsch", 0))
            .await
            .unwrap_err();
        assert!(matches!(falsch, AuthError::FalschesPasswort(_)));
        assert!(falsch.ist_anmeldefehler());
    }

    #[test]
    fn vergleichshash_nutzt_store_kosten() {
        let kosten = HashKosten {
            m_cost: 1024,
            t_cost: 2,
            p_cost: 1,
        };
        let store = SpeicherCredentialStore::mit_kosten(kosten);
        let hash = argon2::PasswordHash::new(&store.vergleichs_hash).unwrap();
        assert_eq!(hash.params.get_decimal("m"), Some(1024));
        assert_eq!(hash.params.get_decimal("t"), Some(2));
    }

    #[tokio::test]
    async fn unbekannter_login_kostet_eine_verifikation() {
        let kosten = HashKosten {
            m_cost: 4 * 1024,
            t_cost: 2,
            p_cost: 1,
        };
        let store = SpeicherCredentialStore::mit_kosten(kosten);
        store.benutzer_anlegen("bob", "pw", vec![]).unwrap();

        async fn dauer(store: &SpeicherCredentialStore, login: &str) -> std::time::Duration {
            let start = std::time::Instant::now();
            assert!(store
                .aufloesen(&AuthCredential::neu(login, "falsch", 0))
                .await
                .is_err());
            start.elapsed()
        }

        let mut falsch = std::time::Duration::MAX;
        let mut unbekannt = std::time::Duration::MAX;
        for _ in 0..3 {
            falsch = falsch.min(dauer(&store, "bob").await);
            unbekannt = unbekannt.min(dauer(&store, "alice").await);
        }
        // Ohne Vergleichshash laege der unbekannte Login im Mikrosekundenbereich
        assert!(
            unbekannt * 4 >= falsch,
            "unbekannt: {unbekannt:?}, falsches Passwort: {falsch:?}"
        );
    }

    #[tokio::test]
    async fn leerer_login_ist_ungueltig() {
        let store = test_store();
        let fehler = store
            .aufloesen(&AuthCredential::neu("", "pw", 0))
            .await
            .unwrap_err();
        assert!(matches!(fehler, AuthError::UngueltigeAnmeldedaten));
        assert!(store.benutzer_anlegen("", "pw", vec![]).is_err());
    }

    #[test]
    fn doppelter_login_wird_abgelehnt() {
        let store = test_store();
        store.benutzer_anlegen("bob", "pw", vec![]).unwrap();
        let fehler = store.benutzer_anlegen("bob", "anders", vec![]).unwrap_err();
        assert!(matches!(fehler, AuthError::BenutzernameVergeben(_)));
        assert_eq!(store.anzahl(), 1);
    }

    #[test]
    fn feste_user_id_aus_konfig() {
        let store = test_store();
        let hash = passwort_hashen_mit("pw", HashKosten::minimal()).unwrap();

        store
            .mit_hash_einfuegen(UserProfile::neu(UserId(42), "bob"), hash.clone())
            .unwrap();
        let fehler = store
            .mit_hash_einfuegen(UserProfile::neu(UserId(42), "carol"), hash)
            .unwrap_err();
        assert!(matches!(fehler, AuthError::UserIdVergeben(42)));

        let ungueltig = store
            .mit_hash_einfuegen(UserProfile::neu(UserId(43), "dave"), "kein-hash".into())
            .unwrap_err();
        assert!(matches!(ungueltig, AuthError::PasswortHashing(_)));
    }

    #[tokio::test]
    async fn kanaele_setzen_aendert_profil() {
        let store = test_store();
        let profil = store.benutzer_anlegen("bob", "pw", vec![]).unwrap();

        assert!(store.kanaele_setzen("bob", vec![kanal("1"), kanal("2")]));
        assert!(!store.kanaele_setzen("niemand", vec![]));

        let neu = store.profil(profil.user_id).await.unwrap().unwrap();
        assert_eq!(neu.kanaele.len(), 2);
        assert!(store.profil(UserId(999)).await.unwrap().is_none());
    }

    #[test]
    fn benutzer_konfig_aus_toml() {
        let hash = passwort_hashen_mit("pw", HashKosten::minimal()).unwrap();
        let toml = format!(
            r#"
            user_id = 42
            login = "bob"
            passwort_hash = "{hash}"

            [[kanaele]]
            id = "1"
            name = "Das Erste"
            url = "http://tv.local/1.m3u8"
            "#
        );
        let eintrag: BenutzerKonfig = toml::from_str(&toml).unwrap();
        assert_eq!(eintrag.user_id, 42);
        assert_eq!(eintrag.kanaele.len(), 1);
        assert_eq!(eintrag.max_bandbreite, 0);
    }
}
