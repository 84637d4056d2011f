//! Session-Registry – welche Geraete welches Benutzers sind verbunden
//!
//! Einzige prozessweit geteilte, veraenderliche Struktur. Eine einzelne
//! Mutex schuetzt die Tabelle, unter der Sperre findet keine IO statt.
//! Die Anmeldedaten-Pruefung laeuft ausserhalb der Sperre gegen den
//! `CredentialStore`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tvlink_auth::{AuthError, CredentialStore};
use tvlink_core::{AuthCredential, DeviceId, UserId, UserProfile, VerbindungsId};

use crate::connection::VerbindungsHandle;
use crate::error::RegistryError;

/// Ein verbundenes Geraet eines Benutzers
#[derive(Debug, Clone)]
pub struct GeraeteEintrag {
    pub device_id: DeviceId,
    pub handle: VerbindungsHandle,
}

/// Tabelle User-ID → Geraete-Verbindungen
pub struct SessionRegistry {
    /// Geraete in Anmeldereihenfolge, leere Eintraege werden entfernt
    benutzer: Mutex<HashMap<UserId, Vec<GeraeteEintrag>>>,
    store: Arc<dyn CredentialStore>,
}

impl SessionRegistry {
    pub fn neu(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            benutzer: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Registriert ein Geraet eines Benutzers
    ///
    /// Schlaegt fehl, wenn (user, geraet) bereits registriert ist. Der
    /// bestehende Eintrag bleibt dann unveraendert.
    pub fn geraet_registrieren(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        handle: VerbindungsHandle,
    ) -> Result<(), RegistryError> {
        let mut benutzer = self.benutzer.lock();
        let geraete = benutzer.entry(user_id).or_default();

        if geraete.iter().any(|g| g.device_id == device_id) {
            return Err(RegistryError::DoppeltesGeraet { user_id, device_id });
        }

        tracing::info!(
            user_id = %user_id,
            device_id = %device_id,
            verbindung = %handle.id(),
            "Geraet registriert"
        );
        geraete.push(GeraeteEintrag { device_id, handle });
        Ok(())
    }

    /// Entfernt die Verbindung aus der Registry
    ///
    /// Gibt (User, Geraet) der entfernten Verbindung zurueck. Benutzer ohne
    /// Geraete werden mit entfernt.
    pub fn verbindung_entfernen(
        &self,
        verbindung: VerbindungsId,
    ) -> Result<(UserId, DeviceId), RegistryError> {
        let mut benutzer = self.benutzer.lock();

        let treffer = benutzer.iter().find_map(|(user_id, geraete)| {
            geraete
                .iter()
                .position(|g| g.handle.id() == verbindung)
                .map(|pos| (*user_id, pos))
        });

        let Some((user_id, pos)) = treffer else {
            return Err(RegistryError::NichtGefunden(verbindung.to_string()));
        };

        let mut leer = false;
        let mut device_id = None;
        if let Some(geraete) = benutzer.get_mut(&user_id) {
            device_id = Some(geraete.remove(pos).device_id);
            leer = geraete.is_empty();
        }
        if leer {
            benutzer.remove(&user_id);
        }

        let device_id = device_id.ok_or_else(|| RegistryError::NichtGefunden(verbindung.to_string()))?;
        tracing::info!(user_id = %user_id, device_id = %device_id, "Geraet abgemeldet");
        Ok((user_id, device_id))
    }

    /// Sucht die Verbindung eines bestimmten Geraets
    pub fn geraet_finden(
        &self,
        user_id: UserId,
        device_id: &DeviceId,
    ) -> Result<VerbindungsHandle, RegistryError> {
        self.benutzer
            .lock()
            .get(&user_id)
            .and_then(|geraete| geraete.iter().find(|g| &g.device_id == device_id))
            .map(|g| g.handle.clone())
            .ok_or_else(|| RegistryError::NichtGefunden(format!("{user_id}/{device_id}")))
    }

    /// Alle Geraete eines Benutzers in Anmeldereihenfolge
    pub fn geraete_von(&self, user_id: UserId) -> Vec<DeviceId> {
        self.benutzer
            .lock()
            .get(&user_id)
            .map(|geraete| geraete.iter().map(|g| g.device_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Alle Benutzer mit mindestens einem Geraet, aufsteigend sortiert
    pub fn benutzer(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.benutzer.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn ist_registriert(&self, user_id: UserId, device_id: &DeviceId) -> bool {
        self.geraet_finden(user_id, device_id).is_ok()
    }

    /// Anzahl verbundener Geraete ueber alle Benutzer
    pub fn geraete_anzahl(&self) -> usize {
        self.benutzer.lock().values().map(Vec::len).sum()
    }

    /// Leert die Registry und gibt alle Verbindungen zurueck
    pub fn alle_entfernen(&self) -> Vec<VerbindungsHandle> {
        let benutzer = std::mem::take(&mut *self.benutzer.lock());
        benutzer
            .into_values()
            .flat_map(|geraete| geraete.into_iter().map(|g| g.handle))
            .collect()
    }

    /// Loest Anmeldedaten ueber den Credential-Store auf
    ///
    /// Veraendert die Registry nicht. Unbekannter Benutzer und falsches
    /// Passwort werden zu einem einzigen, undurchsichtigen Fehler.
    pub async fn anmeldedaten_aufloesen(
        &self,
        credential: &AuthCredential,
    ) -> Result<(UserId, UserProfile), RegistryError> {
        match self.store.aufloesen(credential).await {
            Ok(ergebnis) => Ok(ergebnis),
            Err(e) if e.ist_anmeldefehler() => {
                tracing::debug!(login = %credential.login(), grund = %e, "Anmeldung abgelehnt");
                Err(RegistryError::AuthentifizierungFehlgeschlagen)
            }
            Err(e) => {
                tracing::error!(fehler = %e, "Credential-Store-Fehler bei Anmeldung");
                Err(RegistryError::AuthentifizierungFehlgeschlagen)
            }
        }
    }

    /// Aktuelles Profil eines Benutzers aus dem Store
    pub async fn profil(&self, user_id: UserId) -> Option<UserProfile> {
        match self.store.profil(user_id).await {
            Ok(profil) => profil,
            Err(AuthError::Intern(e)) => {
                tracing::error!(user_id = %user_id, fehler = %e, "Profil nicht lesbar");
                None
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, fehler = %e, "Profil nicht lesbar");
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("geraete", &self.geraete_anzahl())
            .finish_non_exhaustive()
    }
}
