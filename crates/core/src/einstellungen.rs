//! Voice-Einstellungen – Reichweiten-Tabelle und globaler Schalter
//!
//! Wird explizit an den Spatializer und die Ausgabe uebergeben. Bedien-
//! elemente (Befehle, Menues) lesen und schreiben ueber dieselben Accessoren.
//!
//! Thread-safe: die Tabelle liegt hinter einem `RwLock`, der Schalter ist ein
//! Atomic. Jede Aenderung erhoeht die Version, damit Konsumenten ohne Lock
//! erkennen koennen, ob sie neu lesen muessen.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{NahfunkError, Result};
use crate::types::VoiceLevel;

/// Maximale hoerbare Distanz je Lautstaerke-Stufe (in Bloecken / Metern)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanzTabelle {
    pub whisper: u32,
    pub talk: u32,
    pub shout: u32,
}

impl Default for DistanzTabelle {
    fn default() -> Self {
        Self {
            whisper: 5,
            talk: 15,
            shout: 25,
        }
    }
}

impl DistanzTabelle {
    /// Gibt die Distanz fuer eine Stufe zurueck
    pub fn distanz(&self, level: VoiceLevel) -> u32 {
        match level {
            VoiceLevel::Whisper => self.whisper,
            VoiceLevel::Talk => self.talk,
            VoiceLevel::Shout => self.shout,
        }
    }

    fn setzen(&mut self, level: VoiceLevel, distanz: u32) {
        match level {
            VoiceLevel::Whisper => self.whisper = distanz,
            VoiceLevel::Talk => self.talk = distanz,
            VoiceLevel::Shout => self.shout = distanz,
        }
    }
}

/// Geteilte, zur Laufzeit aenderbare Voice-Einstellungen
#[derive(Clone, Debug)]
pub struct VoiceEinstellungen {
    inner: Arc<EinstellungenInner>,
}

#[derive(Debug)]
struct EinstellungenInner {
    distanzen: RwLock<DistanzTabelle>,
    aktiviert: AtomicBool,
    version: AtomicU64,
}

impl VoiceEinstellungen {
    /// Erstellt Einstellungen mit gegebener Tabelle; das Subsystem ist aktiv
    pub fn neu(distanzen: DistanzTabelle) -> Self {
        Self {
            inner: Arc::new(EinstellungenInner {
                distanzen: RwLock::new(distanzen),
                aktiviert: AtomicBool::new(true),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Liest die Distanz fuer eine Stufe
    pub fn distanz(&self, level: VoiceLevel) -> u32 {
        self.inner.distanzen.read().distanz(level)
    }

    /// Setzt die maximale Distanz einer Stufe
    ///
    /// Die Reihenfolge `whisper < talk < shout` wird nicht erzwungen, aber
    /// eine Distanz von 0 ist ungueltig.
    pub fn distanz_setzen(&self, level: VoiceLevel, distanz: u32) -> Result<()> {
        if distanz == 0 {
            return Err(NahfunkError::Konfiguration(format!(
                "Distanz fuer {level} muss groesser als 0 sein"
            )));
        }
        self.inner.distanzen.write().setzen(level, distanz);
        self.inner.version.fetch_add(1, Ordering::Release);
        tracing::info!(%level, distanz, "Voice-Distanz geaendert");
        Ok(())
    }

    /// Setzt alle Distanzen auf die Standardwerte zurueck
    pub fn zuruecksetzen(&self) {
        *self.inner.distanzen.write() = DistanzTabelle::default();
        self.inner.version.fetch_add(1, Ordering::Release);
        tracing::info!("Voice-Distanzen zurueckgesetzt");
    }

    /// Snapshot der aktuellen Tabelle
    pub fn tabelle(&self) -> DistanzTabelle {
        *self.inner.distanzen.read()
    }

    /// Aktiviert oder deaktiviert das gesamte Voice-Subsystem
    pub fn aktiviert_setzen(&self, aktiviert: bool) {
        let vorher = self.inner.aktiviert.swap(aktiviert, Ordering::AcqRel);
        if vorher != aktiviert {
            self.inner.version.fetch_add(1, Ordering::Release);
            tracing::info!(aktiviert, "Voice-Subsystem umgeschaltet");
        }
    }

    /// Ist das Voice-Subsystem aktiv?
    pub fn ist_aktiviert(&self) -> bool {
        self.inner.aktiviert.load(Ordering::Acquire)
    }

    /// Aenderungszaehler (steigt bei jeder Aenderung)
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }
}

impl Default for VoiceEinstellungen {
    fn default() -> Self {
        Self::neu(DistanzTabelle::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_distanzen() {
        let e = VoiceEinstellungen::default();
        assert_eq!(e.distanz(VoiceLevel::Whisper), 5);
        assert_eq!(e.distanz(VoiceLevel::Talk), 15);
        assert_eq!(e.distanz(VoiceLevel::Shout), 25);
        assert!(e.ist_aktiviert());
    }

    #[test]
    fn distanz_setzen_erhoeht_version() {
        let e = VoiceEinstellungen::default();
        let v0 = e.version();
        e.distanz_setzen(VoiceLevel::Shout, 40).unwrap();
        assert_eq!(e.distanz(VoiceLevel::Shout), 40);
        assert!(e.version() > v0);
    }

    #[test]
    fn distanz_null_abgelehnt() {
        let e = VoiceEinstellungen::default();
        assert!(e.distanz_setzen(VoiceLevel::Talk, 0).is_err());
        assert_eq!(e.distanz(VoiceLevel::Talk), 15);
    }

    #[test]
    fn zuruecksetzen_stellt_standard_her() {
        let e = VoiceEinstellungen::default();
        e.distanz_setzen(VoiceLevel::Whisper, 2).unwrap();
        e.zuruecksetzen();
        assert_eq!(e.tabelle(), DistanzTabelle::default());
    }

    #[test]
    fn clone_teilt_zustand() {
        let a = VoiceEinstellungen::default();
        let b = a.clone();
        a.aktiviert_setzen(false);
        assert!(!b.ist_aktiviert());
    }

    #[test]
    fn tabelle_aus_json_mit_defaults() {
        let t: DistanzTabelle = serde_json::from_str(r#"{"shout": 50}"#).unwrap();
        assert_eq!(t.shout, 50);
        assert_eq!(t.talk, 15);
    }
}
