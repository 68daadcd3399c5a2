//! Fehlertypen fuer nahfunk
//!
//! Zentraler Fehler-Enum fuer alles, was ueber Crate-Grenzen hinweg gemeldet
//! wird. Die Untercrates definieren eigene Fehler und konvertieren via `From`.

use thiserror::Error;

use crate::types::PeerId;

/// Globaler Result-Alias fuer nahfunk
pub type Result<T> = std::result::Result<T, NahfunkError>;

/// Fehler, die Crate-Grenzen ueberqueren
#[derive(Debug, Error)]
pub enum NahfunkError {
    /// Transport oder Handshake-Kanal gestoert; ein neuer Versuch kann helfen
    #[error("Verbindungsfehler: {0}")]
    Verbindung(String),

    #[error("Zeitlimit: {0}")]
    Zeitlimit(String),

    /// Endgueltig: auch der Reserve-Transport hat nicht funktioniert
    #[error("Voice fuer {peer} nicht verfuegbar: {grund}")]
    VoiceNichtVerfuegbar { peer: PeerId, grund: String },

    #[error("Ungueltiges Paket: {0}")]
    UngueltigesPaket(String),

    #[error("Ungueltige Einstellung: {0}")]
    Konfiguration(String),

    #[error("Audiofehler: {0}")]
    Audio(String),

    #[error(transparent)]
    Sonstiges(#[from] anyhow::Error),
}

impl NahfunkError {
    /// Lohnt ein automatischer Neuversuch?
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Zeitlimit(_) | Self::Verbindung(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anzeige() {
        let e = NahfunkError::Konfiguration("Distanz 0".into());
        assert_eq!(e.to_string(), "Ungueltige Einstellung: Distanz 0");
    }

    #[test]
    fn nur_netzfehler_sind_wiederholbar() {
        assert!(NahfunkError::Zeitlimit("test".into()).ist_wiederholbar());
        assert!(NahfunkError::Verbindung("reset".into()).ist_wiederholbar());
        assert!(!NahfunkError::Audio("decoder".into()).ist_wiederholbar());
        assert!(!NahfunkError::VoiceNichtVerfuegbar {
            peer: PeerId::new(),
            grund: "kein Transport".into(),
        }
        .ist_wiederholbar());
    }
}
