//! Fehlertypen des Transport-Crates

use nahfunk_core::{NahfunkError, PeerId};
use nahfunk_protocol::PaketFehler;
use thiserror::Error;

use crate::art::TransportArt;

pub type TransportResult<T> = std::result::Result<T, TransportFehler>;

#[derive(Debug, Error)]
pub enum TransportFehler {
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ungueltige Nachricht: {0}")]
    Paket(#[from] PaketFehler),

    #[error("Handshake-Kanal geschlossen")]
    KanalGeschlossen,

    #[error("Protokollverletzung im Handshake: {0}")]
    Protokoll(String),

    #[error("Zeitlimit: {0}")]
    Zeitlimit(&'static str),

    #[error("Transport {0} ist nicht verbunden")]
    NichtVerbunden(TransportArt),

    #[error("Transport {art} kann nicht geoeffnet werden: {grund}")]
    Oeffnen { art: TransportArt, grund: String },

    #[error("Aushandlung fehlgeschlagen: {grund}")]
    AushandlungFehlgeschlagen { grund: String },

    #[error("Gegenseite hat die Aushandlung abgebrochen: {grund}")]
    Abgebrochen { grund: String },

    #[error("Aushandlung abgebrochen (Shutdown)")]
    Beendet,
}

impl TransportFehler {
    /// Endgueltiges Scheitern der Aushandlung (kein automatischer Neuversuch)
    pub fn ist_aushandlungsfehler(&self) -> bool {
        matches!(
            self,
            Self::AushandlungFehlgeschlagen { .. } | Self::Abgebrochen { .. }
        )
    }

    /// Konvertiert in den zentralen Fehler mit Peer-Bezug
    pub fn fuer_peer(self, peer: PeerId) -> NahfunkError {
        match self {
            Self::AushandlungFehlgeschlagen { grund } | Self::Abgebrochen { grund } => {
                NahfunkError::VoiceNichtVerfuegbar { peer, grund }
            }
            Self::Zeitlimit(was) => NahfunkError::Zeitlimit(format!("{peer}: {was}")),
            Self::Paket(e) => NahfunkError::UngueltigesPaket(e.to_string()),
            andere => NahfunkError::Verbindung(format!("{peer}: {andere}")),
        }
    }
}
