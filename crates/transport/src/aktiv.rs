//! Der ausgehandelte Transport eines Peers
//!
//! Statischer Dispatch ueber die drei Implementierungen.

use nahfunk_protocol::{AudioPacket, Nachricht};
use std::sync::Arc;

use crate::art::TransportArt;
use crate::datagram::DatagramTransport;
use crate::error::TransportResult;
use crate::kern::TransportKern;
use crate::native::NativeTransport;
use crate::stream::StreamTransport;
use crate::verbindung::SchliessArt;
use crate::Transport;

#[derive(Debug)]
pub enum AktiverTransport {
    Native(NativeTransport),
    Datagram(DatagramTransport),
    Stream(StreamTransport),
}

impl AktiverTransport {
    /// Sendet ein Audio-Paket, sofern der Transport bereit ist
    ///
    /// Gibt `false` zurueck, wenn das Paket wegen fehlender Readiness
    /// uebersprungen wurde.
    pub async fn audio_senden(&self, paket: &AudioPacket) -> TransportResult<bool> {
        if !self.kern().ist_bereit() {
            tracing::warn!(transport = %self.art(), seq = paket.sequence, "Transport nicht bereit, Audio uebersprungen");
            return Ok(false);
        }
        self.senden(&Nachricht::Audio(paket.clone())).await?;
        Ok(true)
    }

    pub fn ist_bereit(&self) -> bool {
        self.kern().ist_bereit()
    }

    pub fn verworfen(&self) -> u64 {
        self.kern().verworfen()
    }
}

impl Transport for AktiverTransport {
    fn art(&self) -> TransportArt {
        match self {
            Self::Native(t) => t.art(),
            Self::Datagram(t) => t.art(),
            Self::Stream(t) => t.art(),
        }
    }

    fn kern(&self) -> &Arc<TransportKern> {
        match self {
            Self::Native(t) => t.kern(),
            Self::Datagram(t) => t.kern(),
            Self::Stream(t) => t.kern(),
        }
    }

    async fn senden(&self, nachricht: &Nachricht) -> TransportResult<()> {
        match self {
            Self::Native(t) => t.senden(nachricht).await,
            Self::Datagram(t) => t.senden(nachricht).await,
            Self::Stream(t) => t.senden(nachricht).await,
        }
    }

    async fn schliessen_als(&self, art: SchliessArt) {
        match self {
            Self::Native(t) => t.schliessen_als(art).await,
            Self::Datagram(t) => t.schliessen_als(art).await,
            Self::Stream(t) => t.schliessen_als(art).await,
        }
        tracing::debug!(transport = %self.art(), schliess_art = ?art, "Transport geschlossen");
    }
}
