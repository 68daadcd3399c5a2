//! Native-Transport – vom Host bereitgestellter Kanal
//!
//! Im Prozess modelliert als Paar verbundener mpsc-Queues. Die
//! [`NativeVermittlung`] reicht die Gegenseite eines Paares vom Responder an
//! den Initiator weiter. Der Responder nennt dafuer im Port-Feld der
//! Auswahl eine Kanalnummer; weitere Parameter gibt es nicht.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nahfunk_protocol::Nachricht;

use crate::art::TransportArt;
use crate::error::{TransportFehler, TransportResult};
use crate::kern::{Eingang, TransportKern};
use crate::verbindung::SchliessArt;
use crate::Transport;

/// Standard-Kapazitaet einer Richtung
pub const NATIVE_KAPAZITAET: usize = 64;

#[derive(Debug)]
pub struct NativeTransport {
    kern: Arc<TransportKern>,
    tx: mpsc::Sender<Bytes>,
    abbruch: CancellationToken,
}

impl NativeTransport {
    /// Erstellt zwei miteinander verbundene Enden
    pub fn paar(kapazitaet: usize) -> (Self, Self) {
        let kapazitaet = kapazitaet.max(1);
        let (ab_tx, ab_rx) = mpsc::channel(kapazitaet);
        let (ba_tx, ba_rx) = mpsc::channel(kapazitaet);
        (Self::starten(ab_tx, ba_rx), Self::starten(ba_tx, ab_rx))
    }

    fn starten(tx: mpsc::Sender<Bytes>, rx: mpsc::Receiver<Bytes>) -> Self {
        let kern = TransportKern::neu(TransportArt::Native);
        let abbruch = CancellationToken::new();
        tokio::spawn(empfangs_schleife(
            rx,
            tx.clone(),
            Arc::clone(&kern),
            abbruch.clone(),
        ));
        Self { kern, tx, abbruch }
    }
}

impl Transport for NativeTransport {
    fn art(&self) -> TransportArt {
        TransportArt::Native
    }

    fn kern(&self) -> &Arc<TransportKern> {
        &self.kern
    }

    async fn senden(&self, nachricht: &Nachricht) -> TransportResult<()> {
        match self.tx.try_send(nachricht.encode()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.kern.verwerfen();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(TransportFehler::NichtVerbunden(TransportArt::Native))
            }
        }
    }

    async fn schliessen_als(&self, art: SchliessArt) {
        if self.abbruch.is_cancelled() {
            return;
        }
        if let Some(abschied) = art.abschied() {
            let _ = self.tx.try_send(abschied.encode());
        }
        self.kern.abmelden();
        self.abbruch.cancel();
    }
}

impl Drop for NativeTransport {
    fn drop(&mut self) {
        self.abbruch.cancel();
    }
}

async fn empfangs_schleife(
    mut rx: mpsc::Receiver<Bytes>,
    tx: mpsc::Sender<Bytes>,
    kern: Arc<TransportKern>,
    abbruch: CancellationToken,
) {
    loop {
        tokio::select! {
            daten = rx.recv() => {
                let Some(daten) = daten else {
                    kern.verbindung_verloren(SchliessArt::Abrupt);
                    break;
                };
                match kern.eingang_verarbeiten(&daten) {
                    Eingang::PongAntworten => {
                        let _ = tx.try_send(Nachricht::Pong.encode());
                    }
                    Eingang::Goodbye => {
                        kern.verbindung_verloren(SchliessArt::Geordnet);
                        break;
                    }
                    Eingang::Renegotiate => {
                        kern.verbindung_verloren(SchliessArt::Halbgeschlossen);
                        break;
                    }
                    Eingang::Verarbeitet | Eingang::Verworfen => {}
                }
            }
            _ = abbruch.cancelled() => break,
        }
    }
}

// ---------------------------------------------------------------------------
// NativeVermittlung
// ---------------------------------------------------------------------------

/// Reicht Native-Enden vom Responder an den Initiator weiter
///
/// Hinterlegte Enden sind ueber ihre Kanalnummer adressiert, damit parallele
/// Aushandlungen ihre Enden nicht vertauschen.
#[derive(Clone)]
pub struct NativeVermittlung {
    wartend: Arc<Mutex<Wartend>>,
    kapazitaet: usize,
}

#[derive(Default)]
struct Wartend {
    enden: HashMap<u16, NativeTransport>,
    naechste: u16,
}

impl NativeVermittlung {
    pub fn neu() -> Self {
        Self {
            wartend: Arc::new(Mutex::new(Wartend::default())),
            kapazitaet: NATIVE_KAPAZITAET,
        }
    }

    /// Responder: erstellt ein Paar, hinterlegt ein Ende und gibt das andere
    /// samt Kanalnummer zurueck
    pub fn anbieten(&self) -> (NativeTransport, u16) {
        let (eigenes, fremdes) = NativeTransport::paar(self.kapazitaet);
        let mut wartend = self.wartend.lock();
        // Enden, deren Gegenstueck schon geschlossen ist, holt niemand mehr ab
        wartend.enden.retain(|_, ende| !ende.tx.is_closed());

        let mut nummer = wartend.naechste;
        while wartend.enden.contains_key(&nummer) {
            nummer = nummer.wrapping_add(1);
        }
        wartend.naechste = nummer.wrapping_add(1);
        wartend.enden.insert(nummer, fremdes);
        (eigenes, nummer)
    }

    /// Initiator: holt das unter `nummer` hinterlegte Ende ab
    pub fn abholen(&self, nummer: u16) -> Option<NativeTransport> {
        self.wartend.lock().enden.remove(&nummer)
    }

    pub fn wartende(&self) -> usize {
        self.wartend.lock().enden.len()
    }
}

impl Default for NativeVermittlung {
    fn default() -> Self {
        Self::neu()
    }
}

impl std::fmt::Debug for NativeVermittlung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeVermittlung")
            .field("wartend", &self.wartende())
            .finish()
    }
}
