//! Gemeinsamer Kern aller Transporte
//!
//! Jeder Transport besitzt genau einen `TransportKern`, den seine
//! Empfangs-Task mit jedem eingehenden Paket fuettert. Der Kern
//!
//! - signalisiert empfangene Pongs an die Readiness-Probe,
//! - stellt Audio nur zu, wenn der Transport bereit ist und ein Empfaenger
//!   registriert wurde,
//! - zaehlt verworfene Pakete,
//! - meldet Verbindungsverlust an den Besitzer.
//!
//! Zustellung laeuft immer mit `try_send`: eine volle Queue verwirft das
//! Paket, die Empfangs-Task blockiert nie.

use nahfunk_protocol::{AudioPacket, Nachricht};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::art::TransportArt;
use crate::verbindung::SchliessArt;

/// Ereignisse eines Transports an seinen Besitzer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEreignis {
    VerbindungVerloren {
        art: TransportArt,
        schliess_art: SchliessArt,
        wiederverbinden: bool,
    },
}

/// Was die Empfangs-Task nach einem Paket tun muss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eingang {
    /// Ping erhalten, Pong zuruecksenden
    PongAntworten,
    /// Gegenseite schliesst geordnet
    Goodbye,
    /// Gegenseite verlangt Neuaushandlung
    Renegotiate,
    /// Paket verarbeitet (Pong signalisiert oder Audio zugestellt)
    Verarbeitet,
    /// Paket verworfen und gezaehlt
    Verworfen,
}

pub struct TransportKern {
    art: TransportArt,
    bereit: AtomicBool,
    pong: Notify,
    audio_empfaenger: RwLock<Option<mpsc::Sender<AudioPacket>>>,
    ereignis_empfaenger: RwLock<Option<mpsc::Sender<TransportEreignis>>>,
    verworfen: AtomicU64,
    zugestellt: AtomicU64,
}

impl TransportKern {
    pub fn neu(art: TransportArt) -> Arc<Self> {
        Arc::new(Self {
            art,
            bereit: AtomicBool::new(false),
            pong: Notify::new(),
            audio_empfaenger: RwLock::new(None),
            ereignis_empfaenger: RwLock::new(None),
            verworfen: AtomicU64::new(0),
            zugestellt: AtomicU64::new(0),
        })
    }

    pub fn art(&self) -> TransportArt {
        self.art
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    pub fn bereit_setzen(&self, bereit: bool) {
        self.bereit.store(bereit, Ordering::Release);
    }

    pub fn ist_bereit(&self) -> bool {
        self.bereit.load(Ordering::Acquire)
    }

    /// Wartet auf einen Pong, hoechstens `zeitlimit` lang
    ///
    /// Gibt `false` bei Zeitueberschreitung oder Abbruch zurueck.
    pub async fn auf_pong_warten(&self, zeitlimit: Duration, abbruch: &CancellationToken) -> bool {
        tokio::select! {
            r = tokio::time::timeout(zeitlimit, self.pong.notified()) => r.is_ok(),
            _ = abbruch.cancelled() => false,
        }
    }

    // -----------------------------------------------------------------------
    // Registrierung
    // -----------------------------------------------------------------------

    pub fn audio_empfaenger_registrieren(&self, tx: mpsc::Sender<AudioPacket>) {
        *self.audio_empfaenger.write() = Some(tx);
    }

    pub fn audio_empfaenger_entfernen(&self) {
        *self.audio_empfaenger.write() = None;
    }

    pub fn hat_audio_empfaenger(&self) -> bool {
        self.audio_empfaenger.read().is_some()
    }

    pub fn ereignis_empfaenger_registrieren(&self, tx: mpsc::Sender<TransportEreignis>) {
        *self.ereignis_empfaenger.write() = Some(tx);
    }

    // -----------------------------------------------------------------------
    // Eingang
    // -----------------------------------------------------------------------

    /// Verarbeitet ein empfangenes Paket (ohne Laengen-Rahmen)
    pub fn eingang_verarbeiten(&self, daten: &[u8]) -> Eingang {
        let nachricht = match Nachricht::decode(daten) {
            Ok(n) => n,
            Err(e) => {
                self.verwerfen();
                tracing::debug!(transport = %self.art, fehler = %e, "Ungueltiges Paket verworfen");
                return Eingang::Verworfen;
            }
        };

        match nachricht {
            Nachricht::Ping => Eingang::PongAntworten,
            Nachricht::Pong => {
                self.pong.notify_one();
                Eingang::Verarbeitet
            }
            Nachricht::Goodbye => Eingang::Goodbye,
            Nachricht::Renegotiate => Eingang::Renegotiate,
            Nachricht::Audio(paket) => self.audio_zustellen(paket),
        }
    }

    fn audio_zustellen(&self, paket: AudioPacket) -> Eingang {
        if !self.ist_bereit() {
            self.verwerfen();
            tracing::debug!(
                transport = %self.art,
                sender = %paket.sender,
                "Audio vor Readiness verworfen"
            );
            return Eingang::Verworfen;
        }

        let guard = self.audio_empfaenger.read();
        let Some(tx) = guard.as_ref() else {
            self.verwerfen();
            return Eingang::Verworfen;
        };

        match tx.try_send(paket) {
            Ok(()) => {
                self.zugestellt.fetch_add(1, Ordering::Relaxed);
                Eingang::Verarbeitet
            }
            Err(mpsc::error::TrySendError::Full(p)) => {
                self.verwerfen();
                tracing::trace!(transport = %self.art, seq = p.sequence, "Audio-Queue voll");
                Eingang::Verworfen
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.verwerfen();
                Eingang::Verworfen
            }
        }
    }

    pub(crate) fn verwerfen(&self) {
        self.verworfen.fetch_add(1, Ordering::Relaxed);
    }

    /// Anzahl verworfener Pakete (ungueltig, zu frueh, Queue voll)
    pub fn verworfen(&self) -> u64 {
        self.verworfen.load(Ordering::Relaxed)
    }

    /// Anzahl zugestellter Audio-Pakete
    pub fn zugestellt(&self) -> u64 {
        self.zugestellt.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // Verlust
    // -----------------------------------------------------------------------

    /// Meldet den Verlust des Transports an den registrierten Besitzer
    pub fn verbindung_verloren(&self, schliess_art: SchliessArt) {
        self.bereit_setzen(false);
        let ereignis = TransportEreignis::VerbindungVerloren {
            art: self.art,
            schliess_art,
            wiederverbinden: schliess_art.wiederverbinden_erlaubt(),
        };
        tracing::info!(transport = %self.art, ?schliess_art, "Transport verloren");
        if let Some(tx) = self.ereignis_empfaenger.read().as_ref() {
            let _ = tx.try_send(ereignis);
        }
    }

    /// Trennt Audio- und Ereignis-Empfaenger (beim Verwerfen des Transports)
    pub fn abmelden(&self) {
        self.bereit_setzen(false);
        self.audio_empfaenger_entfernen();
        *self.ereignis_empfaenger.write() = None;
    }
}

impl std::fmt::Debug for TransportKern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportKern")
            .field("art", &self.art)
            .field("bereit", &self.ist_bereit())
            .field("verworfen", &self.verworfen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nahfunk_core::{PeerId, VoiceLevel};

    fn audio_bytes(seq: u32) -> bytes::Bytes {
        AudioPacket::neu(PeerId::new(), seq, VoiceLevel::Talk, vec![1, 2, 3]).encode()
    }

    #[test]
    fn audio_vor_readiness_verworfen() {
        let kern = TransportKern::neu(TransportArt::Datagram);
        let (tx, mut rx) = mpsc::channel(4);
        kern.audio_empfaenger_registrieren(tx);

        assert_eq!(kern.eingang_verarbeiten(&audio_bytes(1)), Eingang::Verworfen);
        assert_eq!(kern.verworfen(), 1);
        assert!(rx.try_recv().is_err());

        kern.bereit_setzen(true);
        assert_eq!(kern.eingang_verarbeiten(&audio_bytes(2)), Eingang::Verarbeitet);
        assert_eq!(rx.try_recv().unwrap().sequence, 2);
    }

    #[test]
    fn laengenfehler_wird_gezaehlt() {
        let kern = TransportKern::neu(TransportArt::Stream);
        kern.bereit_setzen(true);
        let mut bytes = audio_bytes(1).to_vec();
        bytes.push(0xFF);
        assert_eq!(kern.eingang_verarbeiten(&bytes), Eingang::Verworfen);
        assert_eq!(kern.verworfen(), 1);
    }

    #[test]
    fn volle_queue_verwirft() {
        let kern = TransportKern::neu(TransportArt::Native);
        kern.bereit_setzen(true);
        let (tx, _rx) = mpsc::channel(1);
        kern.audio_empfaenger_registrieren(tx);
        kern.eingang_verarbeiten(&audio_bytes(1));
        assert_eq!(kern.eingang_verarbeiten(&audio_bytes(2)), Eingang::Verworfen);
        assert_eq!(kern.zugestellt(), 1);
        assert_eq!(kern.verworfen(), 1);
    }

    #[test]
    fn steuerpakete() {
        let kern = TransportKern::neu(TransportArt::Native);
        assert_eq!(kern.eingang_verarbeiten(&Nachricht::Ping.encode()), Eingang::PongAntworten);
        assert_eq!(kern.eingang_verarbeiten(&Nachricht::Goodbye.encode()), Eingang::Goodbye);
        assert_eq!(
            kern.eingang_verarbeiten(&Nachricht::Renegotiate.encode()),
            Eingang::Renegotiate
        );
    }

    #[tokio::test]
    async fn pong_vor_dem_warten_zaehlt() {
        let kern = TransportKern::neu(TransportArt::Datagram);
        kern.eingang_verarbeiten(&Nachricht::Pong.encode());
        let abbruch = CancellationToken::new();
        assert!(kern.auf_pong_warten(Duration::from_millis(50), &abbruch).await);
        assert!(!kern.auf_pong_warten(Duration::from_millis(50), &abbruch).await);
    }

    #[tokio::test]
    async fn verlust_meldet_ereignis() {
        let kern = TransportKern::neu(TransportArt::Stream);
        let (tx, mut rx) = mpsc::channel(1);
        kern.ereignis_empfaenger_registrieren(tx);
        kern.bereit_setzen(true);
        kern.verbindung_verloren(SchliessArt::Abrupt);
        assert!(!kern.ist_bereit());
        assert_eq!(
            rx.recv().await,
            Some(TransportEreignis::VerbindungVerloren {
                art: TransportArt::Stream,
                schliess_art: SchliessArt::Abrupt,
                wiederverbinden: true,
            })
        );
    }
}
