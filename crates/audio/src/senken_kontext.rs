//! Senken-Kontext – eigener Thread fuer alle Senken und Audio-Quellen
//!
//! Netzwerk- und Aufnahme-Tasks rufen nie direkt in eine Senke. Jede
//! Aenderung wird als [`SenkenKommando`] ueber einen crossbeam-Kanal
//! geschickt und im Kontext-Thread seriell abgearbeitet.
//!
//! Zwei Kanaele:
//! - Daten (begrenzt): Audio-Segmente und Ticks gehen per `try_send` hinein
//!   und werden bei voller Queue verworfen.
//! - Steuerung (unbegrenzt): Lebenszyklus-Kommandos (Erstellen, Entfernen,
//!   Position, Loopback). Senden blockiert nie.
//!
//! Vor jedem Datenkommando arbeitet der Thread alle bis dahin gesendeten
//! Steuerkommandos ab. Ein Segment trifft daher nie vor dem `QuelleErstellen`
//! ein, das vor ihm gesendet wurde.

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};
use nahfunk_core::{PeerId, Vec3, VoiceEinstellungen, VoiceLevel};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AudioError, AudioResult};
use crate::quelle::{PeerAudioQuelle, QuellenZustand};
use crate::senke::{QuellenId, SenkenFabrik};
use crate::wiedergabe_puffer::PufferStatistik;

/// Kapazitaet der Kommando-Queue
pub const KOMMANDO_KAPAZITAET: usize = 1024;

const ANTWORT_ZEITLIMIT: Duration = Duration::from_secs(2);

/// Kommandos an den Kontext-Thread
#[derive(Debug)]
pub enum SenkenKommando {
    /// Legt die Quelle eines Peers an und startet sie
    QuelleErstellen { peer: PeerId, position: Vec3 },
    /// Gibt die Quelle eines Peers frei
    QuelleEntfernen { peer: PeerId },
    SegmentEinreihen {
        quelle: QuellenId,
        sequence: u32,
        level: VoiceLevel,
        pcm: Vec<i16>,
    },
    PositionMelden { peer: PeerId, position: Vec3 },
    HoererSetzen(Vec3),
    Tick(Duration),
    /// Startet bzw. stoppt die lokale Loopback-Quelle sofort
    LoopbackSetzen(bool),
    Schnappschuss(Sender<KontextSchnappschuss>),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuellenInfo {
    pub id: QuellenId,
    pub zustand: QuellenZustand,
    pub voice_level: VoiceLevel,
    pub lokational: bool,
    pub fuellstand: usize,
    pub statistik: PufferStatistik,
}

/// Zustand des Kontexts zu einem Zeitpunkt
#[derive(Debug, Clone, PartialEq)]
pub struct KontextSchnappschuss {
    /// Peer-Quellen, sortiert nach Peer
    pub quellen: Vec<QuellenInfo>,
    pub lokal: QuellenInfo,
    pub loopback: bool,
    pub hoerer: Vec3,
    /// Segmente fuer unbekannte oder inaktive Quellen
    pub unzustellbar: u64,
}

impl KontextSchnappschuss {
    pub fn quelle(&self, peer: PeerId) -> Option<&QuellenInfo> {
        self.quellen.iter().find(|q| q.id == QuellenId::Peer(peer))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KontextKonfig {
    /// Kapazitaet der Wiedergabepuffer
    pub kapazitaet: usize,
    pub loopback: bool,
}

impl Default for KontextKonfig {
    fn default() -> Self {
        Self {
            kapazitaet: crate::wiedergabe_puffer::STANDARD_KAPAZITAET,
            loopback: false,
        }
    }
}

/// Handle auf den Kontext-Thread
pub struct SenkenKontext {
    tx: Sender<SenkenKommando>,
    steuer_tx: Sender<SenkenKommando>,
    thread: Mutex<Option<JoinHandle<()>>>,
    verworfen: AtomicU64,
}

impl SenkenKontext {
    /// Startet den Kontext-Thread; die Fabrik wandert in den Thread
    pub fn starten<F: SenkenFabrik>(
        fabrik: F,
        einstellungen: VoiceEinstellungen,
        konfig: KontextKonfig,
    ) -> AudioResult<Self> {
        let (tx, rx) = bounded::<SenkenKommando>(KOMMANDO_KAPAZITAET);
        let (steuer_tx, steuer_rx) = unbounded::<SenkenKommando>();

        let thread = std::thread::Builder::new()
            .name("nahfunk-senken".to_string())
            .spawn(move || {
                KontextThread::neu(fabrik, einstellungen, konfig).laufen(rx, steuer_rx);
            })
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        info!(
            kapazitaet = konfig.kapazitaet,
            loopback = konfig.loopback,
            "Senken-Kontext gestartet"
        );

        Ok(Self {
            tx,
            steuer_tx,
            thread: Mutex::new(Some(thread)),
            verworfen: AtomicU64::new(0),
        })
    }

    /// Sendet ein Lebenszyklus-Kommando ueber den Steuerkanal; blockiert nie
    pub fn steuern(&self, kommando: SenkenKommando) -> AudioResult<()> {
        self.steuer_tx
            .send(kommando)
            .map_err(|_| AudioError::KontextBeendet)
    }

    /// Reiht in den Datenkanal ein und wartet notfalls auf Platz
    ///
    /// Nur ausserhalb der Netzwerk-Tasks benutzen (Schnappschuss, Shutdown).
    pub fn senden(&self, kommando: SenkenKommando) -> AudioResult<()> {
        self.tx.send(kommando).map_err(|_| AudioError::KontextBeendet)
    }

    /// Sendet ohne zu blockieren; bei voller Queue wird verworfen
    pub fn versuchen(&self, kommando: SenkenKommando) -> AudioResult<bool> {
        match self.tx.try_send(kommando) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.verworfen.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(AudioError::KontextBeendet),
        }
    }

    /// Wartet, bis alle vorher gesendeten Kommandos verarbeitet sind
    pub fn schnappschuss(&self) -> AudioResult<KontextSchnappschuss> {
        let (antwort_tx, antwort_rx) = bounded(1);
        self.senden(SenkenKommando::Schnappschuss(antwort_tx))?;
        antwort_rx
            .recv_timeout(ANTWORT_ZEITLIMIT)
            .map_err(|_| AudioError::KontextZeitlimit)
    }

    /// Wegen voller Queue verworfene Kommandos
    pub fn verworfen(&self) -> u64 {
        self.verworfen.load(Ordering::Relaxed)
    }

    /// Beendet den Thread und gibt alle Senken frei; idempotent
    pub fn beenden(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = self.tx.send(SenkenKommando::Shutdown);
        if thread.join().is_err() {
            warn!("Senken-Kontext-Thread ist abgestuerzt");
        }
        debug!("Senken-Kontext beendet");
    }
}

impl Drop for SenkenKontext {
    fn drop(&mut self) {
        self.beenden();
    }
}

impl std::fmt::Debug for SenkenKontext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenkenKontext")
            .field("laeuft", &self.thread.lock().is_some())
            .field("verworfen", &self.verworfen())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Thread-Seite
// ---------------------------------------------------------------------------

struct KontextThread<F> {
    fabrik: F,
    einstellungen: VoiceEinstellungen,
    kapazitaet: usize,
    quellen: HashMap<PeerId, PeerAudioQuelle>,
    lokal: PeerAudioQuelle,
    loopback: bool,
    hoerer: Vec3,
    unzustellbar: u64,
}

impl<F: SenkenFabrik> KontextThread<F> {
    fn neu(mut fabrik: F, einstellungen: VoiceEinstellungen, konfig: KontextKonfig) -> Self {
        let mut lokal = PeerAudioQuelle::neu(
            QuellenId::Lokal,
            fabrik.erstellen(QuellenId::Lokal),
            einstellungen.clone(),
            konfig.kapazitaet,
            false,
            Vec3::NULL,
        );
        if konfig.loopback {
            lokal.starten();
        }
        Self {
            fabrik,
            einstellungen,
            kapazitaet: konfig.kapazitaet,
            quellen: HashMap::new(),
            lokal,
            loopback: konfig.loopback,
            hoerer: Vec3::NULL,
            unzustellbar: 0,
        }
    }

    fn laufen(mut self, rx: Receiver<SenkenKommando>, steuer_rx: Receiver<SenkenKommando>) {
        debug!("Senken-Kontext-Thread gestartet");
        loop {
            let weiter = select! {
                recv(steuer_rx) -> kommando => match kommando {
                    Ok(kommando) => self.verarbeiten(kommando),
                    Err(_) => false,
                },
                recv(rx) -> kommando => match kommando {
                    Ok(kommando) => {
                        self.steuerung_nachholen(&steuer_rx) && self.verarbeiten(kommando)
                    }
                    Err(_) => false,
                },
            };
            if !weiter {
                break;
            }
        }
        for (_, mut quelle) in self.quellen.drain() {
            quelle.freigeben();
        }
        self.lokal.freigeben();
        debug!("Senken-Kontext-Thread beendet");
    }

    /// Arbeitet alle bereits gesendeten Steuerkommandos ab
    fn steuerung_nachholen(&mut self, steuer_rx: &Receiver<SenkenKommando>) -> bool {
        while let Ok(kommando) = steuer_rx.try_recv() {
            if !self.verarbeiten(kommando) {
                return false;
            }
        }
        true
    }

    /// `false` beendet die Schleife
    fn verarbeiten(&mut self, kommando: SenkenKommando) -> bool {
        match kommando {
            SenkenKommando::QuelleErstellen { peer, position } => {
                if self.quellen.contains_key(&peer) {
                    warn!(%peer, "Audio-Quelle existiert bereits");
                    return true;
                }
                let id = QuellenId::Peer(peer);
                let mut quelle = PeerAudioQuelle::neu(
                    id,
                    self.fabrik.erstellen(id),
                    self.einstellungen.clone(),
                    self.kapazitaet,
                    true,
                    position,
                );
                quelle.starten();
                self.quellen.insert(peer, quelle);
                debug!(%peer, "Audio-Quelle erstellt");
            }
            SenkenKommando::QuelleEntfernen { peer } => match self.quellen.remove(&peer) {
                Some(mut quelle) => quelle.freigeben(),
                None => debug!(%peer, "Keine Audio-Quelle zum Entfernen"),
            },
            SenkenKommando::SegmentEinreihen {
                quelle,
                sequence,
                level,
                pcm,
            } => {
                let ziel = match quelle {
                    QuellenId::Peer(peer) => self.quellen.get_mut(&peer),
                    QuellenId::Lokal if self.loopback => Some(&mut self.lokal),
                    QuellenId::Lokal => None,
                };
                match ziel {
                    Some(ziel) => {
                        ziel.voice_level_setzen(level);
                        ziel.segment_einreihen(sequence, pcm);
                    }
                    None => self.unzustellbar += 1,
                }
            }
            SenkenKommando::PositionMelden { peer, position } => {
                if let Some(quelle) = self.quellen.get_mut(&peer) {
                    quelle.position_melden(position);
                }
            }
            SenkenKommando::HoererSetzen(position) => self.hoerer = position,
            SenkenKommando::Tick(dt) => {
                for quelle in self.quellen.values_mut() {
                    quelle.tick(self.hoerer, dt);
                }
                self.lokal.tick(self.hoerer, dt);
            }
            SenkenKommando::LoopbackSetzen(an) => {
                if an != self.loopback {
                    self.loopback = an;
                    if an {
                        self.lokal.starten();
                    } else {
                        self.lokal.stoppen();
                    }
                    info!(loopback = an, "Loopback umgeschaltet");
                }
            }
            SenkenKommando::Schnappschuss(antwort) => {
                let _ = antwort.send(self.schnappschuss());
            }
            SenkenKommando::Shutdown => return false,
        }
        true
    }

    fn schnappschuss(&self) -> KontextSchnappschuss {
        let mut quellen: Vec<QuellenInfo> = self.quellen.values().map(quellen_info).collect();
        quellen.sort_by_key(|q| match q.id {
            QuellenId::Peer(peer) => Some(peer),
            QuellenId::Lokal => None,
        });
        KontextSchnappschuss {
            quellen,
            lokal: quellen_info(&self.lokal),
            loopback: self.loopback,
            hoerer: self.hoerer,
            unzustellbar: self.unzustellbar,
        }
    }
}

fn quellen_info(quelle: &PeerAudioQuelle) -> QuellenInfo {
    QuellenInfo {
        id: quelle.id(),
        zustand: quelle.zustand(),
        voice_level: quelle.voice_level(),
        lokational: quelle.ist_lokational(),
        fuellstand: quelle.fuellstand(),
        statistik: quelle.puffer_statistik().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::senke::{AudioSenke, AufzeichnungsFabrik};

    /// Haelt den Kontext-Thread beim Erstellen jeder Peer-Senke an, bis
    /// eine Freigabe eintrifft
    struct WartendeFabrik {
        innen: AufzeichnungsFabrik,
        freigabe: Receiver<()>,
    }

    impl SenkenFabrik for WartendeFabrik {
        fn erstellen(&mut self, quelle: QuellenId) -> Box<dyn AudioSenke> {
            if matches!(quelle, QuellenId::Peer(_)) {
                let _ = self.freigabe.recv();
            }
            self.innen.erstellen(quelle)
        }
    }

    fn kontext(fabrik: &AufzeichnungsFabrik, loopback: bool) -> SenkenKontext {
        SenkenKontext::starten(
            fabrik.clone(),
            VoiceEinstellungen::default(),
            KontextKonfig {
                kapazitaet: 4,
                loopback,
            },
        )
        .unwrap()
    }

    fn segment(quelle: QuellenId, sequence: u32) -> SenkenKommando {
        SenkenKommando::SegmentEinreihen {
            quelle,
            sequence,
            level: VoiceLevel::Talk,
            pcm: vec![0; 960],
        }
    }

    #[test]
    fn quelle_erstellen_und_entfernen() {
        let fabrik = AufzeichnungsFabrik::neu();
        let k = kontext(&fabrik, false);
        let peer = PeerId::new();

        k.steuern(SenkenKommando::QuelleErstellen {
            peer,
            position: Vec3::neu(1.0, 2.0, 3.0),
        })
        .unwrap();
        let s = k.schnappschuss().unwrap();
        let info = s.quelle(peer).unwrap();
        assert_eq!(info.zustand, QuellenZustand::Playing);
        assert!(info.lokational);

        k.steuern(SenkenKommando::QuelleEntfernen { peer }).unwrap();
        assert!(k.schnappschuss().unwrap().quellen.is_empty());
        assert!(fabrik.aktuell(QuellenId::Peer(peer)).unwrap().freigegeben);
    }

    #[test]
    fn segmente_fliessen_beim_tick() {
        let fabrik = AufzeichnungsFabrik::neu();
        let k = kontext(&fabrik, false);
        let peer = PeerId::new();
        let id = QuellenId::Peer(peer);

        k.steuern(SenkenKommando::QuelleErstellen {
            peer,
            position: Vec3::NULL,
        })
        .unwrap();
        assert!(k.versuchen(segment(id, 1)).unwrap());
        assert!(k.versuchen(segment(id, 0)).unwrap());
        assert_eq!(k.schnappschuss().unwrap().quelle(peer).unwrap().fuellstand, 1);

        k.versuchen(SenkenKommando::Tick(Duration::from_millis(20)))
            .unwrap();
        let s = k.schnappschuss().unwrap();
        assert_eq!(s.quelle(peer).unwrap().fuellstand, 0);
        assert_eq!(s.quelle(peer).unwrap().statistik.zu_spaet, 1);
        assert_eq!(fabrik.aktuell(id).unwrap().segmente, 1);
    }

    #[test]
    fn steuerkanal_blockiert_bei_voller_datenqueue_nicht() {
        let fabrik = AufzeichnungsFabrik::neu();
        let (freigabe_tx, freigabe_rx) = unbounded();
        let k = SenkenKontext::starten(
            WartendeFabrik {
                innen: fabrik.clone(),
                freigabe: freigabe_rx,
            },
            VoiceEinstellungen::default(),
            KontextKonfig::default(),
        )
        .unwrap();

        // Der Thread haengt im Erstellen, die Datenqueue laeuft voll
        let erster = PeerId::new();
        k.steuern(SenkenKommando::QuelleErstellen {
            peer: erster,
            position: Vec3::NULL,
        })
        .unwrap();
        let mut angenommen = 0;
        while k.versuchen(SenkenKommando::Tick(Duration::ZERO)).unwrap() {
            angenommen += 1;
        }
        assert!(angenommen >= KOMMANDO_KAPAZITAET);
        assert_eq!(k.verworfen(), 1);

        // Lebenszyklus kommt trotzdem sofort durch
        let zweiter = PeerId::new();
        k.steuern(SenkenKommando::QuelleErstellen {
            peer: zweiter,
            position: Vec3::NULL,
        })
        .unwrap();
        k.steuern(SenkenKommando::QuelleEntfernen { peer: erster })
            .unwrap();

        freigabe_tx.send(()).unwrap();
        freigabe_tx.send(()).unwrap();
        let s = k.schnappschuss().unwrap();
        assert!(s.quelle(erster).is_none());
        assert!(s.quelle(zweiter).is_some());
        assert!(fabrik.aktuell(QuellenId::Peer(erster)).unwrap().freigegeben);
    }

    #[test]
    fn segment_fuer_unbekannten_peer_ist_unzustellbar() {
        let fabrik = AufzeichnungsFabrik::neu();
        let k = kontext(&fabrik, false);
        k.versuchen(segment(QuellenId::Peer(PeerId::new()), 0))
            .unwrap();
        k.versuchen(segment(QuellenId::Lokal, 0)).unwrap();
        assert_eq!(k.schnappschuss().unwrap().unzustellbar, 2);
    }

    #[test]
    fn loopback_startet_und_stoppt_sofort() {
        let fabrik = AufzeichnungsFabrik::neu();
        let k = kontext(&fabrik, false);
        assert_eq!(
            k.schnappschuss().unwrap().lokal.zustand,
            QuellenZustand::Idle
        );

        k.steuern(SenkenKommando::LoopbackSetzen(true)).unwrap();
        let s = k.schnappschuss().unwrap();
        assert!(s.loopback);
        assert_eq!(s.lokal.zustand, QuellenZustand::Playing);
        assert!(fabrik.aktuell(QuellenId::Lokal).unwrap().spielt);

        k.steuern(SenkenKommando::LoopbackSetzen(false)).unwrap();
        assert_eq!(
            k.schnappschuss().unwrap().lokal.zustand,
            QuellenZustand::Idle
        );
        assert!(!fabrik.aktuell(QuellenId::Lokal).unwrap().spielt);
    }

    #[test]
    fn beenden_gibt_alles_frei_und_ist_idempotent() {
        let fabrik = AufzeichnungsFabrik::neu();
        let k = kontext(&fabrik, true);
        let peer = PeerId::new();
        k.steuern(SenkenKommando::QuelleErstellen {
            peer,
            position: Vec3::NULL,
        })
        .unwrap();
        k.schnappschuss().unwrap();

        k.beenden();
        k.beenden();
        assert!(fabrik.aktuell(QuellenId::Peer(peer)).unwrap().freigegeben);
        assert!(fabrik.aktuell(QuellenId::Lokal).unwrap().freigegeben);
        assert!(matches!(
            k.senden(SenkenKommando::Tick(Duration::ZERO)),
            Err(AudioError::KontextBeendet)
        ));
    }
}
