//! Ausgabe-Manager – eingehendes Audio auf Peer-Quellen verteilen
//!
//! Haelt pro Peer einen eigenen Opus-Decoder und spiegelt die Quellen im
//! Senken-Kontext. Routing eines Pakets:
//!
//! 1. Subsystem deaktiviert -> ignorieren
//! 2. Quelle nachschlagen oder (erstes Paket eines unbekannten Peers) anlegen
//! 3. mit dem Decoder des Peers dekodieren; Codec-Fehler = verworfenes Paket
//! 4. Segment samt Voice-Level in den Puffer der Quelle reichen
//!
//! Lebenszyklus-Kommandos fuer einen Peer gehen unter dessen Shard-Lock in
//! den unbegrenzten Steuerkanal des Kontexts. Das Senden blockiert nie, und
//! Erstellen und Entfernen kommen in Map-Reihenfolge im Kontext an.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nahfunk_core::{PeerId, SitzungsEreignis, Vec3, VoiceEinstellungen};
use nahfunk_protocol::AudioPacket;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codec::OpusDecoder;
use crate::error::AudioResult;
use crate::senke::{QuellenId, SenkenFabrik};
use crate::senken_kontext::{KontextKonfig, KontextSchnappschuss, SenkenKommando, SenkenKontext};
use crate::wiedergabe_puffer::STANDARD_KAPAZITAET;

#[derive(Debug, Clone, Copy)]
pub struct AusgabeKonfig {
    /// Kapazitaet der Wiedergabepuffer in Segmenten
    pub puffer_kapazitaet: usize,
    pub loopback: bool,
}

impl Default for AusgabeKonfig {
    fn default() -> Self {
        Self {
            puffer_kapazitaet: STANDARD_KAPAZITAET,
            loopback: false,
        }
    }
}

struct PeerEintrag {
    decoder: Mutex<OpusDecoder>,
}

impl PeerEintrag {
    fn neu() -> AudioResult<Self> {
        Ok(Self {
            decoder: Mutex::new(OpusDecoder::new()?),
        })
    }
}

pub struct AusgabeManager {
    peers: DashMap<PeerId, PeerEintrag>,
    lokaler_decoder: Mutex<OpusDecoder>,
    kontext: SenkenKontext,
    einstellungen: VoiceEinstellungen,
    loopback: AtomicBool,
    verworfen: AtomicU64,
}

impl AusgabeManager {
    pub fn neu<F: SenkenFabrik>(
        fabrik: F,
        einstellungen: VoiceEinstellungen,
        konfig: AusgabeKonfig,
    ) -> AudioResult<Self> {
        let kontext = SenkenKontext::starten(
            fabrik,
            einstellungen.clone(),
            KontextKonfig {
                kapazitaet: konfig.puffer_kapazitaet,
                loopback: konfig.loopback,
            },
        )?;
        Ok(Self {
            peers: DashMap::new(),
            lokaler_decoder: Mutex::new(OpusDecoder::new()?),
            kontext,
            einstellungen,
            loopback: AtomicBool::new(konfig.loopback),
            verworfen: AtomicU64::new(0),
        })
    }

    pub fn ereignis_verarbeiten(&self, ereignis: &SitzungsEreignis) -> AudioResult<()> {
        match ereignis {
            SitzungsEreignis::PeerBeigetreten { peer_id, position } => {
                self.peer_beigetreten(*peer_id, *position)
            }
            SitzungsEreignis::PeerVerlassen { peer_id } => {
                self.peer_verlassen(*peer_id)?;
                Ok(())
            }
        }
    }

    /// Legt die Quelle eines erschienenen Peers an und startet sie
    pub fn peer_beigetreten(&self, peer: PeerId, position: Vec3) -> AudioResult<()> {
        match self.peers.entry(peer) {
            Entry::Occupied(_) => {
                warn!(%peer, "Peer bereits bekannt, nur Position aktualisiert");
                self.kontext
                    .steuern(SenkenKommando::PositionMelden { peer, position })
            }
            Entry::Vacant(frei) => {
                let _gesperrt = frei.insert(PeerEintrag::neu()?);
                self.kontext
                    .steuern(SenkenKommando::QuelleErstellen { peer, position })?;
                info!(%peer, "Peer beigetreten, Audio-Quelle erstellt");
                Ok(())
            }
        }
    }

    /// Gibt Quelle und Decoder frei; `false` wenn der Peer unbekannt war
    pub fn peer_verlassen(&self, peer: PeerId) -> AudioResult<bool> {
        match self.peers.entry(peer) {
            Entry::Occupied(eintrag) => {
                self.kontext
                    .steuern(SenkenKommando::QuelleEntfernen { peer })?;
                eintrag.remove();
                info!(%peer, "Peer verlassen, Audio-Quelle freigegeben");
                Ok(true)
            }
            Entry::Vacant(_) => {
                debug!(%peer, "Unbekannter Peer hat verlassen");
                Ok(false)
            }
        }
    }

    /// Leitet ein empfangenes Paket an die Quelle seines Absenders weiter
    ///
    /// `Ok(false)`: ignoriert oder verworfen. Fehler nur, wenn der
    /// Senken-Kontext nicht mehr laeuft.
    pub fn audio_paket_verarbeiten(&self, paket: &AudioPacket) -> AudioResult<bool> {
        if !self.einstellungen.ist_aktiviert() {
            return Ok(false);
        }
        if paket.payload.is_empty() {
            self.verwerfen(paket, "leere Nutzdaten");
            return Ok(false);
        }

        let peer = paket.sender;
        let mut eintrag = match self.peers.entry(peer) {
            Entry::Occupied(eintrag) => eintrag.into_ref(),
            Entry::Vacant(frei) => {
                let eintrag = frei.insert(PeerEintrag::neu()?);
                self.kontext.steuern(SenkenKommando::QuelleErstellen {
                    peer,
                    position: Vec3::NULL,
                })?;
                debug!(%peer, "Erstes Paket eines unbekannten Peers, Audio-Quelle erstellt");
                eintrag
            }
        };

        let dekodiert = eintrag.decoder.get_mut().decode(&paket.payload);
        let pcm = match dekodiert {
            Ok(pcm) => pcm,
            Err(e) => {
                drop(eintrag);
                self.verwerfen(paket, &e.to_string());
                return Ok(false);
            }
        };

        let zugestellt = self.kontext.versuchen(SenkenKommando::SegmentEinreihen {
            quelle: QuellenId::Peer(peer),
            sequence: paket.sequence,
            level: paket.voice_level,
            pcm,
        })?;
        if !zugestellt {
            self.verworfen.fetch_add(1, Ordering::Relaxed);
        }
        Ok(zugestellt)
    }

    /// Speist ein lokal erzeugtes Paket in die Loopback-Quelle, am Netz vorbei
    pub fn loopback_verarbeiten(&self, paket: &AudioPacket) -> AudioResult<bool> {
        if !self.einstellungen.ist_aktiviert() || !self.ist_loopback() {
            return Ok(false);
        }

        let dekodiert = self.lokaler_decoder.lock().decode(&paket.payload);
        let pcm = match dekodiert {
            Ok(pcm) => pcm,
            Err(e) => {
                self.verwerfen(paket, &e.to_string());
                return Ok(false);
            }
        };

        self.kontext.versuchen(SenkenKommando::SegmentEinreihen {
            quelle: QuellenId::Lokal,
            sequence: paket.sequence,
            level: paket.voice_level,
            pcm,
        })
    }

    pub fn loopback_setzen(&self, an: bool) -> AudioResult<()> {
        self.loopback.store(an, Ordering::Release);
        self.kontext.steuern(SenkenKommando::LoopbackSetzen(an))
    }

    pub fn ist_loopback(&self) -> bool {
        self.loopback.load(Ordering::Acquire)
    }

    pub fn position_melden(&self, peer: PeerId, position: Vec3) -> AudioResult<bool> {
        self.kontext
            .versuchen(SenkenKommando::PositionMelden { peer, position })
    }

    pub fn hoerer_setzen(&self, position: Vec3) -> AudioResult<bool> {
        self.kontext.versuchen(SenkenKommando::HoererSetzen(position))
    }

    /// Spatializer-Tick aller Quellen
    pub fn tick(&self, dt: Duration) -> AudioResult<bool> {
        self.kontext.versuchen(SenkenKommando::Tick(dt))
    }

    pub fn hat_peer(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    pub fn peer_anzahl(&self) -> usize {
        self.peers.len()
    }

    /// Verworfene Pakete (Codec-Fehler, volle Kontext-Queue)
    pub fn verworfen(&self) -> u64 {
        self.verworfen.load(Ordering::Relaxed)
    }

    pub fn einstellungen(&self) -> &VoiceEinstellungen {
        &self.einstellungen
    }

    pub fn schnappschuss(&self) -> AudioResult<KontextSchnappschuss> {
        self.kontext.schnappschuss()
    }

    /// Beendet den Senken-Kontext; alle Senken werden freigegeben
    pub fn beenden(&self) {
        self.peers.clear();
        self.kontext.beenden();
    }

    fn verwerfen(&self, paket: &AudioPacket, grund: &str) {
        self.verworfen.fetch_add(1, Ordering::Relaxed);
        debug!(
            peer = %paket.sender,
            seq = paket.sequence,
            grund,
            "Audio-Paket verworfen"
        );
    }
}

impl std::fmt::Debug for AusgabeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AusgabeManager")
            .field("peers", &self.peers.len())
            .field("loopback", &self.ist_loopback())
            .field("verworfen", &self.verworfen())
            .field("kontext", &self.kontext)
            .finish()
    }
}
