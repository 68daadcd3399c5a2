//! Audio-Quelle pro Peer – Puffer, Senke und Spatialisierung
//!
//! Zustandsautomat:
//!
//! ```text
//! Idle ──(Segment an gestoppte Senke uebergeben)──▶ Playing
//! Playing ──(explizites Stoppen / Freigabe)──▶ Idle
//! ```
//!
//! Ein leerer Puffer aendert den Zustand nicht; die Senke laeuft leer und
//! wird beim naechsten Segment wieder gestartet.
//!
//! Lokationale Quellen folgen der Weltposition ihres Peers. Die nicht-
//! lokationale Quelle (lokaler Loopback) sitzt relativ zum Hoerer im
//! Ursprung, ohne Geschwindigkeit und ohne Distanzdaempfung.

use nahfunk_core::{Vec3, VoiceEinstellungen, VoiceLevel};
use nahfunk_protocol::codec::ABTASTRATE;
use std::time::Duration;

use crate::senke::{AudioSenke, QuellenId};
use crate::wiedergabe_puffer::{Einfuegung, PufferStatistik, WiedergabePuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuellenZustand {
    Idle,
    Playing,
}

pub struct PeerAudioQuelle {
    id: QuellenId,
    senke: Box<dyn AudioSenke>,
    puffer: WiedergabePuffer,
    zustand: QuellenZustand,
    lokational: bool,
    /// Zuletzt gemeldete Weltposition
    position: Vec3,
    /// Position beim letzten Tick
    letzte_position: Vec3,
    geschwindigkeit: Vec3,
    voice_level: VoiceLevel,
    einstellungen: VoiceEinstellungen,
    einstellungs_version: u64,
    freigegeben: bool,
}

impl PeerAudioQuelle {
    pub fn neu(
        id: QuellenId,
        senke: Box<dyn AudioSenke>,
        einstellungen: VoiceEinstellungen,
        kapazitaet: usize,
        lokational: bool,
        position: Vec3,
    ) -> Self {
        let mut quelle = Self {
            id,
            senke,
            puffer: WiedergabePuffer::neu(kapazitaet),
            zustand: QuellenZustand::Idle,
            lokational,
            position,
            letzte_position: position,
            geschwindigkeit: Vec3::NULL,
            voice_level: VoiceLevel::default(),
            einstellungs_version: einstellungen.version(),
            einstellungen,
            freigegeben: false,
        };
        quelle.senke.relativ_setzen(!lokational);
        quelle.max_distanz_anwenden();
        quelle
    }

    pub fn starten(&mut self) {
        if self.freigegeben {
            return;
        }
        self.senke.abspielen();
        self.zustand = QuellenZustand::Playing;
    }

    /// Stoppt die Wiedergabe und verwirft gepufferte Segmente
    pub fn stoppen(&mut self) {
        if self.freigegeben {
            return;
        }
        self.senke.stoppen();
        self.puffer.leeren();
        self.zustand = QuellenZustand::Idle;
    }

    pub fn voice_level_setzen(&mut self, level: VoiceLevel) {
        if level == self.voice_level {
            return;
        }
        tracing::debug!(quelle = %self.id, von = %self.voice_level, nach = %level, "Voice-Level geaendert");
        self.voice_level = level;
        self.max_distanz_anwenden();
    }

    /// Neue Weltposition des Peers; wirksam ab dem naechsten Tick
    pub fn position_melden(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn segment_einreihen(&mut self, sequence: u32, pcm: Vec<i16>) -> Einfuegung {
        self.puffer.einfuegen(sequence, pcm)
    }

    /// Ein Spatializer-Schritt: Raumdaten aktualisieren, dann die Senke nachfuellen
    pub fn tick(&mut self, hoerer: Vec3, dt: Duration) {
        if self.freigegeben {
            return;
        }
        if self.einstellungen.version() != self.einstellungs_version {
            self.max_distanz_anwenden();
        }

        if self.lokational {
            let sekunden = dt.as_secs_f32();
            self.geschwindigkeit = if sekunden > 0.0 {
                (self.position - self.letzte_position) / sekunden
            } else {
                Vec3::NULL
            };
            self.letzte_position = self.position;

            self.senke.position_setzen(self.position);
            self.senke.richtung_setzen((self.position - hoerer).normalisiert());
            self.senke.geschwindigkeit_setzen(self.geschwindigkeit);
        } else {
            self.senke.position_setzen(Vec3::NULL);
            self.senke.geschwindigkeit_setzen(Vec3::NULL);
        }

        self.nachfuellen();
    }

    fn nachfuellen(&mut self) {
        let mut uebergeben = 0usize;
        while self.senke.bereit_fuer_mehr() {
            let Some(segment) = self.puffer.entnehmen() else {
                break;
            };
            self.senke.pcm_einreihen(&segment.pcm, ABTASTRATE);
            uebergeben += 1;
        }

        if uebergeben > 0 && !self.senke.spielt() {
            self.senke.abspielen();
            if self.zustand == QuellenZustand::Idle {
                tracing::trace!(quelle = %self.id, "Quelle spielt");
            }
            self.zustand = QuellenZustand::Playing;
        }
    }

    fn max_distanz_anwenden(&mut self) {
        let distanz = self
            .lokational
            .then(|| self.einstellungen.distanz(self.voice_level) as f32);
        self.senke.max_distanz_setzen(distanz);
        self.einstellungs_version = self.einstellungen.version();
    }

    /// Gibt die Senke frei und leert den Puffer; idempotent
    pub fn freigeben(&mut self) {
        if self.freigegeben {
            return;
        }
        self.senke.stoppen();
        let verworfen = self.puffer.leeren();
        self.senke.freigeben();
        self.zustand = QuellenZustand::Idle;
        self.freigegeben = true;
        tracing::debug!(quelle = %self.id, verworfen, "Audio-Quelle freigegeben");
    }

    pub fn id(&self) -> QuellenId {
        self.id
    }

    pub fn zustand(&self) -> QuellenZustand {
        self.zustand
    }

    pub fn voice_level(&self) -> VoiceLevel {
        self.voice_level
    }

    pub fn ist_lokational(&self) -> bool {
        self.lokational
    }

    pub fn geschwindigkeit(&self) -> Vec3 {
        self.geschwindigkeit
    }

    pub fn fuellstand(&self) -> usize {
        self.puffer.fuellstand()
    }

    pub fn puffer_statistik(&self) -> &PufferStatistik {
        self.puffer.statistik()
    }
}

impl Drop for PeerAudioQuelle {
    fn drop(&mut self) {
        self.freigeben();
    }
}

impl std::fmt::Debug for PeerAudioQuelle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerAudioQuelle")
            .field("id", &self.id)
            .field("zustand", &self.zustand)
            .field("lokational", &self.lokational)
            .field("voice_level", &self.voice_level)
            .field("fuellstand", &self.puffer.fuellstand())
            .finish_non_exhaustive()
    }
}
