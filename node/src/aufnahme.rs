//! Sendeseite des Knotens
//!
//! Zieht alle 20 ms einen Frame aus der Aufnahme-Quelle, kodiert und
//! paketiert ihn und schickt ihn ueber den ausgehandelten Transport. Der
//! Paketierer lebt ueber Neuaushandlungen hinweg, damit die Sequenznummern
//! beim Empfaenger weiter steigen.

use nahfunk_audio::{AudioData, AufnahmeQuelle, AusgabeManager, Paketierer};
use nahfunk_core::VoiceLevel;
use nahfunk_protocol::codec::SAMPLES_PRO_FRAME;
use nahfunk_transport::AktiverTransport;

/// Demo-Aufnahme: ein endloser Sinuston
///
/// Ersetzt das Mikrofon, solange kein Geraetezugriff angebunden ist.
#[derive(Debug, Clone)]
pub struct SinusQuelle {
    frequenz: f32,
    amplitude: f32,
    frame_nr: u64,
}

impl SinusQuelle {
    pub fn neu(frequenz: f32) -> Self {
        Self {
            frequenz,
            amplitude: 6000.0,
            frame_nr: 0,
        }
    }
}

impl AufnahmeQuelle for SinusQuelle {
    fn naechster_frame(&mut self) -> Option<AudioData> {
        let samples = nahfunk_audio::pipeline::sinus_frame(self.frame_nr, self.frequenz, self.amplitude);
        let timestamp = self.frame_nr * SAMPLES_PRO_FRAME as u64;
        self.frame_nr += 1;
        Some(AudioData::aus_samples(&samples, timestamp))
    }
}

/// Ergebnis eines Sende-Takts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Takt {
    Gesendet,
    /// Nicht gesendet (Transport nicht bereit, Codec- oder Sendefehler)
    Uebersprungen,
    /// Die Quelle liefert keine Frames mehr
    Erschoepft,
}

pub struct Sendeseite {
    quelle: Box<dyn AufnahmeQuelle>,
    paketierer: Paketierer,
    level: VoiceLevel,
    gesendet: u64,
}

impl Sendeseite {
    pub fn neu(quelle: Box<dyn AufnahmeQuelle>, paketierer: Paketierer, level: VoiceLevel) -> Self {
        Self {
            quelle,
            paketierer,
            level,
            gesendet: 0,
        }
    }

    pub fn gesendet(&self) -> u64 {
        self.gesendet
    }

    /// Ein Frame: aufnehmen, paketieren, lokal spiegeln, senden
    ///
    /// Fehler beenden nie die Sitzung; sie werden geloggt und der Frame
    /// entfaellt.
    pub async fn takt(&mut self, transport: &AktiverTransport, ausgabe: &AusgabeManager) -> Takt {
        let Some(daten) = self.quelle.naechster_frame() else {
            return Takt::Erschoepft;
        };

        let paket = match self.paketierer.paketieren(&daten, self.level) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(fehler = %e, "Frame nicht kodierbar, verworfen");
                return Takt::Uebersprungen;
            }
        };

        if let Err(e) = ausgabe.loopback_verarbeiten(&paket) {
            tracing::warn!(fehler = %e, "Loopback fehlgeschlagen");
        }

        match transport.audio_senden(&paket).await {
            Ok(true) => {
                self.gesendet += 1;
                Takt::Gesendet
            }
            Ok(false) => Takt::Uebersprungen,
            Err(e) => {
                tracing::warn!(fehler = %e, seq = paket.sequence, "Audio-Senden fehlgeschlagen");
                Takt::Uebersprungen
            }
        }
    }
}

impl std::fmt::Debug for Sendeseite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sendeseite")
            .field("absender", &self.paketierer.absender())
            .field("naechste_sequenz", &self.paketierer.naechste_sequenz())
            .field("level", &self.level)
            .field("gesendet", &self.gesendet)
            .finish()
    }
}
