//! Sendeseite: Aufnahme-Frames kodieren und paketieren
//!
//! Die Aufnahme selbst (Geraetezugriff) liegt ausserhalb; sie liefert
//! [`AudioData`] ueber den [`AufnahmeQuelle`]-Vertrag. Der [`Paketierer`]
//! haengt Absender, Sequenznummer und Voice-Level an.

use bytes::Bytes;
use nahfunk_core::{PeerId, VoiceLevel};
use nahfunk_protocol::codec::{SprachCodecKonfig, ABTASTRATE, BYTES_PRO_FRAME, SAMPLES_PRO_FRAME};
use nahfunk_protocol::voice::MAX_NUTZDATEN_LAENGE;
use nahfunk_protocol::AudioPacket;

use crate::codec::OpusEncoder;
use crate::error::{AudioError, AudioResult};

/// Ein aufgenommener PCM-Frame (i16 little-endian, Mono, 48 kHz)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    pub bytes: Bytes,
    /// Aufnahmezeitpunkt in Samples seit Start
    pub timestamp: u64,
}

impl AudioData {
    pub fn aus_samples(samples: &[i16], timestamp: u64) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self {
            bytes: Bytes::from(bytes),
            timestamp,
        }
    }

    /// Interpretiert die Bytes als i16-Samples; ein ungerades Rest-Byte wird ignoriert
    pub fn samples(&self) -> Vec<i16> {
        self.bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    pub fn ist_voller_frame(&self) -> bool {
        self.bytes.len() == BYTES_PRO_FRAME
    }
}

/// Liefert lokal aufgenommene Frames (Mikrofon, Testsignal, ...)
pub trait AufnahmeQuelle: Send {
    /// Naechster Frame oder `None`, wenn gerade nichts anliegt
    fn naechster_frame(&mut self) -> Option<AudioData>;
}

/// Kodiert Frames und erzeugt Audio-Pakete mit strikt steigender Sequenz
#[derive(Debug)]
pub struct Paketierer {
    absender: PeerId,
    encoder: OpusEncoder,
    naechste_sequenz: u32,
}

impl Paketierer {
    pub fn neu(absender: PeerId, konfig: SprachCodecKonfig) -> AudioResult<Self> {
        Ok(Self {
            absender,
            encoder: OpusEncoder::new(konfig)?,
            naechste_sequenz: 0,
        })
    }

    /// Kodiert einen Frame und verpackt ihn
    ///
    /// Frames mit falscher Groesse werden abgewiesen, ohne die Sequenz zu
    /// verbrauchen.
    pub fn paketieren(&mut self, daten: &AudioData, level: VoiceLevel) -> AudioResult<AudioPacket> {
        if !daten.ist_voller_frame() {
            return Err(AudioError::FrameGroesse {
                erwartet: BYTES_PRO_FRAME,
                tatsaechlich: daten.bytes.len(),
            });
        }

        let opus = self.encoder.encode(&daten.samples())?;
        if opus.len() > MAX_NUTZDATEN_LAENGE {
            return Err(AudioError::NutzdatenZuLang(opus.len()));
        }

        let sequenz = self.naechste_sequenz;
        self.naechste_sequenz = self.naechste_sequenz.wrapping_add(1);
        Ok(AudioPacket::neu(self.absender, sequenz, level, opus))
    }

    pub fn absender(&self) -> PeerId {
        self.absender
    }

    pub fn naechste_sequenz(&self) -> u32 {
        self.naechste_sequenz
    }
}

/// Erzeugt einen Sinus-Frame; `frame_nr` setzt die Phase fort
pub fn sinus_frame(frame_nr: u64, frequenz: f32, amplitude: f32) -> Vec<i16> {
    let start = frame_nr * SAMPLES_PRO_FRAME as u64;
    (0..SAMPLES_PRO_FRAME as u64)
        .map(|i| {
            let t = ((start + i) % u64::from(ABTASTRATE)) as f32 / ABTASTRATE as f32;
            ((2.0 * std::f32::consts::PI * frequenz * t).sin() * amplitude) as i16
        })
        .collect()
}
