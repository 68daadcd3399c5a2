//! Codec-Konfiguration fuer den Sprachkanal
//!
//! Das Audio-Format ist fest: Opus, 48 kHz, Mono, 20-ms-Frames im
//! VOIP-Modus. Einstellbar sind nur Bitrate, FEC, DTX und Komplexitaet.

use serde::{Deserialize, Serialize};

/// Abtastrate in Hz
pub const ABTASTRATE: u32 = 48_000;

/// Frame-Dauer in Millisekunden
pub const FRAME_MS: u32 = 20;

/// Samples pro Frame (Mono): 48 000 * 20 / 1000
pub const SAMPLES_PRO_FRAME: usize = (ABTASTRATE * FRAME_MS / 1000) as usize;

/// Bytes eines PCM-Frames (i16 little-endian)
pub const BYTES_PRO_FRAME: usize = SAMPLES_PRO_FRAME * 2;

/// Opus-Parameter des Sprachkanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SprachCodecKonfig {
    /// Ziel-Bitrate in kbps (6–510)
    pub bitrate_kbps: u16,
    /// Forward Error Correction
    pub fec: bool,
    /// Discontinuous Transmission (Stille wird nicht uebertragen)
    pub dtx: bool,
    /// Komplexitaet 0–10
    pub komplexitaet: u8,
}

impl Default for SprachCodecKonfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 32,
            fec: true,
            dtx: false,
            komplexitaet: 8,
        }
    }
}

impl SprachCodecKonfig {
    pub fn validieren(&self) -> Result<(), String> {
        if !(6..=510).contains(&self.bitrate_kbps) {
            return Err(format!(
                "Bitrate muss zwischen 6 und 510 kbps liegen (war: {})",
                self.bitrate_kbps
            ));
        }
        if self.komplexitaet > 10 {
            return Err(format!(
                "Komplexitaet muss zwischen 0 und 10 liegen (war: {})",
                self.komplexitaet
            ));
        }
        Ok(())
    }
}
