//! Fehlertypen fuer den Audio-Pfad

use nahfunk_core::NahfunkError;
use thiserror::Error;

/// Alle moeglichen Fehler des Audio-Pfads
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("PCM-Frame hat {tatsaechlich} Bytes, erwartet {erwartet}")]
    FrameGroesse { erwartet: usize, tatsaechlich: usize },

    #[error("Nutzdaten zu lang: {0} Bytes")]
    NutzdatenZuLang(usize),

    #[error("Senken-Kontext beendet")]
    KontextBeendet,

    #[error("Senken-Kontext antwortet nicht")]
    KontextZeitlimit,

    #[error("Thread-Fehler: {0}")]
    Thread(String),
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for NahfunkError {
    fn from(e: AudioError) -> Self {
        NahfunkError::Audio(e.to_string())
    }
}
