//! Opus Encoder/Decoder Wrapper
//!
//! Kapselt audiopus fuer das feste Sprachformat (48 kHz, Mono, 20 ms,
//! VOIP) und arbeitet auf i16-PCM. Pro ausgehendem Strom ein Encoder,
//! pro eingehendem Strom (Peer) ein eigener Decoder; Zustand wird nie
//! zwischen Peers geteilt.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use tracing::debug;

use crate::error::{AudioError, AudioResult};
use nahfunk_protocol::codec::{SprachCodecKonfig, SAMPLES_PRO_FRAME};
use nahfunk_protocol::voice::MAX_NUTZDATEN_LAENGE;

/// OPUS_SET_DTX_REQUEST
const OPUS_SET_DTX: i32 = 4016;

fn codec_fehler(e: audiopus::Error) -> AudioError {
    AudioError::CodecFehler(e.to_string())
}

/// Opus-Encoder: kodiert einen i16-Frame zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    konfig: SprachCodecKonfig,
}

impl OpusEncoder {
    pub fn new(konfig: SprachCodecKonfig) -> AudioResult<Self> {
        konfig.validieren().map_err(AudioError::Konfiguration)?;

        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(codec_fehler)?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond(i32::from(konfig.bitrate_kbps) * 1000))
            .map_err(codec_fehler)?;
        encoder
            .set_complexity(konfig.komplexitaet)
            .map_err(codec_fehler)?;
        encoder.set_inband_fec(konfig.fec).map_err(codec_fehler)?;
        if konfig.dtx {
            encoder
                .set_encoder_ctl_request(OPUS_SET_DTX, 1)
                .map_err(codec_fehler)?;
        }

        debug!(
            bitrate_kbps = konfig.bitrate_kbps,
            fec = konfig.fec,
            dtx = konfig.dtx,
            "OpusEncoder erstellt"
        );

        Ok(Self { encoder, konfig })
    }

    /// Kodiert genau einen Frame (`SAMPLES_PRO_FRAME` Samples)
    pub fn encode(&mut self, pcm: &[i16]) -> AudioResult<Vec<u8>> {
        if pcm.len() != SAMPLES_PRO_FRAME {
            return Err(AudioError::FrameGroesse {
                erwartet: SAMPLES_PRO_FRAME * 2,
                tatsaechlich: pcm.len() * 2,
            });
        }

        let mut ausgabe = vec![0u8; MAX_NUTZDATEN_LAENGE];
        let geschrieben = self
            .encoder
            .encode(pcm, &mut ausgabe)
            .map_err(codec_fehler)?;
        ausgabe.truncate(geschrieben);
        Ok(ausgabe)
    }

    pub fn konfig(&self) -> &SprachCodecKonfig {
        &self.konfig
    }
}

/// Opus-Decoder: dekodiert Opus-Bytes zu i16-PCM
pub struct OpusDecoder {
    decoder: Decoder,
}

impl OpusDecoder {
    pub fn new() -> AudioResult<Self> {
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Mono).map_err(codec_fehler)?;
        Ok(Self { decoder })
    }

    pub fn decode(&mut self, opus: &[u8]) -> AudioResult<Vec<i16>> {
        let mut ausgabe = vec![0i16; SAMPLES_PRO_FRAME];
        let dekodiert = self
            .decoder
            .decode(Some(opus), &mut ausgabe, false)
            .map_err(codec_fehler)?;
        ausgabe.truncate(dekodiert);
        Ok(ausgabe)
    }
}

impl std::fmt::Debug for OpusEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpusEncoder")
            .field("konfig", &self.konfig)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for OpusDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpusDecoder").finish_non_exhaustive()
    }
}
