//! Laengen-Rahmung fuer Stream-Verbindungen
//!
//! Auf TCP gibt es keine Nachrichtengrenzen. Jede Nachricht (Datenpfad-Paket
//! oder Handshake-JSON) wird deshalb mit ihrer Laenge vorangestellt.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE)                   | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge zaehlt nur die Payload-Bytes. Der Codec kennt den Inhalt nicht;
//! das Parsen uebernehmen [`crate::voice::Nachricht`] bzw.
//! [`crate::handshake::HandshakeNachricht`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Obergrenze fuer Datenpfad-Frames (64 KiB, weit ueber jedem Audio-Paket)
pub const STANDARD_MAX_FRAME: usize = 64 * 1024;

/// Bytes des Laengen-Prefix
pub const PREFIX_LAENGE: usize = 4;

fn zu_gross(laenge: usize, max: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Frame zu gross: {laenge} Bytes (Maximum: {max} Bytes)"),
    )
}

/// Laengen-Rahmung als tokio-util Codec, gedacht fuer `Framed<TcpStream, _>`
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_size(STANDARD_MAX_FRAME)
    }

    /// Codec mit eigener Obergrenze (Handshake: 16 KiB)
    pub fn with_max_size(max: usize) -> Self {
        Self { max }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        let Some(prefix) = src.get(..PREFIX_LAENGE) else {
            return Ok(None);
        };
        let laenge = prefix.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        if laenge > self.max {
            return Err(zu_gross(laenge, self.max));
        }

        let fehlend = (PREFIX_LAENGE + laenge).saturating_sub(src.len());
        if fehlend > 0 {
            src.reserve(fehlend);
            return Ok(None);
        }

        src.advance(PREFIX_LAENGE);
        Ok(Some(src.split_to(laenge)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        let laenge = u32::try_from(frame.len())
            .ok()
            .filter(|l| *l as usize <= self.max)
            .ok_or_else(|| zu_gross(frame.len(), self.max))?;
        dst.reserve(PREFIX_LAENGE + frame.len());
        dst.put_u32(laenge);
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
