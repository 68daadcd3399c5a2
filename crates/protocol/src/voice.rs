//! Voice-Datenpfad – Audio- und Liveness-Pakete
//!
//! Binaeres Format, direkte Byte-Serialisierung ohne serde (Hot Path).
//! Alle Ganzzahlen sind big-endian.
//!
//! ## Steuerpakete (Ping, Pong, Goodbye, Renegotiate)
//!
//! ```text
//! Offset  Len  Beschreibung
//!  0       4   PacketType
//! ```
//!
//! ## Audio-Paket (Header = 29 Bytes)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       4   PacketType (= 3, Audio)
//!  4      16   Absender (PeerId, UUID-Bytes)
//! 20       4   Sequenznummer
//! 24       1   VoiceLevel (0 = Whisper, 1 = Talk, 2 = Shout)
//! 25       4   Deklarierte Nutzdaten-Laenge
//! 29+      N   Nutzdaten (Opus-Bytes), N muss der deklarierten Laenge entsprechen
//! ```
//!
//! Auf dem Stream-Transport wird jede Nachricht zusaetzlich mit ihrer
//! Gesamtlaenge gerahmt (siehe [`crate::wire`]).

use bytes::{BufMut, Bytes, BytesMut};
use nahfunk_core::types::{PeerId, VoiceLevel};

use crate::error::PaketFehler;

/// Maximale Nutzdaten-Laenge (1280 Bytes, typisches Opus-MTU-Limit)
pub const MAX_NUTZDATEN_LAENGE: usize = 1280;

/// Groesse des Typ-Tags in Bytes
pub const TAG_GROESSE: usize = 4;

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// Typ-Tag am Anfang jeder Nachricht auf dem Datenpfad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketType {
    /// Liveness-Anfrage (Readiness-Probe und Keepalive)
    Ping = 1,
    /// Liveness-Antwort
    Pong = 2,
    /// Opus-Audio
    Audio = 3,
    /// Geordnetes Schliessen durch die Gegenseite
    Goodbye = 4,
    /// Gegenseite verlangt Neuaushandlung (z.B. Neustart)
    Renegotiate = 5,
}

impl PacketType {
    /// Konvertiert ein Tag in einen `PacketType`.
    pub fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Ping),
            2 => Some(Self::Pong),
            3 => Some(Self::Audio),
            4 => Some(Self::Goodbye),
            5 => Some(Self::Renegotiate),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioPacket
// ---------------------------------------------------------------------------

/// Audio-Paket eines Senders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Absender
    pub sender: PeerId,
    /// Pro Sender und Sitzung strikt steigend; nur fuer Reihenfolge und Verlust
    pub sequence: u32,
    /// Lautstaerke-Stufe des Sprechers
    pub voice_level: VoiceLevel,
    /// Opus-Nutzdaten
    pub payload: Bytes,
}

impl AudioPacket {
    /// Header-Groesse in Bytes
    pub const HEADER_SIZE: usize = TAG_GROESSE + 16 + 4 + 1 + 4;

    /// Offset des Laengenfelds im Header
    pub const LAENGEN_OFFSET: usize = 25;

    pub fn neu(
        sender: PeerId,
        sequence: u32,
        voice_level: VoiceLevel,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            sender,
            sequence,
            voice_level,
            payload: payload.into(),
        }
    }

    /// Schreibt das Paket inklusive Typ-Tag in `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(Self::HEADER_SIZE + self.payload.len());
        buf.put_u32(PacketType::Audio as u32);
        buf.put_slice(self.sender.als_bytes());
        buf.put_u32(self.sequence);
        buf.put_u8(self.voice_level as u8);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Serialisiert das Paket
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.groesse());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Dekodiert ein Audio-Paket (inklusive Typ-Tag) und validiert es
    ///
    /// # Fehler
    /// - `ZuKurz` wenn der Header unvollstaendig ist
    /// - `UnbekannterTyp` wenn das Tag nicht `Audio` ist
    /// - `UnbekannteVoiceStufe` bei ungueltigem Level-Byte
    /// - `LaengeUngleich` wenn deklarierte und tatsaechliche Laenge abweichen
    /// - `NutzdatenZuLang` ueber `MAX_NUTZDATEN_LAENGE`
    pub fn decode(buf: &[u8]) -> Result<Self, PaketFehler> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(PaketFehler::ZuKurz {
                laenge: buf.len(),
                erwartet: Self::HEADER_SIZE,
            });
        }

        let tag = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if tag != PacketType::Audio as u32 {
            return Err(PaketFehler::UnbekannterTyp(tag));
        }

        let mut sender = [0u8; 16];
        sender.copy_from_slice(&buf[4..20]);
        let sequence = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
        let voice_level =
            VoiceLevel::from_u8(buf[24]).ok_or(PaketFehler::UnbekannteVoiceStufe(buf[24]))?;
        let deklariert = u32::from_be_bytes([buf[25], buf[26], buf[27], buf[28]]) as usize;

        let payload = &buf[Self::HEADER_SIZE..];
        if payload.len() != deklariert {
            return Err(PaketFehler::LaengeUngleich {
                deklariert,
                tatsaechlich: payload.len(),
            });
        }
        if payload.len() > MAX_NUTZDATEN_LAENGE {
            return Err(PaketFehler::NutzdatenZuLang(payload.len()));
        }

        Ok(Self {
            sender: PeerId::aus_bytes(sender),
            sequence,
            voice_level,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Gesamtgroesse des Paketes in Bytes
    pub fn groesse(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }
}

// ---------------------------------------------------------------------------
// Nachricht
// ---------------------------------------------------------------------------

/// Jede Nachricht, die auf einem Transport-Datenpfad laufen kann
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nachricht {
    Ping,
    Pong,
    Goodbye,
    Renegotiate,
    Audio(AudioPacket),
}

impl Nachricht {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Ping => PacketType::Ping,
            Self::Pong => PacketType::Pong,
            Self::Goodbye => PacketType::Goodbye,
            Self::Renegotiate => PacketType::Renegotiate,
            Self::Audio(_) => PacketType::Audio,
        }
    }

    /// Serialisiert die Nachricht (ohne Laengen-Rahmen)
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Audio(paket) => paket.encode(),
            andere => Bytes::copy_from_slice(&(andere.packet_type() as u32).to_be_bytes()),
        }
    }

    /// Dekodiert eine Nachricht anhand ihres Typ-Tags
    pub fn decode(buf: &[u8]) -> Result<Self, PaketFehler> {
        if buf.len() < TAG_GROESSE {
            return Err(PaketFehler::ZuKurz {
                laenge: buf.len(),
                erwartet: TAG_GROESSE,
            });
        }
        let tag = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let typ = PacketType::from_u32(tag).ok_or(PaketFehler::UnbekannterTyp(tag))?;

        let steuer = match typ {
            PacketType::Audio => return AudioPacket::decode(buf).map(Self::Audio),
            PacketType::Ping => Self::Ping,
            PacketType::Pong => Self::Pong,
            PacketType::Goodbye => Self::Goodbye,
            PacketType::Renegotiate => Self::Renegotiate,
        };

        // Steuerpakete bestehen nur aus dem Tag
        if buf.len() != TAG_GROESSE {
            return Err(PaketFehler::UnerwarteteDaten(buf.len() - TAG_GROESSE));
        }
        Ok(steuer)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
