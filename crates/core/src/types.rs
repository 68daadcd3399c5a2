//! Gemeinsame Identifikations- und Geometrietypen
//!
//! `PeerId` verwendet das Newtype-Pattern, damit Peer-Kennungen nicht mit
//! anderen UUIDs verwechselt werden koennen.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Sub};
use uuid::Uuid;

/// Stabile Sitzungskennung eines Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Erstellt eine neue zufaellige PeerId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Rekonstruiert eine PeerId aus 16 Wire-Bytes
    pub fn aus_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Gibt die 16 Wire-Bytes zurueck
    pub fn als_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// VoiceLevel
// ---------------------------------------------------------------------------

/// Lautstaerke-Stufe eines Sprechers
///
/// Ordinal: `Whisper < Talk < Shout`. Bestimmt die hoerbare Reichweite.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VoiceLevel {
    Whisper = 0,
    #[default]
    Talk = 1,
    Shout = 2,
}

impl VoiceLevel {
    /// Konvertiert ein Wire-Byte in eine `VoiceLevel`
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Whisper),
            1 => Some(Self::Talk),
            2 => Some(Self::Shout),
            _ => None,
        }
    }
}

impl std::fmt::Display for VoiceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Whisper => "whisper",
            Self::Talk => "talk",
            Self::Shout => "shout",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Vec3
// ---------------------------------------------------------------------------

/// Einfacher 3D-Vektor fuer Positionen, Richtungen und Geschwindigkeiten
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const NULL: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn neu(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn laenge(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Normalisierter Vektor; der Nullvektor bleibt der Nullvektor
    pub fn normalisiert(&self) -> Self {
        let l = self.laenge();
        if l <= f32::EPSILON {
            return Self::NULL;
        }
        *self / l
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::neu(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::neu(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Div<f32> for Vec3 {
    type Output = Vec3;
    fn div(self, rhs: f32) -> Vec3 {
        Vec3::neu(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_eindeutig() {
        let a = PeerId::new();
        let b = PeerId::new();
        assert_ne!(a, b, "Zwei neue PeerIds muessen verschieden sein");
    }

    #[test]
    fn peer_id_bytes_round_trip() {
        let id = PeerId::new();
        assert_eq!(PeerId::aus_bytes(*id.als_bytes()), id);
    }

    #[test]
    fn peer_id_display() {
        let id = PeerId(Uuid::nil());
        assert!(id.to_string().starts_with("peer:"));
    }

    #[test]
    fn voice_level_ordinal() {
        assert!(VoiceLevel::Whisper < VoiceLevel::Talk);
        assert!(VoiceLevel::Talk < VoiceLevel::Shout);
        assert_eq!(VoiceLevel::from_u8(2), Some(VoiceLevel::Shout));
        assert_eq!(VoiceLevel::from_u8(3), None);
    }

    #[test]
    fn vec3_normalisieren() {
        let v = Vec3::neu(3.0, 0.0, 4.0).normalisiert();
        assert!((v.laenge() - 1.0).abs() < 1e-6);
        assert_eq!(Vec3::NULL.normalisiert(), Vec3::NULL);
    }
}
