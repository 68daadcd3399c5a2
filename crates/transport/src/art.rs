//! Transport-Arten und Zustaende
//!
//! Die Prioritaet ist statisch: `Native > Datagram > Stream`. Sie wird
//! waehrend einer Sitzung nie neu verhandelt.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Konkrete Transport-Art
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportArt {
    /// Vom Host bereitgestellter Kanal
    #[serde(rename = "native")]
    Native,
    /// UDP
    #[serde(rename = "udp")]
    Datagram,
    /// TCP mit Laengen-Rahmung
    #[serde(rename = "tcp")]
    Stream,
}

impl TransportArt {
    pub const ALLE: [TransportArt; 3] = [Self::Native, Self::Datagram, Self::Stream];

    /// Kennung auf dem Handshake-Kanal
    pub fn kennung(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Datagram => "udp",
            Self::Stream => "tcp",
        }
    }

    pub fn aus_kennung(kennung: &str) -> Option<Self> {
        Self::ALLE.into_iter().find(|a| a.kennung() == kennung)
    }

    /// Hoeher = bevorzugt
    pub fn prioritaet(&self) -> u8 {
        match self {
            Self::Native => 3,
            Self::Datagram => 2,
            Self::Stream => 1,
        }
    }
}

impl fmt::Display for TransportArt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kennung())
    }
}

/// Waehlt aus der Schnittmenge die Art mit der hoechsten Prioritaet
pub fn beste_gemeinsame(angebot: &[TransportArt], akzeptiert: &[TransportArt]) -> Option<TransportArt> {
    angebot
        .iter()
        .filter(|a| akzeptiert.contains(a))
        .max_by_key(|a| a.prioritaet())
        .copied()
}

/// Zustand eines Transports waehrend der Aushandlung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportZustand {
    Getrennt,
    Verbindend,
    ReadinessPruefung,
    Bereit,
    Fehlgeschlagen,
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransportArt::*;

    #[test]
    fn kennungen() {
        for art in TransportArt::ALLE {
            assert_eq!(TransportArt::aus_kennung(art.kennung()), Some(art));
        }
        assert_eq!(TransportArt::aus_kennung("quic"), None);
    }

    #[test]
    fn prioritaet_statisch() {
        assert!(Native.prioritaet() > Datagram.prioritaet());
        assert!(Datagram.prioritaet() > Stream.prioritaet());
    }

    #[test]
    fn schnittmenge_waehlt_hoechste_prioritaet() {
        assert_eq!(beste_gemeinsame(&[Native, Datagram], &[Datagram, Stream]), Some(Datagram));
        // Reihenfolge im Angebot spielt keine Rolle
        assert_eq!(beste_gemeinsame(&[Stream, Native], &[Native, Stream]), Some(Native));
        assert_eq!(beste_gemeinsame(&[Native], &[Stream]), None);
        assert_eq!(beste_gemeinsame(&[], &[Stream]), None);
    }

    #[test]
    fn serde_kennungen() {
        let arten: Vec<TransportArt> = serde_json::from_str(r#"["udp","tcp"]"#).unwrap();
        assert_eq!(arten, vec![Datagram, Stream]);
    }
}
