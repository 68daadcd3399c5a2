//! Handshake-Nachrichten der Transport-Aushandlung
//!
//! Laufen als JSON in laengen-gerahmten Frames ueber einen eigenen,
//! zuverlaessigen Kanal (getrennt vom Audio-Datenpfad).
//!
//! Ablauf:
//! ```text
//! Initiator                          Responder
//!   Angebot { transports }    --->
//!                             <---   Auswahl { transport, parameter }
//!                                    | Ablehnung { grund }
//!   (Readiness-Probe)
//!   Bestaetigung { .. }       --->
//!   | Angebot { [reserve] }   --->   (Fallback, Ablauf von vorn)
//!   | Abbruch { grund }       --->
//! ```
//!
//! Transport-Kennungen sind Strings (`"native"`, `"udp"`, `"tcp"`), damit
//! unbekannte Kennungen einer neueren Gegenseite einfach ignoriert werden.

use serde::{Deserialize, Serialize};

use crate::error::PaketFehler;

/// Transport-spezifische Parameter der Auswahl
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportParameter {
    /// Port, auf dem der Responder den Transport geoeffnet hat. Beim
    /// nativen Transport die Kanalnummer der Vermittlung.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl TransportParameter {
    pub fn mit_port(port: u16) -> Self {
        Self { port: Some(port) }
    }
}

/// Alle Nachrichten des Handshake-Kanals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum HandshakeNachricht {
    /// Initiator: unterstuetzte Transporte in eigener Praeferenz-Reihenfolge
    Angebot { transports: Vec<String> },
    /// Responder: gewaehlter und bereits geoeffneter Transport
    Auswahl {
        transport: String,
        #[serde(default)]
        parameter: TransportParameter,
    },
    /// Responder: keine gemeinsame Transport-Art
    Ablehnung { grund: String },
    /// Initiator: Readiness-Probe bestanden, Transport ist bereit
    Bestaetigung {
        transport: String,
        #[serde(default)]
        parameter: TransportParameter,
    },
    /// Initiator: Aushandlung endgueltig gescheitert, Voice nicht verfuegbar
    Abbruch { grund: String },
}

impl HandshakeNachricht {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PaketFehler> {
        serde_json::to_vec(self).map_err(|e| PaketFehler::Handshake(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PaketFehler> {
        serde_json::from_slice(bytes).map_err(|e| PaketFehler::Handshake(e.to_string()))
    }

    /// Kurzname fuer Logs
    pub fn bezeichnung(&self) -> &'static str {
        match self {
            Self::Angebot { .. } => "angebot",
            Self::Auswahl { .. } => "auswahl",
            Self::Ablehnung { .. } => "ablehnung",
            Self::Bestaetigung { .. } => "bestaetigung",
            Self::Abbruch { .. } => "abbruch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angebot_json_format() {
        let n = HandshakeNachricht::Angebot {
            transports: vec!["native".into(), "udp".into()],
        };
        let json = String::from_utf8(n.to_bytes().unwrap()).unwrap();
        assert_eq!(json, r#"{"typ":"angebot","transports":["native","udp"]}"#);
    }

    #[test]
    fn auswahl_mit_port() {
        let n = HandshakeNachricht::Auswahl {
            transport: "udp".into(),
            parameter: TransportParameter::mit_port(9100),
        };
        let zurueck = HandshakeNachricht::from_bytes(&n.to_bytes().unwrap()).unwrap();
        assert_eq!(zurueck, n);
    }

    #[test]
    fn auswahl_ohne_parameter_feld() {
        let n = HandshakeNachricht::from_bytes(br#"{"typ":"auswahl","transport":"native"}"#)
            .unwrap();
        assert_eq!(
            n,
            HandshakeNachricht::Auswahl {
                transport: "native".into(),
                parameter: TransportParameter::default(),
            }
        );
    }

    #[test]
    fn kaputtes_json() {
        assert!(matches!(
            HandshakeNachricht::from_bytes(b"{nope"),
            Err(PaketFehler::Handshake(_))
        ));
        assert!(HandshakeNachricht::from_bytes(br#"{"typ":"unbekannt"}"#).is_err());
    }
}
