//! Sitzungs-Ereignisse des Hosts
//!
//! Der Host (Spiel-Engine) meldet Beitritt und Verlassen von Teilnehmern.
//! Diese Ereignisse steuern Erzeugung und Freigabe der Audio-Quellen.

use crate::types::{PeerId, Vec3};
use serde::{Deserialize, Serialize};

/// Ereignisse aus der Host-Sitzung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SitzungsEreignis {
    /// Ein Teilnehmer ist in der Welt erschienen
    PeerBeigetreten { peer_id: PeerId, position: Vec3 },
    /// Ein Teilnehmer hat die Welt verlassen
    PeerVerlassen { peer_id: PeerId },
}

impl SitzungsEreignis {
    /// Gibt den betroffenen Peer zurueck
    pub fn peer_id(&self) -> PeerId {
        match self {
            Self::PeerBeigetreten { peer_id, .. } | Self::PeerVerlassen { peer_id } => *peer_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ist_serde_kompatibel() {
        let event = SitzungsEreignis::PeerBeigetreten {
            peer_id: PeerId::new(),
            position: Vec3::neu(1.0, 2.0, 3.0),
        };
        let json = serde_json::to_string(&event).unwrap();
        let zurueck: SitzungsEreignis = serde_json::from_str(&json).unwrap();
        assert_eq!(zurueck, event);
    }

    #[test]
    fn peer_id_aus_event() {
        let pid = PeerId::new();
        assert_eq!(SitzungsEreignis::PeerVerlassen { peer_id: pid }.peer_id(), pid);
    }
}
