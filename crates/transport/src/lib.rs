//! nahfunk-transport – Transport-Aushandlung mit Fallback
//!
//! Pro Peer wird genau ein funktionierender Transport ausgehandelt. Der
//! Handshake laeuft ueber einen eigenen, zuverlaessigen Kanal; danach prueft
//! eine Readiness-Probe (Ping/Pong), ob der Transport wirklich Daten
//! transportiert. Schlaegt das fehl, wird einmalig auf den Reserve-Transport
//! gewechselt.
//!
//! ## Module
//! - [`art`] – Transport-Arten, statische Prioritaet, Zustaende
//! - [`kern`] – Gemeinsamer Kern aller Transporte (Readiness, Audio-Zustellung, Zaehler)
//! - [`datagram`] – UDP-Transport
//! - [`verbindung`] – Zuverlaessige TCP-Verbindung mit Keepalive
//! - [`stream`] – TCP-Transport ueber [`verbindung::Verbindung`]
//! - [`native`] – Host-nativer Kanal (in-process)
//! - [`aktiv`] – Statischer Dispatch ueber den ausgehandelten Transport
//! - [`handshake_kanal`] – Kanal fuer Handshake-Nachrichten
//! - [`aushandlung`] – Initiator und Responder der Aushandlung

pub mod aktiv;
pub mod art;
pub mod aushandlung;
pub mod datagram;
pub mod error;
pub mod handshake_kanal;
pub mod kern;
pub mod native;
pub mod stream;
pub mod verbindung;

use std::future::Future;
use std::sync::Arc;

use nahfunk_protocol::Nachricht;

pub use aktiv::AktiverTransport;
pub use art::{TransportArt, TransportZustand};
pub use aushandlung::{AushandlungsErgebnis, AushandlungsKonfig, Verlauf};
pub use error::{TransportFehler, TransportResult};
pub use handshake_kanal::{FramedHandshake, HandshakeKanal};
pub use kern::{TransportEreignis, TransportKern};
pub use native::NativeVermittlung;
pub use verbindung::{SchliessArt, Verbindung, VerbindungsKonfig, VerbindungsZustand};

/// Gemeinsame Schnittstelle aller Transporte
///
/// Empfangen laeuft immer in einer eigenen Task des Transports und endet im
/// [`TransportKern`]; die Schnittstelle deckt daher nur Senden und Schliessen ab.
pub trait Transport: Send + Sync {
    fn art(&self) -> TransportArt;

    fn kern(&self) -> &Arc<TransportKern>;

    /// Sendet eine Nachricht ueber den Datenpfad
    fn senden(&self, nachricht: &Nachricht) -> impl Future<Output = TransportResult<()>> + Send;

    /// Schliesst den Transport und beendet seine Empfangs-Task. Idempotent.
    ///
    /// `art` bestimmt den Abschied an die Gegenseite (siehe
    /// [`SchliessArt::abschied`]).
    fn schliessen_als(&self, art: SchliessArt) -> impl Future<Output = ()> + Send;

    /// Geordnetes Schliessen mit Goodbye
    fn schliessen(&self) -> impl Future<Output = ()> + Send {
        self.schliessen_als(SchliessArt::Geordnet)
    }
}
