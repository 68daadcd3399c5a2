//! nahfunk-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichten, die zwischen zwei Peers
//! ausgetauscht werden: binaere Audio- und Liveness-Pakete auf dem
//! Datenpfad sowie den JSON-Handshake auf dem separaten Aushandlungskanal.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod voice;
pub mod wire;

pub use error::PaketFehler;
pub use handshake::{HandshakeNachricht, TransportParameter};
pub use voice::{AudioPacket, Nachricht, PacketType};
pub use wire::FrameCodec;
