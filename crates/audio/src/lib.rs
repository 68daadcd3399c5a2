//! nahfunk-audio – Audio-Pfad eines Knotens
//!
//! - Opus Encoding/Decoding (48 kHz, Mono, 20 ms)
//! - Paketierung lokal aufgenommener Frames
//! - Wiedergabepuffer pro Peer (Jitter-Behandlung)
//! - 3D-Senken-Vertrag und aufzeichnende Senke
//! - Audio-Quelle pro Peer inklusive Spatialisierung
//! - Senken-Kontext (eigener Thread) und Ausgabe-Manager

pub mod ausgabe;
pub mod codec;
pub mod error;
pub mod pipeline;
pub mod quelle;
pub mod senke;
pub mod senken_kontext;
pub mod wiedergabe_puffer;

// Bequeme Re-Exporte der wichtigsten Typen
pub use ausgabe::{AusgabeKonfig, AusgabeManager};
pub use codec::{OpusDecoder, OpusEncoder};
pub use error::{AudioError, AudioResult};
pub use pipeline::{AudioData, AufnahmeQuelle, Paketierer};
pub use quelle::{PeerAudioQuelle, QuellenZustand};
pub use senke::{AudioSenke, AufzeichnungsFabrik, QuellenId, SenkenFabrik, SenkenProtokoll};
pub use senken_kontext::{
    KontextKonfig, KontextSchnappschuss, QuellenInfo, SenkenKommando, SenkenKontext,
};
pub use wiedergabe_puffer::{Einfuegung, PufferStatistik, Segment, WiedergabePuffer};
