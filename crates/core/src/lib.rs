//! nahfunk-core – Gemeinsame Typen, Einstellungen und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen nahfunk-Crates gemeinsam genutzt werden.

pub mod einstellungen;
pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use einstellungen::{DistanzTabelle, VoiceEinstellungen};
pub use error::{NahfunkError, Result};
pub use event::SitzungsEreignis;
pub use types::{PeerId, Vec3, VoiceLevel};
