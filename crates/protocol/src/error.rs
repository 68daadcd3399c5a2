//! Fehler beim Dekodieren von Wire-Nachrichten
//!
//! Alle Varianten bedeuten "Paket verwerfen und protokollieren". Keine davon
//! beendet eine Verbindung.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaketFehler {
    #[error("Paket zu kurz: {laenge} Bytes (mindestens {erwartet})")]
    ZuKurz { laenge: usize, erwartet: usize },

    #[error("Unbekannter Pakettyp: {0}")]
    UnbekannterTyp(u32),

    #[error("Unbekannte Voice-Stufe: {0}")]
    UnbekannteVoiceStufe(u8),

    #[error("Nutzdaten-Laenge stimmt nicht: deklariert {deklariert}, tatsaechlich {tatsaechlich}")]
    LaengeUngleich { deklariert: usize, tatsaechlich: usize },

    #[error("Nutzdaten zu lang: {0} Bytes")]
    NutzdatenZuLang(usize),

    #[error("Steuerpaket mit unerwarteten Zusatzdaten ({0} Bytes)")]
    UnerwarteteDaten(usize),

    #[error("Handshake-Nachricht ungueltig: {0}")]
    Handshake(String),
}
