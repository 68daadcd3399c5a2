//! Logging-Setup via tracing-subscriber
//!
//! Umgebungsvariablen haben Vorrang vor der Konfiguration:
//! - `NAHFUNK_LOG_LEVEL`: Filter-Ausdruck (z.B. `debug` oder
//!   `info,nahfunk_transport=trace`)
//! - `NAHFUNK_LOG_FORMAT`: `text` oder `json`

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_LEVEL_VAR: &str = "NAHFUNK_LOG_LEVEL";
pub const LOG_FORMAT_VAR: &str = "NAHFUNK_LOG_FORMAT";

/// Initialisiert den globalen Subscriber. Ungueltige Werte fallen auf `info` / `text` zurueck.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_VAR)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format_waehlen(std::env::var(LOG_FORMAT_VAR).ok().as_deref(), format) {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_names(true)
                .init();
        }
    }
}

/// Umgebung vor Konfiguration; Unbekanntes wird zu `text`
fn format_waehlen<'a>(aus_env: Option<&'a str>, aus_config: &'a str) -> &'a str {
    let format = aus_env.unwrap_or(aus_config);
    if log_format_gueltig(format) {
        format
    } else {
        "text"
    }
}

pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_werte() {
        assert!(log_format_gueltig("json"));
        assert!(!log_format_gueltig("JSON"));
        assert!(!log_format_gueltig("xml"));
    }

    #[test]
    fn umgebung_hat_vorrang() {
        assert_eq!(format_waehlen(Some("json"), "text"), "json");
        assert_eq!(format_waehlen(None, "json"), "json");
        assert_eq!(format_waehlen(None, "text"), "text");
    }

    #[test]
    fn unbekanntes_format_wird_text() {
        assert_eq!(format_waehlen(Some("xml"), "json"), "text");
        assert_eq!(format_waehlen(None, "yaml"), "text");
    }
}
