//! nahfunk-node – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und betreibt den
//! Knoten bis Ctrl-C.

use anyhow::Result;
use nahfunk_node::config::NodeConfig;
use nahfunk_node::logging::logging_initialisieren;
use nahfunk_node::Knoten;

#[tokio::main]
async fn main() -> Result<()> {
    let config_pfad = std::env::var("NAHFUNK_CONFIG").unwrap_or_else(|_| "nahfunk.toml".into());

    let config = NodeConfig::laden(&config_pfad)?;
    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "nahfunk-node wird initialisiert"
    );

    let knoten = Knoten::neu(config)?;

    let abbruch = knoten.abbruch();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C empfangen, fahre herunter");
                abbruch.cancel();
            }
            Err(e) => tracing::error!(fehler = %e, "Signal-Handler nicht installierbar"),
        }
    });

    knoten.starten().await
}
