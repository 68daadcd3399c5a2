//! nahfunk-node – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Ausgabe und Sitzungstreiber zu einem
//! lauffaehigen Voice-Knoten. Die Ausgabe laeuft ueber aufzeichnende Senken,
//! die Aufnahme ist ein Test-Sinus; Geraetezugriff ist Sache des Hosts.

pub mod aufnahme;
pub mod config;
pub mod logging;
pub mod sitzung;

use anyhow::Result;
use nahfunk_audio::{AufzeichnungsFabrik, AusgabeManager, Paketierer};
use nahfunk_core::{PeerId, VoiceEinstellungen};
use nahfunk_protocol::codec::FRAME_MS;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use aufnahme::{Sendeseite, SinusQuelle};
use config::{NodeConfig, Rolle};
use sitzung::SitzungsTreiber;

/// Ein laufender Knoten
pub struct Knoten {
    pub config: NodeConfig,
    peer_id: PeerId,
    ausgabe: Arc<AusgabeManager>,
    abbruch: CancellationToken,
}

impl Knoten {
    /// Startet den Senken-Kontext; Netzwerk wird erst in [`Knoten::starten`] geoeffnet
    pub fn neu(config: NodeConfig) -> Result<Self> {
        let einstellungen = VoiceEinstellungen::neu(config.distanzen);
        einstellungen.aktiviert_setzen(config.audio.aktiviert);

        let ausgabe = AusgabeManager::neu(
            AufzeichnungsFabrik::neu(),
            einstellungen,
            config.ausgabe_konfig(),
        )?;
        ausgabe.hoerer_setzen(config.knoten.position)?;

        Ok(Self {
            config,
            peer_id: PeerId::new(),
            ausgabe: Arc::new(ausgabe),
            abbruch: CancellationToken::new(),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Token zum Beenden von aussen (Ctrl-C)
    pub fn abbruch(&self) -> CancellationToken {
        self.abbruch.clone()
    }

    pub fn ausgabe(&self) -> &Arc<AusgabeManager> {
        &self.ausgabe
    }

    /// Laeuft bis zum Shutdown oder bis die Sitzung endgueltig endet
    pub async fn starten(&self) -> Result<()> {
        tracing::info!(
            name = %self.config.knoten.name,
            peer = %self.peer_id,
            rolle = ?self.config.knoten.rolle,
            transporte = ?self.config.transport.unterstuetzt,
            reserve = ?self.config.transport.reserve,
            "Knoten startet"
        );

        let tick = tokio::spawn(tick_schleife(
            Arc::clone(&self.ausgabe),
            self.abbruch.clone(),
        ));

        let sendeseite = Sendeseite::neu(
            Box::new(SinusQuelle::neu(self.config.audio.sinus_frequenz)),
            Paketierer::neu(self.peer_id, self.config.audio.codec)?,
            self.config.knoten.voice_level,
        );
        let mut treiber = SitzungsTreiber::neu(
            self.config.aushandlungs_konfig()?,
            Arc::clone(&self.ausgabe),
            sendeseite,
            self.abbruch.clone(),
        );

        let ergebnis = match self.config.knoten.rolle {
            Rolle::Responder => {
                let adresse = self.config.handshake_bind_adresse();
                match TcpListener::bind(&adresse).await {
                    Ok(listener) => {
                        tracing::info!(%adresse, "Warte auf Handshake");
                        treiber.als_responder(listener).await
                    }
                    Err(e) => Err(anyhow::anyhow!(
                        "Handshake-Listener auf {adresse} nicht moeglich: {e}"
                    )),
                }
            }
            Rolle::Initiator => {
                treiber
                    .als_initiator(
                        &self.config.handshake_ziel(),
                        self.config.netzwerk.verbindungs_versuche,
                        self.config.wiederholung(),
                    )
                    .await
            }
        };

        self.abbruch.cancel();
        if let Err(e) = tick.await {
            tracing::warn!(fehler = %e, "Tick-Task abgebrochen");
        }
        self.ausgabe.beenden();
        tracing::info!(verworfen = self.ausgabe.verworfen(), "Knoten beendet");
        ergebnis
    }
}

/// Treibt den Spatializer im Frame-Takt
async fn tick_schleife(ausgabe: Arc<AusgabeManager>, abbruch: CancellationToken) {
    let mut takt = tokio::time::interval(Duration::from_millis(u64::from(FRAME_MS)));
    takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut letzter = Instant::now();

    loop {
        tokio::select! {
            _ = abbruch.cancelled() => break,
            _ = takt.tick() => {
                let jetzt = Instant::now();
                let dt = jetzt.duration_since(letzter);
                letzter = jetzt;
                if let Err(e) = ausgabe.tick(dt) {
                    tracing::error!(fehler = %e, "Senken-Kontext beendet, Tick gestoppt");
                    break;
                }
            }
        }
    }
}
