//! Knoten-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Abschnitte haben
//! Standardwerte; ohne Datei startet der Knoten als Responder auf
//! `0.0.0.0:9870`.

use nahfunk_audio::AusgabeKonfig;
use nahfunk_core::{DistanzTabelle, Vec3, VoiceLevel};
use nahfunk_protocol::codec::SprachCodecKonfig;
use nahfunk_transport::{AushandlungsKonfig, NativeVermittlung, TransportArt, VerbindungsKonfig};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Vollstaendige Knoten-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub knoten: KnotenEinstellungen,
    pub netzwerk: NetzwerkEinstellungen,
    pub transport: TransportEinstellungen,
    pub audio: AudioEinstellungen,
    /// Hoerbare Distanz je Voice-Level
    pub distanzen: DistanzTabelle,
    pub logging: LoggingEinstellungen,
}

/// Seite des Handshakes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rolle {
    /// Wartet auf eingehende Handshakes
    #[default]
    Responder,
    /// Baut den Handshake zur Gegenstelle auf
    Initiator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnotenEinstellungen {
    pub rolle: Rolle,
    /// Anzeigename (nur fuer Logs)
    pub name: String,
    /// Position des lokalen Hoerers in Weltkoordinaten
    pub position: Vec3,
    /// Voice-Level der eigenen Aufnahme
    pub voice_level: VoiceLevel,
}

impl Default for KnotenEinstellungen {
    fn default() -> Self {
        Self {
            rolle: Rolle::Responder,
            name: "nahfunk".into(),
            position: Vec3::NULL,
            voice_level: VoiceLevel::Talk,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer Handshake und Transporte
    pub bind_adresse: String,
    /// TCP-Port des Handshake-Kanals
    pub handshake_port: u16,
    /// Initiator: Host des Responders
    pub gegenstelle: String,
    /// Initiator: Versuche fuer den Aufbau des Handshake-Kanals
    pub verbindungs_versuche: u32,
    /// Pause zwischen zwei Versuchen
    pub wiederholung_ms: u64,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            handshake_port: 9870,
            gegenstelle: "127.0.0.1".into(),
            verbindungs_versuche: 5,
            wiederholung_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportEinstellungen {
    /// Unterstuetzte Transporte (`native`, `udp`, `tcp`)
    pub unterstuetzt: Vec<TransportArt>,
    /// Reserve fuer den einmaligen Fallback
    pub reserve: Option<TransportArt>,
    /// Host-nativen Kanal bereitstellen (nur innerhalb eines Prozesses nutzbar)
    pub native: bool,
    pub probe_zeitlimit_ms: u64,
    pub antwort_zeitlimit_ms: u64,
    pub keepalive_ms: u64,
    pub verbindungs_zeitlimit_ms: u64,
    pub audio_queue: usize,
}

impl Default for TransportEinstellungen {
    fn default() -> Self {
        Self {
            unterstuetzt: vec![TransportArt::Datagram, TransportArt::Stream],
            reserve: Some(TransportArt::Stream),
            native: false,
            probe_zeitlimit_ms: 5_000,
            antwort_zeitlimit_ms: 10_000,
            keepalive_ms: 5_000,
            verbindungs_zeitlimit_ms: 15_000,
            audio_queue: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Kapazitaet der Wiedergabepuffer in 20-ms-Segmenten
    pub puffer_kapazitaet: usize,
    /// Eigene Aufnahme lokal abspielen
    pub loopback: bool,
    /// Voice-Subsystem aktiv
    pub aktiviert: bool,
    pub codec: SprachCodecKonfig,
    /// Frequenz des Test-Sinus der Demo-Aufnahme (Hz)
    pub sinus_frequenz: f32,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            puffer_kapazitaet: 4,
            loopback: false,
            aktiviert: true,
            codec: SprachCodecKonfig::default(),
            sinus_frequenz: 440.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// trace, debug, info, warn, error
    pub level: String,
    /// text oder json
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl NodeConfig {
    /// Laedt die Konfiguration; eine fehlende Datei ergibt Standardwerte
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config: Self = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        self.bind_ip()?;
        if self.knoten.rolle == Rolle::Initiator {
            self.gegenstelle_ip()?;
        }
        if self.transport.unterstuetzt.is_empty() {
            anyhow::bail!("transport.unterstuetzt darf nicht leer sein");
        }
        let braucht_native = self.transport.unterstuetzt.contains(&TransportArt::Native)
            || self.transport.reserve == Some(TransportArt::Native);
        if braucht_native && !self.transport.native {
            tracing::warn!("Transport 'native' konfiguriert, aber transport.native = false; wird ignoriert");
        }
        if !crate::logging::log_format_gueltig(&self.logging.format) {
            anyhow::bail!(
                "logging.format muss 'text' oder 'json' sein (war: '{}')",
                self.logging.format
            );
        }
        if self.audio.puffer_kapazitaet == 0 {
            anyhow::bail!("audio.puffer_kapazitaet muss mindestens 1 sein");
        }
        self.audio
            .codec
            .validieren()
            .map_err(|e| anyhow::anyhow!("audio.codec: {e}"))?;
        Ok(())
    }

    pub fn bind_ip(&self) -> anyhow::Result<IpAddr> {
        self.netzwerk
            .bind_adresse
            .parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Bind-Adresse '{}': {e}", self.netzwerk.bind_adresse))
    }

    pub fn gegenstelle_ip(&self) -> anyhow::Result<IpAddr> {
        self.netzwerk
            .gegenstelle
            .parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Gegenstelle '{}': {e}", self.netzwerk.gegenstelle))
    }

    /// Bind-Adresse des Handshake-Listeners (Responder)
    pub fn handshake_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.handshake_port)
    }

    /// Handshake-Adresse der Gegenstelle (Initiator)
    pub fn handshake_ziel(&self) -> String {
        format!("{}:{}", self.netzwerk.gegenstelle, self.netzwerk.handshake_port)
    }

    pub fn wiederholung(&self) -> Duration {
        Duration::from_millis(self.netzwerk.wiederholung_ms)
    }

    /// Baut die Aushandlungs-Parameter fuer den Transport-Layer
    pub fn aushandlungs_konfig(&self) -> anyhow::Result<AushandlungsKonfig> {
        let t = &self.transport;
        Ok(AushandlungsKonfig {
            unterstuetzt: t.unterstuetzt.clone(),
            reserve: t.reserve,
            probe_zeitlimit: Duration::from_millis(t.probe_zeitlimit_ms),
            antwort_zeitlimit: Duration::from_millis(t.antwort_zeitlimit_ms),
            verbindung: VerbindungsKonfig {
                keepalive: Duration::from_millis(t.keepalive_ms),
                zeitlimit: Duration::from_millis(t.verbindungs_zeitlimit_ms),
                ..VerbindungsKonfig::default()
            },
            bind_ip: self.bind_ip()?,
            gegenstelle_ip: match self.knoten.rolle {
                Rolle::Initiator => self.gegenstelle_ip()?,
                Rolle::Responder => AushandlungsKonfig::default().gegenstelle_ip,
            },
            native: t.native.then(NativeVermittlung::neu),
            audio_queue: t.audio_queue,
        })
    }

    pub fn ausgabe_konfig(&self) -> AusgabeKonfig {
        AusgabeKonfig {
            puffer_kapazitaet: self.audio.puffer_kapazitaet,
            loopback: self.audio.loopback,
        }
    }
}
