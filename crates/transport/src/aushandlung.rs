//! Transport-Aushandlung mit Readiness-Probe und einmaligem Fallback
//!
//! ## Ablauf
//! 1. Initiator sendet `Angebot` mit seinen unterstuetzten Transporten.
//! 2. Responder bildet die Schnittmenge mit seinen akzeptierten Transporten
//!    (unterstuetzte plus eigene Reserve), waehlt die hoechste statische
//!    Prioritaet, oeffnet den Transport und antwortet mit `Auswahl`
//!    (oder `Ablehnung`).
//! 3. Initiator oeffnet seine Seite und schickt einen Ping ueber den neuen
//!    Transport. Kommt innerhalb des Probe-Zeitlimits kein Pong, gilt der
//!    Transport als gescheitert.
//! 4. Bei Scheitern oder Ablehnung wird genau einmal auf den
//!    Reserve-Transport gewechselt und der Handshake mit `Angebot [reserve]`
//!    wiederholt. Ohne Reserve: `Abbruch`, Voice ist fuer diesen Peer nicht
//!    verfuegbar.
//! 5. Bei Erfolg: `Bestaetigung`, beide Seiten markieren den Transport als
//!    bereit und registrieren die Audio-Queue. Verworfene Transporte werden
//!    geschlossen und abgemeldet.

use nahfunk_protocol::{AudioPacket, HandshakeNachricht, Nachricht, TransportParameter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::aktiv::AktiverTransport;
use crate::art::{beste_gemeinsame, TransportArt, TransportZustand};
use crate::datagram::DatagramTransport;
use crate::error::{TransportFehler, TransportResult};
use crate::handshake_kanal::HandshakeKanal;
use crate::kern::TransportEreignis;
use crate::native::NativeVermittlung;
use crate::stream::StreamTransport;
use crate::verbindung::VerbindungsKonfig;
use crate::Transport;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AushandlungsKonfig {
    /// Unterstuetzte Transporte in Praeferenz-Reihenfolge
    pub unterstuetzt: Vec<TransportArt>,
    /// Reserve-Transport fuer den einmaligen Fallback
    pub reserve: Option<TransportArt>,
    /// Wartezeit auf den Pong der Readiness-Probe
    pub probe_zeitlimit: Duration,
    /// Wartezeit auf die naechste Handshake-Nachricht
    pub antwort_zeitlimit: Duration,
    pub verbindung: VerbindungsKonfig,
    /// Responder: Adresse, auf der Transporte geoeffnet werden
    pub bind_ip: IpAddr,
    /// Initiator: Adresse des Responders
    pub gegenstelle_ip: IpAddr,
    /// Host-nativer Kanal; ohne Vermittlung wird `native` nie angeboten
    pub native: Option<NativeVermittlung>,
    /// Groesse der Audio-Empfangsqueue
    pub audio_queue: usize,
}

impl Default for AushandlungsKonfig {
    fn default() -> Self {
        Self {
            unterstuetzt: vec![TransportArt::Datagram, TransportArt::Stream],
            reserve: Some(TransportArt::Stream),
            probe_zeitlimit: Duration::from_secs(5),
            antwort_zeitlimit: Duration::from_secs(10),
            verbindung: VerbindungsKonfig::default(),
            bind_ip: Ipv4Addr::UNSPECIFIED.into(),
            gegenstelle_ip: Ipv4Addr::LOCALHOST.into(),
            native: None,
            audio_queue: 64,
        }
    }
}

impl AushandlungsKonfig {
    fn verfuegbar(&self, art: TransportArt) -> bool {
        art != TransportArt::Native || self.native.is_some()
    }

    /// Was der Initiator anbietet
    pub fn angebot(&self) -> Vec<TransportArt> {
        self.unterstuetzt
            .iter()
            .copied()
            .filter(|a| self.verfuegbar(*a))
            .collect()
    }

    /// Was der Responder akzeptiert: unterstuetzte Transporte plus Reserve
    pub fn akzeptiert(&self) -> Vec<TransportArt> {
        let mut arten = self.angebot();
        if let Some(r) = self.reserve.filter(|r| self.verfuegbar(*r)) {
            if !arten.contains(&r) {
                arten.push(r);
            }
        }
        arten
    }
}

// ---------------------------------------------------------------------------
// Verlauf und Ergebnis
// ---------------------------------------------------------------------------

/// Beobachtbarer Zustandsverlauf einer Aushandlung
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verlauf {
    pub eintraege: Vec<(TransportArt, TransportZustand)>,
    pub fallbacks: u32,
}

impl Verlauf {
    fn eintragen(&mut self, art: TransportArt, zustand: TransportZustand) {
        tracing::debug!(transport = %art, ?zustand, "Transport-Zustand");
        self.eintraege.push((art, zustand));
    }

    /// Wie oft wurde `zustand` erreicht?
    pub fn anzahl(&self, zustand: TransportZustand) -> usize {
        self.eintraege.iter().filter(|(_, z)| *z == zustand).count()
    }

    pub fn letzter(&self) -> Option<(TransportArt, TransportZustand)> {
        self.eintraege.last().copied()
    }
}

/// Ergebnis einer erfolgreichen Aushandlung
pub struct AushandlungsErgebnis {
    pub transport: AktiverTransport,
    /// Eingehende Audio-Pakete des Peers
    pub audio_rx: mpsc::Receiver<AudioPacket>,
    /// Verbindungsverlust des Transports
    pub ereignis_rx: mpsc::Receiver<TransportEreignis>,
    pub verlauf: Verlauf,
}

fn abschliessen(
    transport: AktiverTransport,
    konfig: &AushandlungsKonfig,
    verlauf: Verlauf,
) -> AushandlungsErgebnis {
    let (audio_tx, audio_rx) = mpsc::channel(konfig.audio_queue.max(1));
    let (ereignis_tx, ereignis_rx) = mpsc::channel(8);
    let kern = transport.kern();
    kern.audio_empfaenger_registrieren(audio_tx);
    kern.ereignis_empfaenger_registrieren(ereignis_tx);
    kern.bereit_setzen(true);
    AushandlungsErgebnis {
        transport,
        audio_rx,
        ereignis_rx,
        verlauf,
    }
}

// ---------------------------------------------------------------------------
// Readiness-Probe
// ---------------------------------------------------------------------------

/// Sendet einen Ping und wartet hoechstens `zeitlimit` auf den Pong
///
/// Kein Pong bedeutet: der Transport funktioniert nicht (nicht: er ist langsam).
pub async fn readiness_pruefen<T: Transport>(
    transport: &T,
    zeitlimit: Duration,
    abbruch: &CancellationToken,
) -> bool {
    if let Err(e) = transport.senden(&Nachricht::Ping).await {
        tracing::warn!(transport = %transport.art(), fehler = %e, "Probe-Ping nicht gesendet");
        return false;
    }
    transport.kern().auf_pong_warten(zeitlimit, abbruch).await
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

async fn empfangen<K: HandshakeKanal>(
    kanal: &mut K,
    frist: Duration,
    abbruch: &CancellationToken,
) -> TransportResult<HandshakeNachricht> {
    tokio::select! {
        r = tokio::time::timeout(frist, kanal.empfangen()) => {
            r.map_err(|_| TransportFehler::Zeitlimit("Handshake-Antwort"))?
        }
        _ = abbruch.cancelled() => Err(TransportFehler::Beendet),
    }
}

/// Meldet der Gegenseite den Abbruch (best effort) und gibt den Fehler zurueck
async fn abbrechen<K: HandshakeKanal, T>(kanal: &mut K, fehler: TransportFehler) -> TransportResult<T> {
    let _ = kanal
        .senden(&HandshakeNachricht::Abbruch {
            grund: fehler.to_string(),
        })
        .await;
    Err(fehler)
}

fn port_aus(art: TransportArt, parameter: &TransportParameter) -> TransportResult<u16> {
    parameter.port.ok_or_else(|| TransportFehler::Oeffnen {
        art,
        grund: "Port fehlt in der Auswahl".into(),
    })
}

async fn initiator_oeffnen(
    art: TransportArt,
    parameter: &TransportParameter,
    konfig: &AushandlungsKonfig,
) -> TransportResult<AktiverTransport> {
    match art {
        TransportArt::Native => {
            let nummer = port_aus(art, parameter)?;
            konfig
                .native
                .as_ref()
                .and_then(|v| v.abholen(nummer))
                .map(AktiverTransport::Native)
                .ok_or_else(|| TransportFehler::Oeffnen {
                    art,
                    grund: format!("kein nativer Kanal {nummer} bereitgestellt"),
                })
        }
        TransportArt::Datagram => {
            let ziel = SocketAddr::new(konfig.gegenstelle_ip, port_aus(art, parameter)?);
            Ok(AktiverTransport::Datagram(
                DatagramTransport::verbinden(ziel, konfig.verbindung).await?,
            ))
        }
        TransportArt::Stream => {
            let ziel = SocketAddr::new(konfig.gegenstelle_ip, port_aus(art, parameter)?);
            Ok(AktiverTransport::Stream(
                StreamTransport::verbinden(ziel, konfig.verbindung).await?,
            ))
        }
    }
}

async fn responder_oeffnen(
    art: TransportArt,
    konfig: &AushandlungsKonfig,
) -> TransportResult<(AktiverTransport, TransportParameter)> {
    match art {
        TransportArt::Native => {
            let vermittlung = konfig.native.as_ref().ok_or_else(|| TransportFehler::Oeffnen {
                art,
                grund: "kein nativer Kanal bereitgestellt".into(),
            })?;
            let (transport, nummer) = vermittlung.anbieten();
            Ok((
                AktiverTransport::Native(transport),
                TransportParameter::mit_port(nummer),
            ))
        }
        TransportArt::Datagram => {
            let t = DatagramTransport::binden(konfig.bind_ip, konfig.verbindung).await?;
            let port = t.lokaler_port()?;
            Ok((AktiverTransport::Datagram(t), TransportParameter::mit_port(port)))
        }
        TransportArt::Stream => {
            let t = StreamTransport::lauschen(
                konfig.bind_ip,
                konfig.verbindung,
                konfig.antwort_zeitlimit,
            )
            .await?;
            let port = t.lokaler_port();
            Ok((AktiverTransport::Stream(t), TransportParameter::mit_port(port)))
        }
    }
}

/// Oeffnet die Initiator-Seite und fuehrt die Readiness-Probe aus
///
/// `Err` enthaelt den Grund des Scheiterns fuer den Fallback.
async fn versuchen(
    art: TransportArt,
    parameter: &TransportParameter,
    konfig: &AushandlungsKonfig,
    verlauf: &mut Verlauf,
    abbruch: &CancellationToken,
) -> Result<AktiverTransport, String> {
    verlauf.eintragen(art, TransportZustand::Verbindend);
    let transport = match initiator_oeffnen(art, parameter, konfig).await {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(transport = %art, fehler = %e, "Transport nicht geoeffnet");
            verlauf.eintragen(art, TransportZustand::Fehlgeschlagen);
            return Err(e.to_string());
        }
    };

    verlauf.eintragen(art, TransportZustand::ReadinessPruefung);
    if readiness_pruefen(&transport, konfig.probe_zeitlimit, abbruch).await {
        verlauf.eintragen(art, TransportZustand::Bereit);
        Ok(transport)
    } else {
        tracing::warn!(transport = %art, zeitlimit = ?konfig.probe_zeitlimit, "Readiness-Probe ohne Pong");
        verlauf.eintragen(art, TransportZustand::Fehlgeschlagen);
        transport.schliessen().await;
        Err(format!("Readiness-Probe ueber {art} ohne Antwort"))
    }
}

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

/// Fuehrt die Aushandlung als Initiator durch
///
/// # Fehler
/// - `AushandlungFehlgeschlagen` wenn auch nach dem Fallback kein Transport
///   funktioniert (die Gegenseite erhielt `Abbruch`)
/// - `Abgebrochen` wenn die Gegenseite abbricht
/// - Kanal-, Zeitlimit- und Protokollfehler des Handshake-Kanals
pub async fn initiieren<K: HandshakeKanal>(
    kanal: &mut K,
    konfig: &AushandlungsKonfig,
    abbruch: &CancellationToken,
) -> TransportResult<AushandlungsErgebnis> {
    let mut verlauf = Verlauf::default();
    let mut angebot = konfig.angebot();
    let mut reserve = konfig.reserve.filter(|r| konfig.verfuegbar(*r));

    loop {
        kanal
            .senden(&HandshakeNachricht::Angebot {
                transports: angebot.iter().map(|a| a.kennung().to_string()).collect(),
            })
            .await?;

        let grund = match empfangen(kanal, konfig.antwort_zeitlimit, abbruch).await? {
            HandshakeNachricht::Auswahl {
                transport,
                parameter,
            } => {
                let Some(art) = TransportArt::aus_kennung(&transport).filter(|a| angebot.contains(a))
                else {
                    return abbrechen(
                        kanal,
                        TransportFehler::Protokoll(format!(
                            "Auswahl ausserhalb des Angebots: {transport}"
                        )),
                    )
                    .await;
                };
                if reserve == Some(art) {
                    reserve = None;
                }

                match versuchen(art, &parameter, konfig, &mut verlauf, abbruch).await {
                    Ok(aktiv) => {
                        let bestaetigung = HandshakeNachricht::Bestaetigung {
                            transport,
                            parameter,
                        };
                        if let Err(e) = kanal.senden(&bestaetigung).await {
                            aktiv.schliessen().await;
                            return Err(e);
                        }
                        tracing::info!(transport = %art, fallbacks = verlauf.fallbacks, "Transport bereit");
                        return Ok(abschliessen(aktiv, konfig, verlauf));
                    }
                    Err(grund) => grund,
                }
            }
            HandshakeNachricht::Ablehnung { grund } => {
                tracing::warn!(%grund, "Angebot abgelehnt");
                format!("abgelehnt: {grund}")
            }
            HandshakeNachricht::Abbruch { grund } => {
                return Err(TransportFehler::Abgebrochen { grund });
            }
            andere => {
                return abbrechen(
                    kanal,
                    TransportFehler::Protokoll(format!(
                        "unerwartete Nachricht: {}",
                        andere.bezeichnung()
                    )),
                )
                .await;
            }
        };

        if abbruch.is_cancelled() {
            return Err(TransportFehler::Beendet);
        }

        match reserve.take() {
            Some(r) => {
                verlauf.fallbacks += 1;
                tracing::warn!(reserve = %r, %grund, "Wechsel auf Reserve-Transport");
                angebot = vec![r];
            }
            None => {
                let grund = format!("kein funktionierender Transport ({grund})");
                let _ = kanal
                    .senden(&HandshakeNachricht::Abbruch {
                        grund: grund.clone(),
                    })
                    .await;
                tracing::error!(%grund, "Aushandlung gescheitert, Voice nicht verfuegbar");
                return Err(TransportFehler::AushandlungFehlgeschlagen { grund });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Fuehrt die Aushandlung als Responder durch
pub async fn antworten<K: HandshakeKanal>(
    kanal: &mut K,
    konfig: &AushandlungsKonfig,
    abbruch: &CancellationToken,
) -> TransportResult<AushandlungsErgebnis> {
    let mut verlauf = Verlauf::default();
    let akzeptiert = konfig.akzeptiert();
    let mut offen: Option<AktiverTransport> = None;

    let ergebnis = loop {
        let nachricht = match empfangen(kanal, konfig.antwort_zeitlimit, abbruch).await {
            Ok(n) => n,
            Err(e) => break Err(e),
        };

        match nachricht {
            HandshakeNachricht::Angebot { transports } => {
                // Neues Angebot nach einer Auswahl heisst: die Probe ist gescheitert
                if let Some(alt) = offen.take() {
                    verlauf.eintragen(alt.art(), TransportZustand::Fehlgeschlagen);
                    verlauf.fallbacks += 1;
                    alt.schliessen().await;
                }

                let angeboten: Vec<TransportArt> = transports
                    .iter()
                    .filter_map(|k| TransportArt::aus_kennung(k))
                    .collect();
                let Some(art) = beste_gemeinsame(&angeboten, &akzeptiert) else {
                    let grund = format!("keine gemeinsame Transport-Art (angeboten: {transports:?})");
                    tracing::warn!(%grund, "Angebot abgelehnt");
                    if let Err(e) = kanal.senden(&HandshakeNachricht::Ablehnung { grund }).await {
                        break Err(e);
                    }
                    continue;
                };

                verlauf.eintragen(art, TransportZustand::Verbindend);
                let antwort = match responder_oeffnen(art, konfig).await {
                    Ok((transport, parameter)) => {
                        verlauf.eintragen(art, TransportZustand::ReadinessPruefung);
                        offen = Some(transport);
                        HandshakeNachricht::Auswahl {
                            transport: art.kennung().to_string(),
                            parameter,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(transport = %art, fehler = %e, "Transport nicht geoeffnet");
                        verlauf.eintragen(art, TransportZustand::Fehlgeschlagen);
                        HandshakeNachricht::Ablehnung {
                            grund: e.to_string(),
                        }
                    }
                };
                if let Err(e) = kanal.senden(&antwort).await {
                    break Err(e);
                }
            }
            HandshakeNachricht::Bestaetigung { transport, .. } => match offen.take() {
                Some(t) if t.art().kennung() == transport => {
                    verlauf.eintragen(t.art(), TransportZustand::Bereit);
                    tracing::info!(transport = %t.art(), "Transport bereit");
                    break Ok(abschliessen(t, konfig, verlauf));
                }
                anderer => {
                    offen = anderer;
                    break Err(TransportFehler::Protokoll(format!(
                        "Bestaetigung fuer nicht ausgewaehlten Transport {transport}"
                    )));
                }
            },
            HandshakeNachricht::Abbruch { grund } => {
                tracing::warn!(%grund, "Initiator hat die Aushandlung abgebrochen");
                break Err(TransportFehler::Abgebrochen { grund });
            }
            andere => {
                break Err(TransportFehler::Protokoll(format!(
                    "unerwartete Nachricht: {}",
                    andere.bezeichnung()
                )));
            }
        }
    };

    if ergebnis.is_err() {
        if let Some(t) = offen.take() {
            t.schliessen().await;
        }
    }
    ergebnis
}
