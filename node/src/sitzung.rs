//! Sitzungstreiber – ein Peer-Paar von der Aushandlung bis zum Ende
//!
//! ## Ablauf
//! 1. Handshake-Kanal aufbauen (Initiator verbindet, Responder nimmt an)
//! 2. Transport aushandeln
//! 3. Betrieb: eingehendes Audio an den [`AusgabeManager`], alle 20 ms ein
//!    eigener Frame ueber den Transport
//! 4. Verlust mit Wiederverbindung (`Abrupt`, `Halbgeschlossen`): Quellen
//!    freigeben und komplett neu aushandeln. Geordnetes Ende: Quellen
//!    freigeben.
//!
//! Der Responder bleibt waehrend des Betriebs am Listener. Ein neuer
//! Handshake der Gegenstelle ersetzt den laufenden Transport.
//!
//! Abschied beim Schliessen: `Renegotiate`, solange die Sitzung weiterlaeuft
//! (Neuaushandlung, ersetzter Transport), `Goodbye` nur beim echten Ende.

use nahfunk_audio::AusgabeManager;
use nahfunk_core::{PeerId, SitzungsEreignis};
use nahfunk_protocol::codec::FRAME_MS;
use nahfunk_protocol::AudioPacket;
use nahfunk_transport::aushandlung::{antworten, initiieren};
use nahfunk_transport::{
    AushandlungsErgebnis, AushandlungsKonfig, FramedHandshake, SchliessArt, Transport,
    TransportEreignis, TransportFehler,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aufnahme::{Sendeseite, Takt};

/// Wie ein Betriebsabschnitt endete
#[derive(Debug)]
enum Ende {
    /// Transport verloren, Wiederverbindung erlaubt
    Neuaushandeln,
    /// Responder: die Gegenstelle hat bereits einen neuen Handshake begonnen
    NeuerHandshake(TcpStream),
    /// Geordnetes Ende oder Shutdown
    Beendet,
}

impl Ende {
    /// Abschied an die Gegenstelle beim Schliessen des Transports
    fn schliess_art(&self) -> SchliessArt {
        match self {
            Self::Neuaushandeln | Self::NeuerHandshake(_) => SchliessArt::Halbgeschlossen,
            Self::Beendet => SchliessArt::Geordnet,
        }
    }
}

pub struct SitzungsTreiber {
    konfig: AushandlungsKonfig,
    ausgabe: Arc<AusgabeManager>,
    sendeseite: Sendeseite,
    abbruch: CancellationToken,
    /// Absender, von denen in dieser Sitzung Audio kam
    bekannte_peers: HashSet<PeerId>,
}

impl SitzungsTreiber {
    pub fn neu(
        konfig: AushandlungsKonfig,
        ausgabe: Arc<AusgabeManager>,
        sendeseite: Sendeseite,
        abbruch: CancellationToken,
    ) -> Self {
        Self {
            konfig,
            ausgabe,
            sendeseite,
            abbruch,
            bekannte_peers: HashSet::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Initiator
    // -----------------------------------------------------------------------

    /// Handelt mit `ziel` aus und haelt die Sitzung bis zum Ende am Leben
    ///
    /// # Fehler
    /// - Handshake-Kanal nach `versuche` Versuchen nicht erreichbar
    /// - Aushandlung endgueltig gescheitert (Voice fuer diesen Peer nicht verfuegbar)
    pub async fn als_initiator(
        &mut self,
        ziel: &str,
        versuche: u32,
        pause: Duration,
    ) -> anyhow::Result<()> {
        let mut fehlversuche = 0u32;

        loop {
            let stream = match self.handshake_verbinden(ziel, versuche, pause).await {
                Ok(Some(stream)) => stream,
                Ok(None) => {
                    self.peers_freigeben();
                    return Ok(());
                }
                Err(e) => {
                    self.peers_freigeben();
                    return Err(e);
                }
            };
            let mut kanal = FramedHandshake::neu(stream);

            let ergebnis = match initiieren(&mut kanal, &self.konfig, &self.abbruch).await {
                Ok(e) => e,
                Err(TransportFehler::Beendet) => {
                    self.peers_freigeben();
                    return Ok(());
                }
                Err(e) if e.ist_aushandlungsfehler() => {
                    error!(%ziel, fehler = %e, "Voice nicht verfuegbar");
                    self.peers_freigeben();
                    return Err(e.into());
                }
                Err(e) => {
                    fehlversuche += 1;
                    if fehlversuche >= versuche.max(1) {
                        self.peers_freigeben();
                        return Err(e.into());
                    }
                    warn!(%ziel, fehler = %e, fehlversuche, "Aushandlung unterbrochen, neuer Versuch");
                    if !self.warten(pause).await {
                        self.peers_freigeben();
                        return Ok(());
                    }
                    continue;
                }
            };
            fehlversuche = 0;
            drop(kanal);

            let ende = self.betreiben(ergebnis, None).await;
            self.peers_freigeben();
            if matches!(ende, Ende::Beendet) {
                return Ok(());
            }
        }
    }

    async fn handshake_verbinden(
        &self,
        ziel: &str,
        versuche: u32,
        pause: Duration,
    ) -> anyhow::Result<Option<TcpStream>> {
        let versuche = versuche.max(1);
        for versuch in 1..=versuche {
            tokio::select! {
                _ = self.abbruch.cancelled() => return Ok(None),
                verbunden = TcpStream::connect(ziel) => match verbunden {
                    Ok(stream) => {
                        debug!(%ziel, versuch, "Handshake-Kanal verbunden");
                        return Ok(Some(stream));
                    }
                    Err(e) => warn!(%ziel, versuch, fehler = %e, "Handshake-Kanal nicht erreichbar"),
                },
            }
            if versuch < versuche && !self.warten(pause).await {
                return Ok(None);
            }
        }
        anyhow::bail!("Handshake-Kanal zu {ziel} nach {versuche} Versuchen nicht erreichbar")
    }

    // -----------------------------------------------------------------------
    // Responder
    // -----------------------------------------------------------------------

    /// Beantwortet Handshakes auf `listener`, bis der Knoten beendet wird
    pub async fn als_responder(&mut self, listener: TcpListener) -> anyhow::Result<()> {
        let mut wartend: Option<TcpStream> = None;

        loop {
            let stream = match wartend.take() {
                Some(stream) => stream,
                None => tokio::select! {
                    _ = self.abbruch.cancelled() => return Ok(()),
                    angenommen = listener.accept() => match angenommen {
                        Ok((stream, adresse)) => {
                            info!(%adresse, "Handshake-Kanal angenommen");
                            stream
                        }
                        Err(e) => {
                            warn!(fehler = %e, "Annahme fehlgeschlagen");
                            continue;
                        }
                    },
                },
            };
            let mut kanal = FramedHandshake::neu(stream);

            let ergebnis = match antworten(&mut kanal, &self.konfig, &self.abbruch).await {
                Ok(e) => e,
                Err(TransportFehler::Beendet) => return Ok(()),
                Err(e) => {
                    warn!(fehler = %e, "Aushandlung als Responder gescheitert");
                    continue;
                }
            };
            drop(kanal);

            let ende = self.betreiben(ergebnis, Some(&listener)).await;
            self.peers_freigeben();
            match ende {
                Ende::Neuaushandeln => {}
                Ende::NeuerHandshake(stream) => wartend = Some(stream),
                Ende::Beendet if self.abbruch.is_cancelled() => return Ok(()),
                Ende::Beendet => info!("Gegenstelle beendet, warte auf neuen Handshake"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Betrieb
    // -----------------------------------------------------------------------

    async fn betreiben(
        &mut self,
        ergebnis: AushandlungsErgebnis,
        listener: Option<&TcpListener>,
    ) -> Ende {
        let AushandlungsErgebnis {
            transport,
            mut audio_rx,
            mut ereignis_rx,
            verlauf,
        } = ergebnis;
        info!(
            transport = %transport.art(),
            fallbacks = verlauf.fallbacks,
            "Voice-Transport bereit"
        );

        let abbruch = self.abbruch.clone();
        let mut takt = tokio::time::interval(Duration::from_millis(u64::from(FRAME_MS)));
        takt.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut aufnahme_aktiv = true;

        let ende = loop {
            tokio::select! {
                _ = abbruch.cancelled() => break Ende::Beendet,

                Some(paket) = audio_rx.recv() => self.paket_empfangen(&paket),

                ereignis = ereignis_rx.recv() => match ereignis {
                    Some(TransportEreignis::VerbindungVerloren { art, schliess_art, wiederverbinden }) => {
                        if wiederverbinden {
                            info!(transport = %art, ?schliess_art, "Transport verloren, handle neu aus");
                            break Ende::Neuaushandeln;
                        }
                        info!(transport = %art, ?schliess_art, "Gegenstelle hat die Sitzung beendet");
                        break Ende::Beendet;
                    }
                    None => break Ende::Beendet,
                },

                _ = takt.tick(), if aufnahme_aktiv => {
                    if self.sendeseite.takt(&transport, &self.ausgabe).await == Takt::Erschoepft {
                        info!("Aufnahme beendet, sende nur noch Empfang");
                        aufnahme_aktiv = false;
                    }
                }

                angenommen = naechster_handshake(listener) => match angenommen {
                    Ok((stream, adresse)) => {
                        info!(%adresse, "Neuer Handshake waehrend des Betriebs");
                        break Ende::NeuerHandshake(stream);
                    }
                    Err(e) => warn!(fehler = %e, "Annahme fehlgeschlagen"),
                },
            }
        };

        let schliess_art = ende.schliess_art();
        transport.schliessen_als(schliess_art).await;
        info!(
            transport = %transport.art(),
            ?schliess_art,
            gesendet = self.sendeseite.gesendet(),
            verworfen = transport.verworfen(),
            "Transport geschlossen"
        );
        ende
    }

    fn paket_empfangen(&mut self, paket: &AudioPacket) {
        if self.bekannte_peers.insert(paket.sender) {
            info!(peer = %paket.sender, "Erstes Audio-Paket des Peers");
        }
        if let Err(e) = self.ausgabe.audio_paket_verarbeiten(paket) {
            warn!(peer = %paket.sender, fehler = %e, "Audio-Paket nicht verarbeitet");
        }
    }

    /// Meldet alle Peers dieser Sitzung als verlassen
    fn peers_freigeben(&mut self) {
        for peer_id in self.bekannte_peers.drain() {
            if let Err(e) = self
                .ausgabe
                .ereignis_verarbeiten(&SitzungsEreignis::PeerVerlassen { peer_id })
            {
                warn!(peer = %peer_id, fehler = %e, "Quelle nicht freigegeben");
            }
        }
    }

    /// Schlaeft `dauer`; `false` bei Shutdown
    async fn warten(&self, dauer: Duration) -> bool {
        tokio::select! {
            _ = self.abbruch.cancelled() => false,
            _ = tokio::time::sleep(dauer) => true,
        }
    }
}

async fn naechster_handshake(
    listener: Option<&TcpListener>,
) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(l) => l.accept().await,
        None => std::future::pending().await,
    }
}
