//! Datagram-Transport – Audio ueber UDP
//!
//! ```text
//! UDP Socket (recv_from)
//!     |
//!     v
//! TransportKern::eingang_verarbeiten()   <- Validierung, Readiness, Zustellung
//!     |
//!     +--> Ping  -> Pong an Absender
//!     +--> Audio -> registrierte Audio-Queue (try_send)
//! ```
//!
//! Der Responder kennt die Gegenstelle anfangs nicht; er lernt sie aus dem
//! ersten gueltigen Paket (der Readiness-Probe). Danach werden Pakete
//! fremder Absender verworfen.
//!
//! Liveness wie bei [`Verbindung`](crate::verbindung::Verbindung): alle
//! `keepalive` ein Ping an die bekannte Gegenstelle. Kommt fuer `zeitlimit`
//! kein gueltiges Paket, gilt der Transport als abrupt verloren.

use nahfunk_protocol::voice::MAX_NUTZDATEN_LAENGE;
use nahfunk_protocol::{AudioPacket, Nachricht};
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::art::TransportArt;
use crate::error::{TransportFehler, TransportResult};
use crate::kern::{Eingang, TransportKern};
use crate::verbindung::{SchliessArt, VerbindungsKonfig};
use crate::Transport;

/// Empfangspuffer: Header + maximale Nutzdaten + Reserve
const UDP_BUFFER_SIZE: usize = AudioPacket::HEADER_SIZE + MAX_NUTZDATEN_LAENGE + 64;

#[derive(Debug)]
pub struct DatagramTransport {
    kern: Arc<TransportKern>,
    socket: Arc<UdpSocket>,
    ziel: Arc<RwLock<Option<SocketAddr>>>,
    abbruch: CancellationToken,
}

impl DatagramTransport {
    /// Responder: bindet einen freien Port auf `bind_ip`
    pub async fn binden(bind_ip: IpAddr, konfig: VerbindungsKonfig) -> TransportResult<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0)).await?;
        Ok(Self::starten(socket, None, konfig))
    }

    /// Initiator: bindet einen lokalen Port und sendet an `ziel`
    pub async fn verbinden(ziel: SocketAddr, konfig: VerbindungsKonfig) -> TransportResult<Self> {
        let lokal: IpAddr = if ziel.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        let socket = UdpSocket::bind(SocketAddr::new(lokal, 0)).await?;
        Ok(Self::starten(socket, Some(ziel), konfig))
    }

    fn starten(socket: UdpSocket, ziel: Option<SocketAddr>, konfig: VerbindungsKonfig) -> Self {
        let socket = Arc::new(socket);
        let kern = TransportKern::neu(TransportArt::Datagram);
        let ziel = Arc::new(RwLock::new(ziel));
        let abbruch = CancellationToken::new();

        tokio::spawn(empfangs_schleife(
            Arc::clone(&socket),
            Arc::clone(&kern),
            Arc::clone(&ziel),
            konfig,
            abbruch.clone(),
        ));

        Self {
            kern,
            socket,
            ziel,
            abbruch,
        }
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn lokaler_port(&self) -> TransportResult<u16> {
        Ok(self.lokale_adresse()?.port())
    }

    /// Bekannte Gegenstelle (beim Responder erst nach dem ersten Paket)
    pub fn ziel(&self) -> Option<SocketAddr> {
        *self.ziel.read()
    }
}

impl Transport for DatagramTransport {
    fn art(&self) -> TransportArt {
        TransportArt::Datagram
    }

    fn kern(&self) -> &Arc<TransportKern> {
        &self.kern
    }

    async fn senden(&self, nachricht: &Nachricht) -> TransportResult<()> {
        let ziel = self
            .ziel()
            .ok_or(TransportFehler::NichtVerbunden(TransportArt::Datagram))?;
        self.socket.send_to(&nachricht.encode(), ziel).await?;
        Ok(())
    }

    async fn schliessen_als(&self, art: SchliessArt) {
        if self.abbruch.is_cancelled() {
            return;
        }
        if let Some(abschied) = art.abschied().filter(|_| self.kern.ist_bereit()) {
            let _ = self.senden(&abschied).await;
        }
        self.kern.abmelden();
        self.abbruch.cancel();
    }
}

impl Drop for DatagramTransport {
    fn drop(&mut self) {
        self.abbruch.cancel();
    }
}

async fn empfangs_schleife(
    socket: Arc<UdpSocket>,
    kern: Arc<TransportKern>,
    ziel: Arc<RwLock<Option<SocketAddr>>>,
    konfig: VerbindungsKonfig,
    abbruch: CancellationToken,
) {
    let mut buf = [0u8; UDP_BUFFER_SIZE];
    let mut letzter_empfang = Instant::now();
    let mut naechster_ping = Instant::now() + konfig.keepalive;

    loop {
        // Die Frist laeuft erst, wenn eine Gegenstelle bekannt ist
        if ziel.read().is_none() {
            letzter_empfang = Instant::now();
        }
        let frist = letzter_empfang + konfig.zeitlimit;
        if Instant::now() >= frist {
            tracing::warn!(gegenstelle = ?*ziel.read(), "UDP-Gegenstelle stumm, Verbindungs-Timeout");
            kern.verbindung_verloren(SchliessArt::Abrupt);
            break;
        }

        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (len, absender) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        // z.B. ICMP Port Unreachable der Gegenstelle
                        tracing::debug!(fehler = %e, "UDP-Empfangsfehler");
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        continue;
                    }
                };

                let bekannt = *ziel.read();
                if bekannt.is_some_and(|z| z != absender) {
                    kern.verwerfen();
                    tracing::debug!(absender = %absender, "Paket von fremdem Absender verworfen");
                    continue;
                }

                let eingang = kern.eingang_verarbeiten(&buf[..len]);
                if eingang != Eingang::Verworfen {
                    letzter_empfang = Instant::now();
                    if bekannt.is_none() {
                        *ziel.write() = Some(absender);
                        tracing::debug!(gegenstelle = %absender, "UDP-Gegenstelle gelernt");
                    }
                }

                match eingang {
                    Eingang::PongAntworten => {
                        if let Err(e) = socket.send_to(&Nachricht::Pong.encode(), absender).await {
                            tracing::warn!(fehler = %e, ziel = %absender, "Pong-Senden fehlgeschlagen");
                        }
                    }
                    Eingang::Goodbye => {
                        kern.verbindung_verloren(SchliessArt::Geordnet);
                        break;
                    }
                    Eingang::Renegotiate => {
                        kern.verbindung_verloren(SchliessArt::Halbgeschlossen);
                        break;
                    }
                    Eingang::Verarbeitet | Eingang::Verworfen => {}
                }
            }

            _ = tokio::time::sleep_until(naechster_ping.min(frist)) => {
                if Instant::now() >= naechster_ping {
                    let bekannt = *ziel.read();
                    if let Some(gegenstelle) = bekannt {
                        if let Err(e) = socket.send_to(&Nachricht::Ping.encode(), gegenstelle).await {
                            tracing::debug!(fehler = %e, ziel = %gegenstelle, "Keepalive nicht gesendet");
                        }
                    }
                    naechster_ping = Instant::now() + konfig.keepalive;
                }
            }

            _ = abbruch.cancelled() => break,
        }
    }

    tracing::debug!("UDP-Empfangs-Task beendet");
}

#[cfg(test)]
mod tests {
    use super::*;
    use nahfunk_core::{PeerId, VoiceLevel};
    use crate::kern::TransportEreignis;
    use tokio::sync::mpsc;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn puffer_reicht_fuer_maximales_paket() {
        assert!(UDP_BUFFER_SIZE >= AudioPacket::HEADER_SIZE + MAX_NUTZDATEN_LAENGE);
    }

    #[tokio::test]
    async fn probe_und_audio() {
        let responder = DatagramTransport::binden(LOCALHOST, VerbindungsKonfig::default()).await.unwrap();
        let port = responder.lokaler_port().unwrap();
        let initiator = DatagramTransport::verbinden(SocketAddr::new(LOCALHOST, port), VerbindungsKonfig::default())
            .await
            .unwrap();

        let abbruch = CancellationToken::new();
        initiator.senden(&Nachricht::Ping).await.unwrap();
        assert!(
            initiator
                .kern()
                .auf_pong_warten(Duration::from_secs(2), &abbruch)
                .await
        );
        assert_eq!(
            responder.ziel(),
            Some(initiator.lokale_adresse().map(|a| SocketAddr::new(LOCALHOST, a.port())).unwrap())
        );

        let (tx, mut rx) = mpsc::channel(4);
        responder.kern().audio_empfaenger_registrieren(tx);
        responder.kern().bereit_setzen(true);

        let paket = AudioPacket::neu(PeerId::new(), 1, VoiceLevel::Whisper, vec![7; 40]);
        initiator.senden(&Nachricht::Audio(paket.clone())).await.unwrap();
        let empfangen = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(empfangen, paket);
    }

    #[tokio::test]
    async fn schweigende_gegenstelle_probe_scheitert() {
        let stumm = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
        let initiator = DatagramTransport::verbinden(stumm.local_addr().unwrap(), VerbindungsKonfig::default())
            .await
            .unwrap();
        initiator.senden(&Nachricht::Ping).await.unwrap();
        let abbruch = CancellationToken::new();
        assert!(
            !initiator
                .kern()
                .auf_pong_warten(Duration::from_millis(100), &abbruch)
                .await
        );
    }

    fn schnell() -> VerbindungsKonfig {
        VerbindungsKonfig {
            keepalive: Duration::from_millis(50),
            zeitlimit: Duration::from_millis(300),
            ..Default::default()
        }
    }

    async fn verbundenes_paar() -> (DatagramTransport, DatagramTransport) {
        let responder = DatagramTransport::binden(LOCALHOST, schnell()).await.unwrap();
        let ziel = SocketAddr::new(LOCALHOST, responder.lokaler_port().unwrap());
        let initiator = DatagramTransport::verbinden(ziel, schnell()).await.unwrap();
        initiator.senden(&Nachricht::Ping).await.unwrap();
        assert!(
            initiator
                .kern()
                .auf_pong_warten(Duration::from_secs(2), &CancellationToken::new())
                .await
        );
        (responder, initiator)
    }

    #[tokio::test]
    async fn halbgeschlossen_meldet_wiederverbinden() {
        let (responder, initiator) = verbundenes_paar().await;
        responder.kern().bereit_setzen(true);
        let (tx, mut rx) = mpsc::channel(1);
        initiator.kern().ereignis_empfaenger_registrieren(tx);

        responder.schliessen_als(SchliessArt::Halbgeschlossen).await;
        let ereignis = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            ereignis,
            TransportEreignis::VerbindungVerloren {
                art: TransportArt::Datagram,
                schliess_art: SchliessArt::Halbgeschlossen,
                wiederverbinden: true,
            }
        );
    }
}
