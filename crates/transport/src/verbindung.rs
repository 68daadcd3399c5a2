//! Zuverlaessige Verbindung – eine TCP-Verbindung mit Keepalive
//!
//! Jede Verbindung bekommt eine eigene tokio-Task, die Frames via
//! `FrameCodec` liest, ausgehende Nachrichten aus einer Queue schreibt und
//! Keepalive-Pings sendet.
//!
//! ## State Machine
//! ```text
//! Getrennt -> Verbindend -> Verbunden -> Schliessend -> Geschlossen
//! ```
//!
//! `Getrennt` meldet nur der Stream-Transport, solange noch keine
//! Verbindung steht. Eine `Verbindung` beginnt in `Verbindend` und wechselt
//! nach `Verbunden`, sobald ihre Lese-Task laeuft.
//!
//! ## Schliess-Arten
//! - `Geordnet`: Goodbye (Shutdown)
//! - `Abrupt`: EOF ohne Abschied, Reset, Liveness-Timeout
//! - `Halbgeschlossen`: Renegotiate (Transport wird durch eine neue
//!   Aushandlung abgeloest)
//!
//! Nur `Abrupt` und `Halbgeschlossen` berechtigen zum Wiederverbinden. Beim
//! lokalen Schliessen bestimmt die Art, welchen Abschied die Gegenseite
//! erhaelt.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use nahfunk_protocol::wire::FrameCodec;
use nahfunk_protocol::Nachricht;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::art::TransportArt;
use crate::error::{TransportFehler, TransportResult};
use crate::kern::{Eingang, TransportKern};

// ---------------------------------------------------------------------------
// Zustaende
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    Getrennt,
    Verbindend,
    Verbunden,
    Schliessend,
    Geschlossen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchliessArt {
    Geordnet,
    Abrupt,
    Halbgeschlossen,
}

impl SchliessArt {
    pub fn wiederverbinden_erlaubt(&self) -> bool {
        !matches!(self, Self::Geordnet)
    }

    /// Nachricht an die Gegenseite beim lokalen Schliessen
    pub fn abschied(&self) -> Option<Nachricht> {
        match self {
            Self::Geordnet => Some(Nachricht::Goodbye),
            Self::Halbgeschlossen => Some(Nachricht::Renegotiate),
            Self::Abrupt => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct VerbindungsKonfig {
    /// Abstand der Keepalive-Pings
    pub keepalive: Duration,
    /// Ohne eingehenden Frame fuer diese Dauer gilt die Verbindung als tot
    pub zeitlimit: Duration,
    /// Maximale Dauer des TCP-Verbindungsaufbaus
    pub aufbau_zeitlimit: Duration,
    /// Groesse der ausgehenden Queue
    pub sende_queue: usize,
}

impl Default for VerbindungsKonfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(5),
            zeitlimit: Duration::from_secs(15),
            aufbau_zeitlimit: Duration::from_secs(5),
            sende_queue: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Verbindung
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Geteilt {
    zustand: RwLock<VerbindungsZustand>,
    schliess_art: RwLock<Option<SchliessArt>>,
}

#[derive(Debug)]
pub struct Verbindung {
    geteilt: Arc<Geteilt>,
    kern: Arc<TransportKern>,
    sende_tx: mpsc::Sender<Bytes>,
    abbruch: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    peer_addr: SocketAddr,
    lokale_addr: SocketAddr,
}

impl Verbindung {
    /// Baut eine Verbindung zu `ziel` auf
    pub async fn verbinden(
        ziel: SocketAddr,
        konfig: VerbindungsKonfig,
        kern: Arc<TransportKern>,
    ) -> TransportResult<Self> {
        tracing::debug!(ziel = %ziel, "Verbindungsaufbau");
        let stream = tokio::time::timeout(konfig.aufbau_zeitlimit, TcpStream::connect(ziel))
            .await
            .map_err(|_| TransportFehler::Zeitlimit("TCP-Verbindungsaufbau"))??;
        Self::aus_stream(stream, konfig, kern)
    }

    /// Uebernimmt einen bereits verbundenen Stream und startet die Lese-Task
    pub fn aus_stream(
        stream: TcpStream,
        konfig: VerbindungsKonfig,
        kern: Arc<TransportKern>,
    ) -> TransportResult<Self> {
        let peer_addr = stream.peer_addr()?;
        let lokale_addr = stream.local_addr()?;
        let _ = stream.set_nodelay(true);

        let geteilt = Arc::new(Geteilt {
            zustand: RwLock::new(VerbindungsZustand::Verbindend),
            schliess_art: RwLock::new(None),
        });
        let (sende_tx, sende_rx) = mpsc::channel(konfig.sende_queue.max(1));
        let abbruch = CancellationToken::new();

        let task = tokio::spawn(lese_schleife(
            Framed::new(stream, FrameCodec::new()),
            sende_rx,
            Arc::clone(&kern),
            Arc::clone(&geteilt),
            konfig,
            abbruch.clone(),
            peer_addr,
        ));

        tracing::info!(peer = %peer_addr, lokal = %lokale_addr, "Verbindung hergestellt");

        Ok(Self {
            geteilt,
            kern,
            sende_tx,
            abbruch,
            task: Mutex::new(Some(task)),
            peer_addr,
            lokale_addr,
        })
    }

    pub fn zustand(&self) -> VerbindungsZustand {
        *self.geteilt.zustand.read()
    }

    /// Art des Schliessens, sobald die Verbindung geschlossen ist
    pub fn schliess_art(&self) -> Option<SchliessArt> {
        *self.geteilt.schliess_art.read()
    }

    pub fn ist_offen(&self) -> bool {
        matches!(
            self.zustand(),
            VerbindungsZustand::Verbindend | VerbindungsZustand::Verbunden
        )
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn lokale_addr(&self) -> SocketAddr {
        self.lokale_addr
    }

    /// Reiht eine Nachricht in die Sende-Queue ein
    ///
    /// Eine volle Queue verwirft die Nachricht (gezaehlt), statt zu blockieren.
    pub fn senden(&self, daten: Bytes) -> TransportResult<()> {
        match self.sende_tx.try_send(daten) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.kern.verwerfen();
                tracing::trace!(peer = %self.peer_addr, "Sende-Queue voll");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(TransportFehler::NichtVerbunden(TransportArt::Stream))
            }
        }
    }

    /// Schliesst die Verbindung geordnet (sendet Goodbye). Idempotent.
    pub async fn schliessen(&self) {
        self.schliessen_als(SchliessArt::Geordnet).await;
    }

    /// Schliesst mit dem Abschied von `art`; idempotent
    pub async fn schliessen_als(&self, art: SchliessArt) {
        {
            let mut zustand = self.geteilt.zustand.write();
            if matches!(
                *zustand,
                VerbindungsZustand::Schliessend | VerbindungsZustand::Geschlossen
            ) {
                return;
            }
            *zustand = VerbindungsZustand::Schliessend;
        }
        *self.geteilt.schliess_art.write() = Some(art);
        self.abbruch.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Verbindung {
    fn drop(&mut self) {
        self.abbruch.cancel();
    }
}

// ---------------------------------------------------------------------------
// Lese-Task
// ---------------------------------------------------------------------------

async fn lese_schleife(
    mut framed: Framed<TcpStream, FrameCodec>,
    mut sende_rx: mpsc::Receiver<Bytes>,
    kern: Arc<TransportKern>,
    geteilt: Arc<Geteilt>,
    konfig: VerbindungsKonfig,
    abbruch: CancellationToken,
    peer_addr: SocketAddr,
) {
    let mut letzter_empfang = Instant::now();
    let mut naechster_ping = Instant::now() + konfig.keepalive;
    let mut lokal = false;

    {
        let mut zustand = geteilt.zustand.write();
        if *zustand == VerbindungsZustand::Verbindend {
            *zustand = VerbindungsZustand::Verbunden;
        }
    }

    let art = loop {
        let frist = letzter_empfang + konfig.zeitlimit;
        if Instant::now() >= frist {
            tracing::warn!(peer = %peer_addr, "Verbindungs-Timeout");
            break SchliessArt::Abrupt;
        }

        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(daten)) => {
                    letzter_empfang = Instant::now();
                    match kern.eingang_verarbeiten(&daten) {
                        Eingang::PongAntworten => {
                            if let Err(e) = framed.send(Nachricht::Pong.encode()).await {
                                tracing::warn!(peer = %peer_addr, fehler = %e, "Pong-Senden fehlgeschlagen");
                                break SchliessArt::Abrupt;
                            }
                        }
                        Eingang::Goodbye => break SchliessArt::Geordnet,
                        Eingang::Renegotiate => break SchliessArt::Halbgeschlossen,
                        Eingang::Verarbeitet | Eingang::Verworfen => {}
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(peer = %peer_addr, fehler = %e, "Frame-Lesefehler");
                    break SchliessArt::Abrupt;
                }
                None => {
                    tracing::info!(peer = %peer_addr, "Verbindung ohne Goodbye beendet");
                    break SchliessArt::Abrupt;
                }
            },

            Some(daten) = sende_rx.recv() => {
                if let Err(e) = framed.send(daten).await {
                    tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                    break SchliessArt::Abrupt;
                }
            }

            _ = tokio::time::sleep_until(naechster_ping.min(frist)) => {
                if Instant::now() >= naechster_ping {
                    if let Err(e) = framed.send(Nachricht::Ping.encode()).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Keepalive fehlgeschlagen");
                        break SchliessArt::Abrupt;
                    }
                    naechster_ping = Instant::now() + konfig.keepalive;
                }
            }

            _ = abbruch.cancelled() => {
                lokal = true;
                // Ohne schliessen_als (Drop) gibt es keinen Abschied
                let art = (*geteilt.schliess_art.read()).unwrap_or(SchliessArt::Abrupt);
                if let Some(abschied) = art.abschied() {
                    let _ = framed.send(abschied.encode()).await;
                }
                break art;
            }
        }
    };

    *geteilt.zustand.write() = VerbindungsZustand::Schliessend;
    *geteilt.schliess_art.write() = Some(art);
    drop(framed);
    *geteilt.zustand.write() = VerbindungsZustand::Geschlossen;

    if lokal {
        kern.bereit_setzen(false);
        tracing::debug!(peer = %peer_addr, "Verbindung lokal geschlossen");
    } else {
        kern.verbindung_verloren(art);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::TransportEreignis;
    use tokio::net::TcpListener;

    fn schnell() -> VerbindungsKonfig {
        VerbindungsKonfig {
            keepalive: Duration::from_millis(50),
            zeitlimit: Duration::from_millis(300),
            ..Default::default()
        }
    }

    /// Verbindung plus die rohe Gegenseite als Framed-Stream
    async fn paar() -> (
        Verbindung,
        Framed<TcpStream, FrameCodec>,
        mpsc::Receiver<TransportEreignis>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let kern = TransportKern::neu(TransportArt::Stream);
        let (tx, rx) = mpsc::channel(4);
        kern.ereignis_empfaenger_registrieren(tx);

        let (verbindung, angenommen) =
            tokio::join!(Verbindung::verbinden(addr, schnell(), kern), listener.accept());
        let (stream, _) = angenommen.unwrap();
        (verbindung.unwrap(), Framed::new(stream, FrameCodec::new()), rx)
    }

    /// Naechster Nicht-Ping-Frame der Gegenseite; `None` bei EOF
    async fn naechste_nachricht(gegenseite: &mut Framed<TcpStream, FrameCodec>) -> Option<Nachricht> {
        while let Some(Ok(frame)) = gegenseite.next().await {
            match Nachricht::decode(&frame).unwrap() {
                Nachricht::Ping => continue,
                andere => return Some(andere),
            }
        }
        None
    }

    async fn verlust(rx: &mut mpsc::Receiver<TransportEreignis>) -> TransportEreignis {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Ereignis erwartet")
            .expect("Kanal offen")
    }

    #[tokio::test]
    async fn goodbye_ist_geordnet() {
        let (verbindung, mut gegenseite, mut rx) = paar().await;
        assert!(verbindung.ist_offen());

        gegenseite.send(Nachricht::Goodbye.encode()).await.unwrap();
        let TransportEreignis::VerbindungVerloren {
            schliess_art,
            wiederverbinden,
            ..
        } = verlust(&mut rx).await;
        assert_eq!(schliess_art, SchliessArt::Geordnet);
        assert!(!wiederverbinden);
        assert_eq!(verbindung.zustand(), VerbindungsZustand::Geschlossen);
    }

    #[tokio::test]
    async fn eof_ist_abrupt() {
        let (verbindung, gegenseite, mut rx) = paar().await;
        drop(gegenseite);
        let TransportEreignis::VerbindungVerloren {
            schliess_art,
            wiederverbinden,
            ..
        } = verlust(&mut rx).await;
        assert_eq!(schliess_art, SchliessArt::Abrupt);
        assert!(wiederverbinden);
        assert_eq!(verbindung.schliess_art(), Some(SchliessArt::Abrupt));
    }

    #[tokio::test]
    async fn renegotiate_ist_halbgeschlossen() {
        let (_verbindung, mut gegenseite, mut rx) = paar().await;
        gegenseite.send(Nachricht::Renegotiate.encode()).await.unwrap();
        let TransportEreignis::VerbindungVerloren {
            schliess_art,
            wiederverbinden,
            ..
        } = verlust(&mut rx).await;
        assert_eq!(schliess_art, SchliessArt::Halbgeschlossen);
        assert!(wiederverbinden);
    }

    #[tokio::test]
    async fn stille_gegenseite_loest_timeout_aus() {
        // Gegenseite liest nie und antwortet nie auf Pings
        let (_verbindung, _gegenseite, mut rx) = paar().await;
        let TransportEreignis::VerbindungVerloren { schliess_art, .. } = verlust(&mut rx).await;
        assert_eq!(schliess_art, SchliessArt::Abrupt);
    }

    #[tokio::test]
    async fn keepalive_haelt_verbindung_offen() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let kern_a = TransportKern::neu(TransportArt::Stream);
        let kern_b = TransportKern::neu(TransportArt::Stream);

        let (a, angenommen) =
            tokio::join!(Verbindung::verbinden(addr, schnell(), kern_a), listener.accept());
        let a = a.unwrap();
        let b = Verbindung::aus_stream(angenommen.unwrap().0, schnell(), kern_b).unwrap();

        // Deutlich laenger als das Zeitlimit; Pings und Pongs halten beide Seiten am Leben
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(a.ist_offen());
        assert!(b.ist_offen());
    }

    #[tokio::test]
    async fn schliessen_ist_idempotent_und_sendet_goodbye() {
        let (verbindung, mut gegenseite, mut rx) = paar().await;
        verbindung.schliessen().await;
        verbindung.schliessen().await;
        assert_eq!(verbindung.zustand(), VerbindungsZustand::Geschlossen);
        assert_eq!(verbindung.schliess_art(), Some(SchliessArt::Geordnet));

        // Lokales Schliessen meldet keinen Verlust
        assert!(rx.try_recv().is_err());

        // Gegenseite sieht (eventuell nach Keepalive-Pings) ein Goodbye
        assert_eq!(naechste_nachricht(&mut gegenseite).await, Some(Nachricht::Goodbye));
    }

    #[tokio::test]
    async fn halbgeschlossen_sendet_renegotiate() {
        let (verbindung, mut gegenseite, _rx) = paar().await;
        verbindung.schliessen_als(SchliessArt::Halbgeschlossen).await;
        assert_eq!(verbindung.schliess_art(), Some(SchliessArt::Halbgeschlossen));
        assert_eq!(
            naechste_nachricht(&mut gegenseite).await,
            Some(Nachricht::Renegotiate)
        );
    }

    #[tokio::test]
    async fn drop_endet_ohne_abschied() {
        let (verbindung, mut gegenseite, _rx) = paar().await;
        drop(verbindung);
        assert_eq!(naechste_nachricht(&mut gegenseite).await, None);
    }

    #[tokio::test]
    async fn zustand_durchlaeuft_lebenszyklus() {
        let (verbindung, _gegenseite, _rx) = paar().await;
        let mut verbunden = false;
        for _ in 0..50 {
            if verbindung.zustand() == VerbindungsZustand::Verbunden {
                verbunden = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(verbunden);

        verbindung.schliessen().await;
        assert_eq!(verbindung.zustand(), VerbindungsZustand::Geschlossen);
        assert!(!verbindung.ist_offen());
    }

    #[tokio::test]
    async fn senden_nach_schliessen_schlaegt_fehl() {
        let (verbindung, _gegenseite, _rx) = paar().await;
        verbindung.schliessen().await;
        assert!(verbindung.senden(Nachricht::Ping.encode()).is_err());
    }
}
