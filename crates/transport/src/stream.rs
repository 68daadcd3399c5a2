//! Stream-Transport – Audio ueber eine laengen-gerahmte TCP-Verbindung
//!
//! Der Responder lauscht auf einem freien Port und nimmt genau eine
//! Verbindung an; der Initiator verbindet sich auf den im Handshake
//! mitgeteilten Port.

use parking_lot::RwLock;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use nahfunk_protocol::Nachricht;

use crate::art::TransportArt;
use crate::error::{TransportFehler, TransportResult};
use crate::kern::TransportKern;
use crate::verbindung::{SchliessArt, Verbindung, VerbindungsKonfig, VerbindungsZustand};
use crate::Transport;

#[derive(Debug)]
pub struct StreamTransport {
    kern: Arc<TransportKern>,
    verbindung: Arc<RwLock<Option<Arc<Verbindung>>>>,
    lokaler_port: u16,
    abbruch: CancellationToken,
}

impl StreamTransport {
    /// Responder: bindet einen Listener und nimmt im Hintergrund eine Verbindung an
    ///
    /// Kommt innerhalb von `annahme_frist` keine Verbindung, bleibt der
    /// Transport unverbunden und die Readiness-Probe der Gegenseite scheitert.
    pub async fn lauschen(
        bind_ip: IpAddr,
        konfig: VerbindungsKonfig,
        annahme_frist: Duration,
    ) -> TransportResult<Self> {
        let listener = TcpListener::bind(SocketAddr::new(bind_ip, 0)).await?;
        let lokaler_port = listener.local_addr()?.port();
        let kern = TransportKern::neu(TransportArt::Stream);
        let verbindung = Arc::new(RwLock::new(None));
        let abbruch = CancellationToken::new();

        tracing::debug!(port = lokaler_port, "Stream-Transport lauscht");

        let slot = Arc::clone(&verbindung);
        let kern_task = Arc::clone(&kern);
        let abbruch_task = abbruch.clone();
        tokio::spawn(async move {
            tokio::select! {
                r = tokio::time::timeout(annahme_frist, listener.accept()) => match r {
                    Ok(Ok((stream, peer))) => match Verbindung::aus_stream(stream, konfig, kern_task) {
                        Ok(v) => {
                            tracing::debug!(peer = %peer, "Stream-Transport angenommen");
                            *slot.write() = Some(Arc::new(v));
                        }
                        Err(e) => tracing::warn!(fehler = %e, "Stream-Verbindung unbrauchbar"),
                    },
                    Ok(Err(e)) => tracing::warn!(fehler = %e, "TCP-Accept-Fehler"),
                    Err(_) => tracing::warn!(port = lokaler_port, "Keine Stream-Verbindung angenommen"),
                },
                _ = abbruch_task.cancelled() => {}
            }
        });

        Ok(Self {
            kern,
            verbindung,
            lokaler_port,
            abbruch,
        })
    }

    /// Initiator: verbindet sich mit dem Listener der Gegenseite
    pub async fn verbinden(ziel: SocketAddr, konfig: VerbindungsKonfig) -> TransportResult<Self> {
        let kern = TransportKern::neu(TransportArt::Stream);
        let verbindung = Verbindung::verbinden(ziel, konfig, Arc::clone(&kern)).await?;
        let lokaler_port = verbindung.lokale_addr().port();
        Ok(Self {
            kern,
            verbindung: Arc::new(RwLock::new(Some(Arc::new(verbindung)))),
            lokaler_port,
            abbruch: CancellationToken::new(),
        })
    }

    pub fn lokaler_port(&self) -> u16 {
        self.lokaler_port
    }

    /// Die zugrundeliegende Verbindung, sobald sie steht
    pub fn verbindung(&self) -> Option<Arc<Verbindung>> {
        self.verbindung.read().clone()
    }

    /// `Getrennt`, solange (noch) keine Verbindung angenommen wurde
    pub fn zustand(&self) -> VerbindungsZustand {
        self.verbindung()
            .map_or(VerbindungsZustand::Getrennt, |v| v.zustand())
    }
}

impl Transport for StreamTransport {
    fn art(&self) -> TransportArt {
        TransportArt::Stream
    }

    fn kern(&self) -> &Arc<TransportKern> {
        &self.kern
    }

    async fn senden(&self, nachricht: &Nachricht) -> TransportResult<()> {
        match self.verbindung() {
            Some(v) => v.senden(nachricht.encode()),
            None => Err(TransportFehler::NichtVerbunden(TransportArt::Stream)),
        }
    }

    async fn schliessen_als(&self, art: SchliessArt) {
        self.abbruch.cancel();
        self.kern.abmelden();
        let verbindung = self.verbindung.write().take();
        if let Some(v) = verbindung {
            v.schliessen_als(art).await;
        }
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.abbruch.cancel();
    }
}
