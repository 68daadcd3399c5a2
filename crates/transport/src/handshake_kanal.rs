//! Handshake-Kanal – zuverlaessiger Kanal fuer die Aushandlung
//!
//! Getrennt vom Audio-Datenpfad. Die Standard-Implementierung rahmt
//! JSON-Nachrichten ueber einen beliebigen Byte-Stream (TCP, in Tests
//! `tokio::io::duplex`).

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use nahfunk_protocol::wire::FrameCodec;
use nahfunk_protocol::HandshakeNachricht;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::{TransportFehler, TransportResult};

/// Maximale Groesse einer Handshake-Nachricht
pub const HANDSHAKE_MAX_FRAME: usize = 16 * 1024;

pub trait HandshakeKanal: Send {
    fn senden(
        &mut self,
        nachricht: &HandshakeNachricht,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    /// Wartet auf die naechste Nachricht; `KanalGeschlossen` bei EOF
    fn empfangen(&mut self) -> impl Future<Output = TransportResult<HandshakeNachricht>> + Send;
}

/// Handshake ueber einen laengen-gerahmten Byte-Stream
pub struct FramedHandshake<S> {
    framed: Framed<S, FrameCodec>,
}

impl<S> FramedHandshake<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn neu(io: S) -> Self {
        Self {
            framed: Framed::new(io, FrameCodec::with_max_size(HANDSHAKE_MAX_FRAME)),
        }
    }

    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }
}

impl<S> HandshakeKanal for FramedHandshake<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn senden(&mut self, nachricht: &HandshakeNachricht) -> TransportResult<()> {
        let bytes = nachricht.to_bytes()?;
        self.framed.send(Bytes::from(bytes)).await?;
        tracing::debug!(nachricht = nachricht.bezeichnung(), "Handshake gesendet");
        Ok(())
    }

    async fn empfangen(&mut self) -> TransportResult<HandshakeNachricht> {
        match self.framed.next().await {
            Some(Ok(frame)) => {
                let nachricht = HandshakeNachricht::from_bytes(&frame)?;
                tracing::debug!(nachricht = nachricht.bezeichnung(), "Handshake empfangen");
                Ok(nachricht)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(TransportFehler::KanalGeschlossen),
        }
    }
}
