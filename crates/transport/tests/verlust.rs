//! Erkennung toter Gegenstellen ueber Keepalive und Zeitlimit

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use nahfunk_transport::aushandlung::{antworten, initiieren};
use nahfunk_transport::datagram::DatagramTransport;
use nahfunk_transport::{
    AushandlungsKonfig, FramedHandshake, SchliessArt, Transport, TransportArt, TransportEreignis,
    VerbindungsKonfig,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn kurz() -> VerbindungsKonfig {
    VerbindungsKonfig {
        keepalive: Duration::from_millis(50),
        zeitlimit: Duration::from_millis(300),
        ..Default::default()
    }
}

fn konfig(art: TransportArt) -> AushandlungsKonfig {
    AushandlungsKonfig {
        unterstuetzt: vec![art],
        reserve: None,
        probe_zeitlimit: Duration::from_millis(300),
        antwort_zeitlimit: Duration::from_secs(3),
        verbindung: kurz(),
        bind_ip: LOCALHOST,
        gegenstelle_ip: LOCALHOST,
        ..Default::default()
    }
}

async fn naechstes_ereignis(rx: &mut mpsc::Receiver<TransportEreignis>) -> TransportEreignis {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Verlust muss innerhalb des Zeitlimits gemeldet werden")
        .expect("Ereigniskanal offen")
}

/// Handelt `art` aus und laesst danach die Responder-Seite ohne Abschied fallen
async fn gegenstelle_stirbt(art: TransportArt) -> TransportEreignis {
    let k = konfig(art);
    let (a, b) = tokio::io::duplex(8 * 1024);
    let (mut kanal_i, mut kanal_r) = (FramedHandshake::neu(a), FramedHandshake::neu(b));
    let abbruch = CancellationToken::new();
    let (i, r) = tokio::join!(
        initiieren(&mut kanal_i, &k, &abbruch),
        antworten(&mut kanal_r, &k, &abbruch),
    );
    let mut i = i.unwrap();
    let r = r.unwrap();
    assert_eq!(i.transport.art(), art);

    drop(r);
    let ereignis = naechstes_ereignis(&mut i.ereignis_rx).await;
    assert!(!i.transport.ist_bereit());
    ereignis
}

#[tokio::test]
async fn datagram_erkennt_verschwundene_gegenstelle() {
    let ereignis = gegenstelle_stirbt(TransportArt::Datagram).await;
    assert_eq!(
        ereignis,
        TransportEreignis::VerbindungVerloren {
            art: TransportArt::Datagram,
            schliess_art: SchliessArt::Abrupt,
            wiederverbinden: true,
        }
    );
}

#[tokio::test]
async fn stream_erkennt_verschwundene_gegenstelle() {
    let ereignis = gegenstelle_stirbt(TransportArt::Stream).await;
    assert!(matches!(
        ereignis,
        TransportEreignis::VerbindungVerloren {
            art: TransportArt::Stream,
            wiederverbinden: true,
            ..
        }
    ));
}

#[tokio::test]
async fn stumme_udp_gegenstelle_laeuft_ins_zeitlimit() {
    // Socket bleibt offen, antwortet aber nie
    let stumm = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let transport = DatagramTransport::verbinden(stumm.local_addr().unwrap(), kurz())
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    transport.kern().ereignis_empfaenger_registrieren(tx);

    let ereignis = naechstes_ereignis(&mut rx).await;
    assert_eq!(
        ereignis,
        TransportEreignis::VerbindungVerloren {
            art: TransportArt::Datagram,
            schliess_art: SchliessArt::Abrupt,
            wiederverbinden: true,
        }
    );

    // Keepalives kamen an, obwohl nie geantwortet wurde
    let mut buf = [0u8; 64];
    let (len, _) = tokio::time::timeout(Duration::from_millis(100), stumm.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert!(len > 0);
}

#[tokio::test]
async fn keepalive_haelt_ruhige_verbindung_offen() {
    let responder = DatagramTransport::binden(LOCALHOST, kurz()).await.unwrap();
    let ziel = SocketAddr::new(LOCALHOST, responder.lokaler_port().unwrap());
    let initiator = DatagramTransport::verbinden(ziel, kurz()).await.unwrap();
    initiator.senden(&nahfunk_protocol::Nachricht::Ping).await.unwrap();
    assert!(
        initiator
            .kern()
            .auf_pong_warten(Duration::from_secs(2), &CancellationToken::new())
            .await
    );

    let (tx, mut rx) = mpsc::channel(1);
    initiator.kern().ereignis_empfaenger_registrieren(tx);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}
