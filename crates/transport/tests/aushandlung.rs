//! Ende-zu-Ende-Tests der Transport-Aushandlung ueber `tokio::io::duplex`

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use nahfunk_core::{PeerId, VoiceLevel};
use nahfunk_protocol::{AudioPacket, HandshakeNachricht, TransportParameter};
use nahfunk_transport::aushandlung::{antworten, initiieren};
use nahfunk_transport::datagram::DatagramTransport;
use nahfunk_transport::{
    AktiverTransport, AushandlungsKonfig, FramedHandshake, HandshakeKanal, NativeVermittlung,
    Transport, TransportArt, TransportFehler, TransportZustand, VerbindungsKonfig,
};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn konfig(unterstuetzt: Vec<TransportArt>, reserve: Option<TransportArt>) -> AushandlungsKonfig {
    AushandlungsKonfig {
        unterstuetzt,
        reserve,
        probe_zeitlimit: Duration::from_millis(300),
        antwort_zeitlimit: Duration::from_secs(3),
        bind_ip: LOCALHOST,
        gegenstelle_ip: LOCALHOST,
        ..Default::default()
    }
}

fn kanal_paar() -> (
    FramedHandshake<tokio::io::DuplexStream>,
    FramedHandshake<tokio::io::DuplexStream>,
) {
    let (a, b) = tokio::io::duplex(8 * 1024);
    (FramedHandshake::neu(a), FramedHandshake::neu(b))
}

async fn warte_bis(mut bedingung: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if bedingung() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn schnittmenge_waehlt_gemeinsamen_transport() {
    use TransportArt::*;
    let vermittlung = NativeVermittlung::neu();
    let mut initiator_konfig = konfig(vec![Native, Datagram], None);
    initiator_konfig.native = Some(vermittlung);
    let responder_konfig = konfig(vec![Datagram, Stream], None);

    let (mut kanal_i, mut kanal_r) = kanal_paar();
    let abbruch = CancellationToken::new();
    let (i, r) = tokio::join!(
        initiieren(&mut kanal_i, &initiator_konfig, &abbruch),
        antworten(&mut kanal_r, &responder_konfig, &abbruch),
    );
    let i = i.expect("Initiator muss erfolgreich sein");
    let mut r = r.expect("Responder muss erfolgreich sein");

    assert_eq!(i.transport.art(), Datagram);
    assert_eq!(r.transport.art(), Datagram);
    assert!(i.transport.ist_bereit());
    assert!(r.transport.ist_bereit());
    assert_eq!(i.verlauf.fallbacks, 0);
    assert_eq!(i.verlauf.anzahl(TransportZustand::Fehlgeschlagen), 0);

    // Audio fliesst nach der Bestaetigung
    let paket = AudioPacket::neu(PeerId::new(), 1, VoiceLevel::Talk, vec![5; 32]);
    assert!(i.transport.audio_senden(&paket).await.unwrap());
    let empfangen = tokio::time::timeout(Duration::from_secs(2), r.audio_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(empfangen, paket);
}

#[tokio::test]
async fn disjunkt_mit_reserve_gelingt_ueber_reserve() {
    use TransportArt::*;
    let mut initiator_konfig = konfig(vec![Native], Some(Datagram));
    initiator_konfig.native = Some(NativeVermittlung::neu());
    let responder_konfig = konfig(vec![Stream], Some(Datagram));

    let (mut kanal_i, mut kanal_r) = kanal_paar();
    let abbruch = CancellationToken::new();
    let (i, r) = tokio::join!(
        initiieren(&mut kanal_i, &initiator_konfig, &abbruch),
        antworten(&mut kanal_r, &responder_konfig, &abbruch),
    );
    let i = i.expect("Fallback auf Reserve muss gelingen");
    let r = r.expect("Responder muss erfolgreich sein");

    assert_eq!(i.transport.art(), Datagram);
    assert_eq!(r.transport.art(), Datagram);
    assert_eq!(i.verlauf.fallbacks, 1);
}

#[tokio::test]
async fn disjunkt_ohne_reserve_scheitert() {
    use TransportArt::*;
    let initiator_konfig = konfig(vec![Datagram], None);
    let responder_konfig = konfig(vec![Stream], None);

    let (mut kanal_i, mut kanal_r) = kanal_paar();
    let abbruch = CancellationToken::new();
    let (i, r) = tokio::join!(
        initiieren(&mut kanal_i, &initiator_konfig, &abbruch),
        antworten(&mut kanal_r, &responder_konfig, &abbruch),
    );

    let fehler = i.err().expect("Initiator muss scheitern");
    assert!(matches!(fehler, TransportFehler::AushandlungFehlgeschlagen { .. }));
    assert!(fehler.ist_aushandlungsfehler());

    // Der Responder erfaehrt den Abbruch
    assert!(matches!(r.err(), Some(TransportFehler::Abgebrochen { .. })));
}

#[tokio::test]
async fn probe_timeout_fuehrt_zu_genau_einem_fallback() {
    use TransportArt::*;
    let vermittlung = NativeVermittlung::neu();
    let mut initiator_konfig = konfig(vec![Datagram], Some(Native));
    initiator_konfig.native = Some(vermittlung.clone());

    // Gegenseite spielt den Responder von Hand und nennt einen stummen UDP-Port
    let stumm = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let stummer_port = stumm.local_addr().unwrap().port();

    let (mut kanal_i, mut kanal_r) = kanal_paar();
    let abbruch = CancellationToken::new();

    let responder = async {
        let erstes = kanal_r.empfangen().await.unwrap();
        assert_eq!(
            erstes,
            HandshakeNachricht::Angebot {
                transports: vec!["udp".into()]
            }
        );
        kanal_r
            .senden(&HandshakeNachricht::Auswahl {
                transport: "udp".into(),
                parameter: TransportParameter::mit_port(stummer_port),
            })
            .await
            .unwrap();

        let zweites = kanal_r.empfangen().await.unwrap();
        assert_eq!(
            zweites,
            HandshakeNachricht::Angebot {
                transports: vec!["native".into()]
            }
        );
        let (eigenes_ende, nummer) = vermittlung.anbieten();
        kanal_r
            .senden(&HandshakeNachricht::Auswahl {
                transport: "native".into(),
                parameter: TransportParameter::mit_port(nummer),
            })
            .await
            .unwrap();

        let drittes = kanal_r.empfangen().await.unwrap();
        assert!(matches!(drittes, HandshakeNachricht::Bestaetigung { .. }));
        eigenes_ende
    };

    let (i, _ende) = tokio::join!(initiieren(&mut kanal_i, &initiator_konfig, &abbruch), responder);
    let i = i.expect("Reserve muss funktionieren");

    assert_eq!(i.transport.art(), Native);
    assert_eq!(i.verlauf.anzahl(TransportZustand::Fehlgeschlagen), 1);
    assert_eq!(i.verlauf.fallbacks, 1);
    assert_eq!(
        i.verlauf.eintraege.iter().filter(|(a, _)| *a == Datagram).last(),
        Some(&(Datagram, TransportZustand::Fehlgeschlagen))
    );
    assert_eq!(i.verlauf.letzter(), Some((Native, TransportZustand::Bereit)));
}

#[tokio::test]
async fn laengenfehler_erhoeht_verwurfszaehler() {
    let responder = DatagramTransport::binden(LOCALHOST, VerbindungsKonfig::default()).await.unwrap();
    let ziel = SocketAddr::new(LOCALHOST, responder.lokaler_port().unwrap());
    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    responder.kern().audio_empfaenger_registrieren(tx);
    responder.kern().bereit_setzen(true);

    let roh = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let paket = AudioPacket::neu(PeerId::new(), 9, VoiceLevel::Shout, vec![1; 20]);
    let mut bytes = paket.encode().to_vec();
    // Deklarierte Laenge passt nicht mehr zur tatsaechlichen
    bytes[AudioPacket::LAENGEN_OFFSET + 3] = 99;
    roh.send_to(&bytes, ziel).await.unwrap();

    assert!(warte_bis(|| responder.kern().verworfen() == 1).await);
    assert!(rx.try_recv().is_err());
    assert_eq!(responder.kern().zugestellt(), 0);
}

#[tokio::test]
async fn audio_vor_readiness_wird_abgewiesen() {
    let responder = DatagramTransport::binden(LOCALHOST, VerbindungsKonfig::default()).await.unwrap();
    let ziel = SocketAddr::new(LOCALHOST, responder.lokaler_port().unwrap());
    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    responder.kern().audio_empfaenger_registrieren(tx);

    let roh = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let paket = AudioPacket::neu(PeerId::new(), 1, VoiceLevel::Talk, vec![3; 10]);
    roh.send_to(&paket.encode(), ziel).await.unwrap();
    assert!(warte_bis(|| responder.kern().verworfen() == 1).await);

    responder.kern().bereit_setzen(true);
    roh.send_to(&paket.encode(), ziel).await.unwrap();
    let empfangen = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(empfangen.sequence, 1);
}

#[tokio::test]
async fn verworfener_transport_wird_abgemeldet() {
    let vermittlung = NativeVermittlung::neu();
    let mut k = konfig(vec![TransportArt::Native], None);
    k.native = Some(vermittlung);

    let (mut kanal_i, mut kanal_r) = kanal_paar();
    let abbruch = CancellationToken::new();
    let (i, r) = tokio::join!(
        initiieren(&mut kanal_i, &k, &abbruch),
        antworten(&mut kanal_r, &k, &abbruch),
    );
    let i = i.unwrap();
    let r = r.unwrap();
    assert!(matches!(i.transport, AktiverTransport::Native(_)));

    r.transport.schliessen().await;
    assert!(!r.transport.ist_bereit());
    assert!(!r.transport.kern().hat_audio_empfaenger());
}
