//! Client gegen einen echten ServerHost ueber Loopback-TCP

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tvlink_auth::{password::passwort_hashen_mit, HashKosten, SpeicherCredentialStore};
use tvlink_client::{ClientEreignis, ClientError, ClientKonfig, ClientService};
use tvlink_core::{AuthCredential, ChannelInfo, ServerInfo, UserId, UserProfile};
use tvlink_observability::TvlinkMetrics;
use tvlink_signaling::{HostKonfig, ServerHost, VerbindungsKonfig};

const WARTEZEIT: Duration = Duration::from_secs(5);

async fn host_starten() -> (Arc<ServerHost>, SocketAddr) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tvlink_client=debug,tvlink_signaling=debug")
        .with_test_writer()
        .try_init();

    let store = SpeicherCredentialStore::mit_kosten(HashKosten::minimal());
    let mut profil = UserProfile::neu(UserId(7), "alice");
    profil.kanaele = vec![ChannelInfo {
        id: "3".into(),
        name: "3sat".into(),
        url: "http://tv.local/3.m3u8".into(),
    }];
    store
        .mit_hash_einfuegen(profil, passwort_hashen_mit("geheim", HashKosten::minimal()).unwrap())
        .unwrap();

    let konfig = HostKonfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        max_verbindungen: 8,
        server_info: ServerInfo {
            bandwidth_host: "bw.local:5201".into(),
        },
        verbindung: VerbindungsKonfig {
            pruef_intervall: Duration::from_millis(20),
            ..VerbindungsKonfig::default()
        },
    };
    let host = Arc::new(ServerHost::neu(
        konfig,
        Arc::new(store),
        TvlinkMetrics::neu().unwrap(),
    ));
    let addr = host.starten().await.unwrap();
    (host, addr)
}

fn konfig(addr: SocketAddr, passwort: &str) -> ClientKonfig {
    let mut konfig = ClientKonfig::neu(
        addr.to_string(),
        AuthCredential::neu("alice", passwort, 2000),
        "wohnzimmer",
    );
    konfig.pruef_intervall = Duration::from_millis(20);
    konfig
}

async fn ereignis(rx: &mut mpsc::Receiver<ClientEreignis>) -> ClientEreignis {
    tokio::time::timeout(WARTEZEIT, rx.recv())
        .await
        .expect("kein Ereignis innerhalb der Wartezeit")
        .expect("Ereignis-Kanal geschlossen")
}

#[tokio::test]
async fn anmelden_und_abfragen() {
    let (host, addr) = host_starten().await;
    let (tx, mut rx) = mpsc::channel(16);
    let client = ClientService::verbinden(konfig(addr, "geheim"), tx).await.unwrap();

    assert_eq!(ereignis(&mut rx).await, ClientEreignis::Verbunden);
    assert_eq!(
        ereignis(&mut rx).await,
        ClientEreignis::Angemeldet { user_id: UserId(7) }
    );

    client.server_info_anfragen().await.unwrap();
    assert_eq!(
        ereignis(&mut rx).await,
        ClientEreignis::ServerInfo(ServerInfo {
            bandwidth_host: "bw.local:5201".into()
        })
    );

    client.kanaele_anfragen().await.unwrap();
    match ereignis(&mut rx).await {
        ClientEreignis::Kanaele(kanaele) => {
            assert_eq!(kanaele.len(), 1);
            assert_eq!(kanaele[0].name, "3sat");
        }
        anderes => panic!("Kanalliste erwartet, erhalten: {anderes:?}"),
    }

    assert!(host.registry().ist_registriert(UserId(7), &"wohnzimmer".into()));

    assert!(client.trennen());
    assert!(matches!(ereignis(&mut rx).await, ClientEreignis::Getrennt { .. }));
    client.beendet().await;
    host.stoppen().await;
}

#[tokio::test]
async fn push_wird_bestaetigt() {
    let (host, addr) = host_starten().await;
    let (tx, mut rx) = mpsc::channel(16);
    let client = ClientService::verbinden(konfig(addr, "geheim"), tx).await.unwrap();

    assert_eq!(ereignis(&mut rx).await, ClientEreignis::Verbunden);
    assert!(matches!(ereignis(&mut rx).await, ClientEreignis::Angemeldet { .. }));

    let antwort = host
        .kanaele_pushen(UserId(7), &"wohnzimmer".into())
        .await
        .unwrap();
    assert_eq!(antwort.art, tvlink_protocol::BefehlsArt::Approve);
    assert_eq!(ereignis(&mut rx).await, ClientEreignis::KanaeleGeaendert);

    // Server-Ping wird mit pong beantwortet
    let pong = host
        .an_geraet_senden(UserId(7), &"wohnzimmer".into(), vec!["ping".into()])
        .await
        .unwrap();
    assert_eq!(pong.argv, vec!["pong".to_string()]);

    // Unbekannte Befehle lehnt der Client ab
    let abgelehnt = host
        .an_geraet_senden(UserId(7), &"wohnzimmer".into(), vec!["reboot".into()])
        .await
        .unwrap();
    assert_eq!(abgelehnt.argv[0], "fail");

    drop(client);
    assert!(matches!(ereignis(&mut rx).await, ClientEreignis::Getrennt { .. }));
    host.stoppen().await;
}

#[tokio::test]
async fn falsches_passwort_trennt() {
    let (host, addr) = host_starten().await;
    let (tx, mut rx) = mpsc::channel(16);
    let client = ClientService::verbinden(konfig(addr, "falsch"), tx).await.unwrap();

    assert_eq!(ereignis(&mut rx).await, ClientEreignis::Verbunden);
    assert!(matches!(
        ereignis(&mut rx).await,
        ClientEreignis::AnmeldungFehlgeschlagen { .. }
    ));
    assert!(matches!(ereignis(&mut rx).await, ClientEreignis::Getrennt { .. }));

    client.beendet().await;
    assert_eq!(host.registry().geraete_anzahl(), 0);
    host.stoppen().await;
}

#[tokio::test]
async fn server_stopp_meldet_trennung() {
    let (host, addr) = host_starten().await;
    let (tx, mut rx) = mpsc::channel(16);
    let client = ClientService::verbinden(konfig(addr, "geheim"), tx).await.unwrap();

    assert_eq!(ereignis(&mut rx).await, ClientEreignis::Verbunden);
    assert!(matches!(ereignis(&mut rx).await, ClientEreignis::Angemeldet { .. }));

    host.stoppen().await;
    assert!(matches!(ereignis(&mut rx).await, ClientEreignis::Getrennt { .. }));
    client.beendet().await;

    let (tx, _rx) = mpsc::channel(1);
    let fehler = ClientService::verbinden(konfig(addr, "geheim"), tx).await.err().unwrap();
    assert!(matches!(fehler, ClientError::Tvlink(_)));
}
