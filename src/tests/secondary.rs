//! End-to-end tests of a secondary server against a live primary.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use domain::{
    base::{
        iana::{Class, Rcode},
        Message, MessageBuilder, Rtype,
    },
    net::client::{
        self,
        request::{RequestMessage, RequestMessageMulti, SendRequest, SendRequestMulti},
    },
};
use tokio::{
    net::{TcpListener, TcpStream, UdpSocket},
    task::JoinSet,
};

use crate::{
    answer::Responder,
    center::Center,
    loader::{refresh::RefreshTiming, upstream::DnsUpstream},
    net::server::{DgramServer, StreamServer},
    tests::{
        primary::MockPrimary,
        util::{enable_logging, wait_until},
    },
    zone::{snapshot::tests::name, LoaderSettings, ZoneConfig, ZoneStatus},
};

const SERIAL_1: u32 = 2015082541;
const SERIAL_2: u32 = 2015082542;

const VERSION_1: &str = "\
example.org. 3600 IN SOA ns.example.org. admin.example.org. 2015082541 3600 600 86400 300
example.org. 3600 IN NS ns.example.org.
ns.example.org. 3600 IN A 192.0.2.53
www.example.org. 3600 IN A 192.0.2.1
";

const VERSION_2: &str = "\
example.org. 3600 IN SOA ns.example.org. admin.example.org. 2015082542 3600 600 86400 300
example.org. 3600 IN NS ns.example.org.
ns.example.org. 3600 IN A 192.0.2.53
www.example.org. 3600 IN A 192.0.2.2
mail.example.org. 3600 IN A 192.0.2.25
";

//----------- Secondary --------------------------------------------------------

/// A secondary server for `example.org.`, serving on loopback.
struct Secondary {
    center: Arc<Center>,
    udp: SocketAddr,
    tcp: SocketAddr,
    _tasks: JoinSet<()>,
}

impl Secondary {
    async fn launch(primary: SocketAddr) -> Self {
        let peer = primary.to_string();
        let zone =
            ZoneConfig::parse("example.org.", [peer.as_str()], LoaderSettings::default()).unwrap();
        let upstream = Arc::new(DnsUpstream {
            query_timeout: Duration::from_millis(200),
            transfer_timeout: Duration::from_secs(2),
        });
        let timing = RefreshTiming {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(200),
            min_interval: Duration::from_millis(100),
            refresh_jitter: Duration::ZERO,
            retry_jitter: Duration::ZERO,
        };
        let center = Arc::new(Center::launch([zone], upstream, timing));
        let responder = Arc::new(Responder::new(center.clone()));

        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dgram = DgramServer::new(udp, responder.clone());
        let stream = StreamServer::new(tcp, responder);
        let (udp, tcp) = (dgram.local_addr().unwrap(), stream.local_addr().unwrap());

        let mut tasks = JoinSet::new();
        tasks.spawn(async move {
            let _ = dgram.run().await;
        });
        tasks.spawn(async move {
            let _ = stream.run().await;
        });

        Self {
            center,
            udp,
            tcp,
            _tasks: tasks,
        }
    }

    fn serial(&self) -> Option<u32> {
        self.center
            .zone(&name("example.org."))
            .and_then(|zone| zone.snapshot())
            .map(|snapshot| snapshot.serial())
    }

    async fn query(&self, qname: &str, qtype: Rtype) -> Message<Bytes> {
        let mut builder = MessageBuilder::new_bytes().question();
        builder.push((name(qname), qtype)).unwrap();

        let client = client::dgram::Connection::new(client::protocol::UdpConnect::new(self.udp));
        let request = RequestMessage::new(builder.into_message()).unwrap();
        client.send_request(request).get_response().await.unwrap()
    }
}

fn addresses(response: &Message<Bytes>) -> Vec<String> {
    response
        .answer()
        .unwrap()
        .limit_to::<domain::rdata::A>()
        .map(|rr| rr.unwrap().data().to_string())
        .collect()
}

//----------- Tests ------------------------------------------------------------

#[tokio::test]
async fn bootstraps_once_primary_is_reachable() {
    enable_logging("debug");
    let primary = MockPrimary::launch(VERSION_1).await;
    primary.set_online(false);
    let secondary = Secondary::launch(primary.addr()).await;

    // Nothing to serve until the first transfer succeeds.
    let response = secondary.query("www.example.org.", Rtype::A).await;
    assert_eq!(response.header().rcode(), Rcode::SERVFAIL);

    primary.set_online(true);
    wait_until(Duration::from_secs(5), || secondary.serial() == Some(SERIAL_1)).await;
    assert_eq!(
        secondary
            .center
            .zone(&name("example.org."))
            .unwrap()
            .status(),
        ZoneStatus::Fresh
    );

    let response = secondary.query("www.example.org.", Rtype::A).await;
    assert_eq!(response.header().rcode(), Rcode::NOERROR);
    assert!(response.header().aa());
    assert_eq!(addresses(&response), ["192.0.2.1"]);

    let response = secondary.query("nothing.example.org.", Rtype::A).await;
    assert_eq!(response.header().rcode(), Rcode::NXDOMAIN);
    assert_eq!(primary.requests().first(), Some(&"axfr"));
}

#[tokio::test]
async fn answers_up_to_date_ixfr_over_tcp() {
    let primary = MockPrimary::launch(VERSION_1).await;
    let secondary = Secondary::launch(primary.addr()).await;
    wait_until(Duration::from_secs(5), || secondary.serial() == Some(SERIAL_1)).await;
    let soa = secondary
        .center
        .zone(&name("example.org."))
        .unwrap()
        .snapshot()
        .unwrap()
        .soa()
        .to_record();

    let mut builder = MessageBuilder::new_bytes().question();
    builder
        .push((name("example.org."), Rtype::IXFR, Class::IN))
        .unwrap();
    let mut builder = builder.authority();
    builder.push(&soa).unwrap();

    let tcp_conn = TcpStream::connect(secondary.tcp).await.unwrap();
    let (client, transport) = client::stream::Connection::<
        RequestMessage<Bytes>,
        RequestMessageMulti<Bytes>,
    >::new(tcp_conn);
    tokio::task::spawn(transport.run());
    let request = RequestMessageMulti::new(builder.into_message()).unwrap();
    let response = SendRequestMulti::send_request(&client, request)
        .get_response()
        .await
        .unwrap()
        .unwrap();

    assert!(response.header().qr());
    assert_eq!(response.header().rcode(), Rcode::NOERROR);
    let answer: Vec<_> = response
        .answer()
        .unwrap()
        .limit_to::<domain::rdata::Soa<domain::base::ParsedName<Bytes>>>()
        .map(|rr| rr.unwrap().data().serial().into_int())
        .collect();
    assert_eq!(answer, [SERIAL_1]);
    assert_eq!(response.header_counts().ancount(), 1);
}

#[tokio::test]
async fn notify_pulls_in_new_version() {
    let primary = MockPrimary::launch(VERSION_1).await;
    let secondary = Secondary::launch(primary.addr()).await;
    wait_until(Duration::from_secs(5), || secondary.serial() == Some(SERIAL_1)).await;

    primary.update(VERSION_2);
    assert_eq!(primary.notify(secondary.udp).await, Rcode::NOERROR);
    wait_until(Duration::from_secs(5), || secondary.serial() == Some(SERIAL_2)).await;

    let response = secondary.query("www.example.org.", Rtype::A).await;
    assert_eq!(addresses(&response), ["192.0.2.2"]);
    let response = secondary.query("mail.example.org.", Rtype::A).await;
    assert_eq!(addresses(&response), ["192.0.2.25"]);
    assert_eq!(primary.requests().last(), Some(&"ixfr"));
}

#[tokio::test]
async fn split_ixfr_is_applied() {
    let primary = MockPrimary::launch(VERSION_1).await;
    primary.set_split_ixfr(true);
    let secondary = Secondary::launch(primary.addr()).await;
    wait_until(Duration::from_secs(5), || secondary.serial() == Some(SERIAL_1)).await;

    primary.update(VERSION_2);
    assert_eq!(primary.notify(secondary.udp).await, Rcode::NOERROR);
    wait_until(Duration::from_secs(5), || secondary.serial() == Some(SERIAL_2)).await;

    let response = secondary.query("mail.example.org.", Rtype::A).await;
    assert_eq!(addresses(&response), ["192.0.2.25"]);
    assert_eq!(primary.requests().last(), Some(&"ixfr"));
}
