//! An in-process primary server for end-to-end tests.
//!
//! The primary serves a single zone, `example.org.`, over UDP and TCP on a
//! loopback port.  It answers SOA queries, AXFRs (spread over two messages)
//! and IXFRs (from the versions it has seen), and can send NOTIFY messages.
//! An IXFR response may be split right after its opening SOA record.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use domain::{
    base::{
        iana::{Opcode, Rcode},
        name::{FlattenInto, ParsedName},
        Message, MessageBuilder, Rtype,
    },
    net::client::{
        self,
        request::{RequestMessage, SendRequest},
    },
    rdata::Soa,
    zonefile::inplace::{Entry, Zonefile},
};
use tokio::{
    net::{TcpListener, UdpSocket},
    task::JoinSet,
};

use crate::{
    net::server::{DgramServer, Request, StreamServer, Transaction},
    zone::{
        snapshot::{tests::name, SoaRecord, StoredName, StoredRecord, ZoneDelta},
        ZoneSnapshot,
    },
};

//----------- MockPrimary ------------------------------------------------------

/// A primary server for `example.org.`.
pub struct MockPrimary {
    addr: SocketAddr,
    state: Arc<Mutex<PrimaryState>>,
    _tasks: JoinSet<()>,
}

struct PrimaryState {
    online: bool,
    split_ixfr: bool,
    zone: ZoneSnapshot,
    deltas: Vec<ZoneDelta>,
    requests: Vec<&'static str>,
}

impl MockPrimary {
    /// Start serving the zone in the given zone file text.
    pub async fn launch(text: &str) -> Self {
        let state = Arc::new(Mutex::new(PrimaryState {
            online: true,
            split_ixfr: false,
            zone: parse_zone(text),
            deltas: Vec::new(),
            requests: Vec::new(),
        }));

        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = udp.local_addr().unwrap();
        let tcp = TcpListener::bind(addr).await.unwrap();

        let service = {
            let state = state.clone();
            Arc::new(move |request: &Request| respond(&state, request))
        };
        let mut tasks = JoinSet::new();
        let dgram = DgramServer::new(udp, service.clone());
        tasks.spawn(async move {
            let _ = dgram.run().await;
        });
        let stream = StreamServer::new(tcp, service);
        tasks.spawn(async move {
            let _ = stream.run().await;
        });

        Self {
            addr,
            state,
            _tasks: tasks,
        }
    }

    /// The address the primary serves on, for UDP and TCP.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop or resume answering requests.
    ///
    /// An offline primary silently drops all requests.
    pub fn set_online(&self, online: bool) {
        self.state.lock().unwrap().online = online;
    }

    /// Send incremental transfers as two messages, the first holding nothing
    /// but the current SOA record.
    pub fn set_split_ixfr(&self, split: bool) {
        self.state.lock().unwrap().split_ixfr = split;
    }

    /// Switch to a new version of the zone.
    ///
    /// The difference to the previous version is kept for IXFRs.
    pub fn update(&self, text: &str) {
        let next = parse_zone(text);
        let mut state = self.state.lock().unwrap();
        let only = |l: &ZoneSnapshot, r: &ZoneSnapshot| -> Vec<StoredRecord> {
            l.records()
                .filter(|rr| rr.rtype() != Rtype::SOA && !r.contains(rr))
                .cloned()
                .collect()
        };
        let delta = ZoneDelta {
            soa: state.zone.soa().clone(),
            next_soa: next.soa().clone(),
            only_this: only(&state.zone, &next),
            only_next: only(&next, &state.zone),
        };
        state.deltas.push(delta);
        state.zone = next;
    }

    /// The kinds of requests answered so far.
    pub fn requests(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Send a NOTIFY for the zone and return the response code.
    pub async fn notify(&self, target: SocketAddr) -> Rcode {
        let mut builder = MessageBuilder::new_bytes();
        builder.header_mut().set_opcode(Opcode::NOTIFY);
        builder.header_mut().set_aa(true);
        let mut builder = builder.question();
        builder.push((name("example.org."), Rtype::SOA)).unwrap();

        let client = client::dgram::Connection::new(client::protocol::UdpConnect::new(target));
        let request = RequestMessage::new(builder.into_message()).unwrap();
        let response = client.send_request(request).get_response().await.unwrap();
        response.header().rcode()
    }
}

//----------- Zone files -------------------------------------------------------

/// Parse the text of a zone file for `example.org.`.
pub fn parse_zone(text: &str) -> ZoneSnapshot {
    let apex = name("example.org.");
    let mut zonefile = Zonefile::new();
    zonefile.set_origin(apex.clone());
    zonefile.extend_from_slice(text.as_bytes());

    let mut soa = None;
    let mut records = Vec::new();
    for entry in zonefile {
        match entry.unwrap() {
            Entry::Record(record) => {
                let record: StoredRecord = record.flatten_into();
                match SoaRecord::from_record(&record) {
                    Some(record) => soa = Some(record),
                    None => records.push(record),
                }
            }
            _ => panic!("unsupported zone file entry"),
        }
    }

    ZoneSnapshot::new(&apex, soa.unwrap(), records).unwrap()
}

//----------- Answering --------------------------------------------------------

fn respond(state: &Mutex<PrimaryState>, request: &Request) -> Option<Transaction> {
    let mut state = state.lock().unwrap();
    let message = &request.message;
    if !state.online || message.header().qr() {
        return None;
    }

    let question = message.sole_question().ok()?;
    let qname: StoredName = question.qname().clone().flatten_into();
    if qname != *state.zone.apex() {
        return Some(Transaction::Single(build(message, Rcode::REFUSED, &[])));
    }

    let soa = state.zone.soa().to_record();
    match question.qtype() {
        Rtype::SOA => {
            state.requests.push("soa");
            Some(Transaction::Single(build(message, Rcode::NOERROR, &[soa])))
        }

        Rtype::AXFR => {
            state.requests.push("axfr");
            Some(axfr(&state.zone, message))
        }

        Rtype::IXFR => {
            state.requests.push("ixfr");
            let client = message
                .authority()
                .ok()?
                .limit_to::<Soa<ParsedName<Bytes>>>()
                .next()?
                .ok()?
                .data()
                .serial()
                .into_int();
            if client == state.zone.serial() {
                return Some(Transaction::Single(build(message, Rcode::NOERROR, &[soa])));
            }

            // Condense the deltas since the client's version.
            let Some(start) = state.deltas.iter().position(|d| d.soa.serial() == client) else {
                return Some(axfr(&state.zone, message));
            };
            let mut records = Vec::new();
            for delta in &state.deltas[start..] {
                records.push(delta.soa.to_record());
                records.extend(delta.only_this.iter().cloned());
                records.push(delta.next_soa.to_record());
                records.extend(delta.only_next.iter().cloned());
            }
            records.push(soa.clone());
            if state.split_ixfr {
                return Some(Transaction::Stream(vec![
                    build(message, Rcode::NOERROR, &[soa]),
                    build(message, Rcode::NOERROR, &records),
                ]));
            }
            records.insert(0, soa);
            Some(Transaction::Single(build(message, Rcode::NOERROR, &records)))
        }

        _ => Some(Transaction::Single(build(message, Rcode::REFUSED, &[]))),
    }
}

/// A full transfer of the zone, in two messages.
fn axfr(zone: &ZoneSnapshot, request: &Message<Bytes>) -> Transaction {
    let soa = zone.soa().to_record();
    let mut records: Vec<StoredRecord> = zone
        .records()
        .filter(|rr| rr.rtype() != Rtype::SOA)
        .cloned()
        .collect();
    let rest = records.split_off(records.len() / 2);

    let first: Vec<_> = std::iter::once(soa.clone()).chain(records).collect();
    let second: Vec<_> = rest.into_iter().chain(std::iter::once(soa)).collect();
    Transaction::Stream(vec![
        build(request, Rcode::NOERROR, &first),
        build(request, Rcode::NOERROR, &second),
    ])
}

fn build(request: &Message<Bytes>, rcode: Rcode, records: &[StoredRecord]) -> Vec<u8> {
    let mut builder = MessageBuilder::new_vec()
        .start_answer(request, rcode)
        .unwrap();
    builder.header_mut().set_aa(true);
    for record in records {
        builder.push(record).unwrap();
    }
    builder.finish()
}
