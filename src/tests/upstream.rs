//! A scripted upstream server, for testing without the network.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use domain::{
    base::{iana::Rcode, Serial, Ttl},
    rdata::Soa,
};

use crate::{
    loader::{
        server::{QuerySoaError, XfrError},
        upstream::{Upstream, XfrKind},
        xfr::XfrResponse,
    },
    zone::snapshot::{tests::name, SoaRecord, StoredName, StoredRecord, ZoneDelta},
};

//----------- ScriptedUpstream -------------------------------------------------

/// An [`Upstream`] answering from in-memory zone contents.
///
/// By default it serves nothing and every request fails as if the server
/// were unreachable.
#[derive(Default)]
pub struct ScriptedUpstream {
    script: Mutex<Script>,
    soa_queries: AtomicUsize,
    transfers: AtomicUsize,
}

#[derive(Default)]
struct Script {
    online: bool,
    soa: Option<SoaRecord>,
    records: Vec<StoredRecord>,
    deltas: Vec<ZoneDelta>,
    offline_peers: Vec<SocketAddr>,
    ixfr_rcode: Option<Rcode>,
    ixfr_soa_only: bool,
    transfer_delay: Duration,
    requests: Vec<(SocketAddr, &'static str)>,
}

impl ScriptedUpstream {
    /// A SOA record for `example.org.` with the given timers (in seconds).
    pub fn soa(serial: u32, refresh: u32, retry: u32, expire: u32) -> SoaRecord {
        SoaRecord {
            owner: name("example.org."),
            ttl: Ttl::from_secs(3600),
            data: Soa::new(
                name("sns.dns.icann.org."),
                name("noc.dns.icann.org."),
                Serial(serial),
                Ttl::from_secs(refresh),
                Ttl::from_secs(retry),
                Ttl::from_secs(expire),
                Ttl::from_secs(3600),
            ),
        }
    }

    /// Serve the given version of the zone, and come online.
    pub fn serve(&self, soa: SoaRecord, records: Vec<StoredRecord>) {
        let mut script = self.script.lock().unwrap();
        script.soa = Some(soa);
        script.records = records;
        script.online = true;
    }

    /// Offer a delta for incremental transfers.
    pub fn add_delta(&self, delta: ZoneDelta) {
        self.script.lock().unwrap().deltas.push(delta);
    }

    pub fn set_online(&self, online: bool) {
        self.script.lock().unwrap().online = online;
    }

    /// Make a single peer unreachable.
    pub fn set_peer_offline(&self, peer: SocketAddr) {
        self.script.lock().unwrap().offline_peers.push(peer);
    }

    /// Answer IXFR requests with the given error code.
    pub fn set_ixfr_rcode(&self, rcode: Option<Rcode>) {
        self.script.lock().unwrap().ixfr_rcode = rcode;
    }

    /// Answer every IXFR with the current SOA alone.
    pub fn set_ixfr_soa_only(&self, soa_only: bool) {
        self.script.lock().unwrap().ixfr_soa_only = soa_only;
    }

    /// Delay every transfer by the given duration.
    pub fn set_transfer_delay(&self, delay: Duration) {
        self.script.lock().unwrap().transfer_delay = delay;
    }

    pub fn soa_query_count(&self) -> usize {
        self.soa_queries.load(Ordering::SeqCst)
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }

    /// The transfer requests received so far, as peer and kind.
    pub fn requests(&self) -> Vec<(SocketAddr, &'static str)> {
        self.script.lock().unwrap().requests.clone()
    }

    fn reachable(script: &Script, peer: SocketAddr) -> bool {
        script.online && !script.offline_peers.contains(&peer)
    }
}

#[async_trait::async_trait]
impl Upstream for ScriptedUpstream {
    async fn query_soa(
        &self,
        _zone: &StoredName,
        peer: SocketAddr,
    ) -> Result<SoaRecord, QuerySoaError> {
        self.soa_queries.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap();
        if !Self::reachable(&script, peer) {
            return Err(QuerySoaError::Timeout);
        }
        script.soa.clone().ok_or(QuerySoaError::Rcode(Rcode::REFUSED))
    }

    async fn transfer(
        &self,
        _zone: &StoredName,
        peer: SocketAddr,
        kind: &XfrKind,
    ) -> Result<XfrResponse, XfrError> {
        self.transfers.fetch_add(1, Ordering::SeqCst);
        let delay = {
            let mut script = self.script.lock().unwrap();
            let label = match kind {
                XfrKind::Axfr => "axfr",
                XfrKind::Ixfr(_) => "ixfr",
            };
            script.requests.push((peer, label));
            script.transfer_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let script = self.script.lock().unwrap();
        if !Self::reachable(&script, peer) {
            return Err(XfrError::Timeout);
        }
        let Some(soa) = script.soa.clone() else {
            return Err(XfrError::Rcode(Rcode::REFUSED));
        };

        match kind {
            XfrKind::Axfr => Ok(XfrResponse::FullZone {
                soa,
                records: script.records.clone(),
            }),

            XfrKind::Ixfr(local) => {
                if let Some(rcode) = script.ixfr_rcode {
                    return Err(XfrError::Rcode(rcode));
                }
                if local.serial() == soa.serial() || script.ixfr_soa_only {
                    return Ok(XfrResponse::NoopSoa(soa));
                }

                // Chain deltas from the client's version.
                let mut versions = Vec::new();
                let mut serial = local.serial();
                while let Some(delta) = script.deltas.iter().find(|d| d.soa.serial() == serial) {
                    versions.push(delta.clone());
                    serial = delta.next_soa.serial();
                    if serial == soa.serial() {
                        return Ok(XfrResponse::IncrementalDelta { soa, versions });
                    }
                }

                // Fall back to sending the whole zone.
                Ok(XfrResponse::FullZone {
                    soa,
                    records: script.records.clone(),
                })
            }
        }
    }
}
