//! Contacting upstream servers.

use std::{net::SocketAddr, time::Duration};

use crate::zone::snapshot::{SoaRecord, StoredName};

use super::{
    server::{self, QuerySoaError, XfrError},
    xfr::XfrResponse,
};

//----------- Upstream ---------------------------------------------------------

/// A way of querying the upstream servers of a zone.
///
/// The production implementation is [`DnsUpstream`]; tests substitute
/// scripted servers.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Query a server for the SOA record of a zone.
    async fn query_soa(&self, zone: &StoredName, peer: SocketAddr)
        -> Result<SoaRecord, QuerySoaError>;

    /// Transfer a zone from a server.
    async fn transfer(
        &self,
        zone: &StoredName,
        peer: SocketAddr,
        kind: &XfrKind,
    ) -> Result<XfrResponse, XfrError>;
}

//----------- XfrKind ----------------------------------------------------------

/// The kind of zone transfer to request.
#[derive(Clone, Debug)]
pub enum XfrKind {
    /// A full transfer.
    Axfr,

    /// An incremental transfer relative to the given version.
    Ixfr(SoaRecord),
}

//----------- DnsUpstream ------------------------------------------------------

/// Upstream servers contacted over the network.
#[derive(Clone, Debug)]
pub struct DnsUpstream {
    /// How long to wait for a single response message.
    pub query_timeout: Duration,

    /// How long a complete zone transfer may take.
    pub transfer_timeout: Duration,
}

#[async_trait::async_trait]
impl Upstream for DnsUpstream {
    async fn query_soa(
        &self,
        zone: &StoredName,
        peer: SocketAddr,
    ) -> Result<SoaRecord, QuerySoaError> {
        server::query_soa(zone, peer, self.query_timeout).await
    }

    async fn transfer(
        &self,
        zone: &StoredName,
        peer: SocketAddr,
        kind: &XfrKind,
    ) -> Result<XfrResponse, XfrError> {
        server::transfer(zone, peer, kind, self.query_timeout, self.transfer_timeout).await
    }
}
