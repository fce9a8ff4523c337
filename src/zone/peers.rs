//! The upstream servers of a zone.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

/// The port DNS servers listen on by default.
pub const DEFAULT_PORT: u16 = 53;

//----------- PeerSet ----------------------------------------------------------

/// The ordered list of servers a zone is transferred from.
///
/// Only these servers are trusted to send NOTIFY messages for the zone.  The
/// set is fixed when the zone is configured; a new configuration builds a
/// new zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSet {
    peers: Box<[SocketAddr]>,
}

impl PeerSet {
    /// Build a peer set from parsed addresses.
    ///
    /// The order of `peers` is kept; duplicates are dropped.
    pub fn new(peers: impl IntoIterator<Item = SocketAddr>) -> Result<Self, PeerError> {
        let mut list = Vec::new();
        for peer in peers {
            if !list.contains(&peer) {
                list.push(peer);
            }
        }
        if list.is_empty() {
            return Err(PeerError::Empty);
        }
        Ok(Self {
            peers: list.into_boxed_slice(),
        })
    }

    /// Parse a peer set from textual addresses.
    ///
    /// Each address is an IP address with an optional port, e.g. `10.0.0.1`,
    /// `10.0.0.1:5300` or `[2001:db8::1]:5300`.  The port defaults to 53.
    pub fn parse<'a>(addrs: impl IntoIterator<Item = &'a str>) -> Result<Self, PeerError> {
        let peers = addrs
            .into_iter()
            .map(parse_peer)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(peers)
    }

    /// Iterate over the peers in their configured order.
    pub fn iter(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.peers.iter().copied()
    }

    /// The number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the set is empty, which a built set never is.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Whether `source` is one of the peers.
    ///
    /// Only the IP address is compared unless `match_port` is set.
    pub fn admits(&self, source: &SocketAddr, match_port: bool) -> bool {
        self.peers.iter().any(|peer| {
            same_ip(peer.ip(), source.ip()) && (!match_port || peer.port() == source.port())
        })
    }
}

impl fmt::Display for PeerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, peer) in self.peers.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{peer}")?;
        }
        Ok(())
    }
}

/// Parse a single peer address.
fn parse_peer(addr: &str) -> Result<SocketAddr, PeerError> {
    let addr = addr.trim();
    if let Ok(addr) = SocketAddr::from_str(addr) {
        return Ok(addr);
    }

    // A bare address, possibly an IPv6 one in brackets.
    let ip = addr
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(addr);
    IpAddr::from_str(ip)
        .map(|ip| SocketAddr::new(ip, DEFAULT_PORT))
        .map_err(|_| PeerError::InvalidAddr(addr.into()))
}

/// Compare IP addresses, treating IPv4-mapped IPv6 addresses as IPv4.
fn same_ip(a: IpAddr, b: IpAddr) -> bool {
    a.to_canonical() == b.to_canonical()
}

//============ Errors ==========================================================

//----------- PeerError --------------------------------------------------------

/// An error when building a [`PeerSet`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerError {
    /// No peers were configured.
    Empty,

    /// An address could not be parsed.
    InvalidAddr(Box<str>),
}

impl std::error::Error for PeerError {}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("no servers to transfer from are configured"),
            Self::InvalidAddr(addr) => write!(f, "'{addr}' is not a valid server address"),
        }
    }
}

//============ Tests ===========================================================
