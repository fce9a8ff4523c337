//! Loading zones.
//!
//! The zone loader is responsible for maintaining up-to-date copies of the DNS
//! zones known to the server.  Every zone has a list of upstream servers that
//! are checked for new versions of the zone, which are then transferred with
//! incremental or authoritative zone transfers (IXFRs and AXFRs).

use std::{cmp::Ordering, fmt, net::SocketAddr};

use tokio::time::Instant;

use crate::{
    serial,
    zone::{
        snapshot::{ForwardError, SnapshotError},
        Zone, ZoneSnapshot,
    },
};

use self::{
    server::{QuerySoaError, XfrError},
    upstream::XfrKind,
    xfr::XfrResponse,
};

pub mod notify;
pub mod refresh;
pub mod server;
pub mod upstream;
pub mod xfr;

//----------- should_transfer() ------------------------------------------------

/// Check whether a zone needs to be transferred.
///
/// A zone that has never been transferred always needs a transfer; this is
/// decided without contacting any server.  Otherwise, the upstream servers
/// are queried for the SOA record of the zone, in their configured order,
/// and the first valid answer decides.  A transfer is needed if the local
/// serial precedes the remote one.
///
/// If the local copy appears to be newer than the upstream server's, no
/// transfer is needed, but a warning is logged.
pub async fn should_transfer(zone: &Zone) -> Result<bool, RefreshError> {
    let Some(snapshot) = zone.snapshot() else {
        return Ok(true);
    };
    let local = snapshot.serial();

    let mut last_err = None;
    for peer in zone.peers.iter() {
        let remote = match zone.upstream().query_soa(&zone.name, peer).await {
            Ok(soa) => soa.serial(),
            Err(error) => {
                log::debug!("Could not query {peer} for the SOA of '{}': {error}", zone.name);
                last_err = Some(RefreshError::QuerySoa { peer, error });
                continue;
            }
        };

        return Ok(match serial::compare(local, remote) {
            Some(Ordering::Less) => {
                log::debug!(
                    "Zone '{}' is outdated: local serial {local}, serial {remote} at {peer}",
                    zone.name
                );
                true
            }
            Some(Ordering::Equal) => {
                log::trace!("Zone '{}' is up to date at serial {local}", zone.name);
                false
            }
            Some(Ordering::Greater) | None => {
                log::warn!(
                    "Zone '{}' has local serial {local}, ahead of serial {remote} at {peer}; not transferring",
                    zone.name
                );
                false
            }
        });
    }

    Err(last_err.unwrap_or(RefreshError::NoPeers))
}

//----------- transfer_in() ----------------------------------------------------

/// Transfer the latest version of a zone and publish it.
///
/// At most one transfer runs per zone.  If another one is in progress, this
/// returns `Ok(None)` immediately.  Otherwise the upstream servers are tried
/// in their configured order until one of them succeeds.
///
/// Returns the serial of the newly published version, or [`None`] if no new
/// version was published.  On failure, the published version of the zone is
/// untouched.
pub async fn transfer_in(zone: &Zone) -> Result<Option<u32>, TransferError> {
    Ok(match transfer(zone).await? {
        Transfer::Installed(serial) => Some(serial),
        Transfer::UpToDate | Transfer::Busy => None,
    })
}

/// The outcome of a transfer attempt that did not fail.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// A new version with the given serial was published.
    Installed(u32),

    /// An upstream server was reached but had nothing newer.
    UpToDate,

    /// Another transfer of the zone was in progress.
    Busy,
}

/// Transfer the latest version of a zone, reporting what happened.
///
/// This is [`transfer_in()`] for callers that must tell a confirmed
/// up-to-date copy apart from a skipped attempt.
pub async fn transfer(zone: &Zone) -> Result<Transfer, TransferError> {
    let Ok(_guard) = zone.transfer_lock().try_lock() else {
        log::debug!("A transfer of zone '{}' is already in progress", zone.name);
        return Ok(Transfer::Busy);
    };

    let current = zone.snapshot();
    let mut last_err = None;
    for peer in zone.peers.iter() {
        match transfer_from(zone, peer, current.as_deref()).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => {
                log::warn!("Could not transfer zone '{}': {err}", zone.name);
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or(TransferError::NoPeers))
}

/// Transfer a zone from a single upstream server.
async fn transfer_from(
    zone: &Zone,
    peer: SocketAddr,
    current: Option<&ZoneSnapshot>,
) -> Result<Transfer, TransferError> {
    let upstream = zone.upstream();

    // Fetch the zone.
    let mut response = match current {
        Some(current) if zone.loader.xfr.allows_ixfr() => {
            let kind = XfrKind::Ixfr(current.soa().clone());
            match upstream.transfer(&zone.name, peer, &kind).await {
                Err(err) if err.is_ixfr_unsupported() => {
                    log::debug!(
                        "{peer} declined an IXFR of '{}' ({err}), falling back to AXFR",
                        zone.name
                    );
                    upstream.transfer(&zone.name, peer, &XfrKind::Axfr).await
                }
                res => res,
            }
        }
        _ => upstream.transfer(&zone.name, peer, &XfrKind::Axfr).await,
    }
    .map_err(|error| TransferError::Xfr { peer, error })?;

    // A server claiming a newer version without sending it gets asked for
    // the whole zone.
    if let (XfrResponse::NoopSoa(soa), Some(current)) = (&response, current) {
        if serial::less(current.serial(), soa.serial()) {
            log::debug!(
                "{peer} announced serial {} of '{}' without changes, falling back to AXFR",
                soa.serial(),
                zone.name
            );
            response = upstream
                .transfer(&zone.name, peer, &XfrKind::Axfr)
                .await
                .map_err(|error| TransferError::Xfr { peer, error })?;
        }
    }

    // Build the new version of the zone.
    let next = match response {
        XfrResponse::NoopSoa(soa) => {
            log::debug!(
                "Zone '{}' is up to date at {peer} (serial {})",
                zone.name,
                soa.serial()
            );
            return Ok(Transfer::UpToDate);
        }

        XfrResponse::FullZone { soa, records } => ZoneSnapshot::new(&zone.name, soa, records)
            .map_err(|error| TransferError::Snapshot { peer, error })?,

        XfrResponse::IncrementalDelta { soa, versions } => {
            let Some(current) = current else {
                return Err(TransferError::UnexpectedDelta { peer });
            };

            let mut next: Option<ZoneSnapshot> = None;
            for delta in &versions {
                let base = next.as_ref().unwrap_or(current);
                let forwarded = base
                    .forward(delta)
                    .map_err(|error| TransferError::Forward { peer, error })?;
                next = Some(forwarded);
            }
            match next {
                Some(next) if next.serial() == soa.serial() => next,
                _ => return Err(TransferError::UnexpectedDelta { peer }),
            }
        }
    };

    // Never go back to an older version.
    if let Some(current) = current {
        if !serial::less(current.serial(), next.serial()) {
            log::debug!(
                "Not publishing serial {} of zone '{}' from {peer} over local serial {}",
                next.serial(),
                zone.name,
                current.serial()
            );
            return Ok(Transfer::UpToDate);
        }
    }

    // Publish it.
    let serial = next.serial();
    let records = next.len();
    zone.install(next);
    {
        let now = Instant::now();
        let mut state = zone.state.lock().unwrap();
        state.succeeded(now);
        state.transferred(now);
    }
    log::info!(
        "Transferred zone '{}' from {peer} at serial {serial} ({records} records)",
        zone.name
    );

    Ok(Transfer::Installed(serial))
}

//============ Errors ==========================================================

//----------- RefreshError -----------------------------------------------------

/// An error when checking a zone for a new version.
#[derive(Clone, Debug)]
pub enum RefreshError {
    /// An upstream server could not be queried.
    QuerySoa {
        /// The server in question.
        peer: SocketAddr,

        /// The error that occurred.
        error: QuerySoaError,
    },

    /// There were no servers to query.
    NoPeers,
}

impl std::error::Error for RefreshError {}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuerySoa { peer, error } => write!(f, "querying {peer} for the SOA failed: {error}"),
            Self::NoPeers => f.write_str("no upstream servers are configured"),
        }
    }
}

//----------- TransferError ----------------------------------------------------

/// An error when transferring a zone.
#[derive(Clone, Debug)]
pub enum TransferError {
    /// The zone transfer failed.
    Xfr {
        /// The server in question.
        peer: SocketAddr,

        /// The error that occurred.
        error: XfrError,
    },

    /// The transferred records do not form a valid zone.
    Snapshot {
        /// The server in question.
        peer: SocketAddr,

        /// The error that occurred.
        error: SnapshotError,
    },

    /// An incremental transfer could not be applied.
    Forward {
        /// The server in question.
        peer: SocketAddr,

        /// The error that occurred.
        error: ForwardError,
    },

    /// An incremental transfer did not lead to the announced version.
    UnexpectedDelta {
        /// The server in question.
        peer: SocketAddr,
    },

    /// There were no servers to transfer from.
    NoPeers,
}

impl std::error::Error for TransferError {}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xfr { peer, error } => write!(f, "transfer from {peer} failed: {error}"),
            Self::Snapshot { peer, error } => write!(f, "transfer from {peer} is invalid: {error}"),
            Self::Forward { peer, error } => {
                write!(f, "incremental transfer from {peer} does not apply: {error}")
            }
            Self::UnexpectedDelta { peer } => {
                write!(f, "incremental transfer from {peer} does not match the local copy")
            }
            Self::NoPeers => f.write_str("no upstream servers are configured"),
        }
    }
}

//============ Tests ===========================================================
