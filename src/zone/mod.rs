//! Zone-specific state and management.

use std::{
    borrow::Borrow,
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::{Arc, Mutex},
};

use arc_swap::ArcSwapOption;
use tokio::{sync::Notify, time::Instant};

use crate::loader::{upstream::Upstream, RefreshError, Transfer, TransferError};

pub mod loader;
pub mod peers;
pub mod snapshot;
pub mod state;

pub use self::{
    loader::{LoaderSettings, XfrStrategy},
    peers::{PeerError, PeerSet},
    snapshot::{SoaRecord, StoredName, StoredRecord, ZoneSnapshot},
    state::{ZoneReport, ZoneState, ZoneStatus},
};

//----------- Zone -------------------------------------------------------------

/// A secondary zone.
///
/// A zone is created from its configuration, without any contents.  Its
/// refresh task (see [`crate::loader::refresh`]) transfers it from its
/// upstream servers and keeps it up to date.  The zone is never modified in
/// place: every new version is published as a whole new [`ZoneSnapshot`].
pub struct Zone {
    /// The name of this zone.
    pub name: StoredName,

    /// The servers this zone is transferred from.
    pub peers: PeerSet,

    /// How the zone is kept in sync.
    pub loader: LoaderSettings,

    /// The refresh state of this zone.
    ///
    /// The lock is never held across an await point.
    pub state: Mutex<ZoneState>,

    /// The currently published version of the zone, if any.
    snapshot: ArcSwapOption<ZoneSnapshot>,

    /// Held while a transfer is fetched and installed.
    transfer_lock: tokio::sync::Mutex<()>,

    /// Signalled to request an immediate refresh.
    refresh: Notify,

    /// How upstream servers are contacted.
    upstream: Arc<dyn Upstream>,
}

impl Zone {
    /// Construct a new [`Zone`].
    ///
    /// The zone starts out uninitialized, with no contents.
    pub fn new(config: ZoneConfig, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            name: config.name,
            peers: config.peers,
            loader: config.loader,
            state: Default::default(),
            snapshot: ArcSwapOption::empty(),
            transfer_lock: Default::default(),
            refresh: Notify::new(),
            upstream,
        }
    }

    /// The currently published version of the zone.
    ///
    /// Returns [`None`] if the zone has never been transferred.
    pub fn snapshot(&self) -> Option<Arc<ZoneSnapshot>> {
        self.snapshot.load_full()
    }

    /// Publish a new version of the zone.
    ///
    /// Readers see either the previous or the new version in its entirety.
    pub fn install(&self, snapshot: ZoneSnapshot) {
        log::debug!(
            "Publishing zone '{}' at serial {} ({} records)",
            self.name,
            snapshot.serial(),
            snapshot.len()
        );
        self.snapshot.store(Some(Arc::new(snapshot)));
    }

    /// The current status of the zone.
    pub fn status(&self) -> ZoneStatus {
        self.state.lock().unwrap().status
    }

    /// Summarize the state of the zone.
    pub fn report(&self) -> ZoneReport {
        let now = Instant::now();
        let snapshot = self.snapshot();
        let state = self.state.lock().unwrap().clone();
        ZoneReport {
            name: self.name.to_string(),
            status: state.status,
            serial: snapshot.as_ref().map(|s| s.serial()),
            records: snapshot.as_ref().map_or(0, |s| s.len()),
            peers: self.peers.to_string(),
            transfers: state.transfers,
            failures: state.failures,
            since_success: state.last_success.map(|at| now.saturating_duration_since(at)),
            until_next_attempt: state
                .next_attempt
                .map(|at| at.saturating_duration_since(now)),
            last_error: state.last_error,
        }
    }

    pub(crate) fn upstream(&self) -> &dyn Upstream {
        &*self.upstream
    }

    pub(crate) fn transfer_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.transfer_lock
    }

    pub(crate) fn refresh_signal(&self) -> &Notify {
        &self.refresh
    }
}

//--- Refreshing

impl Zone {
    /// Check whether the upstream servers have a newer version of the zone.
    ///
    /// See [`crate::loader::should_transfer()`].
    pub async fn should_transfer(&self) -> Result<bool, RefreshError> {
        crate::loader::should_transfer(self).await
    }

    /// Transfer the latest version of the zone and publish it.
    ///
    /// See [`crate::loader::transfer_in()`].
    pub async fn transfer_in(&self) -> Result<Option<u32>, TransferError> {
        crate::loader::transfer_in(self).await
    }

    /// Attempt a transfer of the zone, reporting what happened.
    ///
    /// See [`crate::loader::transfer()`].
    pub async fn transfer(&self) -> Result<Transfer, TransferError> {
        crate::loader::transfer(self).await
    }

    /// Request an immediate refresh of the zone.
    ///
    /// The refresh task of the zone will check the upstream servers as soon
    /// as it is idle.  Requests made while a refresh is pending are merged.
    ///
    /// # Standards
    ///
    /// Complies with [RFC 1996, section 4.4], when this is used in response
    /// to a `QTYPE=SOA` NOTIFY message.
    ///
    /// > 4.4. A slave which receives a valid NOTIFY should defer action on any
    /// > subsequent NOTIFY with the same \<QNAME,QCLASS,QTYPE\> until it has
    /// > completed the transaction begun by the first NOTIFY.  This duplicate
    /// > rejection is necessary to avoid having multiple notifications lead to
    /// > pummeling the master server.
    ///
    /// [RFC 1996, section 4.4]: https://datatracker.ietf.org/doc/html/rfc1996#section-4
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("name", &self.name)
            .field("peers", &self.peers)
            .field("loader", &self.loader)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

//----------- ZoneConfig -------------------------------------------------------

/// The configuration of a single zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneConfig {
    /// The name of the zone.
    pub name: StoredName,

    /// The servers to transfer the zone from.
    pub peers: PeerSet,

    /// How the zone is kept in sync.
    pub loader: LoaderSettings,
}

impl ZoneConfig {
    /// Parse the configuration of a zone.
    pub fn parse<'a>(
        name: &str,
        transfer_from: impl IntoIterator<Item = &'a str>,
        loader: LoaderSettings,
    ) -> Result<Self, ZoneConfigError> {
        let name = StoredName::from_str(name)
            .map_err(|_| ZoneConfigError::InvalidName(name.into()))?;
        let peers = PeerSet::parse(transfer_from)?;
        Ok(Self {
            name,
            peers,
            loader,
        })
    }
}

//----------- ZoneByName -------------------------------------------------------

/// A [`Zone`] keyed by its name.
#[derive(Clone)]
pub struct ZoneByName(pub Arc<Zone>);

impl Borrow<StoredName> for ZoneByName {
    fn borrow(&self) -> &StoredName {
        &self.0.name
    }
}

impl PartialEq for ZoneByName {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for ZoneByName {}

impl PartialOrd for ZoneByName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ZoneByName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.name.cmp(&other.0.name)
    }
}

impl Hash for ZoneByName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state)
    }
}

impl fmt::Debug for ZoneByName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

//============ Errors ==========================================================

//----------- ZoneConfigError --------------------------------------------------

/// An error in the configuration of a zone.
#[derive(Clone, Debug)]
pub enum ZoneConfigError {
    /// The zone name is not a valid domain name.
    InvalidName(Box<str>),

    /// The upstream servers are misconfigured.
    Peers(PeerError),
}

impl From<PeerError> for ZoneConfigError {
    fn from(value: PeerError) -> Self {
        Self::Peers(value)
    }
}

impl std::error::Error for ZoneConfigError {}

impl fmt::Display for ZoneConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "'{name}' is not a valid zone name"),
            Self::Peers(err) => err.fmt(f),
        }
    }
}
