//! The refresh state of a zone.

use std::{fmt, time::Duration};

use tokio::time::Instant;

//----------- ZoneStatus -------------------------------------------------------

/// Where a zone is in its refresh lifecycle.
///
/// ```text
///                 transfer ok
/// Uninitialized ──────────────► Fresh ◄─────────────┐
///                                │  ▲               │
///                  check failed  │  │ check ok      │ check ok
///                                ▼  │               │
///                              Retrying ─────────► Expired
///                                   expire elapsed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ZoneStatus {
    /// The zone has never been transferred.
    #[default]
    Uninitialized,

    /// The last check against the upstream servers succeeded.
    Fresh,

    /// Checks are failing, but the zone has not expired yet.
    Retrying,

    /// Checks have failed for longer than the SOA expire interval.
    ///
    /// The zone is not served while expired.
    Expired,
}

impl ZoneStatus {
    /// Whether the zone may be used to answer queries.
    pub fn is_servable(&self) -> bool {
        matches!(self, Self::Fresh | Self::Retrying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Fresh => "fresh",
            Self::Retrying => "retrying",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//----------- ZoneState --------------------------------------------------------

/// The mutable refresh state of a zone.
///
/// This is only modified by the refresh task of the zone (and by explicit
/// calls to [`Zone::transfer_in()`](super::Zone::transfer_in)), under the
/// zone's state lock.
#[derive(Clone, Debug, Default)]
pub struct ZoneState {
    /// The current status.
    pub status: ZoneStatus,

    /// When the upstream last confirmed the zone (by a check or a transfer).
    ///
    /// Expiry is measured from here.
    pub last_success: Option<Instant>,

    /// When a new version was last installed.
    pub last_transfer: Option<Instant>,

    /// The error from the last failed attempt, if the last attempt failed.
    pub last_error: Option<Box<str>>,

    /// The number of consecutive failed attempts.
    pub failures: u32,

    /// The number of versions installed so far.
    pub transfers: u64,

    /// When the next attempt is scheduled.
    pub next_attempt: Option<Instant>,
}

impl ZoneState {
    /// Record a successful check or transfer.
    pub fn succeeded(&mut self, now: Instant) {
        self.status = ZoneStatus::Fresh;
        self.last_success = Some(now);
        self.last_error = None;
        self.failures = 0;
    }

    /// Record a newly installed version.
    pub fn transferred(&mut self, now: Instant) {
        self.last_transfer = Some(now);
        self.transfers += 1;
    }

    /// Record a failed attempt.
    ///
    /// A fresh zone starts retrying only if the attempt was a scheduled one;
    /// a failure prompted by a NOTIFY is recorded but changes nothing else.
    pub fn failed(&mut self, error: impl fmt::Display, scheduled: bool) {
        self.last_error = Some(error.to_string().into());
        self.failures = self.failures.saturating_add(1);
        if scheduled && self.status == ZoneStatus::Fresh {
            self.status = ZoneStatus::Retrying;
        }
    }

    /// When a retrying zone expires.
    pub fn expires_at(&self, expire: Duration) -> Option<Instant> {
        match self.status {
            ZoneStatus::Retrying => self.last_success.map(|at| at + expire),
            _ => None,
        }
    }

    /// Expire the zone if it has gone unconfirmed for too long.
    ///
    /// Returns whether the zone changed to [`ZoneStatus::Expired`].
    pub fn check_expiry(&mut self, now: Instant, expire: Duration) -> bool {
        match self.expires_at(expire) {
            Some(at) if now >= at => {
                self.status = ZoneStatus::Expired;
                true
            }
            _ => false,
        }
    }
}

//----------- ZoneReport -------------------------------------------------------

/// A point-in-time summary of a zone.
#[derive(Clone, Debug)]
pub struct ZoneReport {
    pub name: String,
    pub status: ZoneStatus,
    pub serial: Option<u32>,
    pub records: usize,
    pub peers: String,
    pub transfers: u64,
    pub failures: u32,
    pub since_success: Option<Duration>,
    pub until_next_attempt: Option<Duration>,
    pub last_error: Option<Box<str>>,
}

impl fmt::Display for ZoneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone '{}' is {}", self.name, self.status)?;
        match self.serial {
            Some(serial) => write!(f, " at serial {serial} ({} records)", self.records)?,
            None => f.write_str(" with no data")?,
        }
        write!(f, ", transferred from [{}]", self.peers)?;
        write!(f, ", {} transfer(s)", self.transfers)?;
        if let Some(ago) = self.since_success {
            write!(f, ", confirmed {}s ago", ago.as_secs())?;
        }
        if let Some(next) = self.until_next_attempt {
            write!(f, ", next attempt in {}s", next.as_secs())?;
        }
        if let Some(err) = &self.last_error {
            write!(f, ", {} failure(s), last: {err}", self.failures)?;
        }
        Ok(())
    }
}

//============ Tests ===========================================================
