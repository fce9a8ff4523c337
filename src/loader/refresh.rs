//! Scheduling zone refreshes.
//!
//! Every zone has a refresh task, which checks the upstream servers for new
//! versions of the zone and transfers them.  Checks happen on a timer derived
//! from the SOA record of the zone ([RFC 1034], section 4.3.5), and
//! immediately when a NOTIFY arrives:
//!
//! - A fresh zone is checked every SOA REFRESH interval.
//! - After a failed check, the zone is checked every SOA RETRY interval.
//! - If no check succeeds for the SOA EXPIRE interval, the zone expires and
//!   is no longer served.  Checks continue at the retry interval.
//! - Until the zone has been transferred for the first time, there is no SOA
//!   record to take intervals from; attempts follow an exponential backoff.
//!
//! [RFC 1034]: https://datatracker.ietf.org/doc/html/rfc1034

use std::{convert::Infallible, fmt, sync::Arc, time::Duration};

use rand::Rng;
use tokio::time::Instant;

use crate::zone::{Zone, ZoneStatus};

use super::{RefreshError, Transfer, TransferError};

//----------- RefreshTiming ----------------------------------------------------

/// Timing parameters for refresh tasks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshTiming {
    /// The delay before retrying the first transfer of a zone.
    ///
    /// This doubles after every failed attempt, up to `max_backoff`.
    pub initial_backoff: Duration,

    /// The longest delay between attempts at the first transfer of a zone.
    pub max_backoff: Duration,

    /// The shortest interval taken from a SOA record.
    pub min_interval: Duration,

    /// The largest random delay added to the refresh interval.
    pub refresh_jitter: Duration,

    /// The largest random delay added to the retry interval.
    pub retry_jitter: Duration,
}

impl RefreshTiming {
    /// Add jitter to an interval taken from a SOA record.
    fn interval(&self, base: Duration, jitter: Duration) -> Duration {
        let base = base.max(self.min_interval);
        let jitter = match u64::try_from(jitter.as_millis()) {
            Ok(0) | Err(_) => 0,
            Ok(max) => rand::thread_rng().gen_range(0..=max),
        };
        base + Duration::from_millis(jitter)
    }
}

impl Default for RefreshTiming {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            min_interval: Duration::from_secs(1),
            refresh_jitter: Duration::from_secs(5),
            retry_jitter: Duration::from_secs(2),
        }
    }
}

//----------- run() ------------------------------------------------------------

/// Drive the refresh task of a zone.
///
/// The first attempt happens immediately.  This never returns; the task is
/// stopped by aborting it.
pub async fn run(zone: Arc<Zone>, timing: RefreshTiming) -> Infallible {
    /// Wait until the specified instant.
    async fn wait(deadline: Option<Instant>) {
        if let Some(deadline) = deadline {
            tokio::time::sleep_until(deadline).await
        } else {
            std::future::pending().await
        }
    }

    let mut backoff = timing.initial_backoff;
    let mut deadline = Instant::now();

    loop {
        // Determine when a retrying zone would expire.
        let expire = zone.snapshot().map(|s| s.soa().expire());
        let expiry = {
            let mut state = zone.state.lock().unwrap();
            state.next_attempt = Some(deadline);
            expire.and_then(|expire| state.expires_at(expire))
        };

        // Wait for the next attempt, a NOTIFY, or expiry.
        let trigger = tokio::select! {
            () = tokio::time::sleep_until(deadline) => Trigger::Timer,
            () = zone.refresh_signal().notified() => Trigger::Notify,
            () = wait(expiry) => Trigger::Expiry,
        };

        if let Trigger::Expiry = trigger {
            if let Some(expire) = expire {
                let mut state = zone.state.lock().unwrap();
                if state.check_expiry(Instant::now(), expire) {
                    log::warn!(
                        "Zone '{}' has expired after {}s without a successful refresh",
                        zone.name,
                        expire.as_secs()
                    );
                }
            }
            continue;
        }

        log::debug!("Refreshing zone '{}' ({trigger})", zone.name);
        let result = refresh(&zone).await;
        let now = Instant::now();
        let snapshot = zone.snapshot();

        match (result, snapshot) {
            // Another transfer was running, so nothing was confirmed; try
            // again soon.
            (Ok(Transfer::Busy), _) | (Ok(_), None) => {
                deadline = now + backoff;
            }

            (Ok(_), Some(snapshot)) => {
                let previous = {
                    let mut state = zone.state.lock().unwrap();
                    let previous = state.status;
                    state.succeeded(now);
                    previous
                };
                if previous != ZoneStatus::Fresh {
                    log::info!("Zone '{}' is fresh again (was {previous})", zone.name);
                }
                backoff = timing.initial_backoff;
                deadline = now + timing.interval(snapshot.soa().refresh(), timing.refresh_jitter);
            }

            (Err(err), _) if trigger == Trigger::Notify => {
                log::warn!(
                    "Refreshing zone '{}' after a NOTIFY failed: {err}",
                    zone.name
                );
                zone.state.lock().unwrap().failed(&err, false);
            }

            (Err(err), None) => {
                log::warn!(
                    "Initial transfer of zone '{}' failed: {err}; retrying in {}ms",
                    zone.name,
                    backoff.as_millis()
                );
                zone.state.lock().unwrap().failed(&err, true);
                deadline = now + backoff;
                backoff = (backoff * 2).min(timing.max_backoff);
            }

            (Err(err), Some(snapshot)) => {
                let soa = snapshot.soa();
                let status = {
                    let mut state = zone.state.lock().unwrap();
                    state.failed(&err, true);
                    state.check_expiry(now, soa.expire());
                    state.status
                };
                log::warn!(
                    "Refreshing zone '{}' failed: {err}; zone is {status}",
                    zone.name
                );
                deadline = now + timing.interval(soa.retry(), timing.retry_jitter);
            }
        }
    }
}

/// Check for a new version of a zone and transfer it.
async fn refresh(zone: &Zone) -> Result<Transfer, AttemptError> {
    if !zone.should_transfer().await? {
        return Ok(Transfer::UpToDate);
    }
    Ok(zone.transfer().await?)
}

//----------- Trigger ----------------------------------------------------------

/// Why a refresh task woke up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    /// The refresh or retry timer fired.
    Timer,

    /// A NOTIFY was received.
    Notify,

    /// The zone may have expired.
    Expiry,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timer => "scheduled",
            Self::Notify => "notified",
            Self::Expiry => "expiry",
        })
    }
}

//============ Errors ==========================================================

//----------- AttemptError -----------------------------------------------------

/// A failed refresh attempt.
#[derive(Clone, Debug)]
enum AttemptError {
    /// Checking for a new version failed.
    Refresh(RefreshError),

    /// Transferring the new version failed.
    Transfer(TransferError),
}

impl From<RefreshError> for AttemptError {
    fn from(value: RefreshError) -> Self {
        Self::Refresh(value)
    }
}

impl From<TransferError> for AttemptError {
    fn from(value: TransferError) -> Self {
        Self::Transfer(value)
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refresh(err) => err.fmt(f),
            Self::Transfer(err) => err.fmt(f),
        }
    }
}

//============ Tests ===========================================================
