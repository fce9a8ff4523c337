//! The central command of the secondary server.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;

use crate::{
    loader::{
        refresh::{self, RefreshTiming},
        upstream::Upstream,
    },
    zone::{StoredName, Zone, ZoneByName, ZoneConfig, ZoneReport},
};

//----------- Center -----------------------------------------------------------

/// The central command of the secondary server.
///
/// This owns the set of known zones and the refresh task of each.  The set is
/// replaced as a whole on reconfiguration, so request handlers never block
/// on it.
pub struct Center {
    /// Known zones.
    zones: ArcSwap<foldhash::HashSet<ZoneByName>>,

    /// The refresh task of every zone, by zone name.
    tasks: Mutex<foldhash::HashMap<StoredName, JoinHandle<()>>>,

    /// How upstream servers are contacted.
    upstream: Arc<dyn Upstream>,

    /// Timing parameters for the refresh tasks.
    timing: RefreshTiming,
}

//--- Initialization

impl Center {
    /// Launch the given zones.
    ///
    /// A refresh task is spawned for every zone, so this must be called from
    /// within a Tokio runtime.
    pub fn launch(
        zones: impl IntoIterator<Item = ZoneConfig>,
        upstream: Arc<dyn Upstream>,
        timing: RefreshTiming,
    ) -> Self {
        let this = Self {
            zones: Default::default(),
            tasks: Default::default(),
            upstream,
            timing,
        };
        this.reconfigure(zones);
        this
    }

    /// Switch to a new set of zones.
    ///
    /// Zones whose configuration is unchanged are kept as they are, contents
    /// and refresh state included.  Removed zones stop being refreshed and
    /// served; new and changed zones start out uninitialized.
    pub fn reconfigure(&self, zones: impl IntoIterator<Item = ZoneConfig>) {
        let old = self.zones.load_full();
        let mut tasks = self.tasks.lock().unwrap();
        let mut new = foldhash::HashSet::default();

        for config in zones {
            if let Some(existing) = old.get(&config.name) {
                let zone = &existing.0;
                if zone.peers == config.peers && zone.loader == config.loader {
                    new.insert(existing.clone());
                    continue;
                }
            }

            if let Some(task) = tasks.remove(&config.name) {
                task.abort();
            }
            let zone = Arc::new(Zone::new(config, self.upstream.clone()));
            log::info!("Launching zone '{}' from {}", zone.name, zone.peers);
            tasks.insert(zone.name.clone(), self.spawn(zone.clone()));
            if let Some(duplicate) = new.replace(ZoneByName(zone)) {
                log::warn!("Zone '{}' is configured more than once", duplicate.0.name);
            }
        }

        for zone in old.iter().filter(|zone| !new.contains(&zone.0.name)) {
            log::info!("Removing zone '{}'", zone.0.name);
            if let Some(task) = tasks.remove(&zone.0.name) {
                task.abort();
            }
        }

        self.zones.store(Arc::new(new));
    }

    fn spawn(&self, zone: Arc<Zone>) -> JoinHandle<()> {
        let timing = self.timing.clone();
        tokio::spawn(async move {
            match refresh::run(zone, timing).await {}
        })
    }

    /// Stop refreshing every zone.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

//--- Access

impl Center {
    /// Look up a zone by its exact name.
    pub fn zone(&self, name: &StoredName) -> Option<Arc<Zone>> {
        self.zones.load().get(name).map(|zone| zone.0.clone())
    }

    /// Find the zone a name belongs to.
    ///
    /// This is the known zone whose apex is the closest ancestor of (or equal
    /// to) `qname`.
    pub fn find_zone(&self, qname: &StoredName) -> Option<Arc<Zone>> {
        let zones = self.zones.load();
        qname
            .iter_suffixes()
            .find_map(|suffix| zones.get(&suffix).map(|zone| zone.0.clone()))
    }

    /// Summarize every known zone, ordered by name.
    pub fn reports(&self) -> Vec<ZoneReport> {
        let zones = self.zones.load();
        let mut zones: Vec<_> = zones.iter().collect();
        zones.sort();
        zones.into_iter().map(|zone| zone.0.report()).collect()
    }
}

impl Drop for Center {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use crate::{
        loader::refresh::RefreshTiming,
        tests::upstream::ScriptedUpstream,
        zone::{snapshot::tests::name, LoaderSettings, XfrStrategy, ZoneConfig, ZoneStatus},
    };

    use super::Center;

    fn config(name: &str, peer: &str) -> ZoneConfig {
        ZoneConfig::parse(name, [peer], LoaderSettings::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn find_zone() {
        let upstream = Arc::new(ScriptedUpstream::default());
        let center = Center::launch(
            [
                config("example.org.", "10.240.0.1"),
                config("sub.example.org.", "10.240.0.1"),
            ],
            upstream,
            RefreshTiming::default(),
        );

        let find = |qname: &str| center.find_zone(&name(qname)).map(|z| z.name.clone());
        assert_eq!(find("example.org."), Some(name("example.org.")));
        assert_eq!(find("www.example.org."), Some(name("example.org.")));
        assert_eq!(find("a.sub.example.org."), Some(name("sub.example.org.")));
        assert_eq!(find("example.com."), None);
        assert_eq!(find("org."), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_keeps_unchanged_zones() {
        let upstream = Arc::new(ScriptedUpstream::default());
        upstream.serve(ScriptedUpstream::soa(250, 7200, 3600, 1209600), vec![]);
        let center = Center::launch(
            [config("example.org.", "10.240.0.1")],
            upstream,
            RefreshTiming::default(),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        let zone = center.zone(&name("example.org.")).unwrap();
        assert_eq!(zone.status(), ZoneStatus::Fresh);

        // The same configuration keeps the zone as it is.
        center.reconfigure([config("example.org.", "10.240.0.1")]);
        assert!(Arc::ptr_eq(&zone, &center.zone(&name("example.org.")).unwrap()));

        // A changed configuration starts over.
        let mut changed = config("example.org.", "10.240.0.1");
        changed.loader.xfr = XfrStrategy::Axfr;
        center.reconfigure([changed]);
        let replaced = center.zone(&name("example.org.")).unwrap();
        assert!(!Arc::ptr_eq(&zone, &replaced));

        center.reconfigure([]);
        assert!(center.zone(&name("example.org.")).is_none());
        assert!(center.reports().is_empty());
    }
}
