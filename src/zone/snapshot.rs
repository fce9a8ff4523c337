//! Immutable copies of zone contents.
//!
//! A [`ZoneSnapshot`] is one complete version of a zone: its SOA record and
//! every other record in it.  Snapshots are never modified in place; a new
//! version of the zone (from a full or an incremental transfer) is built as a
//! fresh snapshot and published atomically by [`Zone::install()`].
//!
//! [`Zone::install()`]: super::Zone::install

use std::{fmt, time::Duration};

use bytes::Bytes;
use domain::{
    base::{iana::Class, Name, Record, Rtype, ToName, Ttl},
    rdata::{Soa, ZoneRecordData},
};

//----------- Type aliases -----------------------------------------------------

/// A domain name as held in a snapshot.
pub type StoredName = Name<Bytes>;

/// Record data as held in a snapshot.
pub type StoredRecordData = ZoneRecordData<Bytes, StoredName>;

/// A resource record as held in a snapshot.
pub type StoredRecord = Record<StoredName, StoredRecordData>;

//----------- SoaRecord --------------------------------------------------------

/// The SOA record of a zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoaRecord {
    /// The owner of the record, i.e. the zone apex.
    pub owner: StoredName,

    /// The TTL of the record.
    pub ttl: Ttl,

    /// The record data.
    pub data: Soa<StoredName>,
}

impl SoaRecord {
    /// The serial number of this version of the zone.
    pub fn serial(&self) -> u32 {
        self.data.serial().into_int()
    }

    /// How long to wait between checks for a new version.
    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.data.refresh().as_secs().into())
    }

    /// How long to wait before retrying a failed check.
    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.data.retry().as_secs().into())
    }

    /// How long the zone stays valid without a successful check.
    pub fn expire(&self) -> Duration {
        Duration::from_secs(self.data.expire().as_secs().into())
    }

    /// The TTL for negative answers.
    pub fn minimum(&self) -> Ttl {
        self.data.minimum()
    }
}

//--- Conversion

impl SoaRecord {
    /// Extract the SOA from a generic record, if it is one.
    pub fn from_record(record: &StoredRecord) -> Option<Self> {
        match record.data() {
            ZoneRecordData::Soa(soa) => Some(Self {
                owner: record.owner().clone(),
                ttl: record.ttl(),
                data: soa.clone(),
            }),
            _ => None,
        }
    }

    /// Convert this into a generic record.
    pub fn to_record(&self) -> StoredRecord {
        Record::new(
            self.owner.clone(),
            Class::IN,
            self.ttl,
            ZoneRecordData::Soa(self.data.clone()),
        )
    }
}

impl fmt::Display for SoaRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} SOA serial {}", self.owner, self.serial())
    }
}

//----------- ZoneSnapshot -----------------------------------------------------

/// One complete version of a zone.
#[derive(Clone)]
pub struct ZoneSnapshot {
    /// The SOA record of this version.
    soa: SoaRecord,

    /// All records of the zone, by owner name.
    ///
    /// The apex SOA record is included here too.  Each list holds every
    /// record at most once.
    nodes: foldhash::HashMap<StoredName, Vec<StoredRecord>>,

    /// The total number of records.
    len: usize,
}

impl ZoneSnapshot {
    /// Build a snapshot of the zone at `apex`.
    ///
    /// The SOA record must be owned by the apex; every other record must be at
    /// or below it.  Duplicate records are stored once.  Any SOA records among
    /// `records` are ignored in favour of `soa`.
    pub fn new(
        apex: &StoredName,
        soa: SoaRecord,
        records: impl IntoIterator<Item = StoredRecord>,
    ) -> Result<Self, SnapshotError> {
        if soa.owner != *apex {
            return Err(SnapshotError::SoaNotAtApex(soa.owner));
        }

        let mut this = Self {
            soa: soa.clone(),
            nodes: Default::default(),
            len: 0,
        };
        this.insert(soa.to_record());

        for record in records {
            if record.rtype() == Rtype::SOA {
                continue;
            }
            if !record.owner().ends_with(apex) {
                return Err(SnapshotError::OutOfZone(record.owner().clone()));
            }
            this.insert(record);
        }

        Ok(this)
    }

    /// The SOA record of this version.
    pub fn soa(&self) -> &SoaRecord {
        &self.soa
    }

    /// The serial number of this version.
    pub fn serial(&self) -> u32 {
        self.soa.serial()
    }

    /// The apex of the zone.
    pub fn apex(&self) -> &StoredName {
        &self.soa.owner
    }

    /// The number of records, including the SOA.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the snapshot holds no records besides the SOA.
    pub fn is_empty(&self) -> bool {
        self.len <= 1
    }

    /// Iterate over every record, the SOA included.
    pub fn records(&self) -> impl Iterator<Item = &StoredRecord> + '_ {
        self.nodes.values().flatten()
    }

    /// Whether the exact record (ignoring its TTL) is present.
    pub fn contains(&self, record: &StoredRecord) -> bool {
        self.nodes
            .get(record.owner())
            .is_some_and(|rrs| rrs.contains(record))
    }

    fn insert(&mut self, record: StoredRecord) -> bool {
        let rrs = self.nodes.entry(record.owner().clone()).or_default();
        if rrs.contains(&record) {
            return false;
        }
        rrs.push(record);
        self.len += 1;
        true
    }

    fn remove(&mut self, record: &StoredRecord) -> bool {
        let Some(rrs) = self.nodes.get_mut(record.owner()) else {
            return false;
        };
        let Some(pos) = rrs.iter().position(|r| r == record) else {
            return false;
        };
        rrs.swap_remove(pos);
        if rrs.is_empty() {
            self.nodes.remove(record.owner());
        }
        self.len -= 1;
        true
    }
}

//--- Incremental updates

impl ZoneSnapshot {
    /// Build the next version of the zone by applying a delta.
    ///
    /// The delta must start at the serial of this snapshot.  On failure,
    /// `self` is untouched and no new version is produced.
    pub fn forward(&self, delta: &ZoneDelta) -> Result<Self, ForwardError> {
        if delta.soa.owner != self.soa.owner {
            return Err(ForwardError::MismatchedZones);
        } else if delta.soa.serial() != self.serial() {
            return Err(ForwardError::MismatchedVersions {
                local: self.serial(),
                delta: delta.soa.serial(),
            });
        }

        let mut next = self.clone();
        let old_soa = next.soa.to_record();
        next.remove(&old_soa);

        for record in &delta.only_this {
            if record.rtype() == Rtype::SOA {
                continue;
            }
            if !next.remove(record) {
                return Err(ForwardError::Inconsistent(record.owner().clone()));
            }
        }

        for record in &delta.only_next {
            if record.rtype() == Rtype::SOA {
                continue;
            }
            if !record.owner().ends_with(next.apex()) {
                return Err(ForwardError::OutOfZone(record.owner().clone()));
            }
            // Adding a record that already exists leaves the set unchanged.
            next.insert(record.clone());
        }

        next.soa = delta.next_soa.clone();
        next.insert(delta.next_soa.to_record());
        Ok(next)
    }
}

//--- Lookup

impl ZoneSnapshot {
    /// Look up the records for a name and type.
    ///
    /// `qname` must be at or below the apex of the zone.  Wildcards are not
    /// expanded.
    pub fn lookup(&self, qname: &StoredName, qtype: Rtype) -> Lookup {
        // Find the topmost zone cut above or at the name.
        let mut cut = None;
        for suffix in qname.iter_suffixes() {
            if suffix == *self.apex() || !suffix.ends_with(self.apex()) {
                break;
            }
            if let Some(rrs) = self.nodes.get(&suffix) {
                let ns: Vec<_> = rrs
                    .iter()
                    .filter(|r| r.rtype() == Rtype::NS)
                    .cloned()
                    .collect();
                if !ns.is_empty() {
                    cut = Some(ns);
                }
            }
        }
        if let Some(ns) = cut {
            return Lookup::Referral(ns);
        }

        let Some(rrs) = self.nodes.get(qname) else {
            // A name with descendants but no records of its own exists.
            let empty_non_terminal = self
                .nodes
                .keys()
                .any(|name| name != qname && name.ends_with(qname));
            return if empty_non_terminal {
                Lookup::NoData
            } else {
                Lookup::NxDomain
            };
        };

        let answer: Vec<_> = rrs
            .iter()
            .filter(|r| qtype == Rtype::ANY || r.rtype() == qtype)
            .cloned()
            .collect();
        if !answer.is_empty() {
            return Lookup::Answer(answer);
        }

        match rrs.iter().find(|r| r.rtype() == Rtype::CNAME) {
            Some(cname) => Lookup::Cname(cname.clone()),
            None => Lookup::NoData,
        }
    }
}

impl fmt::Debug for ZoneSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoneSnapshot")
            .field("apex", self.apex())
            .field("serial", &self.serial())
            .field("len", &self.len)
            .finish()
    }
}

//----------- ZoneDelta --------------------------------------------------------

/// The difference between two consecutive versions of a zone.
///
/// This is one "version" of an IXFR response.
#[derive(Clone, Debug)]
pub struct ZoneDelta {
    /// The SOA record of the older version.
    pub soa: SoaRecord,

    /// The SOA record of the newer version.
    pub next_soa: SoaRecord,

    /// The records present only in the older version.
    pub only_this: Vec<StoredRecord>,

    /// The records present only in the newer version.
    pub only_next: Vec<StoredRecord>,
}

//----------- Lookup -----------------------------------------------------------

/// The result of looking up a name in a [`ZoneSnapshot`].
#[derive(Clone, Debug)]
pub enum Lookup {
    /// Records of the requested type exist at the name.
    Answer(Vec<StoredRecord>),

    /// The name is an alias.
    Cname(StoredRecord),

    /// The name lies at or below a delegation; these are the NS records.
    Referral(Vec<StoredRecord>),

    /// The name exists but has no records of the requested type.
    NoData,

    /// The name does not exist.
    NxDomain,
}

//============ Errors ==========================================================

//----------- SnapshotError ----------------------------------------------------

/// An error when building a [`ZoneSnapshot`].
#[derive(Clone, Debug)]
pub enum SnapshotError {
    /// The SOA record is not at the apex of the zone.
    SoaNotAtApex(StoredName),

    /// A record lies outside the zone.
    OutOfZone(StoredName),
}

impl std::error::Error for SnapshotError {}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SoaNotAtApex(name) => write!(f, "the SOA record is owned by '{name}', not the apex"),
            Self::OutOfZone(name) => write!(f, "the record at '{name}' is outside the zone"),
        }
    }
}

//----------- ForwardError -----------------------------------------------------

/// An error when applying a [`ZoneDelta`] to a [`ZoneSnapshot`].
#[derive(Clone, Debug)]
pub enum ForwardError {
    /// The delta covers a different zone.
    MismatchedZones,

    /// The delta starts at a different version of the zone.
    MismatchedVersions {
        /// The serial of the local snapshot.
        local: u32,

        /// The serial the delta starts at.
        delta: u32,
    },

    /// The delta removes a record that is not present.
    Inconsistent(StoredName),

    /// The delta adds a record outside the zone.
    OutOfZone(StoredName),
}

impl std::error::Error for ForwardError {}

impl fmt::Display for ForwardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MismatchedZones => write!(f, "the snapshot and the diff belong to different zones"),
            Self::MismatchedVersions { local, delta } => write!(
                f,
                "the diff applies to serial {delta}, but the local copy has serial {local}"
            ),
            Self::Inconsistent(name) => {
                write!(f, "the diff removes a record at '{name}' that is not present")
            }
            Self::OutOfZone(name) => write!(f, "the diff adds a record at '{name}' outside the zone"),
        }
    }
}

//============ Tests ===========================================================
