//! Collecting zone transfer responses.
//!
//! The records of an AXFR or IXFR response, possibly spread over several
//! messages, are interpreted by [`XfrResponseInterpreter`] into a stream of
//! [`ZoneUpdate`]s.  [`XfrReader`] gathers those updates into an
//! [`XfrResponse`]:
//!
//! - a single SOA record: the server has nothing newer ([RFC 1995], section
//!   2);
//! - SOA, records, SOA: the complete zone ([RFC 5936], section 2.2);
//! - SOA(new), then one or more sequences of SOA(old), deleted records,
//!   SOA(next), added records, and finally SOA(new) again: an incremental
//!   update ([RFC 1995], section 4).
//!
//! [RFC 1995]: https://datatracker.ietf.org/doc/html/rfc1995
//! [RFC 5936]: https://datatracker.ietf.org/doc/html/rfc5936

use std::fmt;

use bytes::Bytes;
use domain::{
    base::{
        name::{FlattenInto, ParsedName},
        Message, Record, ToName,
    },
    net::xfr::protocol::XfrResponseInterpreter,
    rdata::ZoneRecordData,
    zonetree::types::ZoneUpdate,
};

use crate::{
    serial,
    zone::snapshot::{SoaRecord, StoredName, StoredRecord, ZoneDelta},
};

/// A record as parsed from a response message.
type ParsedRecord = Record<ParsedName<Bytes>, ZoneRecordData<Bytes, ParsedName<Bytes>>>;

//----------- XfrResponse ------------------------------------------------------

/// The outcome of a zone transfer.
#[derive(Clone, Debug)]
pub enum XfrResponse {
    /// The server has no newer version; this is its current SOA.
    NoopSoa(SoaRecord),

    /// The complete contents of the zone.
    FullZone {
        /// The SOA record of the transferred version.
        soa: SoaRecord,

        /// Every other record of the zone.
        records: Vec<StoredRecord>,
    },

    /// A sequence of changes to the local version of the zone.
    IncrementalDelta {
        /// The SOA record of the resulting version.
        soa: SoaRecord,

        /// The changes, from oldest to newest.
        versions: Vec<ZoneDelta>,
    },
}

impl XfrResponse {
    /// The SOA record of the server's version of the zone.
    pub fn soa(&self) -> &SoaRecord {
        match self {
            Self::NoopSoa(soa) => soa,
            Self::FullZone { soa, .. } => soa,
            Self::IncrementalDelta { soa, .. } => soa,
        }
    }
}

//----------- XfrReader --------------------------------------------------------

/// Gathers the messages of a transfer response into an [`XfrResponse`].
pub struct XfrReader {
    /// The zone being transferred.
    zone: StoredName,

    /// For an IXFR, the serial of the version held locally.
    held: Option<u32>,

    /// The interpreter of the response stream.
    interpreter: XfrResponseInterpreter,

    /// Whether a message has been read yet.
    started: bool,

    /// What has been gathered so far.
    body: Body,
}

/// The part of a response gathered by an [`XfrReader`].
enum Body {
    /// Nothing but the initial SOA record.
    Empty,

    /// The records of a full zone transfer.
    Full(Vec<StoredRecord>),

    /// The versions of an incremental transfer, the last one still open.
    Incremental(Vec<ZoneDelta>),
}

impl XfrReader {
    /// Prepare to read an AXFR response.
    pub fn axfr(zone: StoredName) -> Self {
        Self::new(zone, None)
    }

    /// Prepare to read an IXFR response relative to the given serial.
    ///
    /// The server may answer an IXFR with a full zone transfer, which is
    /// recognized too.
    pub fn ixfr(zone: StoredName, held: u32) -> Self {
        Self::new(zone, Some(held))
    }

    fn new(zone: StoredName, held: Option<u32>) -> Self {
        Self {
            zone,
            held,
            interpreter: XfrResponseInterpreter::new(),
            started: false,
            body: Body::Empty,
        }
    }

    /// Read the next message of the response.
    ///
    /// Returns the complete response once its final record has been read,
    /// and [`None`] while more messages are needed.
    pub fn read(&mut self, message: Message<Bytes>) -> Result<Option<XfrResponse>, InterpretError> {
        let first = !std::mem::replace(&mut self.started, true);
        if first {
            if let Some(response) = self.up_to_date(&message)? {
                return Ok(Some(response));
            }
        }

        let updates = self
            .interpreter
            .interpret_response(message)
            .map_err(InterpretError::protocol)?;
        for update in updates {
            let update = update.map_err(|err| InterpretError::protocol(format!("{err:?}")))?;
            if let Some(response) = self.apply(update)? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Check for an IXFR answered with nothing but the server's SOA.
    ///
    /// That SOA may also merely open a response continued in later messages,
    /// which is only possible if it is newer than the local version.
    fn up_to_date(&self, message: &Message<Bytes>) -> Result<Option<XfrResponse>, InterpretError> {
        let Some(held) = self.held else {
            return Ok(None);
        };
        if message.header_counts().ancount() != 1 {
            return Ok(None);
        }
        let Some(record) = message
            .answer()
            .map_err(InterpretError::protocol)?
            .limit_to::<ZoneRecordData<Bytes, ParsedName<Bytes>>>()
            .next()
        else {
            return Ok(None);
        };
        let record = record.map_err(InterpretError::protocol)?;
        let soa = self.soa(record)?.ok_or(InterpretError::MissingSoa)?;
        if serial::less(held, soa.serial()) {
            log::trace!("IXFR of '{}' continues past {soa}", self.zone);
            return Ok(None);
        }
        Ok(Some(XfrResponse::NoopSoa(soa)))
    }

    /// Apply one update from the interpreter.
    fn apply(
        &mut self,
        update: ZoneUpdate<ParsedRecord>,
    ) -> Result<Option<XfrResponse>, InterpretError> {
        match update {
            ZoneUpdate::DeleteAllRecords => match self.body {
                Body::Empty => self.body = Body::Full(Vec::new()),
                _ => return Err(InterpretError::Inconsistent),
            },

            ZoneUpdate::AddRecord(record) => {
                let record = self.record(record)?;
                match &mut self.body {
                    Body::Full(records) => records.push(record),
                    Body::Incremental(versions) => match versions.last_mut() {
                        Some(delta) => delta.only_next.push(record),
                        None => return Err(InterpretError::Inconsistent),
                    },
                    Body::Empty => return Err(InterpretError::MissingSoa),
                }
            }

            ZoneUpdate::BeginBatchDelete(record) => {
                let soa = self.soa(record)?.ok_or(InterpretError::Inconsistent)?;
                if matches!(self.body, Body::Empty) {
                    self.body = Body::Incremental(Vec::new());
                }
                let Body::Incremental(versions) = &mut self.body else {
                    return Err(InterpretError::Inconsistent);
                };
                if let Some(prev) = versions.last() {
                    if prev.next_soa.serial() != soa.serial() {
                        return Err(InterpretError::Inconsistent);
                    }
                }
                versions.push(ZoneDelta {
                    next_soa: soa.clone(),
                    soa,
                    only_this: Vec::new(),
                    only_next: Vec::new(),
                });
            }

            ZoneUpdate::DeleteRecord(record) => {
                let record = self.record(record)?;
                match &mut self.body {
                    Body::Incremental(versions) => match versions.last_mut() {
                        Some(delta) => delta.only_this.push(record),
                        None => return Err(InterpretError::Inconsistent),
                    },
                    _ => return Err(InterpretError::Inconsistent),
                }
            }

            ZoneUpdate::BeginBatchAdd(record) => {
                let soa = self.soa(record)?.ok_or(InterpretError::Inconsistent)?;
                match &mut self.body {
                    Body::Incremental(versions) => match versions.last_mut() {
                        Some(delta) => delta.next_soa = soa,
                        None => return Err(InterpretError::Inconsistent),
                    },
                    _ => return Err(InterpretError::Inconsistent),
                }
            }

            ZoneUpdate::Finished(record) => {
                let soa = self.soa(record)?.ok_or(InterpretError::Inconsistent)?;
                return match std::mem::replace(&mut self.body, Body::Empty) {
                    Body::Full(records) => Ok(Some(XfrResponse::FullZone { soa, records })),
                    Body::Incremental(versions) => {
                        match versions.last() {
                            Some(last) if last.next_soa.serial() == soa.serial() => {}
                            _ => return Err(InterpretError::Inconsistent),
                        }
                        Ok(Some(XfrResponse::IncrementalDelta { soa, versions }))
                    }
                    Body::Empty => match self.held {
                        Some(held) if !serial::less(held, soa.serial()) => {
                            Ok(Some(XfrResponse::NoopSoa(soa)))
                        }
                        Some(_) => Err(InterpretError::MissingChanges(soa.serial())),
                        None => Err(InterpretError::Inconsistent),
                    },
                };
            }

            _ => return Err(InterpretError::Inconsistent),
        }
        Ok(None)
    }

    /// Convert a record, checking that it belongs to the zone.
    fn record(&self, record: ParsedRecord) -> Result<StoredRecord, InterpretError> {
        let record: StoredRecord = record.flatten_into();
        if !record.owner().ends_with(&self.zone) {
            return Err(InterpretError::OutOfZone(record.owner().clone()));
        }
        Ok(record)
    }

    /// Convert a record expected to be the zone SOA.
    ///
    /// Returns [`None`] if the record is not a SOA record at all.
    fn soa(&self, record: ParsedRecord) -> Result<Option<SoaRecord>, InterpretError> {
        let record = self.record(record)?;
        let Some(soa) = SoaRecord::from_record(&record) else {
            return Ok(None);
        };
        if soa.owner != self.zone {
            return Err(InterpretError::OutOfZone(soa.owner));
        }
        Ok(Some(soa))
    }
}

//============ Errors ==========================================================

//----------- InterpretError ---------------------------------------------------

/// A malformed transfer response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterpretError {
    /// The response does not start with the SOA of the zone.
    MissingSoa,

    /// A record lies outside the zone.
    OutOfZone(StoredName),

    /// The SOA records in the response do not line up.
    Inconsistent,

    /// The response ended early.
    Incomplete,

    /// An IXFR response named a newer serial but held no changes.
    MissingChanges(u32),

    /// The response violated the transfer protocol.
    Protocol(Box<str>),
}

impl InterpretError {
    fn protocol(err: impl fmt::Display) -> Self {
        Self::Protocol(err.to_string().into())
    }
}

impl std::error::Error for InterpretError {}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSoa => f.write_str("the response does not start with the zone SOA"),
            Self::OutOfZone(name) => write!(f, "the record at '{name}' is outside the zone"),
            Self::Inconsistent => f.write_str("the SOA records in the response are inconsistent"),
            Self::Incomplete => f.write_str("the response ended before the final SOA"),
            Self::MissingChanges(serial) => {
                write!(f, "the response announced serial {serial} but held no changes")
            }
            Self::Protocol(err) => write!(f, "invalid transfer response: {err}"),
        }
    }
}

//============ Tests ===========================================================
