//! Answering DNS queries from the served zones.
//!
//! Queries are routed to the zone closest to their name.  A zone is only
//! served while its status permits it; otherwise queries for it fail with
//! SERVFAIL.  NOTIFY messages from the upstream servers of a zone prompt an
//! immediate refresh of it.

use std::sync::Arc;

use bytes::Bytes;
use domain::base::{
    iana::{Class, Opcode, Rcode},
    message_builder::PushError,
    name::{FlattenInto, ParsedName},
    Message, MessageBuilder, Rtype,
};
use domain::rdata::Soa;

use crate::{
    center::Center,
    loader::notify::is_notify,
    net::server::{Request, Service, Transaction, Transport},
    zone::{
        snapshot::{Lookup, StoredName, StoredRecord},
        Zone, ZoneSnapshot,
    },
};

/// The largest UDP response sent without truncation.
const MAX_UDP_RESPONSE: usize = 512;

//------------ Answer --------------------------------------------------------

/// An answer to a query.
#[derive(Clone, Debug)]
pub struct Answer {
    /// The response code of the answer.
    rcode: Rcode,

    /// Whether the answer is authoritative.
    authoritative: bool,

    /// The content of the answer.
    content: AnswerContent,

    /// The records for the authority section.
    authority: Vec<StoredRecord>,
}

impl Answer {
    pub fn new(rcode: Rcode) -> Self {
        Answer {
            rcode,
            authoritative: false,
            content: AnswerContent::NoData,
            authority: Vec::new(),
        }
    }

    /// An authoritative answer from a zone.
    pub fn authoritative(rcode: Rcode) -> Self {
        Answer {
            authoritative: true,
            ..Self::new(rcode)
        }
    }

    pub fn refused() -> Self {
        Answer::new(Rcode::REFUSED)
    }

    pub fn servfail() -> Self {
        Answer::new(Rcode::SERVFAIL)
    }

    pub fn rcode(&self) -> Rcode {
        self.rcode
    }

    pub fn add_cname(&mut self, cname: StoredRecord) {
        self.content = AnswerContent::Cname(cname);
    }

    pub fn add_answer(&mut self, answer: Vec<StoredRecord>) {
        self.content = AnswerContent::Data(answer);
    }

    pub fn add_authority(&mut self, authority: impl IntoIterator<Item = StoredRecord>) {
        self.authority.extend(authority)
    }

    /// Build the response message to `request`.
    pub fn to_message(&self, request: &Message<Bytes>) -> Result<Vec<u8>, PushError> {
        let mut builder = MessageBuilder::new_vec().start_answer(request, self.rcode)?;
        builder.header_mut().set_aa(self.authoritative);

        match self.content {
            AnswerContent::Data(ref answer) => {
                for record in answer {
                    builder.push(record)?;
                }
            }
            AnswerContent::Cname(ref cname) => builder.push(cname)?,
            AnswerContent::NoData => {}
        }

        let mut builder = builder.authority();
        for record in &self.authority {
            builder.push(record)?;
        }

        Ok(builder.finish())
    }

    /// Build a response to `request` that only announces truncation.
    fn to_truncated(&self, request: &Message<Bytes>) -> Result<Vec<u8>, PushError> {
        let mut builder = MessageBuilder::new_vec().start_answer(request, self.rcode)?;
        builder.header_mut().set_aa(self.authoritative);
        builder.header_mut().set_tc(true);
        Ok(builder.finish())
    }
}

//------------ AnswerContent -------------------------------------------------

/// The content of the answer.
#[derive(Clone, Debug)]
pub enum AnswerContent {
    Data(Vec<StoredRecord>),
    Cname(StoredRecord),
    NoData,
}

//------------ Responder -----------------------------------------------------

/// The [`Service`] answering queries for the served zones.
pub struct Responder {
    center: Arc<Center>,
}

impl Responder {
    pub fn new(center: Arc<Center>) -> Self {
        Responder { center }
    }

    /// Answer a request.
    pub fn answer(&self, request: &Request) -> Answer {
        let message = &request.message;
        match message.header().opcode() {
            Opcode::QUERY => {}
            Opcode::NOTIFY => return self.notify(request),
            _ => return Answer::new(Rcode::NOTIMP),
        }

        let Ok(question) = message.sole_question() else {
            return Answer::new(Rcode::FORMERR);
        };
        if question.qclass() != Class::IN {
            return Answer::refused();
        }
        let qname: StoredName = question.qname().clone().flatten_into();
        let qtype = question.qtype();

        let Some(zone) = self.center.find_zone(&qname) else {
            return Answer::refused();
        };
        let Some(snapshot) = servable(&zone) else {
            log::debug!("Failing query for '{qname}': zone '{}' is not servable", zone.name);
            return Answer::servfail();
        };

        match qtype {
            Rtype::AXFR => Answer::refused(),
            Rtype::IXFR => ixfr(&snapshot, &qname, message),
            _ => query(&snapshot, &qname, qtype),
        }
    }

    /// Handle a NOTIFY message.
    fn notify(&self, request: &Request) -> Answer {
        let Ok(question) = request.message.sole_question() else {
            return Answer::new(Rcode::FORMERR);
        };
        let qname: StoredName = question.qname().clone().flatten_into();
        let Some(zone) = self.center.zone(&qname) else {
            log::debug!("Ignoring NOTIFY from {} for unknown zone '{qname}'", request.source);
            return Answer::refused();
        };

        if !is_notify(&zone, request) {
            log::warn!(
                "Refusing NOTIFY for zone '{}' from {}, which is not an upstream server",
                zone.name,
                request.source
            );
            return Answer::refused();
        }

        log::info!("Received NOTIFY for zone '{}' from {}", zone.name, request.source);
        zone.request_refresh();
        Answer::authoritative(Rcode::NOERROR)
    }
}

impl Service for Responder {
    fn handle_request(&self, request: &Request) -> Option<Transaction> {
        // Never answer responses.
        if request.message.header().qr() {
            return None;
        }

        let answer = self.answer(request);
        let response = match answer.to_message(&request.message) {
            Ok(response) => response,
            Err(err) => {
                log::warn!("Could not build a response to {}: {err}", request.source);
                Answer::servfail().to_message(&request.message).ok()?
            }
        };

        if request.transport == Transport::Udp && response.len() > MAX_UDP_RESPONSE {
            return answer.to_truncated(&request.message).ok().map(Transaction::Single);
        }
        Some(Transaction::Single(response))
    }
}

/// The published version of a zone, if it may be served.
fn servable(zone: &Zone) -> Option<Arc<ZoneSnapshot>> {
    if !zone.status().is_servable() {
        return None;
    }
    zone.snapshot()
}

/// Answer a regular query.
fn query(snapshot: &ZoneSnapshot, qname: &StoredName, qtype: Rtype) -> Answer {
    let soa = || snapshot.soa().to_record();
    match snapshot.lookup(qname, qtype) {
        Lookup::Answer(records) => {
            let mut answer = Answer::authoritative(Rcode::NOERROR);
            answer.add_answer(records);
            answer
        }
        Lookup::Cname(cname) => {
            let mut answer = Answer::authoritative(Rcode::NOERROR);
            answer.add_cname(cname);
            answer
        }
        Lookup::Referral(ns) => {
            let mut answer = Answer::new(Rcode::NOERROR);
            answer.add_authority(ns);
            answer
        }
        Lookup::NoData => {
            let mut answer = Answer::authoritative(Rcode::NOERROR);
            answer.add_authority([soa()]);
            answer
        }
        Lookup::NxDomain => {
            let mut answer = Answer::authoritative(Rcode::NXDOMAIN);
            answer.add_authority([soa()]);
            answer
        }
    }
}

/// Answer an IXFR query.
///
/// Zones are not transferred onwards, but a client that is already up to
/// date is told so with the current SOA record.
fn ixfr(snapshot: &ZoneSnapshot, qname: &StoredName, message: &Message<Bytes>) -> Answer {
    if qname != snapshot.apex() {
        return Answer::refused();
    }

    let client = message
        .authority()
        .ok()
        .and_then(|section| section.limit_to::<Soa<ParsedName<Bytes>>>().next())
        .and_then(Result::ok)
        .map(|record| record.data().serial().into_int());

    match client {
        Some(serial) if serial == snapshot.serial() => {
            let mut answer = Answer::authoritative(Rcode::NOERROR);
            answer.add_answer(vec![snapshot.soa().to_record()]);
            answer
        }
        Some(_) => Answer::refused(),
        None => Answer::new(Rcode::FORMERR),
    }
}

//============ Tests ===========================================================
