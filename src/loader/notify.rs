//! Validating NOTIFY messages.
//!
//! Upstream servers announce new versions of a zone with NOTIFY messages
//! ([RFC 1996]).  Since these arrive unsolicited over UDP, only those sent by
//! one of the configured upstream servers of the zone are acted upon.
//!
//! [RFC 1996]: https://datatracker.ietf.org/doc/html/rfc1996

use domain::base::iana::Opcode;

use crate::{net::server::Request, zone::Zone};

//----------- is_notify() ------------------------------------------------------

/// Whether a request is a NOTIFY for a zone from one of its upstream servers.
///
/// Only the source IP address of the request is compared, unless the zone is
/// configured to match ports too.  The question of the request is not
/// examined; the caller has already routed the request to `zone`.
pub fn is_notify(zone: &Zone, request: &Request) -> bool {
    if request.message.header().opcode() != Opcode::NOTIFY {
        return false;
    }
    zone.peers
        .admits(&request.source, zone.loader.notify_match_port)
}

//============ Tests ===========================================================
