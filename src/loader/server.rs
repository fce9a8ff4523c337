//! Loading zones from DNS servers.

use std::{fmt, io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use domain::{
    base::{
        iana::Rcode,
        name::{FlattenInto, ParsedName},
        Message, MessageBuilder, Rtype, ToName,
    },
    net::client::{
        self,
        request::{self, RequestMessage, RequestMessageMulti, SendRequest, SendRequestMulti},
    },
    rdata::ZoneRecordData,
};
use tokio::net::TcpStream;

use crate::zone::snapshot::{SoaRecord, StoredName, StoredRecord};

use super::{
    upstream::XfrKind,
    xfr::{InterpretError, XfrReader, XfrResponse},
};

/// Record data as parsed from a response.
type ParsedData = ZoneRecordData<Bytes, ParsedName<Bytes>>;

//----------- transfer() -------------------------------------------------------

/// Perform a zone transfer over TCP.
///
/// An AXFR or IXFR is requested from the server, and the (possibly
/// multi-message) response is interpreted.  Each message must arrive within
/// `query_timeout`; the whole transfer must finish within `transfer_timeout`.
pub async fn transfer(
    zone: &StoredName,
    addr: SocketAddr,
    kind: &XfrKind,
    query_timeout: Duration,
    transfer_timeout: Duration,
) -> Result<XfrResponse, XfrError> {
    tokio::time::timeout(
        transfer_timeout,
        transfer_inner(zone, addr, kind, query_timeout),
    )
    .await
    .map_err(|_| XfrError::Timeout)?
}

async fn transfer_inner(
    zone: &StoredName,
    addr: SocketAddr,
    kind: &XfrKind,
    query_timeout: Duration,
) -> Result<XfrResponse, XfrError> {
    // Prepare the query message.
    let (qtype, mut reader) = match kind {
        XfrKind::Axfr => (Rtype::AXFR, XfrReader::axfr(zone.clone())),
        XfrKind::Ixfr(soa) => (Rtype::IXFR, XfrReader::ixfr(zone.clone(), soa.serial())),
    };
    let mut builder = MessageBuilder::new_bytes().question();
    builder.push((zone, qtype)).map_err(XfrError::compose)?;
    let mut builder = builder.authority();
    if let XfrKind::Ixfr(soa) = kind {
        builder.push(soa.to_record()).map_err(XfrError::compose)?;
    }
    let message = builder.into_message();

    // Prepare a TCP client.
    let tcp_conn = tokio::time::timeout(query_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| XfrError::Timeout)?
        .map_err(|err| XfrError::Connection(Arc::new(err)))?;
    let (client, transport) = client::stream::Connection::<
        RequestMessage<Bytes>,
        RequestMessageMulti<Bytes>,
    >::new(tcp_conn);
    tokio::task::spawn(transport.run());

    let request = RequestMessageMulti::new(message)?;
    let mut response = SendRequestMulti::send_request(&client, request);

    // Process the response messages.
    let mut first = true;
    loop {
        let message = tokio::time::timeout(query_timeout, response.get_response())
            .await
            .map_err(|_| XfrError::Timeout)??
            .ok_or(XfrError::Interpret(InterpretError::Incomplete))?;
        check_response(&message, zone, qtype, first)?;
        first = false;

        if let Some(response) = reader.read(message)? {
            log::trace!("Completed {qtype} of '{zone}' from {addr}");
            return Ok(response);
        }
    }
}

//----------- query_soa() ------------------------------------------------------

/// Query a DNS server for the SOA record of a zone.
///
/// The query is sent over UDP; if the response is truncated, it is repeated
/// over TCP.
pub async fn query_soa(
    zone: &StoredName,
    addr: SocketAddr,
    timeout: Duration,
) -> Result<SoaRecord, QuerySoaError> {
    // Prepare the SOA query message.
    let mut builder = MessageBuilder::new_bytes().question();
    builder
        .push((zone, Rtype::SOA))
        .map_err(QuerySoaError::compose)?;
    let message = builder.into_message();

    // Prepare a UDP client with TCP fallback.
    let udp_conn = client::protocol::UdpConnect::new(addr);
    let tcp_conn = client::protocol::TcpConnect::new(addr);
    let (client, transport) = client::dgram_stream::Connection::new(udp_conn, tcp_conn);
    tokio::task::spawn(transport.run());

    // Send the query.
    let request = RequestMessage::new(message)?;
    let response = tokio::time::timeout(timeout, client.send_request(request).get_response())
        .await
        .map_err(|_| QuerySoaError::Timeout)??;

    // Parse the response message.
    let header = response.header();
    if !header.qr() {
        return Err(QuerySoaError::MismatchedResponse);
    }
    if header.rcode() != Rcode::NOERROR {
        return Err(QuerySoaError::Rcode(header.rcode()));
    }
    let question = response.sole_question().map_err(QuerySoaError::parse)?;
    if !question.qname().name_eq(zone) || question.qtype() != Rtype::SOA {
        return Err(QuerySoaError::MismatchedResponse);
    }

    for record in response.answer().map_err(QuerySoaError::parse)? {
        let record = record.map_err(QuerySoaError::parse)?;
        let Some(record) = record
            .into_record::<ParsedData>()
            .map_err(QuerySoaError::parse)?
        else {
            continue;
        };
        let record: StoredRecord = record.flatten_into();
        if let Some(soa) = SoaRecord::from_record(&record) {
            if soa.owner == *zone {
                return Ok(soa);
            }
        }
    }

    Err(QuerySoaError::MissingSoa)
}

//----------- Helpers ----------------------------------------------------------

/// Check the envelope of a transfer response message.
///
/// The error code is checked here, before interpretation, so that servers
/// declining an IXFR can be recognized.
fn check_response(
    response: &Message<Bytes>,
    zone: &StoredName,
    qtype: Rtype,
    first: bool,
) -> Result<(), XfrError> {
    let header = response.header();
    if !header.qr() {
        return Err(XfrError::MismatchedResponse);
    }
    if header.rcode() != Rcode::NOERROR {
        return Err(XfrError::Rcode(header.rcode()));
    }

    // Only the first message of a transfer needs to repeat the question.
    let counts = response.header_counts();
    if first || counts.qdcount() > 0 {
        let question = response.sole_question().map_err(XfrError::parse)?;
        if !question.qname().name_eq(zone) || question.qtype() != qtype {
            return Err(XfrError::MismatchedResponse);
        }
    }
    Ok(())
}

//============ Errors ==========================================================

//----------- XfrError ---------------------------------------------------------

/// An error when performing a zone transfer.
#[derive(Clone, Debug)]
pub enum XfrError {
    /// The server could not be connected to.
    Connection(Arc<io::Error>),

    /// The request could not be sent or answered.
    Request(Box<str>),

    /// The transfer did not finish in time.
    Timeout,

    /// A response could not be parsed.
    Parse(Box<str>),

    /// A response did not match the query.
    MismatchedResponse,

    /// The server answered with an error.
    Rcode(Rcode),

    /// The response records are malformed.
    Interpret(InterpretError),
}

impl XfrError {
    fn parse(err: impl fmt::Display) -> Self {
        Self::Parse(err.to_string().into())
    }

    fn compose(err: impl fmt::Display) -> Self {
        Self::Request(err.to_string().into())
    }

    /// Whether the server declined to serve an IXFR.
    ///
    /// Such servers may still serve an AXFR.  A server that announced a newer
    /// version without sending any changes is treated the same way.
    pub fn is_ixfr_unsupported(&self) -> bool {
        match self {
            Self::Rcode(rcode) => [Rcode::NOTIMP, Rcode::REFUSED, Rcode::FORMERR].contains(rcode),
            Self::Interpret(InterpretError::MissingChanges(_)) => true,
            _ => false,
        }
    }
}

impl From<request::Error> for XfrError {
    fn from(value: request::Error) -> Self {
        Self::Request(value.to_string().into())
    }
}

impl From<InterpretError> for XfrError {
    fn from(value: InterpretError) -> Self {
        Self::Interpret(value)
    }
}

impl std::error::Error for XfrError {}

impl fmt::Display for XfrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(err) => write!(f, "could not connect: {err}"),
            Self::Request(err) => write!(f, "the request failed: {err}"),
            Self::Timeout => f.write_str("the transfer timed out"),
            Self::Parse(err) => write!(f, "could not parse the response: {err}"),
            Self::MismatchedResponse => f.write_str("the response did not match the query"),
            Self::Rcode(rcode) => write!(f, "the server responded with {rcode}"),
            Self::Interpret(err) => err.fmt(f),
        }
    }
}

//----------- QuerySoaError ----------------------------------------------------

/// An error when querying a DNS server for a SOA record.
#[derive(Clone, Debug)]
pub enum QuerySoaError {
    /// The request could not be sent or answered.
    Request(Box<str>),

    /// The server did not respond in time.
    Timeout,

    /// The response could not be parsed.
    Parse(Box<str>),

    /// The response did not match the query.
    MismatchedResponse,

    /// The server answered with an error.
    Rcode(Rcode),

    /// The response did not contain the SOA record of the zone.
    MissingSoa,
}

impl QuerySoaError {
    fn parse(err: impl fmt::Display) -> Self {
        Self::Parse(err.to_string().into())
    }

    fn compose(err: impl fmt::Display) -> Self {
        Self::Request(err.to_string().into())
    }
}

impl From<request::Error> for QuerySoaError {
    fn from(value: request::Error) -> Self {
        Self::Request(value.to_string().into())
    }
}

impl std::error::Error for QuerySoaError {}

impl fmt::Display for QuerySoaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(err) => write!(f, "the request failed: {err}"),
            Self::Timeout => f.write_str("the query timed out"),
            Self::Parse(err) => write!(f, "could not parse the response: {err}"),
            Self::MismatchedResponse => f.write_str("the response did not match the query"),
            Self::Rcode(rcode) => write!(f, "the server responded with {rcode}"),
            Self::MissingSoa => f.write_str("the response did not contain the zone SOA"),
        }
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use domain::base::iana::Rcode;

    use crate::{
        loader::{upstream::XfrKind, xfr::XfrResponse},
        tests::primary::{parse_zone, MockPrimary},
        zone::snapshot::tests::{a, name},
    };

    use super::{query_soa, transfer, QuerySoaError, XfrError};

    const SERIAL_250: &str = "\
example.org. 3600 IN SOA ns.example.org. admin.example.org. 250 3600 600 86400 300
example.org. 3600 IN NS ns.example.org.
www.example.org. 3600 IN A 192.0.2.1
";

    const SERIAL_252: &str = "\
example.org. 3600 IN SOA ns.example.org. admin.example.org. 252 3600 600 86400 300
example.org. 3600 IN NS ns.example.org.
www.example.org. 3600 IN A 192.0.2.2
";

    async fn ixfr(primary: &MockPrimary, held: u32) -> Result<XfrResponse, XfrError> {
        let text = if held == 250 { SERIAL_250 } else { SERIAL_252 };
        let soa = parse_zone(text).soa().clone();
        transfer(
            &name("example.org."),
            primary.addr(),
            &XfrKind::Ixfr(soa),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .await
    }

    #[tokio::test]
    async fn soa_query() {
        let primary = MockPrimary::launch(SERIAL_250).await;
        let soa = query_soa(&name("example.org."), primary.addr(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(soa.serial(), 250);

        let res = query_soa(&name("example.com."), primary.addr(), Duration::from_secs(2)).await;
        assert!(matches!(res, Err(QuerySoaError::Rcode(Rcode::REFUSED))));

        primary.set_online(false);
        let res = query_soa(&name("example.org."), primary.addr(), Duration::from_millis(200)).await;
        assert!(matches!(res, Err(QuerySoaError::Timeout)));
    }

    #[tokio::test]
    async fn axfr_over_two_messages() {
        let primary = MockPrimary::launch(SERIAL_250).await;
        let res = transfer(
            &name("example.org."),
            primary.addr(),
            &XfrKind::Axfr,
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let XfrResponse::FullZone { soa, records } = res else {
            panic!("expected a full zone, got {res:?}");
        };
        assert_eq!(soa.serial(), 250);
        assert_eq!(records.len(), 2);
        assert!(records.contains(&a("www.example.org.", "192.0.2.1")));
    }

    #[tokio::test]
    async fn up_to_date_ixfr() {
        let primary = MockPrimary::launch(SERIAL_250).await;
        let res = ixfr(&primary, 250).await.unwrap();
        assert!(matches!(res, XfrResponse::NoopSoa(soa) if soa.serial() == 250));
    }

    #[tokio::test]
    async fn ixfr_split_after_first_soa() {
        let primary = MockPrimary::launch(SERIAL_250).await;
        primary.update(SERIAL_252);
        primary.set_split_ixfr(true);

        let res = ixfr(&primary, 250).await.unwrap();
        let XfrResponse::IncrementalDelta { soa, versions } = res else {
            panic!("expected an incremental delta, got {res:?}");
        };
        assert_eq!(soa.serial(), 252);
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].soa.serial(), 250);
        assert_eq!(versions[0].only_this, [a("www.example.org.", "192.0.2.1")]);
        assert_eq!(versions[0].only_next, [a("www.example.org.", "192.0.2.2")]);

        // Split or not, a current client is told there is nothing new.
        let res = ixfr(&primary, 252).await.unwrap();
        assert!(matches!(res, XfrResponse::NoopSoa(soa) if soa.serial() == 252));
    }
}
