//! Networking for a DNS server.

use std::{io, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use domain::base::Message;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    sync::mpsc,
};

/// The largest UDP message accepted.
const MAX_DGRAM_SIZE: usize = 4096;

//------------ Request -------------------------------------------------------

/// A DNS request received by a server.
#[derive(Clone, Debug)]
pub struct Request {
    /// The request message.
    pub message: Message<Bytes>,

    /// Where the request came from.
    pub source: SocketAddr,

    /// How the request was received.
    pub transport: Transport,
}

/// The transport protocol a request arrived on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

//------------ Service -------------------------------------------------------

/// A type accepts and dispatches incoming DNS requests.
pub trait Service: Send + Sync + 'static {
    /// Answer a request.
    ///
    /// Returning [`None`] drops the request without a response.
    fn handle_request(&self, request: &Request) -> Option<Transaction>;
}

impl<F> Service for F
where
    F: Fn(&Request) -> Option<Transaction> + Send + Sync + 'static,
{
    fn handle_request(&self, request: &Request) -> Option<Transaction> {
        (*self)(request)
    }
}

//------------ Transaction ---------------------------------------------------

/// The responses to a request.
#[derive(Clone, Debug)]
pub enum Transaction {
    /// The transaction is concluded with a single response.
    Single(Vec<u8>),

    /// The transaction results in a sequence of responses.
    Stream(Vec<Vec<u8>>),
}

impl Transaction {
    fn into_messages(self) -> Vec<Vec<u8>> {
        match self {
            Self::Single(msg) => vec![msg],
            Self::Stream(msgs) => msgs,
        }
    }
}

//------------ DgramServer ---------------------------------------------------

/// A DNS server over UDP.
pub struct DgramServer<Svc> {
    sock: Arc<UdpSocket>,
    service: Arc<Svc>,
}

impl<Svc: Service> DgramServer<Svc> {
    pub fn new(sock: UdpSocket, service: Arc<Svc>) -> Self {
        DgramServer {
            sock: sock.into(),
            service,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sock.local_addr()
    }

    pub async fn run(self) -> Result<(), io::Error> {
        let mut buf = vec![0u8; MAX_DGRAM_SIZE];
        loop {
            let (len, addr) = self.sock.recv_from(&mut buf).await?;
            let msg = match Message::from_octets(Bytes::copy_from_slice(&buf[..len])) {
                Ok(msg) => msg,
                Err(_) => {
                    log::trace!("Dropping malformed datagram from {addr}");
                    continue;
                }
            };
            let request = Request {
                message: msg,
                source: addr,
                transport: Transport::Udp,
            };
            let Some(tran) = self.service.handle_request(&request) else {
                continue;
            };
            for response in tran.into_messages() {
                if let Err(err) = Self::send_to(&self.sock, &response, &addr).await {
                    log::debug!("Could not send a response to {addr}: {err}");
                    break;
                }
            }
        }
    }

    async fn send_to(sock: &UdpSocket, data: &[u8], dest: &SocketAddr) -> Result<(), io::Error> {
        let sent = sock.send_to(data, dest).await?;
        if sent != data.len() {
            Err(io::Error::new(io::ErrorKind::Other, "short send"))
        } else {
            Ok(())
        }
    }
}

//------------ StreamServer --------------------------------------------------

/// A DNS server over TCP.
pub struct StreamServer<Svc> {
    sock: TcpListener,
    service: Arc<Svc>,
}

impl<Svc: Service> StreamServer<Svc> {
    pub fn new(sock: TcpListener, service: Arc<Svc>) -> Self {
        StreamServer { sock, service }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sock.local_addr()
    }

    pub async fn run(self) -> Result<(), io::Error> {
        loop {
            let (stream, addr) = self.sock.accept().await?;
            let service = self.service.clone();
            tokio::spawn(async move {
                if let Err(err) = Self::conn(stream, addr, service).await {
                    log::trace!("Connection from {addr} closed: {err}");
                }
            });
        }
    }

    async fn conn(
        stream: TcpStream,
        addr: SocketAddr,
        service: Arc<Svc>,
    ) -> Result<(), io::Error> {
        let (mut read, mut write) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);

        // Sending end: Read messages from the channel and send them.
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let Ok(len) = u16::try_from(msg.len()) else {
                    log::warn!("Dropping oversized response to {addr}");
                    continue;
                };
                if write.write_all(&len.to_be_bytes()).await.is_err()
                    || write.write_all(&msg).await.is_err()
                {
                    break;
                }
            }
        });

        loop {
            let size = match read.read_u16().await {
                Ok(size) => size as usize,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err),
            };
            let mut buf = vec![0u8; size];
            read.read_exact(&mut buf).await?;
            let msg = match Message::from_octets(Bytes::from(buf)) {
                Ok(msg) => msg,
                Err(_) => {
                    return Err(io::Error::new(io::ErrorKind::Other, "short message"))
                }
            };
            let request = Request {
                message: msg,
                source: addr,
                transport: Transport::Tcp,
            };
            let Some(tran) = service.handle_request(&request) else {
                continue;
            };
            for response in tran.into_messages() {
                if tx.send(response).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
