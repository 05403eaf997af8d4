//! Network module - Moves MessageU requests and responses over TCP
//!
//! Provides:
//! - Transport for packetized, one-shot connect/send/receive/close exchanges
//! - Protocol client that validates and reassembles server responses

mod client;
mod connection;

pub use client::*;
pub use connection::*;

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A validated server endpoint: a literal IPv4 address or "localhost", and a
/// positive port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    /// Validate a host and a port given as text
    pub fn new(host: &str, port: &str) -> TransportResult<Self> {
        let host = host.trim();
        let port = port.trim();

        if !is_valid_host(host) {
            return Err(TransportError::InvalidAddress(host.to_string()));
        }

        let port = parse_port(port).ok_or_else(|| TransportError::InvalidPort(port.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for ServerAddress {
    type Err = TransportError;

    /// Parse "host:port"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidAddress(s.to_string()))?;
        Self::new(host, port)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn is_valid_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost") || host.parse::<Ipv4Addr>().is_ok()
}

fn parse_port(port: &str) -> Option<u16> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    port.parse::<u16>().ok().filter(|&p| p > 0)
}

/// In-process stand-in for the MessageU server, used by tests
#[cfg(test)]
pub(crate) mod test_server {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::{ServerAddress, PACKET_SIZE};
    use crate::protocol::{decode_request_header, REQUEST_HEADER_SIZE};

    /// Serve one connection per canned response, padding each response to
    /// whole packets. Resolves to the requests received, trimmed to
    /// header + declared payload.
    pub async fn spawn(responses: Vec<Vec<u8>>) -> (ServerAddress, JoinHandle<Vec<Vec<u8>>>) {
        spawn_with(responses, true).await
    }

    /// Like `spawn`, but writes responses as a plain byte stream
    pub async fn spawn_unpadded(
        responses: Vec<Vec<u8>>,
    ) -> (ServerAddress, JoinHandle<Vec<Vec<u8>>>) {
        spawn_with(responses, false).await
    }

    async fn spawn_with(
        responses: Vec<Vec<u8>>,
        pad: bool,
    ) -> (ServerAddress, JoinHandle<Vec<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let address = ServerAddress::new("127.0.0.1", &port.to_string()).unwrap();

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();

                let mut first = [0u8; PACKET_SIZE];
                stream.read_exact(&mut first).await.unwrap();
                let header = decode_request_header(&first).unwrap();
                let total = REQUEST_HEADER_SIZE + header.payload_len as usize;
                let padded = total.div_ceil(PACKET_SIZE) * PACKET_SIZE;
                let mut request = first.to_vec();
                request.resize(padded, 0);
                stream.read_exact(&mut request[PACKET_SIZE..]).await.unwrap();
                request.truncate(total);
                requests.push(request);

                let mut out = response;
                if pad {
                    let padded = out.len().div_ceil(PACKET_SIZE).max(1) * PACKET_SIZE;
                    out.resize(padded, 0);
                }
                stream.write_all(&out).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            requests
        });

        (address, handle)
    }
}
