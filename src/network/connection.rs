//! Transport for MessageU exchanges
//!
//! Every exchange opens a fresh TCP connection, writes the request as a
//! sequence of fixed 1024-byte packets, reads the response the same way and
//! closes. Short chunks are zero-padded to a full packet; the reader relies on
//! knowing how many bytes it wants, not on packet boundaries.

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::ServerAddress;

/// Size of every packet written to or read from the socket
pub const PACKET_SIZE: usize = 1024;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Invalid server port: {0}")]
    InvalidPort(String),

    #[error("Server address not configured")]
    NotConfigured,

    #[error("Failed connecting to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Refusing to send an empty request")]
    EmptyRequest,

    #[error("Send failed: {0}")]
    Send(#[source] io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("Connection closed by server after {received} of {expected} bytes")]
    EarlyClose { received: usize, expected: usize },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Transport statistics
#[derive(Debug, Default, Clone)]
pub struct TransportStats {
    /// Connections opened
    pub connections: u64,
    /// Packets written
    pub packets_sent: u64,
    /// Packets read
    pub packets_received: u64,
}

/// Packetized TCP transport; one exchange in flight at a time
pub struct Transport {
    /// Validated server endpoint
    address: Option<ServerAddress>,
    /// Live connection, only present during an exchange
    stream: Option<TcpStream>,
    /// Statistics
    stats: TransportStats,
}

impl Transport {
    /// Create a transport with no server configured
    pub fn new() -> Self {
        Self {
            address: None,
            stream: None,
            stats: TransportStats::default(),
        }
    }

    /// Create a transport bound to a validated server address
    pub fn with_address(address: ServerAddress) -> Self {
        Self {
            address: Some(address),
            ..Self::new()
        }
    }

    /// Validate and store the server endpoint; leaves the previous one in
    /// place on failure
    pub fn set_address(&mut self, host: &str, port: &str) -> TransportResult<()> {
        self.address = Some(ServerAddress::new(host, port)?);
        Ok(())
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    #[cfg(test)]
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Open a connection to the configured server, dropping any previous one
    pub async fn connect(&mut self) -> TransportResult<()> {
        let address = self.address.clone().ok_or(TransportError::NotConfigured)?;

        self.close().await;

        tracing::debug!("Connecting to {}", address);
        let stream = TcpStream::connect((address.host(), address.port()))
            .await
            .map_err(|source| TransportError::Connect {
                addr: address.to_string(),
                source,
            })?;

        self.stream = Some(stream);
        self.stats.connections += 1;
        Ok(())
    }

    /// Write `data` as a sequence of full packets
    pub async fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        if data.is_empty() {
            return Err(TransportError::EmptyRequest);
        }

        let packets = write_packets(stream, data)
            .await
            .map_err(TransportError::Send)?;
        self.stats.packets_sent += packets as u64;

        tracing::debug!("Sent {} bytes in {} packet(s)", data.len(), packets);
        Ok(())
    }

    /// Read packets until `buf` is completely filled
    pub async fn receive(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let packets = read_packets(stream, buf).await?;
        self.stats.packets_received += packets as u64;
        Ok(())
    }

    /// Read a single packet, which may be short if the server shut down
    /// mid-packet. Returns the number of bytes read.
    pub async fn receive_packet(&mut self, packet: &mut [u8; PACKET_SIZE]) -> TransportResult<usize> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let n = read_packet(stream, packet)
            .await
            .map_err(TransportError::Receive)?;
        if n == 0 {
            return Err(TransportError::EarlyClose {
                received: 0,
                expected: PACKET_SIZE,
            });
        }
        self.stats.packets_received += 1;
        Ok(n)
    }

    /// Connect, send `request`, read exactly `response_len` bytes and close.
    /// The connection is closed whatever the outcome.
    pub async fn send_receive(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> TransportResult<Vec<u8>> {
        self.connect().await?;

        let result = async {
            self.send(request).await?;
            let mut response = vec![0u8; response_len];
            self.receive(&mut response).await?;
            Ok::<_, TransportError>(response)
        }
        .await;

        self.close().await;
        result
    }

    /// Close the connection; does nothing when already closed
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // The server may already have hung up.
            let _ = stream.shutdown().await;
            tracing::debug!(
                "Connection closed ({} opened, {} packets out, {} in)",
                self.stats.connections,
                self.stats.packets_sent,
                self.stats.packets_received
            );
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `data` in zero-padded packets, returning the number of packets
pub async fn write_packets<W>(writer: &mut W, data: &[u8]) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut packets = 0;
    for chunk in data.chunks(PACKET_SIZE) {
        let mut packet = [0u8; PACKET_SIZE];
        packet[..chunk.len()].copy_from_slice(chunk);
        normalize_packet(&mut packet[..chunk.len()]);

        writer.write_all(&packet).await?;
        packets += 1;
    }
    writer.flush().await?;
    Ok(packets)
}

/// Read one packet: up to `PACKET_SIZE` bytes, stopping early only when the
/// peer shuts down. Returns the number of bytes read; 0 means the peer had
/// already closed.
pub async fn read_packet<R>(reader: &mut R, packet: &mut [u8; PACKET_SIZE]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < PACKET_SIZE {
        let n = reader.read(&mut packet[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    normalize_packet(&mut packet[..filled]);
    Ok(filled)
}

/// Read packets until `out` is filled, discarding whatever follows in the
/// last packet. Returns the number of packets read.
pub async fn read_packets<R>(reader: &mut R, out: &mut [u8]) -> TransportResult<usize>
where
    R: AsyncRead + Unpin,
{
    let mut received = 0;
    let mut packets = 0;
    let mut packet = [0u8; PACKET_SIZE];

    while received < out.len() {
        let n = read_packet(reader, &mut packet)
            .await
            .map_err(TransportError::Receive)?;
        if n == 0 {
            return Err(TransportError::EarlyClose {
                received,
                expected: out.len(),
            });
        }

        let take = n.min(out.len() - received);
        out[received..received + take].copy_from_slice(&packet[..take]);
        received += take;
        packets += 1;
    }

    Ok(packets)
}

/// Byte-order pass applied to every packet. Big-endian hosts reverse each
/// complete 4-byte word so that the packet matches a little-endian peer;
/// trailing bytes that do not fill a word are left alone. Little-endian hosts
/// leave packets untouched.
pub fn normalize_packet(packet: &mut [u8]) {
    if cfg!(target_endian = "big") {
        swap_words(packet);
    }
}

/// Reverse the bytes of every complete 4-byte word in `buf`
pub fn swap_words(buf: &mut [u8]) {
    for word in buf.chunks_exact_mut(4) {
        word.reverse();
    }
}
