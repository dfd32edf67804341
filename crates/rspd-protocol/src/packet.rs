//! # Transport and Framing
//!
//! Byte-level packet delimiting for the GDB remote serial protocol.
//!
//! ## Wire Format
//!
//! ```text
//! $<payload>#<cc>
//! ```
//!
//! `cc` is the sum of the payload bytes modulo 256, as two lowercase hex
//! digits. The receiver answers `+` when the checksum matches and `-` when
//! it does not, after which the sender retransmits. A raw `0x03` byte outside
//! any packet is a break request.
//!
//! See: [GDB Remote Protocol: Overview](https://sourceware.org/gdb/current/onlinedocs/gdb.html/Overview.html)

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Raw break byte (Ctrl-C)
pub const INTERRUPT_BYTE: u8 = 0x03;

/// Sum of `bytes` modulo 256.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8
{
    bytes.iter().fold(0u8, |acc, &byte| acc.wrapping_add(byte))
}

/// Wrap `payload` into a complete packet.
///
/// ```rust
/// use rspd_protocol::packet::frame;
///
/// assert_eq!(frame("qSupported"), "$qSupported#37");
/// assert_eq!(frame(""), "$#00");
/// ```
#[must_use]
pub fn frame(payload: &str) -> String
{
    format!("${payload}#{:02x}", checksum(payload.as_bytes()))
}

/// Extract and verify the payload of one complete packet.
///
/// ## Errors
///
/// - `Malformed`: missing `$`, `#`, or two hex checksum digits
/// - `ChecksumMismatch`: the digits do not match the payload
pub fn unframe(packet: &str) -> Result<&str, TransportError>
{
    let body = packet
        .strip_prefix('$')
        .ok_or_else(|| TransportError::Malformed("packet does not start with '$'".to_string()))?;
    let (payload, digits) = body
        .rsplit_once('#')
        .ok_or_else(|| TransportError::Malformed("packet has no '#'".to_string()))?;
    let digits = digits.as_bytes();
    let expected = match digits {
        [high, low] => parse_checksum(*high, *low)?,
        _ => return Err(TransportError::Malformed("checksum must be two hex digits".to_string())),
    };
    let computed = checksum(payload.as_bytes());
    if expected != computed {
        return Err(TransportError::ChecksumMismatch { expected, computed });
    }
    Ok(payload)
}

fn parse_checksum(high: u8, low: u8) -> Result<u8, TransportError>
{
    match (hex_digit(high), hex_digit(low)) {
        (Some(high), Some(low)) => Ok((high << 4) | low),
        _ => Err(TransportError::Malformed(format!(
            "non-hex checksum digits {:?}",
            String::from_utf8_lossy(&[high, low])
        ))),
    }
}

fn hex_digit(byte: u8) -> Option<u8>
{
    char::from(byte).to_digit(16).and_then(|digit| u8::try_from(digit).ok())
}

/// What the client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming
{
    /// A verified packet payload
    Packet(String),
    /// A raw break byte
    Interrupt,
}

/// One client connection speaking framed packets
///
/// Reads are buffered internally; [`Connection::next_byte`] is cancel safe so
/// it can sit in a `tokio::select!` while the target runs.
pub struct Connection<S>
{
    stream: S,
    inbound: VecDeque<u8>,
    max_packet_size: usize,
    last_sent: Option<String>,
    no_ack: bool,
    pending_interrupt: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, max_packet_size: usize) -> Self
    {
        Self {
            stream,
            inbound: VecDeque::new(),
            max_packet_size,
            last_sent: None,
            no_ack: false,
            pending_interrupt: false,
        }
    }

    /// Whether `+`/`-` acknowledgements are suppressed.
    #[must_use]
    pub fn is_no_ack(&self) -> bool
    {
        self.no_ack
    }

    /// Stop sending and expecting acknowledgements.
    pub fn enable_no_ack(&mut self)
    {
        self.no_ack = true;
    }

    /// Consume a break byte that arrived inside a packet.
    pub fn take_pending_interrupt(&mut self) -> bool
    {
        std::mem::take(&mut self.pending_interrupt)
    }

    /// Next raw byte from the client.
    ///
    /// ## Errors
    ///
    /// - `ConnectionClosed`: end of stream
    /// - `Io`: the read failed
    pub async fn next_byte(&mut self) -> Result<u8, TransportError>
    {
        if let Some(byte) = self.inbound.pop_front() {
            return Ok(byte);
        }
        let mut buf = [0u8; 512];
        let read = self.stream.read(&mut buf).await?;
        if read == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        self.inbound.extend(&buf[1..read]);
        Ok(buf[0])
    }

    /// Wait for the next packet or break.
    ///
    /// Acknowledgements from the client are consumed here; a `-` makes the
    /// last packet go out again.
    ///
    /// ## Errors
    ///
    /// - `ChecksumMismatch` / `Malformed` / `PacketTooLarge`: the packet was
    ///   NAKed and dropped; keep receiving
    /// - `ConnectionClosed` / `Io`: fatal
    pub async fn receive(&mut self) -> Result<Incoming, TransportError>
    {
        if self.take_pending_interrupt() {
            return Ok(Incoming::Interrupt);
        }
        loop {
            match self.next_byte().await? {
                b'$' => return self.read_packet().await.map(Incoming::Packet),
                INTERRUPT_BYTE => return Ok(Incoming::Interrupt),
                b'+' => {}
                b'-' => self.retransmit().await?,
                other => tracing::trace!(byte = other, "discarding byte outside packet"),
            }
        }
    }

    async fn read_packet(&mut self) -> Result<String, TransportError>
    {
        let mut payload = Vec::new();
        let mut oversized = false;
        loop {
            match self.next_byte().await? {
                b'#' => break,
                b'$' => {
                    tracing::debug!(discarded = payload.len(), "packet restarted");
                    payload.clear();
                    oversized = false;
                }
                INTERRUPT_BYTE => self.pending_interrupt = true,
                byte if payload.len() < self.max_packet_size => payload.push(byte),
                _ => oversized = true,
            }
        }

        let high = self.next_byte().await?;
        let low = self.next_byte().await?;
        let expected = match parse_checksum(high, low) {
            Ok(expected) => expected,
            Err(err) => {
                self.nak().await?;
                return Err(err);
            }
        };
        if oversized {
            self.nak().await?;
            return Err(TransportError::PacketTooLarge {
                limit: self.max_packet_size,
            });
        }
        let computed = checksum(&payload);
        if expected != computed {
            self.nak().await?;
            return Err(TransportError::ChecksumMismatch { expected, computed });
        }

        self.ack().await?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Frame and send one reply.
    ///
    /// ## Errors
    ///
    /// - `Io`: the write failed
    pub async fn send(&mut self, payload: &str) -> Result<(), TransportError>
    {
        let packet = frame(payload);
        tracing::trace!(%packet, "sending");
        self.stream.write_all(packet.as_bytes()).await?;
        self.stream.flush().await?;
        self.last_sent = Some(packet);
        Ok(())
    }

    async fn retransmit(&mut self) -> Result<(), TransportError>
    {
        if self.no_ack {
            return Ok(());
        }
        if let Some(packet) = &self.last_sent {
            tracing::debug!(%packet, "client NAK, retransmitting");
            self.stream.write_all(packet.as_bytes()).await?;
            self.stream.flush().await?;
        }
        Ok(())
    }

    async fn ack(&mut self) -> Result<(), TransportError>
    {
        self.write_control(b'+').await
    }

    async fn nak(&mut self) -> Result<(), TransportError>
    {
        self.write_control(b'-').await
    }

    async fn write_control(&mut self, byte: u8) -> Result<(), TransportError>
    {
        if self.no_ack {
            return Ok(());
        }
        self.stream.write_all(&[byte]).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
