//! Byte transports: raw TCP and WebSocket-wrapped TCP.
//!
//! Both transports deliver whole logical messages (type byte + payload). The
//! raw transport reads the `[total_length:1][...]` layout verbatim; the
//! WebSocket transport carries each message as exactly one binary frame whose
//! one-byte payload length replaces the wire length byte.

use crate::error::ChannelError;
use bytes::{Buf, Bytes, BytesMut};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

/// Result of a single poll for the next message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// One complete logical message (type byte + payload).
    Ready(Bytes),
    /// Nothing buffered and the poll was non-blocking.
    Empty,
    /// The peer closed the connection.
    Closed,
}

/// A connected byte transport speaking logical debugger messages.
pub trait Channel {
    /// Establishes the connection, performs any transport handshake, and
    /// returns the server's initial fixed-size version frame as raw bytes.
    fn connect(&mut self) -> Result<Vec<u8>, ChannelError>;

    /// Returns the next complete message. With `blocking` unset, an empty
    /// socket yields [`Poll::Empty`] instead of waiting.
    fn get_message(&mut self, blocking: bool) -> Result<Poll, ChannelError>;

    /// Writes one message, looping until fully flushed.
    fn send_message(&mut self, message: &[u8]) -> Result<(), ChannelError>;

    /// Releases the transport. Idempotent.
    fn close(&mut self);
}

const READ_CHUNK_SIZE: usize = 1024;

enum Fill {
    Data,
    WouldBlock,
    Eof,
}

/// Shared socket plumbing: buffered reads with a blocking/non-blocking
/// switch, short-write tolerant sends, idempotent shutdown.
struct Wire {
    stream: TcpStream,
    buf: BytesMut,
    closed: bool,
}

impl Wire {
    fn open(addr: SocketAddr) -> Result<Self, ChannelError> {
        tracing::debug!("connecting to {}", addr);
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(8 * 1024),
            closed: false,
        })
    }

    /// Reads once into the buffer. `WouldBlock` is only surfaced for
    /// non-blocking fills; interrupted reads retry.
    fn fill(&mut self, blocking: bool) -> Result<Fill, ChannelError> {
        if self.closed {
            return Ok(Fill::Eof);
        }
        self.stream.set_nonblocking(!blocking)?;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    tracing::debug!("connection closed by peer");
                    self.closed = true;
                    return Ok(Fill::Eof);
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(Fill::Data);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Fill::WouldBlock),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Blocks until the buffer holds at least `len` bytes.
    fn fill_to(&mut self, len: usize) -> Result<(), ChannelError> {
        while self.buf.len() < len {
            if let Fill::Eof = self.fill(true)? {
                return Err(ChannelError::Handshake("connection closed during handshake"));
            }
        }
        Ok(())
    }

    fn send_all(&mut self, mut data: &[u8]) -> Result<(), ChannelError> {
        self.stream.set_nonblocking(false)?;
        while !data.is_empty() {
            match self.stream.write(data) {
                Ok(0) => {
                    return Err(ChannelError::Io(ErrorKind::WriteZero.into()));
                }
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.closed = true;
        }
    }
}

/// Extracts one `[total_length:1][type:1][payload]` message, if complete.
fn decode_raw_message(buf: &mut BytesMut) -> Result<Option<Bytes>, ChannelError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let len = usize::from(buf[0]);
    if len == 0 {
        return Err(ChannelError::MalformedFrame("zero-length message"));
    }
    if buf.len() < 1 + len {
        return Ok(None);
    }
    buf.advance(1);
    Ok(Some(buf.split_to(len).freeze()))
}

const WS_BINARY_FIN: u8 = 0x82;
const WS_MASK_BIT: u8 = 0x80;

/// Extracts one single-frame WebSocket message. Only unmasked FIN+binary
/// frames with a one-byte payload length of 1..=125 are legal.
fn decode_ws_message(buf: &mut BytesMut) -> Result<Option<Bytes>, ChannelError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    if buf[0] != WS_BINARY_FIN {
        return Err(ChannelError::MalformedFrame("unexpected WebSocket opcode"));
    }
    let len = usize::from(buf[1]);
    if len == 0 || len >= 126 {
        return Err(ChannelError::MalformedFrame("unexpected WebSocket length"));
    }
    if buf.len() < 2 + len {
        return Ok(None);
    }
    buf.advance(2);
    Ok(Some(buf.split_to(len).freeze()))
}

type Decoder = fn(&mut BytesMut) -> Result<Option<Bytes>, ChannelError>;

fn poll_message(wire: &mut Wire, decode: Decoder, blocking: bool) -> Result<Poll, ChannelError> {
    loop {
        if let Some(message) = decode(&mut wire.buf)? {
            return Ok(Poll::Ready(message));
        }
        if wire.closed {
            return Ok(Poll::Closed);
        }
        match wire.fill(blocking)? {
            Fill::Data | Fill::Eof => continue,
            Fill::WouldBlock => return Ok(Poll::Empty),
        }
    }
}

/// Plain stream-socket transport. No transport handshake: the version frame
/// is simply the first message on the wire.
pub struct TcpChannel {
    addr: SocketAddr,
    wire: Option<Wire>,
}

impl TcpChannel {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, wire: None }
    }

    fn wire(&mut self) -> Result<&mut Wire, ChannelError> {
        self.wire
            .as_mut()
            .ok_or(ChannelError::Handshake("channel not connected"))
    }
}

impl Channel for TcpChannel {
    fn connect(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut wire = Wire::open(self.addr)?;
        // Read the version frame through the ordinary message layout.
        wire.fill_to(1)?;
        let len = usize::from(wire.buf[0]);
        if len == 0 {
            return Err(ChannelError::MalformedFrame("zero-length message"));
        }
        wire.fill_to(1 + len)?;
        wire.buf.advance(1);
        let frame = wire.buf.split_to(len).to_vec();
        self.wire = Some(wire);
        Ok(frame)
    }

    fn get_message(&mut self, blocking: bool) -> Result<Poll, ChannelError> {
        poll_message(self.wire()?, decode_raw_message, blocking)
    }

    fn send_message(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        self.wire()?.send_all(message)
    }

    fn close(&mut self) {
        if let Some(wire) = self.wire.as_mut() {
            wire.close();
        }
    }
}

/// The upgrade exchange is fixed: the key/accept pair is the RFC 6455 sample
/// pair and is never negotiated. Any deviation in the response is fatal.
const UPGRADE_REQUEST: &[u8] = b"GET /debugger HTTP/1.1\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

const UPGRADE_RESPONSE: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";

/// WebSocket-wrapped transport. Each logical message is one binary frame;
/// outbound frames are masked with a zero key so payload bytes stay intact.
pub struct WebSocketChannel {
    addr: SocketAddr,
    wire: Option<Wire>,
}

impl WebSocketChannel {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, wire: None }
    }

    fn wire(&mut self) -> Result<&mut Wire, ChannelError> {
        self.wire
            .as_mut()
            .ok_or(ChannelError::Handshake("channel not connected"))
    }
}

impl Channel for WebSocketChannel {
    fn connect(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut wire = Wire::open(self.addr)?;
        wire.send_all(UPGRADE_REQUEST)?;

        wire.fill_to(UPGRADE_RESPONSE.len())?;
        if &wire.buf[..UPGRADE_RESPONSE.len()] != UPGRADE_RESPONSE {
            return Err(ChannelError::Handshake("unexpected upgrade response"));
        }
        wire.buf.advance(UPGRADE_RESPONSE.len());
        tracing::debug!("WebSocket upgrade complete");

        // The version frame follows immediately: [0x82][6][payload].
        wire.fill_to(2)?;
        if wire.buf[0] != WS_BINARY_FIN || usize::from(wire.buf[1]) != sdbg_protocol::VERSION_FRAME_SIZE {
            return Err(ChannelError::Handshake("unexpected version frame"));
        }
        wire.fill_to(2 + sdbg_protocol::VERSION_FRAME_SIZE)?;
        wire.buf.advance(2);
        let frame = wire.buf.split_to(sdbg_protocol::VERSION_FRAME_SIZE).to_vec();
        self.wire = Some(wire);
        Ok(frame)
    }

    fn get_message(&mut self, blocking: bool) -> Result<Poll, ChannelError> {
        poll_message(self.wire()?, decode_ws_message, blocking)
    }

    fn send_message(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        // The wire length byte becomes the WebSocket payload length; the mask
        // key is all zeroes, leaving the payload unmodified.
        let mut frame = Vec::with_capacity(6 + message.len() - 1);
        frame.push(WS_BINARY_FIN);
        frame.push(WS_MASK_BIT | message[0]);
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(&message[1..]);
        self.wire()?.send_all(&frame)
    }

    fn close(&mut self) {
        if let Some(wire) = self.wire.as_mut() {
            wire.close();
        }
    }
}
