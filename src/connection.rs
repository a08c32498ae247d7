//! Per-connection state owned by the selector thread.

use std::{
    fmt,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr},
};

use mio::{net::TcpStream, Interest, Registry, Token};

use crate::{framing::LineBuffer, secure::Session};

/// Unique identifier for connections
///
/// Assigned at accept time and never reused by the same server, so a stale
/// id can't alias a newer socket that landed on the same descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        ConnectionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn token(&self) -> Token {
        Token(self.0 as usize)
    }

    pub fn from_token(token: Token) -> Self {
        ConnectionId(token.0 as u64)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Flush result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    /// Everything queued has been written
    Complete { bytes_written: usize },
    /// The socket stopped accepting bytes, the rest stays queued
    WouldBlock { bytes_written: usize },
    /// The peer accepted zero bytes
    Closed,
}

/// Outbound bytes with partial-write tracking.
#[derive(Debug, Default)]
pub struct OutboundBuffer {
    buf: Vec<u8>,
    offset: usize,
}

impl OutboundBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.offset..]
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.buf.len()
    }

    /// Drain until empty or WouldBlock.
    pub fn flush_to<W: Write>(&mut self, writer: &mut W) -> io::Result<FlushResult> {
        let mut bytes_written = 0;

        while !self.is_empty() {
            match writer.write(&self.buf[self.offset..]) {
                Ok(0) => return Ok(FlushResult::Closed),
                Ok(n) => {
                    self.offset += n;
                    bytes_written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.compact();
                    return Ok(FlushResult::WouldBlock { bytes_written });
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.buf.clear();
        self.offset = 0;
        Ok(FlushResult::Complete { bytes_written })
    }

    /// Interest a connection with this buffer should be registered with.
    ///
    /// Read-only exactly when drained.
    pub fn desired_interest(&self) -> Interest {
        if self.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    // session encoders append here directly
    fn buffer_mut(&mut self) -> &mut Vec<u8> {
        self.compact();
        &mut self.buf
    }

    /// Release the sent prefix once it is at least half the buffer.
    fn compact(&mut self) {
        if self.offset == 0 {
            return;
        }
        if self.is_empty() {
            self.buf.clear();
            self.offset = 0;
        } else if self.offset >= self.buf.len() / 2 {
            self.buf.drain(..self.offset);
            self.offset = 0;
        }
    }
}

/// An accepted, non-blocking connection
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    peer_addr: SocketAddr,
    /// Currently registered interest
    interest: Interest,
    inbound: LineBuffer,
    outbound: OutboundBuffer,
    session: Option<Box<dyn Session>>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        session: Option<Box<dyn Session>>,
    ) -> Self {
        Self {
            id,
            stream,
            peer_addr,
            interest: Interest::READABLE,
            inbound: LineBuffer::new(),
            outbound: OutboundBuffer::default(),
            session,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.id.token(), self.interest)
    }

    /// Read once from the socket.
    pub fn read(&mut self, scratch: &mut [u8]) -> io::Result<usize> {
        self.stream.read(scratch)
    }

    /// Feed bytes read off the wire into the inbound accumulator.
    pub fn absorb(&mut self, wire: &[u8]) -> io::Result<()> {
        match self.session.as_mut() {
            Some(session) => {
                session.decode(wire, self.inbound.buffer_mut(), self.outbound.buffer_mut())
            }
            None => {
                self.inbound.extend(wire);
                Ok(())
            }
        }
    }

    pub fn next_line(&mut self) -> Option<String> {
        self.inbound.next_line()
    }

    /// Bytes of a line still waiting for its terminator.
    pub fn partial_line_len(&self) -> usize {
        self.inbound.pending()
    }

    /// Queue application data for the peer.
    pub fn queue(&mut self, plain: &[u8]) -> io::Result<()> {
        match self.session.as_mut() {
            Some(session) => session.encode(plain, self.outbound.buffer_mut()),
            None => {
                self.outbound.push(plain);
                Ok(())
            }
        }
    }

    pub fn flush(&mut self) -> io::Result<FlushResult> {
        self.outbound.flush_to(&mut self.stream)
    }

    /// Reregister if the outbound buffer calls for a different interest.
    ///
    /// Returns whether a reregistration happened.
    pub fn sync_interest(&mut self, registry: &Registry) -> io::Result<bool> {
        self.set_interest(registry, self.outbound.desired_interest())
    }

    pub fn set_interest(&mut self, registry: &Registry, interest: Interest) -> io::Result<bool> {
        if interest == self.interest {
            return Ok(false);
        }
        registry.reregister(&mut self.stream, self.id.token(), interest)?;
        self.interest = interest;
        Ok(true)
    }

    /// Deregister and shut the socket down. Errors are irrelevant at this point.
    pub fn close(mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.stream);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("interest", &self.interest)
            .field("partial_line", &self.inbound.pending())
            .field("pending_output", &self.outbound.remaining().len())
            .field("secure", &self.session.is_some())
            .finish()
    }
}
