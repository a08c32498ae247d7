//! Transport-layer encryption as seen by the event loop.
//!
//! The loop only moves wire bytes. When a [`SessionFactory`] is configured,
//! every accepted connection gets its own [`Session`] and the read/write
//! handlers route bytes through it:
//!
//! ```text
//!   socket ──wire──▶ Session::decode ──plain──▶ LineBuffer ──▶ Handler
//!   Handler ──plain──▶ Session::encode ──wire──▶ outbound ──▶ socket
//! ```
//!
//! `decode` may also emit wire bytes of its own (handshake records, alerts)
//! which are queued ahead of any response.

use std::io;

#[cfg(feature = "tls")]
pub mod tls;

/// Per-connection encryption state.
pub trait Session: Send {
    /// Consume bytes read off the socket. Decrypted application data is
    /// appended to `plain`, protocol bytes for the peer to `wire_out`.
    fn decode(&mut self, wire: &[u8], plain: &mut Vec<u8>, wire_out: &mut Vec<u8>)
        -> io::Result<()>;

    /// Encrypt application data, appending the result to `wire_out`.
    fn encode(&mut self, plain: &[u8], wire_out: &mut Vec<u8>) -> io::Result<()>;
}

/// Shared state from which per-connection sessions are opened.
pub trait SessionFactory: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn Session>>;
}
