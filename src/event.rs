use mio::{event::Event, Token};
use std::fmt;

use crate::poll::LISTENER;

/// What a ready key should be dispatched as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Accept,
    Read,
    Write,
}

/// A ready key reduced to the single dispatch it gets this iteration.
///
/// Reads win over writes: the read handler flushes pending output itself, and
/// hang-ups or socket errors surface as reads so the failure is observed by
/// `read()`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ReadyKey {
    token: Token,
    readiness: Readiness,
}

impl fmt::Debug for ReadyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyKey")
            .field("token", &self.token)
            .field("readiness", &self.readiness)
            .finish()
    }
}

impl ReadyKey {
    pub fn new(token: Token, readiness: Readiness) -> Self {
        Self { token, readiness }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn classify(event: &Event) -> Option<Self> {
        Self::from_flags(
            event.token(),
            event.is_readable() || event.is_read_closed() || event.is_error(),
            event.is_writable() || event.is_write_closed(),
        )
    }

    fn from_flags(token: Token, readable: bool, writable: bool) -> Option<Self> {
        let readiness = if token == LISTENER {
            Readiness::Accept
        } else if readable {
            Readiness::Read
        } else if writable {
            Readiness::Write
        } else {
            return None;
        };
        Some(Self::new(token, readiness))
    }
}
