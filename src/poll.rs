use std::{io, sync::Arc, time::Duration};

use mio::{event::Source, Events, Interest, Poll, Registry, Token, Waker};

use crate::event::ReadyKey;

/// Token of the listening socket.
pub const LISTENER: Token = Token(0);
/// Token of the cross-thread waker.
pub const WAKER: Token = Token(1);
/// First token handed out to accepted connections.
pub const FIRST_CONNECTION_TOKEN: usize = 2;

/// mio `Poll` plus its waker and event buffer.
pub struct PollHandle {
    poller: Poll,
    events: Events,
    waker: Arc<Waker>,
    timeout: Duration,
}

impl PollHandle {
    pub fn new(events_capacity: usize, timeout: Duration) -> io::Result<Self> {
        let poller = Poll::new()?;
        let waker = Waker::new(poller.registry(), WAKER)?;
        Ok(PollHandle {
            poller,
            events: Events::with_capacity(events_capacity),
            waker: Arc::new(waker),
            timeout,
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poller.registry()
    }

    pub fn register<S>(&self, src: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poller.registry().register(src, token, interest)
    }

    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Block until something is ready or the timeout elapses.
    ///
    /// An interrupted wait counts as an empty poll.
    pub fn poll(&mut self) -> io::Result<usize> {
        match self.poller.poll(&mut self.events, Some(self.timeout)) {
            Ok(()) => Ok(self.events.iter().count()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                self.events.clear();
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Ready keys of the last poll, waker events excluded.
    pub fn ready_keys(&self) -> Vec<ReadyKey> {
        self.events
            .iter()
            .filter(|event| event.token() != WAKER)
            .filter_map(ReadyKey::classify)
            .collect()
    }
}
