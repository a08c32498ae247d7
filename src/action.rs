//! Cross-thread hand-off of selector mutations.
//!
//! Only the selector thread may touch the poll registry or a connection. Any
//! other context expresses intent as an [`Action`]; the loop drains the queue
//! once per iteration, after the poll returns and before any ready key is
//! dispatched.
//!
//! ```text
//!   worker thread ──Responder::respond──▶ ActionSender ──mpsc──▶ ActionQueue
//!                                              │                     │
//!                                           Waker::wake        drain() on the
//!                                              ▼               selector thread
//!                                         poll returns ─────────────▶ apply
//! ```

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
};

use mio::{Interest, Waker};

use crate::{
    connection::ConnectionId,
    error::{HarnessError, Result},
};

/// A deferred change to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Queue wire-ready application bytes and flush
    Write { id: ConnectionId, payload: Vec<u8> },
    /// Reregister with a different interest
    Interest { id: ConnectionId, interest: Interest },
    /// Close and deregister
    Close { id: ConnectionId },
}

impl Action {
    pub fn target(&self) -> ConnectionId {
        match self {
            Action::Write { id, .. } | Action::Interest { id, .. } | Action::Close { id } => *id,
        }
    }
}

/// Producer side of the queue. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct ActionSender {
    sender: mpsc::Sender<Action>,
    pending: Arc<AtomicUsize>,
    waker: Option<Arc<Waker>>,
}

impl ActionSender {
    /// Enqueue and wake the selector.
    ///
    /// ## Errors
    ///
    /// [`HarnessError::Stopped`] once the loop owning the queue is gone.
    pub fn push(&self, action: Action) -> Result<()> {
        // counted before sending so a drain never sees more items than `pending`
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(action).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(HarnessError::Stopped);
        }
        if let Some(waker) = &self.waker {
            waker.wake()?;
        }
        Ok(())
    }
}

impl fmt::Debug for ActionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSender")
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}

/// Consumer side, owned by the selector thread.
pub struct ActionQueue {
    receiver: mpsc::Receiver<Action>,
    sender: ActionSender,
}

impl ActionQueue {
    pub fn new(waker: Option<Arc<Waker>>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            receiver,
            sender: ActionSender {
                sender,
                pending: Arc::new(AtomicUsize::new(0)),
                waker,
            },
        }
    }

    pub fn sender(&self) -> ActionSender {
        self.sender.clone()
    }

    pub fn len(&self) -> usize {
        self.sender.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply every action queued so far, in enqueue order.
    ///
    /// Actions pushed while draining (including by `apply` itself) wait for
    /// the next call, so a busy producer can't starve key dispatch.
    pub fn drain<F>(&self, mut apply: F) -> usize
    where
        F: FnMut(Action),
    {
        let queued = self.len();
        let mut applied = 0;
        while applied < queued {
            match self.receiver.try_recv() {
                Ok(action) => {
                    self.sender.pending.fetch_sub(1, Ordering::SeqCst);
                    applied += 1;
                    apply(action);
                }
                Err(_) => break,
            }
        }
        applied
    }

    /// Drop everything queued, returning how many actions were discarded.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.receiver.try_recv().is_ok() {
            self.sender.pending.fetch_sub(1, Ordering::SeqCst);
            dropped += 1;
        }
        dropped
    }
}

/// Lets a [`Handler`](crate::Handler) answer outside of its return value.
///
/// Bound to the connection the message came from. Clone it freely and move it
/// to other threads; every call becomes an [`Action`] applied on the selector
/// thread.
#[derive(Clone, Debug)]
pub struct Responder {
    id: ConnectionId,
    actions: ActionSender,
}

impl Responder {
    pub(crate) fn new(id: ConnectionId, actions: ActionSender) -> Self {
        Self { id, actions }
    }

    /// A responder bound to no loop; every call fails with `Stopped`.
    pub fn detached() -> Self {
        let queue = ActionQueue::new(None);
        let actions = queue.sender();
        drop(queue);
        Self::new(ConnectionId::new(0), actions)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Send one line; the terminator is appended.
    pub fn respond(&self, line: impl Into<String>) -> Result<()> {
        let mut payload = line.into().into_bytes();
        payload.push(b'\n');
        self.actions.push(Action::Write {
            id: self.id,
            payload,
        })
    }

    /// Close the connection after the current iteration.
    pub fn close(&self) -> Result<()> {
        self.actions.push(Action::Close { id: self.id })
    }
}
