use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use log::debug;
use mio::{net::TcpListener, Interest};

use crate::{
    action::{Action, ActionQueue, ActionSender},
    config::ServerConfig,
    connection::{Connection, ConnectionId},
    error::{HarnessError, Result},
    poll::{PollHandle, FIRST_CONNECTION_TOKEN, LISTENER},
    registry::ClientRegistry,
};

use super::write::WriteHandler;

/// Everything the selector thread owns.
///
/// Handlers receive it by `&mut` for the duration of one dispatch; nothing in
/// here is reachable from another thread except through `clients` (shared
/// membership) and the sender side of `actions`.
pub(crate) struct Selector {
    pub(crate) poll: PollHandle,
    pub(crate) listener: TcpListener,
    pub(crate) connections: HashMap<ConnectionId, Connection>,
    pub(crate) clients: Arc<ClientRegistry>,
    pub(crate) actions: ActionQueue,
    next_id: u64,
}

impl Selector {
    pub(crate) fn open(config: &ServerConfig, clients: Arc<ClientRegistry>) -> Result<Self> {
        let poll = PollHandle::new(config.events_capacity, config.poll_timeout)?;

        let addr = config.address();
        let mut listener =
            TcpListener::bind(addr).map_err(|source| HarnessError::Bind { addr, source })?;
        poll.register(&mut listener, LISTENER, Interest::READABLE)?;

        let actions = ActionQueue::new(Some(poll.waker()));
        Ok(Self {
            poll,
            listener,
            connections: HashMap::new(),
            clients,
            actions,
            next_id: FIRST_CONNECTION_TOKEN as u64,
        })
    }

    pub(crate) fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Reregister the listener so a non-empty backlog raises a fresh event.
    pub(crate) fn rearm_listener(&mut self) -> std::io::Result<()> {
        self.poll
            .registry()
            .reregister(&mut self.listener, LISTENER, Interest::READABLE)
    }

    pub(crate) fn next_connection_id(&mut self) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn action_sender(&self) -> ActionSender {
        self.actions.sender()
    }

    /// Admit an accepted connection: register it and make it a member.
    pub(crate) fn adopt(&mut self, mut conn: Connection) -> std::io::Result<()> {
        conn.register(self.poll.registry())?;
        self.clients.insert(conn.id(), conn.peer_addr());
        self.connections.insert(conn.id(), conn);
        Ok(())
    }

    /// Close, deregister and forget one connection.
    ///
    /// Returns false if it was already gone.
    pub(crate) fn close_connection(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.remove(&id) else {
            return false;
        };
        self.clients.remove(id);
        debug!("closing {} ({})", id, conn.peer_addr());
        conn.close(self.poll.registry());
        true
    }

    /// Apply everything queued before this call, in order.
    pub(crate) fn run_actions(&mut self, writer: &WriteHandler) -> usize {
        let mut batch = Vec::new();
        self.actions.drain(|action| batch.push(action));
        let applied = batch.len();
        for action in batch {
            self.apply(action, writer);
        }
        applied
    }

    fn apply(&mut self, action: Action, writer: &WriteHandler) {
        let id = action.target();
        let Some(conn) = self.connections.get_mut(&id) else {
            debug!("dropping {:?}, {} is gone", action, id);
            return;
        };

        match action {
            Action::Write { payload, .. } => {
                if let Err(e) = conn.queue(&payload) {
                    debug!("{} encode failed: {}", id, e);
                    self.close_connection(id);
                    return;
                }
                writer.flush(self, id);
            }
            Action::Interest { interest, .. } => {
                if let Err(e) = conn.set_interest(self.poll.registry(), interest) {
                    debug!("{} reregister failed: {}", id, e);
                    self.close_connection(id);
                }
            }
            Action::Close { .. } => {
                self.close_connection(id);
            }
        }
    }

    /// Close every connection and drop pending actions.
    ///
    /// Returns (connections closed, actions discarded).
    pub(crate) fn teardown(&mut self) -> (usize, usize) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        let closed = ids
            .into_iter()
            .filter(|id| self.close_connection(*id))
            .count();
        self.clients.clear();
        let discarded = self.actions.clear();
        let _ = self.poll.registry().deregister(&mut self.listener);
        (closed, discarded)
    }
}
