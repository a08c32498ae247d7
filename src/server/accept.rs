use std::{io, sync::Arc};

use log::{debug, warn};
use mio::Token;

use crate::{connection::Connection, secure::SessionFactory};

use super::{selector::Selector, IoHandler};

/// Admits new connections from the listening socket.
pub(crate) struct AcceptHandler {
    no_delay: bool,
    sessions: Option<Arc<dyn SessionFactory>>,
}

impl AcceptHandler {
    pub(crate) fn new(no_delay: bool, sessions: Option<Arc<dyn SessionFactory>>) -> Self {
        Self { no_delay, sessions }
    }
}

impl IoHandler for AcceptHandler {
    fn handle(&mut self, selector: &mut Selector, _token: Token) {
        // edge-triggered: keep accepting until the backlog is empty
        loop {
            let (stream, peer_addr) = match selector.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    // e.g. EMFILE: the backlog is still pending but the edge is spent
                    warn!("accept failed, retrying on the next poll: {}", e);
                    if let Err(e) = selector.rearm_listener() {
                        warn!("failed to rearm the listener: {}", e);
                    }
                    break;
                }
            };

            if let Err(e) = stream.set_nodelay(self.no_delay) {
                debug!("failed to set TCP_NODELAY for {}: {}", peer_addr, e);
            }

            let session = match &self.sessions {
                Some(factory) => match factory.open() {
                    Ok(session) => Some(session),
                    Err(e) => {
                        warn!("rejecting {}, session setup failed: {}", peer_addr, e);
                        continue;
                    }
                },
                None => None,
            };

            let id = selector.next_connection_id();
            if let Err(e) = selector.adopt(Connection::new(id, stream, peer_addr, session)) {
                warn!("rejecting {}, register failed: {}", peer_addr, e);
                continue;
            }
            debug!("accepted {} as {}", peer_addr, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        poll::LISTENER,
        secure::testing::XorFactory,
        server::selector::testing::{accept_one, open_local},
    };
    use mio::Interest;

    #[test]
    fn test_spurious_readiness_is_tolerated() {
        let mut selector = open_local();
        let mut acceptor = AcceptHandler::new(true, None);
        acceptor.handle(&mut selector, LISTENER);
        assert!(selector.connections.is_empty());
        assert!(selector.clients.is_empty());
    }

    #[test]
    fn test_accepted_connections_are_registered_members() {
        let mut selector = open_local();
        let mut acceptor = AcceptHandler::new(true, None);
        let (_a, first) = accept_one(&mut selector, &mut acceptor);
        let (_b, second) = accept_one(&mut selector, &mut acceptor);

        assert_ne!(first, second);
        assert_eq!(selector.clients.len(), 2);
        assert!(selector.clients.contains(first));
        assert!(selector.clients.contains(second));

        let conn = &selector.connections[&first];
        assert_eq!(conn.interest(), Interest::READABLE);
        assert_eq!(selector.clients.peer_addr(first), Some(conn.peer_addr()));
    }

    #[test]
    fn test_sessions_are_opened_per_connection() {
        let mut selector = open_local();
        let mut acceptor = AcceptHandler::new(true, Some(Arc::new(XorFactory(7))));
        let (_client, id) = accept_one(&mut selector, &mut acceptor);
        assert!(format!("{:?}", selector.connections[&id]).contains("secure: true"));
    }
}
