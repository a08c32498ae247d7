use log::debug;
use mio::Token;

use crate::connection::{ConnectionId, FlushResult};

use super::{selector::Selector, IoHandler};

/// Flushes outbound buffers.
///
/// Interest rule: a connection is registered `READABLE` exactly when its
/// outbound buffer is empty, `READABLE | WRITABLE` otherwise. Partial writes
/// therefore keep the key write-ready until the buffer drains, and a drained
/// buffer never leaves a spurious write interest behind.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct WriteHandler;

impl WriteHandler {
    /// Write as much as the socket takes and sync the interest.
    ///
    /// Returns false if the connection was closed.
    pub(crate) fn flush(&self, selector: &mut Selector, id: ConnectionId) -> bool {
        let Some(conn) = selector.connections.get_mut(&id) else {
            return false;
        };

        let failure = match conn.flush() {
            Ok(FlushResult::Closed) => Some("peer stopped accepting bytes".to_string()),
            Ok(FlushResult::Complete { .. }) | Ok(FlushResult::WouldBlock { .. }) => conn
                .sync_interest(selector.poll.registry())
                .err()
                .map(|e| format!("reregister failed: {e}")),
            Err(e) => Some(format!("write failed: {e}")),
        };

        match failure {
            Some(reason) => {
                debug!("{}: {}", id, reason);
                selector.close_connection(id);
                false
            }
            None => true,
        }
    }
}

impl IoHandler for WriteHandler {
    fn handle(&mut self, selector: &mut Selector, token: Token) {
        self.flush(selector, ConnectionId::from_token(token));
    }
}
