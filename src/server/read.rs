use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::{debug, warn};
use mio::Token;

use crate::{
    action::Responder,
    connection::{Connection, ConnectionId},
    handler::HandlerSlot,
    secure::SessionFactory,
};

use super::{selector::Selector, write::WriteHandler, IoHandler};

/// What a read pass decided about the connection.
#[derive(Debug, PartialEq, Eq)]
enum ReadOutcome {
    Open,
    /// Peer finished sending; flush what we have and close
    Eof,
    Failed(String),
}

/// Drains readable connections and feeds complete lines to the installed
/// [`Handler`](crate::Handler).
///
/// The handler slot is shared with the server, so `set_handler()` swaps the
/// handler seen by the next read.
pub(crate) struct ReadHandler {
    handler: Arc<HandlerSlot>,
    // kept so sessions outlive accept until close()
    sessions: Option<Arc<dyn SessionFactory>>,
    scratch: Vec<u8>,
    writer: WriteHandler,
}

impl ReadHandler {
    pub(crate) fn new(
        handler: Arc<HandlerSlot>,
        sessions: Option<Arc<dyn SessionFactory>>,
        buffer_size: usize,
        writer: WriteHandler,
    ) -> Self {
        Self {
            handler,
            sessions,
            scratch: vec![0; buffer_size],
            writer,
        }
    }

    /// Release resources shared across connections.
    ///
    /// Connections themselves are closed by the server.
    pub(crate) fn close(&mut self) {
        self.sessions = None;
        self.scratch = Vec::new();
    }

    fn drain(&mut self, conn: &mut Connection) -> ReadOutcome {
        loop {
            match conn.read(&mut self.scratch) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(n) => {
                    if let Err(e) = conn.absorb(&self.scratch[..n]) {
                        return ReadOutcome::Failed(format!("decode failed: {e}"));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Open,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadOutcome::Failed(format!("read failed: {e}")),
            }
        }
    }

    /// Hand every complete line to the handler, in arrival order.
    fn dispatch(&self, conn: &mut Connection, responder: &Responder) -> Result<(), String> {
        let handler = self.handler.get();

        while let Some(line) = conn.next_line() {
            let Some(handler) = handler.as_ref() else {
                warn!("no handler installed, dropping line from {}", conn.id());
                continue;
            };

            let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&line, responder)));
            match result {
                Ok(Ok(Some(mut response))) => {
                    response.push('\n');
                    conn.queue(response.as_bytes())
                        .map_err(|e| format!("encode failed: {e}"))?;
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => return Err(format!("handler failed: {e}")),
                Err(_) => return Err("handler panicked".to_string()),
            }
        }
        Ok(())
    }
}

impl IoHandler for ReadHandler {
    fn handle(&mut self, selector: &mut Selector, token: Token) {
        let id = ConnectionId::from_token(token);
        let responder = Responder::new(id, selector.action_sender());
        let Some(conn) = selector.connections.get_mut(&id) else {
            return;
        };

        let mut outcome = self.drain(conn);
        if let ReadOutcome::Failed(reason) = &outcome {
            debug!("{}: {}", id, reason);
            selector.close_connection(id);
            return;
        }

        // lines completed before an EOF still count
        if let Err(reason) = self.dispatch(conn, &responder) {
            outcome = ReadOutcome::Failed(reason);
        }

        match outcome {
            ReadOutcome::Open => {
                self.writer.flush(selector, id);
            }
            ReadOutcome::Eof => {
                if conn.partial_line_len() > 0 {
                    debug!(
                        "{}: discarding {} bytes of unterminated input",
                        id,
                        conn.partial_line_len()
                    );
                }
                // best effort, the peer may still be reading
                let _ = conn.flush();
                selector.close_connection(id);
            }
            ReadOutcome::Failed(reason) => {
                warn!("{}: {}", id, reason);
                selector.close_connection(id);
            }
        }
    }
}
