//! The single-threaded event loop server.
//!
//! # Event Handling Pipeline
//!
//! ```text
//! loop while running:
//!   1. poll (bounded by poll_timeout, cut short by the waker)
//!   2. drain the action queue, in enqueue order
//!   3. dispatch each ready key exactly once:
//!        Readiness::Accept ──> AcceptHandler
//!            - accept until WouldBlock
//!            - open a session if configured
//!            - register READABLE, insert into ClientRegistry
//!        Readiness::Read   ──> ReadHandler
//!            - read until WouldBlock, decode, reassemble lines
//!            - Handler::handle() per line, queue responses
//!            - flush through WriteHandler
//!            - EOF / error: close this connection only
//!        Readiness::Write  ──> WriteHandler
//!            - flush, READABLE once drained
//!
//! teardown (after stop() or a poll failure):
//!   ReadHandler::close(), close all connections, clear the
//!   registry, discard queued actions, close the listener
//! ```

mod accept;
mod read;
pub(crate) mod selector;
mod write;

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard,
    },
    thread::{self, ThreadId},
};

use log::{debug, error, info};
use mio::{Token, Waker};

use crate::{
    config::ServerConfig,
    error::{HarnessError, Result},
    event::Readiness,
    handler::{Handler, HandlerSlot},
    registry::ClientRegistry,
};

use accept::AcceptHandler;
use read::ReadHandler;
use selector::Selector;
use write::WriteHandler;

/// Capability shared by the accept, read and write handlers.
pub(crate) trait IoHandler {
    fn handle(&mut self, selector: &mut Selector, token: Token);
}

enum Lifecycle {
    Idle,
    Running {
        waker: Option<Arc<Waker>>,
        local_addr: Option<SocketAddr>,
        thread: ThreadId,
    },
    Stopped,
}

/// Line-oriented TCP server driven by one selector thread.
///
/// `start()` blocks the calling thread for the lifetime of the loop, so the
/// server is normally shared through an `Arc` and stopped from elsewhere.
///
/// ## Example
///
/// ```rust,no_run
/// use mill_harness::{handler, EventLoopServer, ServerConfig};
/// use std::{sync::Arc, thread};
///
/// let server = Arc::new(EventLoopServer::new(ServerConfig::new(7070)));
/// server.set_handler(handler::from_fn(|line| {
///     (line == "ping").then(|| "pong".to_string())
/// }));
///
/// let loop_server = server.clone();
/// let handle = thread::spawn(move || loop_server.start());
///
/// // ... later
/// server.stop();
/// handle.join().unwrap()?;
/// # Ok::<(), mill_harness::HarnessError>(())
/// ```
pub struct EventLoopServer {
    config: ServerConfig,
    running: AtomicBool,
    clients: Arc<ClientRegistry>,
    handler: Arc<HandlerSlot>,
    lifecycle: Mutex<Lifecycle>,
    finished: Condvar,
}

impl EventLoopServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
            clients: Arc::new(ClientRegistry::new()),
            handler: Arc::new(HandlerSlot::default()),
            lifecycle: Mutex::new(Lifecycle::Idle),
            finished: Condvar::new(),
        }
    }

    /// Install the handler used for every message read from now on.
    pub fn set_handler<H: Handler>(&self, handler: H) {
        self.handler.set(Arc::new(handler));
    }

    /// Address the listener is bound to while the loop runs.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle() {
            Lifecycle::Running { local_addr, .. } => *local_addr,
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Live connections, shared with the selector thread.
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind, then run the event loop on the calling thread until [`stop()`](Self::stop).
    ///
    /// ## Errors
    ///
    /// - [`HarnessError::Bind`] if the listener can't be bound
    /// - [`HarnessError::Poll`] if polling fails; the loop is torn down
    /// - [`HarnessError::AlreadyRunning`] / [`HarnessError::Stopped`] on
    ///   misuse of the lifecycle
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.lifecycle();
            match *state {
                Lifecycle::Running { .. } => return Err(HarnessError::AlreadyRunning),
                Lifecycle::Stopped => return Err(HarnessError::Stopped),
                Lifecycle::Idle => {}
            }
            self.running.store(true, Ordering::SeqCst);
            *state = Lifecycle::Running {
                waker: None,
                local_addr: None,
                thread: thread::current().id(),
            };
        }

        let mut selector = match Selector::open(&self.config, self.clients.clone()) {
            Ok(selector) => selector,
            Err(e) => {
                error!("failed to start: {}", e);
                self.finish(false);
                return Err(e);
            }
        };

        let local_addr = selector.local_addr().ok();
        if let Lifecycle::Running {
            waker,
            local_addr: addr,
            ..
        } = &mut *self.lifecycle()
        {
            *waker = Some(selector.poll.waker());
            *addr = local_addr;
        }

        if let Some(threads) = self.config.thread_count {
            debug!("thread_count={} ignored, the event loop is single-threaded", threads);
        }
        info!(
            "server listening on {}",
            local_addr.map_or_else(|| self.config.address().to_string(), |a| a.to_string())
        );

        let mut acceptor =
            AcceptHandler::new(self.config.no_delay, self.config.session_factory.clone());
        let writer = WriteHandler;
        let mut reader = ReadHandler::new(
            self.handler.clone(),
            self.config.session_factory.clone(),
            self.config.buffer_size,
            writer,
        );

        let result = self.run(&mut selector, &mut acceptor, &mut reader, writer);

        reader.close();
        let (closed, discarded) = selector.teardown();
        drop(selector);
        drop(acceptor);
        debug!(
            "teardown closed {} connections, discarded {} actions",
            closed, discarded
        );

        self.finish(true);
        info!("server stopped");
        result
    }

    fn run(
        &self,
        selector: &mut Selector,
        acceptor: &mut AcceptHandler,
        reader: &mut ReadHandler,
        mut writer: WriteHandler,
    ) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = selector.poll.poll() {
                error!("poll failed, stopping the event loop: {}", e);
                self.running.store(false, Ordering::SeqCst);
                return Err(HarnessError::Poll(e));
            }

            selector.run_actions(&writer);

            for key in selector.poll.ready_keys() {
                let handler: &mut dyn IoHandler = match key.readiness() {
                    Readiness::Accept => &mut *acceptor,
                    Readiness::Read => &mut *reader,
                    Readiness::Write => &mut writer,
                };
                handler.handle(selector, key.token());
            }
        }
        Ok(())
    }

    /// Stop the event loop and wait for its teardown.
    ///
    /// On return the registry is empty and the listener is closed. Called from
    /// inside a [`Handler`] it only signals; teardown follows once the current
    /// iteration ends. Calling it again is a no-op.
    pub fn stop(&self) {
        let mut state = self.lifecycle();
        self.running.store(false, Ordering::SeqCst);

        let from_loop_thread = match &*state {
            Lifecycle::Stopped => return,
            Lifecycle::Idle => None,
            Lifecycle::Running {
                waker,
                thread: loop_thread,
                ..
            } => {
                if let Some(waker) = waker {
                    let _ = waker.wake();
                }
                Some(*loop_thread == thread::current().id())
            }
        };

        match from_loop_thread {
            None => {
                *state = Lifecycle::Stopped;
                self.clients.clear();
                info!("server stopped before start");
            }
            Some(true) => info!("stop requested from the event loop thread"),
            Some(false) => {
                info!("stopping server");
                let _state = self
                    .finished
                    .wait_while(state, |state| matches!(state, Lifecycle::Running { .. }))
                    .unwrap_or_else(|e| e.into_inner());
            }
        }
    }

    fn finish(&self, ran: bool) {
        let mut state = self.lifecycle();
        // a failed bind leaves the server restartable unless stop() was asked for
        *state = if ran || !self.running.load(Ordering::SeqCst) {
            Lifecycle::Stopped
        } else {
            Lifecycle::Idle
        };
        self.running.store(false, Ordering::SeqCst);
        self.finished.notify_all();
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for EventLoopServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopServer")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("clients", &self.clients.len())
            .finish()
    }
}
