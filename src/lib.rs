//! # Mill-Harness
//! A line-delimited TCP server harness built on a single-threaded, non-blocking
//! event loop. One selector thread owns every socket; application code plugs in
//! through the [`Handler`] trait and receives one call per complete inbound line.
//!
//! ## Core Philosophy
//! Mill-Harness was designed for protocol experiments and test fixtures that need:
//! - **One thread, no runtime**: built directly on [`mio`], no async executor
//! - **Deterministic ordering**: messages reach the handler in arrival order,
//!   cross-thread actions apply in enqueue order
//! - **Isolation**: a failing handler, a reset peer or a half-written line only
//!   ever affects its own connection
//! - **Optional encryption**: plug a [`SessionFactory`] in and the loop moves
//!   wire bytes while the handler keeps seeing plain text
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ EventLoopServer │───▶│   Selector   │───▶│  PollHandle  │
//! └─────────────────┘    └──────────────┘    └──────────────┘
//!          │                    │  ready keys
//!          │                    ▼
//!          │      ┌────────┬────────┬────────┐    ┌──────────────┐
//!          │      │ Accept │  Read  │ Write  │───▶│  Connection  │
//!          │      └────────┴────────┴────────┘    └──────────────┘
//!          │                    │
//!          ▼                    ▼
//!  ┌────────────────┐    ┌──────────────┐
//!  │ ClientRegistry │    │   Handler    │──── Responder ───▶ ActionQueue
//!  └────────────────┘    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mill_harness::{handler, EventLoopServer, ServerConfig};
//! use std::{sync::Arc, thread, time::Duration};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Arc::new(EventLoopServer::new(ServerConfig::new(7070)));
//!     server.set_handler(handler::from_fn(|line| match line {
//!         "ping" => Some("pong".to_string()),
//!         other => Some(format!("echo: {other}")),
//!     }));
//!
//!     let loop_server = server.clone();
//!     let handle = thread::spawn(move || loop_server.start());
//!
//!     thread::sleep(Duration::from_secs(30));
//!     server.stop();
//!     handle.join().expect("event loop thread panicked")?;
//!     Ok(())
//! }
//! ```
//!
//! - [`EventLoopServer`]: lifecycle (`start`, `stop`, `set_handler`)
//! - [`Handler`] and [`Responder`]: application contract
//! - [`ServerConfig`]: listen address, buffer sizes, poll timeout, encryption
//! - [`ClientRegistry`]: live connections, readable from any thread
//! - [`action`]: the cross-thread action queue
//! - [`secure`]: the encryption layer seam, with a rustls implementation
//!   behind the `tls` feature
//! - [`error`]: error types and result handling

pub mod action;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod framing;
pub mod handler;
pub mod poll;
pub mod registry;
pub mod secure;
pub mod server;

pub use action::Responder;
pub use config::ServerConfig;
pub use connection::ConnectionId;
pub use error::{BoxError, HarnessError, Result};
pub use handler::Handler;
pub use registry::ClientRegistry;
pub use secure::{Session, SessionFactory};
pub use server::EventLoopServer;

/// Commonly used types and traits.
///
/// ```rust
/// use mill_harness::prelude::*;
/// ```
pub mod prelude {
    pub use crate::action::Responder;
    pub use crate::config::ServerConfig;
    pub use crate::error::{BoxError, HarnessError};
    pub use crate::handler::{self, Handler};
    pub use crate::server::EventLoopServer;
}
