//! Line echo server.
//!
//! ```text
//! cargo run --example echo_server -- 7070
//! printf 'ping\nhello\n' | nc 127.0.0.1 7070
//! ```
//!
//! `ping` is answered with `pong`, `time` is answered from a worker thread
//! through the `Responder`, `quit` closes the connection and `shutdown` stops
//! the server. Everything else is echoed back.

use log::info;
use mill_harness::{BoxError, EventLoopServer, Handler, Responder, ServerConfig};
use std::{
    env,
    sync::{Arc, Weak},
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

struct EchoHandler {
    server: Weak<EventLoopServer>,
}

impl Handler for EchoHandler {
    fn handle(&self, message: &str, responder: &Responder) -> Result<Option<String>, BoxError> {
        info!("{}: {:?}", responder.connection_id(), message);
        match message {
            "ping" => Ok(Some("pong".to_string())),
            "time" => {
                let responder = responder.clone();
                thread::spawn(move || {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or_default();
                    let _ = responder.respond(format!("unix time {now}"));
                });
                Ok(None)
            }
            "quit" => {
                responder.respond("bye")?;
                responder.close()?;
                Ok(None)
            }
            "shutdown" => {
                if let Some(server) = self.server.upgrade() {
                    server.stop();
                }
                Ok(Some("shutting down".to_string()))
            }
            other => Ok(Some(other.to_string())),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port = match env::args().nth(1) {
        Some(port) => port.parse()?,
        None => 7070,
    };

    let server = Arc::new(EventLoopServer::new(ServerConfig::new(port)));
    server.set_handler(EchoHandler {
        server: Arc::downgrade(&server),
    });

    server.start()?;
    info!("clients left after shutdown: {}", server.clients().len());
    Ok(())
}
