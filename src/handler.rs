use std::{
    fmt,
    sync::{Arc, RwLock},
};

use crate::{action::Responder, error::BoxError};

/// Application logic plugged into the server.
///
/// Called on the selector thread once per complete inbound line, in arrival
/// order. Returning `Some(response)` writes `response` plus a newline back on
/// the same connection. To answer later, or from another thread, clone the
/// [`Responder`] and return `None`.
///
/// An `Err` (or a panic) closes the connection the message came from; other
/// connections are unaffected. Implementations should not block: every
/// connection shares the selector thread.
///
/// ```rust
/// use mill_harness::{Handler, Responder, BoxError};
///
/// struct Upper;
///
/// impl Handler for Upper {
///     fn handle(&self, message: &str, _: &Responder) -> Result<Option<String>, BoxError> {
///         Ok(Some(message.to_uppercase()))
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, message: &str, responder: &Responder) -> Result<Option<String>, BoxError>;
}

/// Adapts a plain closure into a [`Handler`].
///
/// ```rust
/// let echo = mill_harness::handler::from_fn(|line| Some(line.to_string()));
/// # let _ = echo;
/// ```
pub fn from_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    FnHandler(f)
}

pub struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    fn handle(&self, message: &str, _: &Responder) -> Result<Option<String>, BoxError> {
        Ok((self.0)(message))
    }
}

impl<H: Handler> Handler for Arc<H> {
    fn handle(&self, message: &str, responder: &Responder) -> Result<Option<String>, BoxError> {
        (**self).handle(message, responder)
    }
}

/// The currently installed handler, swappable from any thread.
#[derive(Default)]
pub struct HandlerSlot {
    current: RwLock<Option<Arc<dyn Handler>>>,
}

impl HandlerSlot {
    pub fn set(&self, handler: Arc<dyn Handler>) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(handler);
    }

    pub fn clear(&self) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = None;
    }

    pub fn get(&self) -> Option<Arc<dyn Handler>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("installed", &self.get().is_some())
            .finish()
    }
}
