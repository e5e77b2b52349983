//! Sink for exception messages nobody caught.
//!
//! Uncaught exceptions, and exceptions caught by a verbose `TryCatch`, are
//! rendered as `<file>:<line>: <ErrorType>: <message>` and passed to the
//! installed handler. The default handler logs them at error level.

use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use tracing::error;

type MessageHandler = dyn Fn(&str) + Send + Sync + 'static;

static MESSAGE_HANDLER: OnceLock<Mutex<Arc<MessageHandler>>> = OnceLock::new();

fn handler_slot() -> &'static Mutex<Arc<MessageHandler>> {
    MESSAGE_HANDLER.get_or_init(|| Mutex::new(Arc::new(default_message_handler)))
}

/// Route exception messages to `handler` instead of the log.
pub fn set_message_handler(handler: impl Fn(&str) + Send + Sync + 'static) {
    *handler_slot().lock() = Arc::new(handler);
}

/// Restore the logging handler.
pub fn reset_message_handler() {
    *handler_slot().lock() = Arc::new(default_message_handler);
}

fn default_message_handler(message: &str) {
    error!(target: "jsbridge", "{}", message);
}

pub(crate) fn dispatch_message(message: &str) {
    // Clone out so the handler may replace itself.
    let handler = handler_slot().lock().clone();
    handler(message);
}
