//! Exception capture
//!
//! Every exception the bridge observes goes through
//! [`Isolate::report_exception`], which delivers it to exactly one place:
//!
//! 1. the innermost [`TryCatch`], if it was opened at the current callback
//!    depth or deeper;
//! 2. otherwise, inside a native callback, the exception is left pending and
//!    rethrown into the calling script when the callback returns;
//! 3. otherwise the message handler, as an uncaught exception.

use jsbridge_sys::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, warn};

use crate::error::ScriptException;
use crate::handle::{JsString, Local, Value};
use crate::isolate::Isolate;
use crate::message::dispatch_message;
use crate::scope::HandleScope;
use crate::value::{Persistent, extract_exception};

struct Caught {
    exception: Persistent,
    details: ScriptException,
}

pub(crate) struct TryCatchState {
    /// Callback depth at creation. A `TryCatch` opened by outer code does not
    /// see exceptions raised inside a nested callback; those go back to the
    /// script that called the callback first.
    depth: usize,
    verbose: Cell<bool>,
    caught: RefCell<Option<Caught>>,
}

/// Captures exceptions raised while it is the innermost `TryCatch`.
///
/// # Thread Safety
///
/// `TryCatch` is `!Send` and `!Sync` because it borrows an [`Isolate`].
pub struct TryCatch<'i> {
    isolate: &'i Isolate,
    state: Rc<TryCatchState>,
}

impl<'i> TryCatch<'i> {
    pub fn new(isolate: &'i Isolate) -> Self {
        let state = Rc::new(TryCatchState {
            depth: isolate.callback_depth(),
            verbose: Cell::new(false),
            caught: RefCell::new(None),
        });
        isolate.try_catches().borrow_mut().push(state.clone());
        Self { isolate, state }
    }

    pub fn has_caught(&self) -> bool {
        self.state.caught.borrow().is_some()
    }

    /// The thrown value, if anything was caught.
    pub fn exception<'a>(&self, scope: &'a HandleScope<'_>) -> Option<Local<'a, Value>> {
        let caught = self.state.caught.borrow();
        caught
            .as_ref()
            .map(|caught| scope.value(caught.exception.get()))
    }

    /// The formatted message (`<file>:<line>: <ErrorType>: <message>`).
    pub fn message<'a>(&self, scope: &'a HandleScope<'_>) -> Option<Local<'a, JsString>> {
        let text = self.state.caught.borrow().as_ref()?.details.to_string();
        Some(scope.string(&text))
    }

    /// Structured details of the caught exception.
    pub fn details(&self) -> Option<ScriptException> {
        self.state
            .caught
            .borrow()
            .as_ref()
            .map(|caught| caught.details.clone())
    }

    /// Forget the caught exception.
    pub fn reset(&self) {
        let previous = self.state.caught.borrow_mut().take();
        drop(previous);
    }

    /// When verbose, caught exceptions are also passed to the message handler.
    pub fn set_verbose(&self, verbose: bool) {
        self.state.verbose.set(verbose);
    }

    pub fn is_verbose(&self) -> bool {
        self.state.verbose.get()
    }
}

impl Drop for TryCatch<'_> {
    fn drop(&mut self) {
        let mut stack = self.isolate.try_catches().borrow_mut();
        match stack.iter().rposition(|s| Rc::ptr_eq(s, &self.state)) {
            Some(index) => {
                if index + 1 != stack.len() {
                    warn!(target: "jsbridge::try_catch", "TryCatch released out of order");
                }
                stack.remove(index);
            }
            None => warn!(target: "jsbridge::try_catch", "TryCatch missing from its isolate"),
        }
    }
}

impl Isolate {
    /// Deliver an exception raised by JSC while running in `ctx`.
    pub(crate) fn report_exception(&self, ctx: JSContextRef, exception: JSValueRef) {
        // SAFETY: exception was just produced by JSC in ctx
        let details = unsafe { extract_exception(ctx, exception) };
        let depth = self.callback_depth();
        let handler = self
            .try_catches()
            .borrow()
            .last()
            .filter(|state| state.depth >= depth)
            .cloned();

        match handler {
            Some(state) => {
                debug!(target: "jsbridge::try_catch", %details, "exception caught");
                if state.verbose.get() {
                    dispatch_message(&details.to_string());
                }
                // SAFETY: exception belongs to this isolate's group
                let exception = unsafe { Persistent::new(self.heap_context(), exception) };
                let previous = state
                    .caught
                    .borrow_mut()
                    .replace(Caught { exception, details });
                drop(previous);
            }
            None if depth > 0 => {
                debug!(target: "jsbridge::try_catch", %details, "exception rethrown to calling script");
                self.set_pending_exception(exception);
            }
            None => {
                debug!(target: "jsbridge::try_catch", "uncaught exception");
                dispatch_message(&details.to_string());
            }
        }
    }
}
