//! The VM instance
//!
//! An [`Isolate`] owns a JSC context group plus all the bridge-side state the
//! C API has no counterpart for: the handle-scope stack, the entered-context
//! stack, the `TryCatch` stack and the exception pending on the way out of a
//! native callback. All of it is per instance; nothing is process-global
//! except the callback registry and the extension registry.

use jsbridge_sys::*;
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ptr;
use std::rc::{Rc, Weak};
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::ContextRecord;
use crate::error::{BridgeError, BridgeResult};
use crate::scope::ScopeStack;
use crate::try_catch::TryCatchState;
use crate::value::Persistent;

/// Global lock for JSC context creation.
/// JSC's initialization is not fully thread-safe, so we serialize context creation.
pub(crate) static CONTEXT_CREATION_LOCK: Mutex<()> = Mutex::new(());

thread_local! {
    /// Context group -> isolate, for finding the isolate from inside a
    /// callback, where JSC only hands us a context.
    static ISOLATES: RefCell<HashMap<usize, Weak<IsolateInner>>> = RefCell::new(HashMap::new());
}

/// A JavaScript VM instance.
///
/// Cloning is cheap and yields another reference to the same instance.
///
/// # Thread Safety
///
/// `Isolate` is `!Send` and `!Sync`; create one per thread.
#[derive(Clone)]
pub struct Isolate {
    inner: Rc<IsolateInner>,
}

pub(crate) struct IsolateInner {
    group: JSContextGroupRef,
    /// Context used for allocation while no context is entered.
    heap: JSGlobalContextRef,
    config: RefCell<EngineConfig>,
    scopes: RefCell<ScopeStack>,
    contexts: RefCell<Vec<Rc<ContextRecord>>>,
    try_catches: RefCell<Vec<Rc<TryCatchState>>>,
    callback_depth: Cell<usize>,
    pending_exception: RefCell<Option<Persistent>>,
}

impl Isolate {
    /// Create an isolate with default configuration.
    pub fn new() -> BridgeResult<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Create an isolate.
    ///
    /// This function is thread-safe - creation is serialized to avoid race
    /// conditions in JSC's initialization.
    pub fn with_config(config: EngineConfig) -> BridgeResult<Self> {
        let _guard = CONTEXT_CREATION_LOCK.lock();

        // SAFETY: JSC returns null on failure, which is checked
        let (group, heap) = unsafe {
            let group = JSContextGroupCreate();
            if group.is_null() {
                return Err(BridgeError::ContextCreation {
                    message: "JSContextGroupCreate returned null".into(),
                });
            }
            let heap = JSGlobalContextCreateInGroup(group, ptr::null_mut());
            if heap.is_null() {
                JSContextGroupRelease(group);
                return Err(BridgeError::ContextCreation {
                    message: "JSGlobalContextCreateInGroup returned null".into(),
                });
            }
            (group, heap)
        };

        let inner = Rc::new(IsolateInner {
            group,
            heap,
            config: RefCell::new(config),
            scopes: RefCell::new(ScopeStack::new()),
            contexts: RefCell::new(Vec::new()),
            try_catches: RefCell::new(Vec::new()),
            callback_depth: Cell::new(0),
            pending_exception: RefCell::new(None),
        });
        ISOLATES.with(|map| {
            map.borrow_mut()
                .insert(group as usize, Rc::downgrade(&inner))
        });
        debug!(target: "jsbridge::isolate", group = ?group, "isolate created");
        Ok(Self { inner })
    }

    /// The isolate owning `ctx`, if it was created on this thread.
    pub(crate) fn for_context(ctx: JSContextRef) -> Option<Self> {
        // SAFETY: ctx is a live context handed to us by JSC
        let group = unsafe { JSContextGetGroup(ctx) };
        ISOLATES
            .with(|map| map.borrow().get(&(group as usize)).and_then(Weak::upgrade))
            .map(|inner| Self { inner })
    }

    pub fn config(&self) -> EngineConfig {
        self.inner.config.borrow().clone()
    }

    /// Replace the configuration. Affects contexts created afterwards.
    pub fn set_config(&self, config: EngineConfig) {
        *self.inner.config.borrow_mut() = config;
    }

    pub fn update_config(&self, update: impl FnOnce(&mut EngineConfig)) {
        update(&mut self.inner.config.borrow_mut());
    }

    /// Number of handles alive across all open scopes.
    pub fn live_handles(&self) -> usize {
        self.inner.scopes.borrow().live_count()
    }

    /// Number of handle scopes not yet closed.
    pub fn open_scopes(&self) -> usize {
        self.inner.scopes.borrow().open_count()
    }

    /// Depth of the entered-context stack.
    pub fn entered_contexts(&self) -> usize {
        self.inner.contexts.borrow().len()
    }

    /// Whether a native callback is currently running.
    pub fn in_callback(&self) -> bool {
        self.inner.callback_depth.get() > 0
    }

    /// Run a full garbage collection.
    pub fn collect_garbage(&self) {
        // SAFETY: heap is alive for the isolate's lifetime
        unsafe { JSGarbageCollect(self.inner.heap) };
    }

    pub(crate) fn scopes(&self) -> &RefCell<ScopeStack> {
        &self.inner.scopes
    }

    pub(crate) fn contexts(&self) -> &RefCell<Vec<Rc<ContextRecord>>> {
        &self.inner.contexts
    }

    pub(crate) fn try_catches(&self) -> &RefCell<Vec<Rc<TryCatchState>>> {
        &self.inner.try_catches
    }

    pub(crate) fn group(&self) -> JSContextGroupRef {
        self.inner.group
    }

    pub(crate) fn heap_context(&self) -> JSGlobalContextRef {
        self.inner.heap
    }

    /// The entered context, if any.
    pub(crate) fn current_context(&self) -> Option<Rc<ContextRecord>> {
        self.inner.contexts.borrow().last().cloned()
    }

    /// Context for creating and inspecting values: the entered one, or the
    /// isolate's own while none is entered.
    pub(crate) fn allocation_context(&self) -> JSContextRef {
        self.inner
            .contexts
            .borrow()
            .last()
            .map_or(self.inner.heap, |context| context.raw())
    }

    pub(crate) fn close_scope(&self, frame: u64) {
        let released = self.inner.scopes.borrow_mut().close(frame);
        for frame in released {
            frame.release(self.inner.heap);
        }
    }

    pub(crate) fn unpin_scope(&self, frame: u64) {
        let released = self.inner.scopes.borrow_mut().unpin(frame);
        for frame in released {
            frame.release(self.inner.heap);
        }
    }

    pub(crate) fn callback_depth(&self) -> usize {
        self.inner.callback_depth.get()
    }

    /// Mark a native callback as running until the guard drops.
    pub(crate) fn enter_callback(&self) -> CallbackFrame<'_> {
        self.inner
            .callback_depth
            .set(self.inner.callback_depth.get() + 1);
        CallbackFrame { isolate: self }
    }

    /// Schedule `value` to be thrown into JS when the running callback
    /// returns. A later exception replaces an earlier one.
    pub(crate) fn set_pending_exception(&self, value: JSValueRef) {
        // SAFETY: value belongs to this isolate's group
        let persistent = unsafe { Persistent::new(self.inner.heap, value) };
        let previous = self.inner.pending_exception.borrow_mut().replace(persistent);
        drop(previous);
    }

    pub(crate) fn take_pending_exception(&self) -> Option<Persistent> {
        self.inner.pending_exception.borrow_mut().take()
    }
}

pub(crate) struct CallbackFrame<'i> {
    isolate: &'i Isolate,
}

impl Drop for CallbackFrame<'_> {
    fn drop(&mut self) {
        let depth = &self.isolate.inner.callback_depth;
        depth.set(depth.get().saturating_sub(1));
    }
}

impl Drop for IsolateInner {
    fn drop(&mut self) {
        let group = self.group as usize;
        // The thread-local may already be gone during thread teardown.
        let _ = ISOLATES.try_with(|map| map.borrow_mut().remove(&group));

        self.try_catches.get_mut().clear();
        self.pending_exception.get_mut().take();
        for frame in self.scopes.get_mut().drain() {
            frame.release(self.heap);
        }
        self.contexts.get_mut().clear();

        // SAFETY: both were created in `with_config`; contexts and
        // persistents still alive hold their own references
        unsafe {
            JSGlobalContextRelease(self.heap);
            JSContextGroupRelease(self.group);
        }
        debug!(target: "jsbridge::isolate", "isolate disposed");
    }
}
