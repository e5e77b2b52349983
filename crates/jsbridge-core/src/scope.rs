//! Handle scopes
//!
//! Each open [`HandleScope`] owns one frame on the isolate's scope stack.
//! Handles allocated while it is the innermost scope live in its frame and
//! are released when it closes. Frames closed out of order are only marked;
//! their slots are released once every frame above them has closed too, so a
//! handle never dangles while a later-opened scope could still reach it.
//! A view from [`HandleScope::current`] pins its frame the same way: the frame
//! outlives its owner until the last view of it is dropped.

use jsbridge_sys::*;
use std::collections::HashMap;
use std::ptr::NonNull;
use tracing::{trace, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, Kind, Local, Slot, Value, slot_accepts};
use crate::isolate::Isolate;

pub(crate) struct Frame {
    id: u64,
    slots: Vec<Box<Slot>>,
    closed: bool,
    /// Live views of this frame; a pinned frame is never released.
    pins: usize,
}

impl Frame {
    fn releasable(&self) -> bool {
        self.closed && self.pins == 0
    }
}

impl Frame {
    /// Drop the frame's slots, unprotecting the values they hold.
    pub(crate) fn release(self, ctx: JSContextRef) {
        for slot in self.slots {
            if let Slot::Value(value) = *slot
                && !value.is_null()
            {
                // SAFETY: protected in `ScopeStack::alloc` with a context of
                // the same group.
                unsafe { JSValueUnprotect(ctx, value) };
            }
        }
    }
}

/// Per-isolate stack of handle-scope frames.
pub(crate) struct ScopeStack {
    frames: Vec<Frame>,
    /// Live slot address -> owning frame id. Ids grow with stack depth.
    live: HashMap<usize, u64>,
    next_id: u64,
}

impl ScopeStack {
    pub(crate) fn new() -> Self {
        Self {
            frames: Vec::new(),
            live: HashMap::new(),
            next_id: 1,
        }
    }

    pub(crate) fn open(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.frames.push(Frame {
            id,
            slots: Vec::new(),
            closed: false,
            pins: 0,
        });
        id
    }

    #[cfg(test)]
    fn innermost_open(&self) -> Option<u64> {
        self.frames.iter().rev().find(|f| !f.closed).map(|f| f.id)
    }

    pub(crate) fn alloc(&mut self, frame: u64, slot: Slot, ctx: JSContextRef) -> NonNull<Slot> {
        let id = frame;
        let Some(frame) = self.frames.iter_mut().rev().find(|f| f.id == id) else {
            unreachable!("handle scope frame {id} released while a scope or view holds it");
        };
        if let Slot::Value(value) = slot
            && !value.is_null()
        {
            // SAFETY: `value` belongs to this isolate's context group.
            unsafe { JSValueProtect(ctx, value) };
        }
        let mut boxed = Box::new(slot);
        let ptr = NonNull::from(&mut *boxed);
        frame.slots.push(boxed);
        self.live.insert(ptr.as_ptr() as usize, id);
        ptr
    }

    /// Pin the innermost open frame for a view and return its id.
    pub(crate) fn pin_innermost(&mut self) -> Option<u64> {
        let frame = self.frames.iter_mut().rev().find(|f| !f.closed)?;
        frame.pins += 1;
        Some(frame.id)
    }

    /// Drop one view's pin; returns the frames that became releasable.
    pub(crate) fn unpin(&mut self, frame: u64) -> Vec<Frame> {
        match self.frames.iter_mut().rev().find(|f| f.id == frame) {
            Some(f) => f.pins = f.pins.saturating_sub(1),
            None => warn!(target: "jsbridge::scope", frame, "unpinning a released handle scope"),
        }
        self.pop_releasable()
    }

    /// Mark `frame` closed and pop every releasable frame off the top.
    ///
    /// Returns the popped frames; the caller releases them once no borrow of
    /// the stack is held.
    pub(crate) fn close(&mut self, frame: u64) -> Vec<Frame> {
        let Some(index) = self.frames.iter().rposition(|f| f.id == frame) else {
            warn!(target: "jsbridge::scope", frame, "closing a handle scope that is already released");
            return Vec::new();
        };
        self.frames[index].closed = true;
        if index + 1 != self.frames.len() {
            warn!(
                target: "jsbridge::scope",
                frame,
                open_above = self.frames.len() - index - 1,
                "handle scope closed out of order; release deferred"
            );
        }
        self.pop_releasable()
    }

    fn pop_releasable(&mut self) -> Vec<Frame> {
        let mut released = Vec::new();
        while self.frames.last().is_some_and(Frame::releasable) {
            if let Some(top) = self.frames.pop() {
                for slot in &top.slots {
                    self.live.remove(&(&**slot as *const Slot as usize));
                }
                released.push(top);
            }
        }
        released
    }

    /// Remove every frame, open or not.
    pub(crate) fn drain(&mut self) -> Vec<Frame> {
        self.live.clear();
        self.frames.drain(..).rev().collect()
    }

    /// Map an untyped handle back to its slot if the slot is live in
    /// `frame` or a frame enclosing it.
    pub(crate) fn resolve(&self, handle: Handle, frame: u64) -> BridgeResult<NonNull<Slot>> {
        match self.live.get(&handle.address()) {
            Some(&owner) if owner <= frame => {}
            _ => {
                return Err(BridgeError::StaleHandle {
                    address: handle.address(),
                });
            }
        }
        NonNull::new(handle.as_ptr().cast()).ok_or(BridgeError::EmptyHandle { expected: "Value" })
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.frames.iter().filter(|f| !f.closed).count()
    }
}

/// A stack-scoped region owning the handles created inside it.
///
/// Handles returned by operations on the scope borrow it, so they cannot
/// outlive it. Use [`Local::copy_to`] to hand a value to an enclosing scope.
///
/// # Thread Safety
///
/// `HandleScope` is `!Send` and `!Sync` because it borrows an [`Isolate`].
pub struct HandleScope<'i> {
    isolate: &'i Isolate,
    frame: u64,
    /// `false` for views, which pin the frame instead of closing it.
    owned: bool,
}

impl<'i> HandleScope<'i> {
    /// Open a new innermost scope.
    pub fn new(isolate: &'i Isolate) -> Self {
        let frame = isolate.scopes().borrow_mut().open();
        trace!(target: "jsbridge::scope", frame, "handle scope opened");
        Self {
            isolate,
            frame,
            owned: true,
        }
    }

    /// A view of the innermost open scope that does not close it on drop.
    ///
    /// This is how the C surface allocates: it never names a scope, handles
    /// simply land in whichever scope is innermost. The view pins the frame,
    /// so handles created through it stay valid for as long as the view lives
    /// even if the owning scope closes first.
    pub fn current(isolate: &'i Isolate) -> BridgeResult<Self> {
        let frame = isolate
            .scopes()
            .borrow_mut()
            .pin_innermost()
            .ok_or(BridgeError::NoActiveScope)?;
        Ok(Self {
            isolate,
            frame,
            owned: false,
        })
    }

    pub fn isolate(&self) -> &'i Isolate {
        self.isolate
    }

    pub(crate) fn alloc<K>(&self, slot: Slot) -> Local<'_, K> {
        let ptr =
            self.isolate
                .scopes()
                .borrow_mut()
                .alloc(self.frame, slot, self.isolate.heap_context());
        // SAFETY: the slot lives in this scope's frame, which is released no
        // earlier than this scope.
        unsafe { Local::from_slot(ptr) }
    }

    pub(crate) fn value<K>(&self, value: JSValueRef) -> Local<'_, K> {
        self.alloc(Slot::Value(value))
    }

    /// Rewrap an untyped handle, checking that it is live and of kind `K`.
    ///
    /// Handles from enclosing scopes are accepted; outer frames are released
    /// after inner ones, so binding them to this scope is sound. Handles from
    /// scopes opened later are rejected.
    pub fn local<K: Kind>(&self, handle: Handle) -> BridgeResult<Local<'_, K>> {
        if handle.is_empty() {
            return Err(BridgeError::EmptyHandle { expected: K::NAME });
        }
        let ptr = self.isolate.scopes().borrow().resolve(handle, self.frame)?;
        // SAFETY: `resolve` only returns live slots.
        let slot = unsafe { ptr.as_ref() };
        if !slot_accepts::<K>(slot, self.isolate.allocation_context()) {
            return Err(BridgeError::KindMismatch {
                expected: K::NAME,
                actual: slot.kind(),
            });
        }
        // SAFETY: live and of kind `K`.
        Ok(unsafe { Local::from_slot(ptr) })
    }

    pub fn undefined(&self) -> Local<'_, Value> {
        // SAFETY: JSValueMakeUndefined always returns a valid value
        let value = unsafe { JSValueMakeUndefined(self.isolate.allocation_context()) };
        self.value(value)
    }

    pub fn null(&self) -> Local<'_, Value> {
        // SAFETY: JSValueMakeNull always returns a valid value
        let value = unsafe { JSValueMakeNull(self.isolate.allocation_context()) };
        self.value(value)
    }

    pub fn boolean(&self, b: bool) -> Local<'_, Value> {
        // SAFETY: JSValueMakeBoolean always returns a valid value
        let value = unsafe { JSValueMakeBoolean(self.isolate.allocation_context(), b) };
        self.value(value)
    }

    pub fn number(&self, n: f64) -> Local<'_, Value> {
        // SAFETY: JSValueMakeNumber always returns a valid value
        let value = unsafe { JSValueMakeNumber(self.isolate.allocation_context(), n) };
        self.value(value)
    }
}

impl Drop for HandleScope<'_> {
    fn drop(&mut self) {
        if self.owned {
            trace!(target: "jsbridge::scope", frame = self.frame, "handle scope closed");
            self.isolate.close_scope(self.frame);
        } else {
            self.isolate.unpin_scope(self.frame);
        }
    }
}
