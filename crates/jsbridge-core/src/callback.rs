//! Native callbacks
//!
//! Function templates register their Rust callback in a process-wide arena
//! and stamp the binding id into each function instance's private data. JSC
//! calls [`invoke_trampoline`] for every instance; the trampoline looks the
//! callback up by id, opens a handle scope, and hands the callback an
//! [`Arguments`] view.
//!
//! Bindings are reference counted: one reference per template and one per
//! live function instance, dropped by the class finalizer. The arena is
//! behind a mutex because JSC may finalize objects during GC.

use jsbridge_sys::*;
use parking_lot::Mutex;
use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, OnceLock};
use tracing::{error, trace, warn};

use crate::handle::{Local, Value, ValueKind};
use crate::isolate::Isolate;
use crate::scope::HandleScope;
use crate::string::JsStr;

/// Signature of native functions exposed to scripts.
///
/// Returning `None` yields `undefined` to the caller.
pub type NativeCallback =
    dyn for<'a> Fn(&Arguments<'a>) -> Option<Local<'a, Value>> + Send + Sync + 'static;

/// Box a closure as a [`NativeCallback`].
pub(crate) fn native_callback<F>(callback: F) -> Arc<NativeCallback>
where
    F: for<'a> Fn(&Arguments<'a>) -> Option<Local<'a, Value>> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Arena index of a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BindingId(u32);

impl BindingId {
    /// Private-data encoding. Offset by one so a valid id is never null.
    fn to_private(self) -> *mut c_void {
        (self.0 as usize + 1) as *mut c_void
    }

    fn from_private(data: *mut c_void) -> Option<Self> {
        (data as usize)
            .checked_sub(1)
            .and_then(|index| u32::try_from(index).ok())
            .map(BindingId)
    }
}

struct Binding {
    callback: Arc<NativeCallback>,
    refs: usize,
}

struct CallbackRegistry {
    slots: Vec<Option<Binding>>,
    free: Vec<u32>,
}

impl CallbackRegistry {
    const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, callback: Arc<NativeCallback>) -> BindingId {
        let binding = Binding { callback, refs: 1 };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(binding);
                BindingId(index)
            }
            None => {
                self.slots.push(Some(binding));
                BindingId((self.slots.len() - 1) as u32)
            }
        }
    }

    fn retain(&mut self, id: BindingId) -> bool {
        match self.slots.get_mut(id.0 as usize).and_then(Option::as_mut) {
            Some(binding) => {
                binding.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one reference; returns the binding once the last one is gone so
    /// the caller can drop it outside the lock.
    fn release(&mut self, id: BindingId) -> Option<Binding> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        let binding = slot.as_mut()?;
        binding.refs -= 1;
        if binding.refs > 0 {
            return None;
        }
        self.free.push(id.0);
        slot.take()
    }

    fn get(&self, id: BindingId) -> Option<Arc<NativeCallback>> {
        self.slots
            .get(id.0 as usize)?
            .as_ref()
            .map(|binding| binding.callback.clone())
    }

    fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

static REGISTRY: Mutex<CallbackRegistry> = Mutex::new(CallbackRegistry::new());

/// Number of callbacks still referenced by a template or function instance.
pub fn live_callback_bindings() -> usize {
    REGISTRY.lock().live()
}

/// A template's reference to its callback binding.
pub(crate) struct CallbackBinding {
    id: BindingId,
}

impl CallbackBinding {
    pub(crate) fn new(callback: Arc<NativeCallback>) -> Self {
        let id = REGISTRY.lock().insert(callback);
        trace!(target: "jsbridge::callback", id = id.0, "callback registered");
        Self { id }
    }

    /// Create a function instance calling this binding.
    ///
    /// # Safety
    /// `ctx` must be a live context.
    pub(crate) unsafe fn instantiate(&self, ctx: JSContextRef) -> JSObjectRef {
        // The lock must not be held across JSC calls: allocation may GC and
        // run `finalize_function`.
        let retained = REGISTRY.lock().retain(self.id);
        debug_assert!(retained, "binding outlived by its template");
        // SAFETY: the class is valid for the process lifetime; ctx is live
        unsafe {
            let function = JSObjectMake(ctx, function_class(), self.id.to_private());
            // Class instances chain to Object.prototype; give them call/apply/bind.
            match function_prototype(ctx) {
                Some(prototype) => JSObjectSetPrototype(ctx, function, prototype),
                None => warn!(target: "jsbridge::callback", "Function.prototype not found"),
            }
            function
        }
    }
}

/// The context's `Function.prototype`, read through the global `Function`.
///
/// # Safety
/// `ctx` must be a live context.
unsafe fn function_prototype(ctx: JSContextRef) -> Option<JSObjectRef> {
    // SAFETY: per caller contract; every lookup checks for an object first
    unsafe {
        let constructor = get_object(ctx, JSContextGetGlobalObject(ctx), "Function")?;
        get_object(ctx, constructor, "prototype")
    }
}

/// # Safety
/// `ctx` must be live and `object` an object of its group.
unsafe fn get_object(ctx: JSContextRef, object: JSObjectRef, name: &str) -> Option<JSObjectRef> {
    let key = JsStr::new(name);
    let mut exception: JSValueRef = ptr::null_mut();
    // SAFETY: per caller contract
    unsafe {
        let value = JSObjectGetProperty(ctx, object, key.raw(), &mut exception);
        (exception.is_null() && !value.is_null() && JSValueIsObject(ctx, value)).then_some(value)
    }
}

impl Drop for CallbackBinding {
    fn drop(&mut self) {
        let released = REGISTRY.lock().release(self.id);
        if released.is_some() {
            trace!(target: "jsbridge::callback", id = self.id.0, "callback released");
        }
    }
}

/// Create a standalone function object for `callback`.
///
/// # Safety
/// `ctx` must be a live context.
pub(crate) unsafe fn native_function(ctx: JSContextRef, callback: Arc<NativeCallback>) -> JSObjectRef {
    let binding = CallbackBinding::new(callback);
    // SAFETY: per caller contract; the instance keeps its own reference
    unsafe { binding.instantiate(ctx) }
}

struct FunctionClass(JSClassRef);

// SAFETY: JSClassRef is an immutable, internally reference-counted class
// description usable from any thread.
unsafe impl Send for FunctionClass {}
unsafe impl Sync for FunctionClass {}

static FUNCTION_CLASS: OnceLock<FunctionClass> = OnceLock::new();

fn function_class() -> JSClassRef {
    FUNCTION_CLASS
        .get_or_init(|| {
            let definition = JSClassDefinition {
                class_name: c"Function".as_ptr(),
                finalize: Some(finalize_function),
                call_as_function: Some(invoke_trampoline),
                ..JSClassDefinition::EMPTY
            };
            // SAFETY: definition is fully initialized and outlives the call
            FunctionClass(unsafe { JSClassCreate(&definition) })
        })
        .0
}

unsafe extern "C" fn finalize_function(object: JSObjectRef) {
    // SAFETY: object is being finalized and still readable
    let Some(id) = BindingId::from_private(unsafe { JSObjectGetPrivate(object) }) else {
        return;
    };
    let released = REGISTRY.lock().release(id);
    drop(released);
}

/// Arguments of a native call.
///
/// Values handed out live in a handle scope the trampoline opens for the
/// duration of the call.
pub struct Arguments<'s> {
    scope: &'s HandleScope<'s>,
    this: JSObjectRef,
    values: &'s [JSValueRef],
}

impl<'s> Arguments<'s> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The `index`-th argument, or `undefined` past the end.
    pub fn get(&self, index: usize) -> Local<'s, Value> {
        match self.values.get(index) {
            Some(&value) => self.scope.value(value),
            None => self.scope.undefined(),
        }
    }

    /// The receiver; `undefined` when JSC passes none.
    pub fn this(&self) -> Local<'s, Value> {
        if self.this.is_null() {
            self.scope.undefined()
        } else {
            self.scope.value(self.this)
        }
    }

    /// The scope owning this call's handles.
    pub fn scope(&self) -> &'s HandleScope<'s> {
        self.scope
    }

    pub fn isolate(&self) -> &'s Isolate {
        self.scope.isolate()
    }

    /// Raise `value` in the calling script once the callback returns.
    pub fn throw<K: ValueKind>(&self, value: Local<'_, K>) {
        self.isolate().throw_exception(value);
    }
}

impl Isolate {
    /// Throw `value` as a JS exception.
    ///
    /// Delivered like any exception: to a `TryCatch` opened inside the
    /// running callback, else into the script that called the callback.
    pub fn throw_exception<K: ValueKind>(&self, value: Local<'_, K>) {
        if !self.in_callback() {
            warn!(target: "jsbridge::callback", "exception thrown outside a native callback");
        }
        self.report_exception(self.allocation_context(), value.raw_value());
    }
}

unsafe extern "C" fn invoke_trampoline(
    ctx: JSContextRef,
    function: JSObjectRef,
    this_object: JSObjectRef,
    argument_count: usize,
    arguments: *const JSValueRef,
    exception: *mut JSValueRef,
) -> JSValueRef {
    // SAFETY: ctx is the calling context
    let undefined = unsafe { JSValueMakeUndefined(ctx) };

    // SAFETY: function is an instance of the function class
    let Some(id) = BindingId::from_private(unsafe { JSObjectGetPrivate(function) }) else {
        return undefined;
    };
    let callback = REGISTRY.lock().get(id);
    let Some(callback) = callback else {
        warn!(target: "jsbridge::callback", id = id.0, "call to a released callback");
        return undefined;
    };
    let Some(isolate) = Isolate::for_context(ctx) else {
        warn!(target: "jsbridge::callback", "callback invoked outside any isolate on this thread");
        return undefined;
    };

    let values: &[JSValueRef] = if argument_count == 0 || arguments.is_null() {
        &[]
    } else {
        // SAFETY: JSC passes `argument_count` valid values
        unsafe { std::slice::from_raw_parts(arguments, argument_count) }
    };

    let result = {
        let _frame = isolate.enter_callback();
        let scope = HandleScope::new(&isolate);
        let args = Arguments {
            scope: &scope,
            this: this_object,
            values,
        };
        trace!(target: "jsbridge::callback", id = id.0, argc = values.len(), "callback invoked");
        match panic::catch_unwind(AssertUnwindSafe(|| callback(&args))) {
            Ok(Some(value)) if !value.raw_value().is_null() => value.raw_value(),
            Ok(_) => undefined,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(target: "jsbridge::callback", id = id.0, "native callback panicked: {message}");
                // SAFETY: ctx is the calling context
                let error = unsafe { make_error(ctx, &format!("native callback panicked: {message}")) };
                isolate.set_pending_exception(error);
                undefined
            }
        }
    };

    if let Some(pending) = isolate.take_pending_exception() {
        if !exception.is_null() {
            // SAFETY: JSC provides a writable exception slot
            unsafe { *exception = pending.get() };
        }
        return undefined;
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Create an `Error` object with `message`.
///
/// # Safety
/// `ctx` must be a live context.
pub(crate) unsafe fn make_error(ctx: JSContextRef, message: &str) -> JSValueRef {
    let text = JsStr::new(message);
    // SAFETY: per caller contract
    unsafe {
        let argument = JSValueMakeString(ctx, text.raw());
        let mut exception: JSValueRef = ptr::null_mut();
        let error = JSObjectMakeError(ctx, 1, &argument, &mut exception);
        if error.is_null() { argument } else { error }
    }
}
