//! Handles: opaque one-word references to scope-owned slots.
//!
//! Every VM entity the bridge hands out (values, contexts, compiled scripts,
//! templates) lives in a `Slot` owned by a handle-scope frame. A [`Handle`]
//! is the slot's address; it is what crosses the C boundary. Inside Rust the
//! same address is carried by [`Local`], which adds the scope lifetime and a
//! compile-time kind so that a context can never be passed where a script is
//! expected.

use jsbridge_sys::*;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use crate::context::ContextRecord;
use crate::error::{BridgeError, BridgeResult};
use crate::scope::HandleScope;
use crate::script::ScriptRecord;
use crate::template::{TemplateKind, TemplateRecord};

/// Opaque reference to a VM entity, valid while its handle scope is open.
///
/// Layout-compatible with the C `JsbHandle { void *value; }`. The null
/// address is the empty handle.
///
/// # Limits
///
/// A handle is only an address. [`HandleScope::local`] rejects addresses
/// that are not live in the scope's isolate, which covers handles from closed
/// scopes and from other isolates. It cannot tell a stale handle from a newer
/// slot the allocator placed at the same address; such a handle resolves to
/// the newer slot, whose kind is still checked.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    value: *mut c_void,
}

impl Handle {
    /// The empty handle, returned by operations that failed.
    pub const EMPTY: Handle = Handle {
        value: ptr::null_mut(),
    };

    pub fn is_empty(self) -> bool {
        self.value.is_null()
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.value
    }

    pub fn from_ptr(value: *mut c_void) -> Self {
        Self { value }
    }

    pub(crate) fn address(self) -> usize {
        self.value as usize
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Handle(<empty>)")
        } else {
            write!(f, "Handle({:p})", self.value)
        }
    }
}

/// Runtime tag of the entity a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Value,
    Context,
    Script,
    ObjectTemplate,
    FunctionTemplate,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Value => "Value",
            Self::Context => "Context",
            Self::Script => "Script",
            Self::ObjectTemplate => "ObjectTemplate",
            Self::FunctionTemplate => "FunctionTemplate",
        })
    }
}

/// Scope-owned storage behind a handle.
///
/// `Value` entries are GC-protected for as long as the slot exists; the
/// scope stack protects on allocation and unprotects on release.
#[derive(Clone)]
pub(crate) enum Slot {
    Value(JSValueRef),
    Context(Rc<ContextRecord>),
    Script(Rc<ScriptRecord>),
    Template(Rc<TemplateRecord>),
}

impl Slot {
    pub(crate) fn kind(&self) -> HandleKind {
        match self {
            Self::Value(_) => HandleKind::Value,
            Self::Context(_) => HandleKind::Context,
            Self::Script(_) => HandleKind::Script,
            Self::Template(template) => match template.kind() {
                TemplateKind::Object => HandleKind::ObjectTemplate,
                TemplateKind::Function(_) => HandleKind::FunctionTemplate,
            },
        }
    }
}

/// Compile-time handle kind.
///
/// `accepts` is the runtime check applied when an untyped [`Handle`] is
/// rewrapped. Kinds narrower than a slot tag (strings, objects) inspect the
/// value itself; `value` is null for non-value slots.
pub trait Kind {
    const NAME: &'static str;

    #[doc(hidden)]
    fn accepts(kind: HandleKind, value: JSValueRef, ctx: JSContextRef) -> bool;
}

/// Kinds whose slots hold a JS value.
pub trait ValueKind: Kind {}

/// Kinds that may be stored as a template property.
pub trait DataKind: Kind {}

/// Kinds that are templates.
pub trait TemplateKindMarker: Kind {}

macro_rules! value_kinds {
    ($($(#[$doc:meta])* $name:ident => |$ctx:ident, $value:ident| $check:expr;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug)]
            pub enum $name {}

            impl Kind for $name {
                const NAME: &'static str = stringify!($name);

                #[allow(unused_variables, unused_unsafe)]
                fn accepts(kind: HandleKind, $value: JSValueRef, $ctx: JSContextRef) -> bool {
                    // SAFETY: value slots hold protected values of this isolate.
                    kind == HandleKind::Value && unsafe { $check }
                }
            }

            impl ValueKind for $name {}
            impl DataKind for $name {}
        )*
    };
}

value_kinds! {
    /// Any JS value.
    Value => |ctx, value| true;
    /// A JS string primitive.
    JsString => |ctx, value| JSValueIsString(ctx, value);
    /// A JS object, functions included.
    Object => |ctx, value| JSValueIsObject(ctx, value);
    /// A callable JS object.
    Function => |ctx, value| JSValueIsObject(ctx, value) && JSObjectIsFunction(ctx, value);
}

macro_rules! slot_kinds {
    ($($(#[$doc:meta])* $name:ident => $pattern:pat,)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug)]
            pub enum $name {}

            impl Kind for $name {
                const NAME: &'static str = stringify!($name);

                fn accepts(kind: HandleKind, _value: JSValueRef, _ctx: JSContextRef) -> bool {
                    matches!(kind, $pattern)
                }
            }
        )*
    };
}

slot_kinds! {
    /// An execution context.
    Context => HandleKind::Context,
    /// A compiled script bound to a context.
    Script => HandleKind::Script,
    /// Template for plain objects (and the global object).
    ObjectTemplate => HandleKind::ObjectTemplate,
    /// Template for native functions.
    FunctionTemplate => HandleKind::FunctionTemplate,
    /// Either template kind.
    Template => HandleKind::ObjectTemplate | HandleKind::FunctionTemplate,
    /// Anything a template property can hold: a value or a template.
    Data => HandleKind::Value | HandleKind::ObjectTemplate | HandleKind::FunctionTemplate,
}

pub(crate) fn slot_accepts<K: Kind>(slot: &Slot, ctx: JSContextRef) -> bool {
    let value = match slot {
        Slot::Value(value) => *value,
        _ => ptr::null_mut(),
    };
    K::accepts(slot.kind(), value, ctx)
}

impl TemplateKindMarker for ObjectTemplate {}
impl TemplateKindMarker for FunctionTemplate {}
impl TemplateKindMarker for Template {}

impl DataKind for ObjectTemplate {}
impl DataKind for FunctionTemplate {}
impl DataKind for Template {}
impl DataKind for Data {}

/// A handle tied to the scope that owns its slot.
///
/// `Local` is `Copy`; copies share the slot. The lifetime prevents use after
/// the owning scope closes, which the untyped [`Handle`] cannot.
///
/// Operations taking a `&HandleScope` must be given a scope of the isolate
/// the `Local` came from. Crossing isolates is not detected on this typed path;
/// go through [`Handle`] and [`HandleScope::local`] when the origin is unknown.
///
/// # Thread Safety
///
/// `Local` is `!Send` and `!Sync`, like everything that touches the VM.
pub struct Local<'s, K> {
    slot: NonNull<Slot>,
    _marker: PhantomData<(&'s (), *const K)>,
}

impl<K> Clone for Local<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Local<'_, K> {}

impl<K: Kind> fmt::Debug for Local<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Local<{}>({:p})", K::NAME, self.slot)
    }
}

impl<'s, K> Local<'s, K> {
    /// # Safety
    /// `slot` must be live in a frame that outlives `'s`, and hold a `K`.
    pub(crate) unsafe fn from_slot(slot: NonNull<Slot>) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    pub(crate) fn slot(&self) -> &'s Slot {
        // SAFETY: the slot is boxed in a frame that stays open for 's.
        unsafe { &*self.slot.as_ptr() }
    }

    /// The untyped handle for this slot.
    pub fn into_handle(self) -> Handle {
        Handle::from_ptr(self.slot.as_ptr().cast())
    }

    pub fn kind(&self) -> HandleKind {
        self.slot().kind()
    }

    /// The same slot viewed under another kind, checked at runtime.
    pub fn try_cast<T: Kind>(self, scope: &HandleScope<'_>) -> BridgeResult<Local<'s, T>> {
        if slot_accepts::<T>(self.slot(), scope.isolate().allocation_context()) {
            // SAFETY: same slot, kind just checked.
            Ok(unsafe { Local::from_slot(self.slot) })
        } else {
            Err(BridgeError::KindMismatch {
                expected: T::NAME,
                actual: self.kind(),
            })
        }
    }

    /// Copy this handle into `outer`, so it survives the current scope.
    pub fn copy_to<'o>(&self, outer: &'o HandleScope<'_>) -> Local<'o, K> {
        outer.alloc(self.slot().clone())
    }
}

impl<'s, K: ValueKind> Local<'s, K> {
    pub fn as_value(self) -> Local<'s, Value> {
        // SAFETY: every value kind is a value.
        unsafe { Local::from_slot(self.slot) }
    }

    pub(crate) fn raw_value(&self) -> JSValueRef {
        match self.slot() {
            Slot::Value(value) => *value,
            _ => ptr::null_mut(),
        }
    }
}

impl<'s, K: DataKind> Local<'s, K> {
    pub fn as_data(self) -> Local<'s, Data> {
        // SAFETY: `Data` accepts values and templates.
        unsafe { Local::from_slot(self.slot) }
    }
}

impl<'s, K: TemplateKindMarker> Local<'s, K> {
    pub fn as_template(self) -> Local<'s, Template> {
        // SAFETY: every template kind is a template.
        unsafe { Local::from_slot(self.slot) }
    }

    pub(crate) fn template_record(&self) -> &'s Rc<TemplateRecord> {
        match self.slot() {
            Slot::Template(template) => template,
            _ => unreachable!("template kinds only wrap template slots"),
        }
    }
}

impl<'s> Local<'s, Context> {
    pub(crate) fn context_record(&self) -> &'s Rc<ContextRecord> {
        match self.slot() {
            Slot::Context(context) => context,
            _ => unreachable!("Context only wraps context slots"),
        }
    }
}

impl<'s> Local<'s, Script> {
    pub(crate) fn script_record(&self) -> &'s Rc<ScriptRecord> {
        match self.slot() {
            Slot::Script(script) => script,
            _ => unreachable!("Script only wraps script slots"),
        }
    }
}
