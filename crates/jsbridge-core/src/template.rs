//! Object and function templates
//!
//! A template is a recipe: a list of named properties whose values are
//! either JS values or nested templates. Nothing exists in the VM until the
//! template is instantiated (as a context's global object, or as a function
//! through [`Local::<FunctionTemplate>::get_function`]), at which point every
//! property is set on the new object and nested templates are instantiated
//! recursively.

use jsbridge_sys::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::trace;

use crate::callback::{Arguments, CallbackBinding, NativeCallback};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{
    DataKind, Function, FunctionTemplate, JsString, Local, ObjectTemplate, Slot,
    TemplateKindMarker, Value,
};
use crate::scope::HandleScope;
use crate::value::{Persistent, set_property};

pub(crate) enum TemplateKind {
    Object,
    Function(CallbackBinding),
}

#[derive(Clone)]
enum TemplateValue {
    Value(Rc<Persistent>),
    Template(Rc<TemplateRecord>),
}

pub(crate) struct TemplateRecord {
    kind: TemplateKind,
    /// In insertion order; setting an existing name replaces its value.
    properties: RefCell<Vec<(String, TemplateValue)>>,
}

impl TemplateRecord {
    fn new(kind: TemplateKind) -> Self {
        Self {
            kind,
            properties: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn kind(&self) -> &TemplateKind {
        &self.kind
    }

    fn set(&self, name: String, value: TemplateValue) {
        let mut properties = self.properties.borrow_mut();
        let previous = match properties.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                properties.push((name, value));
                None
            }
        };
        drop(properties);
        drop(previous);
    }

    /// Whether `other` is reachable from this template's properties.
    fn reaches(&self, other: &TemplateRecord) -> bool {
        self.properties.borrow().iter().any(|(_, value)| match value {
            TemplateValue::Template(nested) => {
                std::ptr::eq(Rc::as_ptr(nested), other) || nested.reaches(other)
            }
            TemplateValue::Value(_) => false,
        })
    }

    fn len(&self) -> usize {
        self.properties.borrow().len()
    }

    /// Create a new object (or function) from this template.
    ///
    /// # Safety
    /// `ctx` must be a live context of the template's isolate.
    pub(crate) unsafe fn instantiate(&self, ctx: JSContextRef) -> BridgeResult<JSObjectRef> {
        // SAFETY: per caller contract
        let object = unsafe {
            match &self.kind {
                TemplateKind::Object => JSObjectMake(ctx, std::ptr::null_mut(), std::ptr::null_mut()),
                TemplateKind::Function(binding) => binding.instantiate(ctx),
            }
        };
        // SAFETY: object was just created in ctx
        unsafe { self.apply_to(ctx, object)? };
        Ok(object)
    }

    /// Set every property of this template on `object`.
    ///
    /// # Safety
    /// `ctx` must be a live context and `object` one of its objects.
    pub(crate) unsafe fn apply_to(&self, ctx: JSContextRef, object: JSObjectRef) -> BridgeResult<()> {
        // Snapshot: a setter may run script that edits this template.
        let properties = self.properties.borrow().clone();
        for (name, value) in &properties {
            let raw = match value {
                TemplateValue::Value(value) => value.get(),
                // SAFETY: per caller contract
                TemplateValue::Template(nested) => unsafe { nested.instantiate(ctx)? },
            };
            // SAFETY: per caller contract
            unsafe { set_property(ctx, object, name, raw)? };
        }
        trace!(target: "jsbridge::template", properties = properties.len(), "template applied");
        Ok(())
    }
}

impl HandleScope<'_> {
    /// Create an empty object template.
    pub fn object_template(&self) -> Local<'_, ObjectTemplate> {
        self.alloc(Slot::Template(Rc::new(TemplateRecord::new(
            TemplateKind::Object,
        ))))
    }

    /// Create a function template calling `callback`.
    pub fn function_template<F>(&self, callback: F) -> Local<'_, FunctionTemplate>
    where
        F: for<'a> Fn(&Arguments<'a>) -> Option<Local<'a, Value>> + Send + Sync + 'static,
    {
        self.function_template_from(Arc::new(callback))
    }

    pub fn function_template_from(&self, callback: Arc<NativeCallback>) -> Local<'_, FunctionTemplate> {
        let binding = CallbackBinding::new(callback);
        self.alloc(Slot::Template(Rc::new(TemplateRecord::new(
            TemplateKind::Function(binding),
        ))))
    }
}

impl<'s, K: TemplateKindMarker> Local<'s, K> {
    /// Add or replace the property `name`.
    ///
    /// Values are copied into the template; nested templates are shared, so
    /// later edits to them show up in later instances. A template may not
    /// contain itself.
    pub fn set<D: DataKind>(
        &self,
        scope: &HandleScope<'_>,
        name: Local<'_, JsString>,
        value: Local<'_, D>,
    ) -> BridgeResult<()> {
        let name = name.to_rust_string(scope)?;
        self.set_named(scope, &name, value)
    }

    /// [`set`](Self::set) with a Rust string name.
    pub fn set_named<D: DataKind>(
        &self,
        scope: &HandleScope<'_>,
        name: &str,
        value: Local<'_, D>,
    ) -> BridgeResult<()> {
        let record = self.template_record();
        let value = match value.slot() {
            Slot::Value(raw) => {
                let isolate = scope.isolate();
                // SAFETY: raw is a protected value of this isolate
                TemplateValue::Value(Rc::new(unsafe {
                    Persistent::new(isolate.heap_context(), *raw)
                }))
            }
            Slot::Template(nested) => {
                if Rc::ptr_eq(nested, record) || nested.reaches(record) {
                    return Err(BridgeError::TemplateCycle {
                        name: name.to_string(),
                    });
                }
                TemplateValue::Template(nested.clone())
            }
            Slot::Context(_) | Slot::Script(_) => {
                unreachable!("data kinds only wrap values and templates")
            }
        };
        record.set(name.to_string(), value);
        Ok(())
    }

    /// Number of distinct property names.
    pub fn property_count(&self) -> usize {
        self.template_record().len()
    }
}

impl<'s> Local<'s, FunctionTemplate> {
    /// Instantiate the function in the current context (or the isolate's own
    /// when none is entered).
    pub fn get_function<'a>(&self, scope: &'a HandleScope<'_>) -> BridgeResult<Local<'a, Function>> {
        let ctx = scope.isolate().allocation_context();
        // SAFETY: ctx is live for the isolate
        let function = unsafe { self.template_record().instantiate(ctx)? };
        Ok(scope.value(function))
    }
}
