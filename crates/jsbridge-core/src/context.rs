//! Execution contexts
//!
//! A context is a JSC global context in the isolate's group. Entering one
//! pushes it on the isolate's context stack; compilation and value creation
//! use the top of that stack.

use jsbridge_sys::*;
use std::ptr;
use std::rc::Rc;
use tracing::{debug, warn};

use crate::callback::{native_callback, native_function};
use crate::error::{BridgeError, BridgeResult, ScriptException};
use crate::extension::ExtensionConfiguration;
use crate::handle::{Context, Local, Object, ObjectTemplate, Slot};
use crate::isolate::{CONTEXT_CREATION_LOCK, Isolate};
use crate::scope::HandleScope;
use crate::string::JsStr;
use crate::value::{extract_exception, set_property};

pub(crate) struct ContextRecord {
    ctx: JSGlobalContextRef,
}

impl ContextRecord {
    pub(crate) fn raw(&self) -> JSContextRef {
        self.ctx
    }

    /// Evaluate bootstrap source; used for flags and extensions.
    ///
    /// # Safety
    /// The context must be live.
    unsafe fn evaluate(&self, source: &str, source_url: &str) -> Result<(), ScriptException> {
        let script = JsStr::new(source);
        let url = JsStr::new(source_url);
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: per caller contract
        unsafe {
            JSEvaluateScript(
                self.ctx,
                script.raw(),
                ptr::null_mut(),
                url.raw(),
                1,
                &mut exception,
            );
            if !exception.is_null() {
                return Err(extract_exception(self.ctx, exception));
            }
        }
        Ok(())
    }
}

impl Drop for ContextRecord {
    fn drop(&mut self) {
        // SAFETY: created (+1) in `HandleScope::context`
        unsafe { JSGlobalContextRelease(self.ctx) };
        debug!(target: "jsbridge::context", "context released");
    }
}

impl HandleScope<'_> {
    /// Create a context.
    ///
    /// The global template's properties are set on the global object, then
    /// engine flags are applied, then each named extension's source is
    /// evaluated. Fails if an extension is unknown or throws.
    pub fn context(
        &self,
        extensions: Option<&ExtensionConfiguration>,
        global_template: Option<Local<'_, ObjectTemplate>>,
    ) -> BridgeResult<Local<'_, Context>> {
        let isolate = self.isolate();
        let record = {
            let _guard = CONTEXT_CREATION_LOCK.lock();
            // SAFETY: the group is alive for the isolate's lifetime
            let ctx = unsafe { JSGlobalContextCreateInGroup(isolate.group(), ptr::null_mut()) };
            if ctx.is_null() {
                return Err(BridgeError::ContextCreation {
                    message: "JSGlobalContextCreateInGroup returned null".into(),
                });
            }
            Rc::new(ContextRecord { ctx })
        };
        let ctx = record.raw();

        if let Some(template) = global_template {
            // SAFETY: ctx was just created; the global object belongs to it
            unsafe {
                template
                    .template_record()
                    .apply_to(ctx, JSContextGetGlobalObject(ctx))?
            };
        }

        let config = isolate.config();
        if config.expose_gc {
            let gc = native_callback(|args| {
                args.isolate().collect_garbage();
                None
            });
            // SAFETY: ctx is live
            unsafe {
                let function = native_function(ctx, gc);
                set_property(ctx, JSContextGetGlobalObject(ctx), "gc", function)?;
            }
        }
        if let Some(limit) = config.stack_trace_limit {
            // SAFETY: ctx is live
            unsafe { record.evaluate(&format!("Error.stackTraceLimit = {limit};"), "<flags>")? };
        }

        if let Some(extensions) = extensions {
            for extension in extensions.resolve()? {
                // SAFETY: ctx is live
                unsafe { record.evaluate(extension.source(), &format!("extension:{}", extension.name())) }
                    .map_err(|exception| BridgeError::ExtensionFailed {
                        name: extension.name().to_string(),
                        exception,
                    })?;
                debug!(target: "jsbridge::context", extension = extension.name(), "extension installed");
            }
        }

        debug!(target: "jsbridge::context", "context created");
        Ok(self.alloc(Slot::Context(record)))
    }
}

impl<'s> Local<'s, Context> {
    /// Make this the current context.
    pub fn enter(&self, scope: &HandleScope<'_>) {
        scope.isolate().enter_context(self.context_record().clone());
    }

    /// Leave this context. It must be the current one.
    pub fn exit(&self, scope: &HandleScope<'_>) -> BridgeResult<()> {
        scope.isolate().exit_context(self.context_record())
    }

    /// The context's global object.
    pub fn global<'a>(&self, scope: &'a HandleScope<'_>) -> Local<'a, Object> {
        // SAFETY: the record keeps the context alive
        let global = unsafe { JSContextGetGlobalObject(self.context_record().raw()) };
        scope.value(global)
    }

    /// Whether both handles refer to the same context.
    pub fn same_as(&self, other: &Local<'_, Context>) -> bool {
        Rc::ptr_eq(self.context_record(), other.context_record())
    }
}

impl Isolate {
    pub(crate) fn enter_context(&self, record: Rc<ContextRecord>) {
        let mut contexts = self.contexts().borrow_mut();
        contexts.push(record);
        debug!(target: "jsbridge::context", depth = contexts.len(), "context entered");
    }

    pub(crate) fn exit_context(&self, record: &Rc<ContextRecord>) -> BridgeResult<()> {
        let mut contexts = self.contexts().borrow_mut();
        match contexts.last() {
            None => Err(BridgeError::NoActiveContext),
            Some(top) if !Rc::ptr_eq(top, record) => Err(BridgeError::ContextMismatch),
            Some(_) => {
                let exited = contexts.pop();
                debug!(target: "jsbridge::context", depth = contexts.len(), "context exited");
                drop(contexts);
                drop(exited);
                Ok(())
            }
        }
    }
}

/// Enters a context for the lifetime of the guard.
pub struct ContextScope<'i> {
    isolate: &'i Isolate,
    record: Rc<ContextRecord>,
}

impl<'i> ContextScope<'i> {
    pub fn new(scope: &HandleScope<'i>, context: Local<'_, Context>) -> Self {
        let record = context.context_record().clone();
        scope.isolate().enter_context(record.clone());
        Self {
            isolate: scope.isolate(),
            record,
        }
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.isolate.exit_context(&self.record) {
            warn!(target: "jsbridge::context", "ContextScope exit failed: {}", e);
        }
    }
}
