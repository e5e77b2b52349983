//! Script compilation and execution
//!
//! JSC has no compiled-script object in its C API, so compiling checks the
//! syntax and keeps the source; running evaluates it in the context it was
//! compiled in. Exceptions from either step are delivered through
//! [`Isolate::report_exception`](crate::Isolate) and signalled by `None`.

use jsbridge_sys::*;
use std::ptr;
use std::rc::Rc;
use tracing::{debug, trace};

use crate::context::ContextRecord;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{JsString, Local, Script, Slot, Value};
use crate::scope::HandleScope;
use crate::string::JsStr;
use crate::value::to_js_string;

pub(crate) struct ScriptRecord {
    source: JsStr,
    name: JsStr,
    context: Rc<ContextRecord>,
}

impl HandleScope<'_> {
    /// Compile `source` against the current context.
    ///
    /// Returns `Ok(None)` on a syntax error, which is reported like any
    /// exception. Fails only when no context is entered.
    pub fn compile(&self, source: Local<'_, JsString>) -> BridgeResult<Option<Local<'_, Script>>> {
        let name = self.isolate().config().script_name;
        self.compile_with_name(source, &name)
    }

    /// [`compile`](Self::compile) with an explicit source name.
    pub fn compile_with_name(
        &self,
        source: Local<'_, JsString>,
        name: &str,
    ) -> BridgeResult<Option<Local<'_, Script>>> {
        let isolate = self.isolate();
        let context = isolate
            .current_context()
            .ok_or(BridgeError::NoActiveContext)?;
        let ctx = context.raw();
        // SAFETY: the slot holds a protected string
        let source = unsafe { to_js_string(ctx, source.raw_value())? };
        let name = JsStr::new(name);

        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: ctx is live; strings are valid
        let valid = unsafe { JSCheckScriptSyntax(ctx, source.raw(), name.raw(), 1, &mut exception) };
        if !valid {
            debug!(target: "jsbridge::script", name = %name.to_string_lossy(), "compile failed");
            if !exception.is_null() {
                isolate.report_exception(ctx, exception);
            }
            return Ok(None);
        }

        trace!(target: "jsbridge::script", source_len = source.len(), "script compiled");
        Ok(Some(self.alloc(Slot::Script(Rc::new(ScriptRecord {
            source,
            name,
            context,
        })))))
    }
}

impl<'s> Local<'s, Script> {
    /// Run the script in the context it was compiled in.
    ///
    /// Returns the completion value (`undefined` included), or `None` if the
    /// script threw.
    pub fn run<'a>(&self, scope: &'a HandleScope<'_>) -> Option<Local<'a, Value>> {
        let record = self.script_record();
        let isolate = scope.isolate();
        let ctx = record.context.raw();

        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: the record keeps the context and strings alive
        let result = unsafe {
            JSEvaluateScript(
                ctx,
                record.source.raw(),
                ptr::null_mut(),
                record.name.raw(),
                1,
                &mut exception,
            )
        };
        let fired = jsbridge_sys::host_timer::run_due_timers();
        if fired > 0 {
            trace!(target: "jsbridge::script", fired, "host timers fired");
        }

        if !exception.is_null() {
            isolate.report_exception(ctx, exception);
            return None;
        }
        if result.is_null() {
            return Some(scope.undefined());
        }
        Some(scope.value(result))
    }
}
