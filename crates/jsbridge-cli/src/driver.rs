//! Run one source string with `print` and `debug_print` installed.

use anyhow::{Result, bail};
use jsbridge_capi::*;
use std::borrow::Cow;
use std::ffi::{CStr, c_int};
use std::io::{self, Write};
use tracing::debug;

/// Convert any value to text, as `String(value)`.
///
/// # Safety
/// Must run on the thread that owns `value`'s scope.
unsafe fn value_text(value: JsbHandle) -> String {
    // SAFETY: the buffer is freed below and not used afterwards
    unsafe {
        let utf8 = jsb_string_utf8_value_new(value);
        let chars = jsb_string_utf8_value_chars(utf8);
        let text = if chars.is_null() {
            Cow::Borrowed("")
        } else {
            CStr::from_ptr(chars).to_string_lossy()
        }
        .into_owned();
        jsb_string_utf8_value_free(utf8);
        text
    }
}

/// # Safety
/// `args` must be the pointer handed to a running callback.
unsafe fn argument_texts(args: *const JsbArguments) -> Vec<String> {
    // SAFETY: per caller contract
    unsafe {
        let length: c_int = jsb_arguments_length(args);
        (0..length)
            .map(|i| value_text(jsb_arguments_get(args, i)))
            .collect()
    }
}

/// `print(...)`: arguments joined by one space, then a newline.
unsafe extern "C" fn print_cb(args: *const JsbArguments) -> JsbHandle {
    // SAFETY: called by the bridge with its own arguments
    let texts = unsafe { argument_texts(args) };
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{}", texts.join(" "));
    JsbHandle::EMPTY
}

/// `debug_print(...)`: the argument count, then one indexed line each.
unsafe extern "C" fn debug_print_cb(args: *const JsbArguments) -> JsbHandle {
    // SAFETY: called by the bridge with its own arguments
    let texts = unsafe { argument_texts(args) };
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "debug_print called with {} args", texts.len());
    for (i, text) in texts.iter().enumerate() {
        let _ = writeln!(out, "{i}: {text}");
    }
    JsbHandle::EMPTY
}

/// Print the caught exception to stdout.
///
/// # Safety
/// `try_catch` must be live.
unsafe fn report_exception(try_catch: *const JsbTryCatch) {
    // SAFETY: the scope is closed before returning
    unsafe {
        let scope = jsb_handle_scope_new();
        let message = value_text(jsb_try_catch_get_message(try_catch));
        debug!(target: "jsbridge::cli", %message, "script threw");
        let exception = value_text(jsb_try_catch_exception(try_catch));
        println!("{exception}");
        jsb_handle_scope_free(scope);
    }
}

/// # Safety
/// Needs an open handle scope.
unsafe fn name(text: &CStr) -> JsbHandle {
    // SAFETY: text is NUL-terminated
    unsafe { jsb_string_new_utf8(text.as_ptr(), -1) }
}

/// Run `source` in a fresh context. Script exceptions are printed, not
/// returned; only a bridge failure is an error.
pub fn run(source: &str) -> Result<()> {
    let length = c_int::try_from(source.len())?;

    // SAFETY: every handle is used while `scope` is open, and everything
    // created here is freed before returning.
    unsafe {
        let scope = jsb_handle_scope_new();
        if scope.is_null() {
            bail!("failed to initialize the JavaScript engine");
        }

        let print = jsb_function_template_new(Some(print_cb));
        let debug_print = jsb_function_template_new(Some(debug_print_cb));
        let global = jsb_object_template_new();
        jsb_template_set(global, name(c"debug_print"), debug_print);
        jsb_template_set(global, name(c"print"), print);

        let context = jsb_context_new(std::ptr::null(), global);
        if jsb_handle_is_empty(context) {
            jsb_handle_scope_free(scope);
            bail!("failed to create a context");
        }
        jsb_context_enter(context);

        debug!(target: "jsbridge::cli", bytes = source.len(), "running script");
        let try_catch = jsb_try_catch_new();
        let code = jsb_string_new_utf8(source.as_ptr().cast(), length);
        let script = jsb_script_compile(code);
        if jsb_handle_is_empty(script) {
            report_exception(try_catch);
        } else {
            let result = jsb_script_run(script);
            if jsb_handle_is_empty(result) {
                report_exception(try_catch);
            }
        }
        jsb_try_catch_free(try_catch);
        debug!(target: "jsbridge::cli", "script finished");

        jsb_context_exit(context);
        jsb_handle_scope_free(scope);
    }

    io::stdout().flush()?;
    Ok(())
}
