//! C API for jsbridge
//!
//! A flat `extern "C"` surface over `jsbridge-core`, declared in
//! `include/jsbridge.h`. The API follows these principles:
//! - Every VM entity crosses the boundary as a one-word [`JsbHandle`]; an
//!   operation that fails returns the empty handle.
//! - Handles land in the innermost open handle scope of the calling thread.
//! - Each thread gets its own isolate, created on first use and never torn
//!   down.
//! - Misuse the bridge can detect (wrong handle kind, stale handle, no open
//!   scope, unbalanced context exit) is logged with `tracing` and yields an
//!   empty result instead of undefined behavior.

use jsbridge_core::{
    BridgeResult, Context, Data, EngineConfig, Extension, ExtensionConfiguration, Handle,
    HandleScope, Isolate, JsString, ObjectTemplate, Script, Template, TryCatch,
    Utf8Value, Value, register_extension,
};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::cell::OnceCell;
use std::ffi::{CStr, c_char, c_int};
use std::ptr;
use std::sync::LazyLock;
use tracing::{debug, error, warn};

pub use jsbridge_core::Handle as JsbHandle;

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque handle scope, created by `jsb_handle_scope_new()`
#[repr(C)]
pub struct JsbHandleScope {
    _private: [u8; 0],
}

/// Opaque view of a native call's arguments
#[repr(C)]
pub struct JsbArguments {
    _private: [u8; 0],
}

/// Opaque exception capture record, created by `jsb_try_catch_new()`
#[repr(C)]
pub struct JsbTryCatch {
    _private: [u8; 0],
}

/// Opaque UTF-8 rendering of a value, created by `jsb_string_utf8_value_new()`
#[repr(C)]
pub struct JsbUtf8Value {
    _private: [u8; 0],
}

/// Opaque list of extension names, created by `jsb_extension_configuration_new()`
#[repr(C)]
pub struct JsbExtensionConfiguration {
    _private: [u8; 0],
}

/// Native function called from script.
///
/// The returned handle becomes the call's result; the empty handle means
/// `undefined`.
pub type JsbFunctionCallback = unsafe extern "C" fn(args: *const JsbArguments) -> JsbHandle;

// ============================================================================
// Per-thread isolate
// ============================================================================

/// Flags applied to isolates created after they are set.
static FLAGS: LazyLock<Mutex<EngineConfig>> = LazyLock::new(|| Mutex::new(EngineConfig::default()));

thread_local! {
    static ISOLATE: OnceCell<&'static Isolate> = const { OnceCell::new() };
}

/// The calling thread's isolate, created on first use.
fn isolate() -> Option<&'static Isolate> {
    ISOLATE.with(|cell| {
        if let Some(isolate) = cell.get() {
            return Some(*isolate);
        }
        let config = FLAGS.lock().clone();
        match Isolate::with_config(config) {
            Ok(isolate) => {
                let isolate: &'static Isolate = Box::leak(Box::new(isolate));
                debug!(target: "jsbridge::capi", "thread isolate created");
                Some(*cell.get_or_init(|| isolate))
            }
            Err(e) => {
                error!(target: "jsbridge::capi", "failed to create isolate: {}", e);
                None
            }
        }
    })
}

fn existing_isolate() -> Option<&'static Isolate> {
    ISOLATE.with(|cell| cell.get().copied())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Run `f` against the innermost open scope, logging any failure and
/// returning `default` instead.
fn with_scope_or<T>(
    operation: &'static str,
    default: T,
    f: impl FnOnce(&HandleScope<'static>) -> BridgeResult<T>,
) -> T {
    let Some(isolate) = isolate() else {
        return default;
    };
    let result = HandleScope::current(isolate).and_then(|scope| f(&scope));
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(target: "jsbridge::capi", operation, "{}", e);
            default
        }
    }
}

fn with_scope(
    operation: &'static str,
    f: impl FnOnce(&HandleScope<'static>) -> BridgeResult<Handle>,
) -> Handle {
    with_scope_or(operation, Handle::EMPTY, f)
}

/// Borrow a C string, replacing invalid UTF-8.
///
/// # Safety
/// `s` must be null or a valid NUL-terminated string.
unsafe fn c_string<'a>(s: *const c_char) -> Option<Cow<'a, str>> {
    if s.is_null() {
        return None;
    }
    // SAFETY: per caller contract
    Some(unsafe { CStr::from_ptr(s) }.to_string_lossy())
}

/// # Safety
/// `args` must be the pointer handed to a running callback.
unsafe fn arguments<'a>(args: *const JsbArguments) -> Option<&'a jsbridge_core::Arguments<'a>> {
    // SAFETY: the trampoline passes a pointer to its live `Arguments`
    unsafe { args.cast::<jsbridge_core::Arguments<'a>>().as_ref() }
}

fn to_c_int(n: usize) -> c_int {
    c_int::try_from(n).unwrap_or(c_int::MAX)
}

// ============================================================================
// Flags
// ============================================================================

/// Apply engine flags from a program's command line.
///
/// Recognized flags (`--expose-gc`, `--stack-trace-limit=<n>`,
/// `--script-name=<name>` and their `--no-` forms) configure every isolate
/// created afterwards, and the calling thread's isolate if it exists. With
/// `remove_flags`, consumed flags are removed from `argv`, `*argc` is
/// updated and `argv[*argc]` is set to NULL. Unknown flags stay in place.
///
/// # Safety
/// `argc` must point to the number of entries in `argv`, each a valid
/// NUL-terminated string.
///
/// # Example (C)
/// ```c
/// int main(int argc, char** argv) {
///     jsb_set_flags_from_command_line(&argc, argv, true);
///     // argv now holds only the program's own arguments
/// }
/// ```
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_set_flags_from_command_line(
    argc: *mut c_int,
    argv: *mut *mut c_char,
    remove_flags: bool,
) {
    if argc.is_null() || argv.is_null() {
        warn!(target: "jsbridge::capi", "jsb_set_flags_from_command_line: null argc or argv");
        return;
    }
    // SAFETY: per caller contract
    let count = usize::try_from(unsafe { *argc }).unwrap_or(0);
    let args: Vec<String> = (0..count)
        .map(|i| {
            // SAFETY: i < argc
            let arg = unsafe { *argv.add(i) };
            // SAFETY: argv entries are valid C strings
            unsafe { c_string(arg) }.map(Cow::into_owned).unwrap_or_default()
        })
        .collect();

    let (consumed, config) = {
        let mut flags = FLAGS.lock();
        let consumed = flags.apply_command_line(args.as_slice());
        (consumed, flags.clone())
    };
    debug!(target: "jsbridge::capi", consumed = consumed.len(), "engine flags applied");
    if let Some(isolate) = existing_isolate() {
        isolate.set_config(config);
    }

    if remove_flags && !consumed.is_empty() {
        let mut kept = 0;
        for index in 0..count {
            if consumed.binary_search(&index).is_ok() {
                continue;
            }
            // SAFETY: kept <= index < argc
            unsafe { *argv.add(kept) = *argv.add(index) };
            kept += 1;
        }
        // SAFETY: kept < argc because at least one entry was consumed
        unsafe {
            *argv.add(kept) = ptr::null_mut();
            *argc = to_c_int(kept);
        }
    }
}

// ============================================================================
// HandleScope
// ============================================================================

/// Open a handle scope. Handles created until it is freed belong to it.
///
/// Returns NULL if the thread's isolate cannot be created.
///
/// # Safety
/// The scope must be freed with `jsb_handle_scope_free()` on this thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_handle_scope_new() -> *mut JsbHandleScope {
    match isolate() {
        Some(isolate) => Box::into_raw(Box::new(HandleScope::new(isolate))).cast(),
        None => ptr::null_mut(),
    }
}

/// Close a handle scope, releasing every handle it owns.
///
/// Closing a scope while scopes opened after it are still open is allowed;
/// its handles are released once those close too.
///
/// # Safety
/// `scope` must be NULL or come from `jsb_handle_scope_new()` on this thread,
/// and must not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_handle_scope_free(scope: *mut JsbHandleScope) {
    if scope.is_null() {
        return;
    }
    // SAFETY: per caller contract
    drop(unsafe { Box::from_raw(scope.cast::<HandleScope<'static>>()) });
}

// ============================================================================
// Values
// ============================================================================

/// Create a string from UTF-8 bytes.
///
/// `length` is the byte count, or -1 when `data` is NUL-terminated. Invalid
/// UTF-8 is replaced with U+FFFD; embedded NULs are kept when `length` is
/// given.
///
/// # Safety
/// `data` must point to `length` readable bytes, or to a NUL-terminated
/// string when `length` is negative.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_string_new_utf8(data: *const c_char, length: c_int) -> JsbHandle {
    if data.is_null() {
        warn!(target: "jsbridge::capi", "jsb_string_new_utf8: null data");
        return Handle::EMPTY;
    }
    let bytes: &[u8] = match usize::try_from(length) {
        // SAFETY: per caller contract
        Ok(length) => unsafe { std::slice::from_raw_parts(data.cast::<u8>(), length) },
        // SAFETY: per caller contract
        Err(_) => unsafe { CStr::from_ptr(data) }.to_bytes(),
    };
    with_scope("string_new_utf8", |scope| {
        Ok(scope.string_from_utf8(bytes).into_handle())
    })
}

/// Length of a string in UTF-16 code units, or -1 if `string` is not a
/// live string handle.
#[unsafe(no_mangle)]
pub extern "C" fn jsb_string_length(string: JsbHandle) -> c_int {
    with_scope_or("string_length", -1, |scope| {
        let string = scope.local::<JsString>(string)?;
        Ok(to_c_int(string.length(scope)))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsb_undefined() -> JsbHandle {
    with_scope("undefined", |scope| Ok(scope.undefined().into_handle()))
}

#[unsafe(no_mangle)]
pub extern "C" fn jsb_null() -> JsbHandle {
    with_scope("null", |scope| Ok(scope.null().into_handle()))
}

#[unsafe(no_mangle)]
pub extern "C" fn jsb_true() -> JsbHandle {
    with_scope("true", |scope| Ok(scope.boolean(true).into_handle()))
}

#[unsafe(no_mangle)]
pub extern "C" fn jsb_false() -> JsbHandle {
    with_scope("false", |scope| Ok(scope.boolean(false).into_handle()))
}

/// Whether `handle` is the empty handle.
#[unsafe(no_mangle)]
pub extern "C" fn jsb_handle_is_empty(handle: JsbHandle) -> bool {
    handle.is_empty()
}

// ============================================================================
// Templates
// ============================================================================

/// Create a function template calling `callback`.
///
/// # Safety
/// `callback` must be safe to call on this thread for as long as functions
/// created from the template are reachable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_function_template_new(
    callback: Option<JsbFunctionCallback>,
) -> JsbHandle {
    let Some(callback) = callback else {
        warn!(target: "jsbridge::capi", "jsb_function_template_new: null callback");
        return Handle::EMPTY;
    };
    with_scope("function_template_new", |scope| {
        let template = scope.function_template(move |args| {
            let raw = ptr::from_ref(args).cast::<JsbArguments>();
            // SAFETY: `raw` is valid for the duration of the call
            let handle = unsafe { callback(raw) };
            if handle.is_empty() {
                return None;
            }
            match args.scope().local::<Value>(handle) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(target: "jsbridge::capi", "callback returned an unusable handle: {}", e);
                    None
                }
            }
        });
        Ok(template.into_handle())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsb_object_template_new() -> JsbHandle {
    with_scope("object_template_new", |scope| {
        Ok(scope.object_template().into_handle())
    })
}

/// Set `name` (a string) to `value` (a value or a template) on `template`.
#[unsafe(no_mangle)]
pub extern "C" fn jsb_template_set(template: JsbHandle, name: JsbHandle, value: JsbHandle) {
    with_scope_or("template_set", (), |scope| {
        let template = scope.local::<Template>(template)?;
        let name = scope.local::<JsString>(name)?;
        let value = scope.local::<Data>(value)?;
        template.set(scope, name, value)
    })
}

// ============================================================================
// Contexts and scripts
// ============================================================================

/// Create a context from an optional extension configuration and an
/// optional (empty handle) global object template.
///
/// # Safety
/// `extensions` must be NULL or a live configuration.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_context_new(
    extensions: *const JsbExtensionConfiguration,
    global_template: JsbHandle,
) -> JsbHandle {
    // SAFETY: per caller contract
    let extensions = unsafe { extensions.cast::<ExtensionConfiguration>().as_ref() };
    with_scope("context_new", |scope| {
        let global = if global_template.is_empty() {
            None
        } else {
            Some(scope.local::<ObjectTemplate>(global_template)?)
        };
        Ok(scope.context(extensions, global)?.into_handle())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsb_context_enter(context: JsbHandle) {
    with_scope_or("context_enter", (), |scope| {
        scope.local::<Context>(context)?.enter(scope);
        Ok(())
    })
}

/// Leave `context`, which must be the most recently entered one.
#[unsafe(no_mangle)]
pub extern "C" fn jsb_context_exit(context: JsbHandle) {
    with_scope_or("context_exit", (), |scope| {
        scope.local::<Context>(context)?.exit(scope)
    })
}

/// Compile `source` in the current context. Empty on a syntax error.
#[unsafe(no_mangle)]
pub extern "C" fn jsb_script_compile(source: JsbHandle) -> JsbHandle {
    with_scope("script_compile", |scope| {
        let source = scope.local::<JsString>(source)?;
        Ok(scope
            .compile(source)?
            .map_or(Handle::EMPTY, |script| script.into_handle()))
    })
}

/// Run a compiled script. Empty if it threw.
#[unsafe(no_mangle)]
pub extern "C" fn jsb_script_run(script: JsbHandle) -> JsbHandle {
    with_scope("script_run", |scope| {
        let script = scope.local::<Script>(script)?;
        Ok(script
            .run(scope)
            .map_or(Handle::EMPTY, |result| result.into_handle()))
    })
}

// ============================================================================
// Arguments
// ============================================================================

/// Number of arguments passed to the running callback.
///
/// # Safety
/// `args` must be the pointer handed to the running callback.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_arguments_length(args: *const JsbArguments) -> c_int {
    // SAFETY: per caller contract
    match unsafe { arguments(args) } {
        Some(args) => to_c_int(args.len()),
        None => 0,
    }
}

/// The `index`-th argument; `undefined` when out of range.
///
/// # Safety
/// `args` must be the pointer handed to the running callback.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_arguments_get(args: *const JsbArguments, index: c_int) -> JsbHandle {
    // SAFETY: per caller contract
    let Some(args) = (unsafe { arguments(args) }) else {
        warn!(target: "jsbridge::capi", "jsb_arguments_get: null arguments");
        return Handle::EMPTY;
    };
    match usize::try_from(index) {
        Ok(index) => args.get(index).into_handle(),
        Err(_) => args.scope().undefined().into_handle(),
    }
}

/// The receiver of the running call.
///
/// # Safety
/// `args` must be the pointer handed to the running callback.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_arguments_this(args: *const JsbArguments) -> JsbHandle {
    // SAFETY: per caller contract
    match unsafe { arguments(args) } {
        Some(args) => args.this().into_handle(),
        None => Handle::EMPTY,
    }
}

// ============================================================================
// Utf8Value
// ============================================================================

/// Convert any value to a NUL-terminated UTF-8 buffer (JS `String(value)`).
///
/// Never returns NULL. An empty or stale handle yields an empty buffer.
///
/// # Safety
/// The result must be freed with `jsb_string_utf8_value_free()`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_string_utf8_value_new(value: JsbHandle) -> *mut JsbUtf8Value {
    let utf8 = with_scope_or("string_utf8_value_new", Utf8Value::empty(), |scope| {
        let value = scope.local::<Value>(value)?;
        Ok(Utf8Value::new(scope, value))
    });
    Box::into_raw(Box::new(utf8)).cast()
}

/// Byte length, excluding the terminator.
///
/// # Safety
/// `utf8` must be NULL or a live buffer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_string_utf8_value_length(utf8: *const JsbUtf8Value) -> c_int {
    // SAFETY: per caller contract
    match unsafe { utf8.cast::<Utf8Value>().as_ref() } {
        Some(utf8) => to_c_int(utf8.len()),
        None => 0,
    }
}

/// The NUL-terminated bytes, valid until the buffer is freed.
///
/// # Safety
/// `utf8` must be NULL or a live buffer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_string_utf8_value_chars(utf8: *const JsbUtf8Value) -> *const c_char {
    // SAFETY: per caller contract
    match unsafe { utf8.cast::<Utf8Value>().as_ref() } {
        Some(utf8) => utf8.as_ptr(),
        None => ptr::null(),
    }
}

/// # Safety
/// `utf8` must be NULL or come from `jsb_string_utf8_value_new()`, and must
/// not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_string_utf8_value_free(utf8: *mut JsbUtf8Value) {
    if utf8.is_null() {
        return;
    }
    // SAFETY: per caller contract
    drop(unsafe { Box::from_raw(utf8.cast::<Utf8Value>()) });
}

// ============================================================================
// TryCatch
// ============================================================================

/// Start capturing exceptions. The newest live `TryCatch` wins.
///
/// # Safety
/// The result must be freed with `jsb_try_catch_free()` on this thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_try_catch_new() -> *mut JsbTryCatch {
    match isolate() {
        Some(isolate) => Box::into_raw(Box::new(TryCatch::new(isolate))).cast(),
        None => ptr::null_mut(),
    }
}

/// # Safety
/// `try_catch` must be NULL or come from `jsb_try_catch_new()` on this
/// thread, and must not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_try_catch_free(try_catch: *mut JsbTryCatch) {
    if try_catch.is_null() {
        return;
    }
    // SAFETY: per caller contract
    drop(unsafe { Box::from_raw(try_catch.cast::<TryCatch<'static>>()) });
}

/// # Safety
/// `try_catch` must be NULL or live.
unsafe fn try_catch<'a>(try_catch: *const JsbTryCatch) -> Option<&'a TryCatch<'static>> {
    // SAFETY: per caller contract
    unsafe { try_catch.cast::<TryCatch<'static>>().as_ref() }
}

/// # Safety
/// `try_catch` must be NULL or live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_try_catch_has_caught(try_catch: *const JsbTryCatch) -> bool {
    // SAFETY: per caller contract
    unsafe { self::try_catch(try_catch) }.is_some_and(TryCatch::has_caught)
}

/// The caught value, or the empty handle.
///
/// # Safety
/// `try_catch` must be NULL or live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_try_catch_exception(try_catch: *const JsbTryCatch) -> JsbHandle {
    // SAFETY: per caller contract
    let Some(try_catch) = (unsafe { self::try_catch(try_catch) }) else {
        return Handle::EMPTY;
    };
    with_scope("try_catch_exception", |scope| {
        Ok(try_catch
            .exception(scope)
            .map_or(Handle::EMPTY, |exception| exception.into_handle()))
    })
}

/// The caught exception as a `"<file>:<line>: <Type>: <message>"` string, or
/// the empty handle.
///
/// # Safety
/// `try_catch` must be NULL or live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_try_catch_get_message(try_catch: *const JsbTryCatch) -> JsbHandle {
    // SAFETY: per caller contract
    let Some(try_catch) = (unsafe { self::try_catch(try_catch) }) else {
        return Handle::EMPTY;
    };
    with_scope("try_catch_get_message", |scope| {
        Ok(try_catch
            .message(scope)
            .map_or(Handle::EMPTY, |message| message.into_handle()))
    })
}

/// # Safety
/// `try_catch` must be NULL or live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_try_catch_reset(try_catch: *mut JsbTryCatch) {
    // SAFETY: per caller contract
    if let Some(try_catch) = unsafe { self::try_catch(try_catch) } {
        try_catch.reset();
    }
}

/// # Safety
/// `try_catch` must be NULL or live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_try_catch_set_verbose(try_catch: *mut JsbTryCatch, verbose: bool) {
    // SAFETY: per caller contract
    if let Some(try_catch) = unsafe { self::try_catch(try_catch) } {
        try_catch.set_verbose(verbose);
    }
}

/// Raise `value` as a JS exception from inside a callback.
#[unsafe(no_mangle)]
pub extern "C" fn jsb_throw_exception(value: JsbHandle) {
    with_scope_or("throw_exception", (), |scope| {
        let value = scope.local::<Value>(value)?;
        scope.isolate().throw_exception(value);
        Ok(())
    })
}

// ============================================================================
// Extensions
// ============================================================================

/// Register JavaScript source under `name` for the whole process.
///
/// Returns false if either string is NULL or the name is taken.
///
/// # Safety
/// `name` and `source` must be NULL or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_register_extension(name: *const c_char, source: *const c_char) -> bool {
    // SAFETY: per caller contract
    let (Some(name), Some(source)) = (unsafe { c_string(name) }, unsafe { c_string(source) }) else {
        warn!(target: "jsbridge::capi", "jsb_register_extension: null name or source");
        return false;
    };
    match register_extension(Extension::new(name, source)) {
        Ok(()) => true,
        Err(e) => {
            warn!(target: "jsbridge::capi", "{}", e);
            false
        }
    }
}

/// Name the extensions a context should install.
///
/// # Safety
/// `names` must point to `count` valid NUL-terminated strings (or be NULL
/// when `count` is 0). The result must be freed with
/// `jsb_extension_configuration_free()`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_extension_configuration_new(
    names: *const *const c_char,
    count: c_int,
) -> *mut JsbExtensionConfiguration {
    let count = usize::try_from(count).unwrap_or(0);
    let names: Vec<String> = if names.is_null() {
        Vec::new()
    } else {
        (0..count)
            // SAFETY: per caller contract
            .filter_map(|i| unsafe { c_string(*names.add(i)) })
            .map(Cow::into_owned)
            .collect()
    };
    Box::into_raw(Box::new(ExtensionConfiguration::new(names))).cast()
}

/// # Safety
/// `configuration` must be NULL or come from
/// `jsb_extension_configuration_new()`, and must not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsb_extension_configuration_free(
    configuration: *mut JsbExtensionConfiguration,
) {
    if configuration.is_null() {
        return;
    }
    // SAFETY: per caller contract
    drop(unsafe { Box::from_raw(configuration.cast::<ExtensionConfiguration>()) });
}
