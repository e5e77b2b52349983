//! The C surface driven the way a C embedder would.

use jsbridge_capi::*;
use serial_test::serial;
use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr;

thread_local! {
    static OUTPUT: RefCell<String> = const { RefCell::new(String::new()) };
}

fn take_output() -> String {
    OUTPUT.with(|out| std::mem::take(&mut *out.borrow_mut()))
}

unsafe fn to_string(handle: JsbHandle) -> String {
    unsafe {
        let utf8 = jsb_string_utf8_value_new(handle);
        let text = CStr::from_ptr(jsb_string_utf8_value_chars(utf8))
            .to_string_lossy()
            .into_owned();
        jsb_string_utf8_value_free(utf8);
        text
    }
}

unsafe fn string(s: &str) -> JsbHandle {
    let c = CString::new(s).unwrap();
    unsafe { jsb_string_new_utf8(c.as_ptr(), -1) }
}

unsafe extern "C" fn print_cb(args: *const JsbArguments) -> JsbHandle {
    unsafe {
        let length = jsb_arguments_length(args);
        let mut line = Vec::new();
        for i in 0..length {
            line.push(to_string(jsb_arguments_get(args, i)));
        }
        OUTPUT.with(|out| {
            let mut out = out.borrow_mut();
            out.push_str(&line.join(" "));
            out.push('\n');
        });
    }
    JsbHandle::EMPTY
}

unsafe extern "C" fn count_cb(args: *const JsbArguments) -> JsbHandle {
    unsafe {
        let length = jsb_arguments_length(args);
        let beyond = jsb_arguments_get(args, length);
        let text = format!("{length}:{}", to_string(beyond));
        string(&text)
    }
}

unsafe extern "C" fn throw_cb(_args: *const JsbArguments) -> JsbHandle {
    unsafe { jsb_throw_exception(string("thrown from C")) };
    JsbHandle::EMPTY
}

/// Globals `print`, `count` and `fail`, in a new entered context.
unsafe fn enter_context() -> JsbHandle {
    unsafe {
        let global = jsb_object_template_new();
        jsb_template_set(global, string("print"), jsb_function_template_new(Some(print_cb)));
        jsb_template_set(global, string("count"), jsb_function_template_new(Some(count_cb)));
        jsb_template_set(global, string("fail"), jsb_function_template_new(Some(throw_cb)));
        let context = jsb_context_new(ptr::null(), global);
        assert!(!jsb_handle_is_empty(context));
        jsb_context_enter(context);
        context
    }
}

unsafe fn run(source: &str) -> JsbHandle {
    unsafe {
        let script = jsb_script_compile(string(source));
        if jsb_handle_is_empty(script) {
            return JsbHandle::EMPTY;
        }
        jsb_script_run(script)
    }
}

#[test]
fn test_print_joins_arguments() {
    unsafe {
        let scope = jsb_handle_scope_new();
        let context = enter_context();

        take_output();
        let result = run("print('a', 'b'); print(1 + 1)");
        assert!(!jsb_handle_is_empty(result));
        assert_eq!(take_output(), "a b\n2\n");

        jsb_context_exit(context);
        jsb_handle_scope_free(scope);
    }
}

#[test]
fn test_arguments_length_and_overflow() {
    unsafe {
        let scope = jsb_handle_scope_new();
        let context = enter_context();

        assert_eq!(to_string(run("count(1, 2, 3)")), "3:undefined");
        assert_eq!(to_string(run("count()")), "0:undefined");

        jsb_context_exit(context);
        jsb_handle_scope_free(scope);
    }
}

#[test]
fn test_syntax_error_and_reset() {
    unsafe {
        let scope = jsb_handle_scope_new();
        let context = enter_context();

        let try_catch = jsb_try_catch_new();
        let script = jsb_script_compile(string("syntax error("));
        assert!(jsb_handle_is_empty(script));
        assert!(jsb_try_catch_has_caught(try_catch));
        let message = jsb_try_catch_get_message(try_catch);
        assert!(!jsb_handle_is_empty(message));
        assert!(!to_string(message).is_empty());
        assert!(!jsb_handle_is_empty(jsb_try_catch_exception(try_catch)));

        jsb_try_catch_reset(try_catch);
        assert!(!jsb_try_catch_has_caught(try_catch));
        assert!(jsb_handle_is_empty(jsb_try_catch_exception(try_catch)));
        jsb_try_catch_free(try_catch);

        jsb_context_exit(context);
        jsb_handle_scope_free(scope);
    }
}

#[test]
fn test_runtime_exception_message() {
    unsafe {
        let scope = jsb_handle_scope_new();
        let context = enter_context();

        let try_catch = jsb_try_catch_new();
        assert!(jsb_handle_is_empty(run("throw new Error('x')")));
        assert!(jsb_try_catch_has_caught(try_catch));
        let message = to_string(jsb_try_catch_get_message(try_catch));
        assert!(message.ends_with("Error: x"), "unexpected message: {message}");
        jsb_try_catch_free(try_catch);

        jsb_context_exit(context);
        jsb_handle_scope_free(scope);
    }
}

#[test]
fn test_exception_thrown_by_callback() {
    unsafe {
        let scope = jsb_handle_scope_new();
        let context = enter_context();

        let try_catch = jsb_try_catch_new();
        assert!(jsb_handle_is_empty(run("fail()")));
        assert_eq!(to_string(jsb_try_catch_exception(try_catch)), "thrown from C");
        jsb_try_catch_reset(try_catch);

        assert_eq!(
            to_string(run("try { fail() } catch (e) { 'handled: ' + e }")),
            "handled: thrown from C"
        );
        assert!(!jsb_try_catch_has_caught(try_catch));
        jsb_try_catch_free(try_catch);

        jsb_context_exit(context);
        jsb_handle_scope_free(scope);
    }
}

#[test]
fn test_constants_are_not_empty() {
    unsafe {
        let scope = jsb_handle_scope_new();
        assert!(!jsb_handle_is_empty(jsb_undefined()));
        assert!(!jsb_handle_is_empty(jsb_null()));
        assert_eq!(to_string(jsb_true()), "true");
        assert_eq!(to_string(jsb_false()), "false");
        assert_eq!(to_string(jsb_null()), "null");
        jsb_handle_scope_free(scope);
    }
}

#[test]
fn test_undefined_completion_is_not_empty() {
    unsafe {
        let scope = jsb_handle_scope_new();
        let context = enter_context();

        let result = run("var unused = 1;");
        assert!(!jsb_handle_is_empty(result));
        assert_eq!(to_string(result), "undefined");

        jsb_context_exit(context);
        jsb_handle_scope_free(scope);
    }
}

#[test]
fn test_utf8_round_trip_with_nul() {
    unsafe {
        let scope = jsb_handle_scope_new();
        let bytes = b"caf\xc3\xa9\0tail";
        let handle = jsb_string_new_utf8(bytes.as_ptr().cast::<c_char>(), bytes.len() as c_int);
        assert_eq!(jsb_string_length(handle), 9);

        let utf8 = jsb_string_utf8_value_new(handle);
        let length = jsb_string_utf8_value_length(utf8) as usize;
        assert_eq!(length, bytes.len());
        let chars = std::slice::from_raw_parts(jsb_string_utf8_value_chars(utf8).cast::<u8>(), length + 1);
        assert_eq!(&chars[..length], bytes);
        assert_eq!(chars[length], 0);
        jsb_string_utf8_value_free(utf8);

        jsb_handle_scope_free(scope);
    }
}

#[test]
fn test_handles_die_with_their_scope() {
    unsafe {
        let outer = jsb_handle_scope_new();
        let inner = jsb_handle_scope_new();
        let text = string("short-lived");
        jsb_handle_scope_free(inner);

        assert_eq!(jsb_string_length(text), -1);
        let utf8 = jsb_string_utf8_value_new(text);
        assert_eq!(jsb_string_utf8_value_length(utf8), 0);
        jsb_string_utf8_value_free(utf8);
        jsb_handle_scope_free(outer);
    }
}

#[test]
fn test_out_of_order_scope_free() {
    unsafe {
        let outer = jsb_handle_scope_new();
        let inner = jsb_handle_scope_new();
        let kept = string("inner");
        jsb_handle_scope_free(outer);

        // The inner scope is still open and its handles still work.
        assert_eq!(to_string(kept), "inner");
        jsb_handle_scope_free(inner);

        assert!(jsb_handle_is_empty(jsb_undefined()));
    }
}

#[test]
fn test_wrong_kind_yields_empty() {
    unsafe {
        let scope = jsb_handle_scope_new();
        let context = enter_context();

        // A template is not a string source, and a string is not a script.
        let template = jsb_object_template_new();
        assert!(jsb_handle_is_empty(jsb_script_compile(template)));
        assert!(jsb_handle_is_empty(jsb_script_run(string("1"))));
        assert!(jsb_handle_is_empty(jsb_context_new(ptr::null(), string("global"))));

        // Exiting a context that is not current is ignored.
        let other = jsb_context_new(ptr::null(), JsbHandle::EMPTY);
        jsb_context_exit(other);
        assert_eq!(to_string(run("typeof print")), "function");

        jsb_context_exit(context);
        jsb_handle_scope_free(scope);
    }
}

#[test]
fn test_nested_templates() {
    unsafe {
        let scope = jsb_handle_scope_new();
        let console = jsb_object_template_new();
        jsb_template_set(console, string("log"), jsb_function_template_new(Some(print_cb)));
        jsb_template_set(console, string("level"), string("info"));
        let global = jsb_object_template_new();
        jsb_template_set(global, string("console"), console);

        let context = jsb_context_new(ptr::null(), global);
        jsb_context_enter(context);
        take_output();
        run("console.log(console.level, 42)");
        assert_eq!(take_output(), "info 42\n");

        jsb_context_exit(context);
        jsb_handle_scope_free(scope);
    }
}

#[test]
fn test_extensions() {
    unsafe {
        assert!(jsb_register_extension(
            c"capi-greeting".as_ptr(),
            c"var greeting = 'hello from an extension';".as_ptr(),
        ));
        assert!(!jsb_register_extension(c"capi-greeting".as_ptr(), c"".as_ptr()));

        let scope = jsb_handle_scope_new();
        let names = [c"capi-greeting".as_ptr()];
        let extensions = jsb_extension_configuration_new(names.as_ptr(), 1);
        let context = jsb_context_new(extensions, JsbHandle::EMPTY);
        jsb_extension_configuration_free(extensions);

        jsb_context_enter(context);
        assert_eq!(to_string(run("greeting")), "hello from an extension");
        jsb_context_exit(context);
        jsb_handle_scope_free(scope);
    }
}

#[test]
#[serial]
fn test_flags_are_consumed_from_argv() {
    let owned: Vec<CString> = ["prog", "--stack-trace-limit=5", "--unknown-flag", "script.js"]
        .iter()
        .map(|s| CString::new(*s).unwrap())
        .collect();
    let mut argv: Vec<*mut c_char> = owned.iter().map(|s| s.as_ptr().cast_mut()).collect();
    argv.push(ptr::null_mut());
    let mut argc = 4;

    unsafe {
        jsb_set_flags_from_command_line(&mut argc, argv.as_mut_ptr(), true);
        assert_eq!(argc, 3);
        let remaining: Vec<String> = argv[..argc as usize]
            .iter()
            .map(|&arg| CStr::from_ptr(arg).to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining, vec!["prog", "--unknown-flag", "script.js"]);
        assert!(argv[argc as usize].is_null());

        let scope = jsb_handle_scope_new();
        let context = jsb_context_new(ptr::null(), JsbHandle::EMPTY);
        jsb_context_enter(context);
        assert_eq!(to_string(run("Error.stackTraceLimit")), "5");
        jsb_context_exit(context);
        jsb_handle_scope_free(scope);

        let owned: Vec<CString> = ["prog", "--no-stack-trace-limit"]
            .iter()
            .map(|s| CString::new(*s).unwrap())
            .collect();
        let mut argv: Vec<*mut c_char> = owned.iter().map(|s| s.as_ptr().cast_mut()).collect();
        let mut argc = 2;
        jsb_set_flags_from_command_line(&mut argc, argv.as_mut_ptr(), false);
        assert_eq!(argc, 2);
    }
}
