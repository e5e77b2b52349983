//! Script compilation, execution and exception capture.

use jsbridge_core::{
    BridgeError, ContextScope, EngineConfig, HandleScope, Isolate, TryCatch, Utf8Value,
    reset_message_handler, set_message_handler,
};
use serial_test::serial;
use std::sync::{Arc, Mutex};

fn eval_to_string(isolate: &Isolate, source: &str) -> Option<String> {
    let scope = HandleScope::new(isolate);
    let source = scope.string(source);
    let script = scope.compile(source).unwrap()?;
    let result = script.run(&scope)?;
    Some(Utf8Value::new(&scope, result).into_string())
}

#[test]
fn test_arithmetic() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    let source = scope.string("1+1");
    let script = scope.compile(source).unwrap().unwrap();
    let result = script.run(&scope).unwrap();
    assert!(result.is_number(&scope));
    assert_eq!(result.to_number(&scope).unwrap(), 2.0);
}

#[test]
fn test_completion_value_of_declaration_is_undefined() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    let source = scope.string("var x = 5;");
    let script = scope.compile(source).unwrap().unwrap();
    let result = script.run(&scope).unwrap();
    assert!(result.is_undefined(&scope));
}

#[test]
fn test_compile_without_context_fails() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let source = scope.string("1");
    assert!(matches!(
        scope.compile(source),
        Err(BridgeError::NoActiveContext)
    ));
}

#[test]
fn test_syntax_error_is_caught() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    let try_catch = TryCatch::new(&isolate);
    let source = scope.string("syntax error(");
    let script = scope.compile(source).unwrap();
    assert!(script.is_none());
    assert!(try_catch.has_caught());

    let details = try_catch.details().unwrap();
    assert!(details.is_syntax_error());
    let message = try_catch.message(&scope).unwrap();
    assert!(!message.to_rust_string(&scope).unwrap().is_empty());
}

#[test]
fn test_thrown_error_is_caught_and_reset() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    let try_catch = TryCatch::new(&isolate);
    let source = scope.string("throw new Error('x')");
    let script = scope.compile_with_name(source, "thrower.js").unwrap().unwrap();
    assert!(script.run(&scope).is_none());
    assert!(try_catch.has_caught());

    let details = try_catch.details().unwrap();
    assert_eq!(details.error_type.as_deref(), Some("Error"));
    assert_eq!(details.message, "x");
    let message = try_catch.message(&scope).unwrap();
    let text = message.to_rust_string(&scope).unwrap();
    assert!(text.contains("Error: x"), "unexpected message: {text}");

    let exception = try_catch.exception(&scope).unwrap();
    assert!(exception.is_object(&scope));

    try_catch.reset();
    assert!(!try_catch.has_caught());
    assert!(try_catch.exception(&scope).is_none());
}

#[test]
fn test_thrown_primitive_is_caught() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    let try_catch = TryCatch::new(&isolate);
    let source = scope.string("throw 42");
    let script = scope.compile(source).unwrap().unwrap();
    assert!(script.run(&scope).is_none());
    let exception = try_catch.exception(&scope).unwrap();
    assert_eq!(exception.to_number(&scope).unwrap(), 42.0);
}

#[test]
fn test_script_runs_in_its_own_context() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let first = scope.context(None, None).unwrap();
    let second = scope.context(None, None).unwrap();

    let script = {
        let _entered = ContextScope::new(&scope, first);
        let source = scope.string("var marker = 'first'; marker");
        scope.compile(source).unwrap().unwrap()
    };

    let _entered = ContextScope::new(&scope, second);
    let result = script.run(&scope).unwrap();
    assert_eq!(result.to_rust_string(&scope).unwrap(), "first");

    let global = second.global(&scope);
    let marker = global.get(&scope, "marker").unwrap();
    assert!(marker.is_undefined(&scope));
}

#[test]
fn test_script_can_run_twice() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    let source = scope.string("var n = (typeof n === 'number') ? n + 1 : 1; n");
    let script = scope.compile(source).unwrap().unwrap();
    assert_eq!(script.run(&scope).unwrap().to_number(&scope).unwrap(), 1.0);
    assert_eq!(script.run(&scope).unwrap().to_number(&scope).unwrap(), 2.0);
}

#[test]
fn test_script_name_from_config() {
    let config = EngineConfig::new().script_name("main.js");
    let isolate = Isolate::with_config(config).unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    let try_catch = TryCatch::new(&isolate);
    let source = scope.string("\n\nthrow new TypeError('bad')");
    let script = scope.compile(source).unwrap().unwrap();
    assert!(script.run(&scope).is_none());

    let details = try_catch.details().unwrap();
    assert_eq!(details.error_type.as_deref(), Some("TypeError"));
    assert_eq!(details.line, Some(3));
    let text = details.to_string();
    assert!(text.contains("TypeError: bad"), "unexpected message: {text}");
}

#[test]
fn test_innermost_try_catch_wins() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    let outer = TryCatch::new(&isolate);
    {
        let inner = TryCatch::new(&isolate);
        assert!(eval_to_string(&isolate, "throw new Error('inner')").is_none());
        assert!(inner.has_caught());
    }
    assert!(!outer.has_caught());

    assert!(eval_to_string(&isolate, "throw new Error('outer')").is_none());
    assert!(outer.has_caught());
}

#[test]
#[serial]
fn test_uncaught_exception_goes_to_message_handler() {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    set_message_handler(move |message| sink.lock().unwrap().push(message.to_string()));

    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);
    assert!(eval_to_string(&isolate, "throw new RangeError('nobody home')").is_none());

    reset_message_handler();
    let messages = messages.lock().unwrap();
    let reported: Vec<_> = messages
        .iter()
        .filter(|m| m.contains("nobody home"))
        .collect();
    assert_eq!(reported.len(), 1);
    assert!(reported[0].contains("RangeError: nobody home"));
}

#[test]
#[serial]
fn test_verbose_try_catch_also_reports() {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    set_message_handler(move |message| sink.lock().unwrap().push(message.to_string()));

    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    let try_catch = TryCatch::new(&isolate);
    try_catch.set_verbose(true);
    assert!(try_catch.is_verbose());
    assert!(eval_to_string(&isolate, "throw new Error('loud')").is_none());
    assert!(try_catch.has_caught());

    try_catch.set_verbose(false);
    assert!(eval_to_string(&isolate, "throw new Error('quiet')").is_none());

    reset_message_handler();
    let messages = messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.contains("Error: loud")));
    assert!(!messages.iter().any(|m| m.contains("quiet")));
}

#[test]
fn test_expose_gc_flag() {
    let isolate = Isolate::with_config(EngineConfig::new().expose_gc(true)).unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    assert_eq!(eval_to_string(&isolate, "typeof gc").as_deref(), Some("function"));
    assert_eq!(eval_to_string(&isolate, "gc()").as_deref(), Some("undefined"));
}

#[test]
fn test_gc_is_absent_by_default() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    assert_eq!(eval_to_string(&isolate, "typeof gc").as_deref(), Some("undefined"));
}

#[test]
fn test_stack_trace_limit_flag() {
    let isolate = Isolate::with_config(EngineConfig::new().stack_trace_limit(3)).unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    assert_eq!(
        eval_to_string(&isolate, "Error.stackTraceLimit").as_deref(),
        Some("3")
    );
}

#[test]
fn test_flags_apply_to_later_contexts() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    isolate.update_config(|config| {
        config.apply_flag("--expose-gc").unwrap();
    });
    let context = scope.context(None, None).unwrap();
    let _entered = ContextScope::new(&scope, context);

    assert_eq!(eval_to_string(&isolate, "typeof gc").as_deref(), Some("function"));
}
