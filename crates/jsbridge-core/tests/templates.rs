//! Templates, contexts and extensions.

use jsbridge_core::{
    BridgeError, ContextScope, Extension, ExtensionConfiguration, HandleScope, Isolate,
    Utf8Value, register_extension,
};

fn run(scope: &HandleScope<'_>, source: &str) -> Option<String> {
    let source = scope.string(source);
    let script = scope.compile(source).unwrap()?;
    let result = script.run(scope)?;
    Some(Utf8Value::new(scope, result).into_string())
}

#[test]
fn test_global_template_properties() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let global = scope.object_template();
    global.set_named(&scope, "product", scope.string("bridge")).unwrap();
    global.set_named(&scope, "version", scope.number(1.0)).unwrap();
    assert_eq!(global.property_count(), 2);

    let context = scope.context(None, Some(global)).unwrap();
    let _entered = ContextScope::new(&scope, context);
    assert_eq!(run(&scope, "product + '@' + version").as_deref(), Some("bridge@1"));
}

#[test]
fn test_setting_a_name_twice_replaces() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let global = scope.object_template();
    let key = scope.string("value");
    global.set(&scope, key, scope.number(1.0)).unwrap();
    global.set(&scope, key, scope.number(2.0)).unwrap();
    assert_eq!(global.property_count(), 1);

    let context = scope.context(None, Some(global)).unwrap();
    let _entered = ContextScope::new(&scope, context);
    assert_eq!(run(&scope, "value").as_deref(), Some("2"));
}

#[test]
fn test_nested_templates_instantiate_per_context() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let console = scope.object_template();
    let log = scope.function_template(|args| Some(args.get(0)));
    console.set_named(&scope, "log", log).unwrap();

    let global = scope.object_template();
    global.set_named(&scope, "console", console).unwrap();

    let first = scope.context(None, Some(global)).unwrap();
    let second = scope.context(None, Some(global)).unwrap();
    {
        let _entered = ContextScope::new(&scope, first);
        assert_eq!(run(&scope, "console.log('hi')").as_deref(), Some("hi"));
        run(&scope, "console.tag = 'first'").unwrap();
    }
    let _entered = ContextScope::new(&scope, second);
    assert_eq!(run(&scope, "typeof console.tag").as_deref(), Some("undefined"));
    assert_eq!(run(&scope, "typeof console.log").as_deref(), Some("function"));
}

#[test]
fn test_template_cycle_is_rejected() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let outer = scope.object_template();
    let inner = scope.object_template();
    outer.set_named(&scope, "inner", inner).unwrap();

    assert!(matches!(
        inner.set_named(&scope, "outer", outer),
        Err(BridgeError::TemplateCycle { .. })
    ));
    assert!(matches!(
        outer.set_named(&scope, "self", outer),
        Err(BridgeError::TemplateCycle { .. })
    ));
    assert_eq!(inner.property_count(), 0);
}

#[test]
fn test_function_template_properties() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let make = scope.function_template(|args| Some(args.scope().number(1.0)));
    make.set_named(&scope, "kind", scope.string("factory")).unwrap();

    let global = scope.object_template();
    global.set_named(&scope, "make", make).unwrap();
    let context = scope.context(None, Some(global)).unwrap();
    let _entered = ContextScope::new(&scope, context);
    assert_eq!(run(&scope, "make.kind + make()").as_deref(), Some("factory1"));
}

#[test]
fn test_template_as_data() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let global = scope.object_template();
    let nested = scope.object_template().as_template().as_data();
    global.set_named(&scope, "nested", nested).unwrap();

    let context = scope.context(None, Some(global)).unwrap();
    let _entered = ContextScope::new(&scope, context);
    assert_eq!(run(&scope, "typeof nested").as_deref(), Some("object"));
}

#[test]
fn test_enter_and_exit() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let first = scope.context(None, None).unwrap();
    let second = scope.context(None, None).unwrap();
    assert!(!first.same_as(&second));

    first.enter(&scope);
    second.enter(&scope);
    assert_eq!(isolate.entered_contexts(), 2);
    assert!(matches!(first.exit(&scope), Err(BridgeError::ContextMismatch)));
    second.exit(&scope).unwrap();
    first.exit(&scope).unwrap();
    assert!(matches!(first.exit(&scope), Err(BridgeError::NoActiveContext)));
}

#[test]
fn test_context_scope_restores_previous() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let context = scope.context(None, None).unwrap();
    {
        let _entered = ContextScope::new(&scope, context);
        assert_eq!(isolate.entered_contexts(), 1);
    }
    assert_eq!(isolate.entered_contexts(), 0);
}

#[test]
fn test_extensions_install_with_dependencies() {
    register_extension(Extension::new(
        "integration-math",
        "var square = function (x) { return x * x; };",
    ))
    .unwrap();
    register_extension(
        Extension::new("integration-geometry", "var area = function (r) { return square(r); };")
            .with_dependencies(["integration-math"]),
    )
    .unwrap();

    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let extensions = ExtensionConfiguration::new(["integration-geometry"]);
    let context = scope.context(Some(&extensions), None).unwrap();
    let _entered = ContextScope::new(&scope, context);
    assert_eq!(run(&scope, "area(3)").as_deref(), Some("9"));

    let plain = scope.context(None, None).unwrap();
    let _plain = ContextScope::new(&scope, plain);
    assert_eq!(run(&scope, "typeof square").as_deref(), Some("undefined"));
}

#[test]
fn test_failing_extension_fails_context_creation() {
    register_extension(Extension::new("integration-broken", "throw new Error('nope')")).unwrap();

    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let extensions = ExtensionConfiguration::new(["integration-broken"]);
    let err = scope.context(Some(&extensions), None).unwrap_err();
    assert!(matches!(err, BridgeError::ExtensionFailed { .. }));
    assert!(err.to_string().contains("integration-broken"));
    let exception = err.exception().unwrap();
    assert_eq!(exception.error_type.as_deref(), Some("Error"));
    assert_eq!(exception.message, "nope");
}

#[test]
fn test_unknown_extension_fails_context_creation() {
    let isolate = Isolate::new().unwrap();
    let scope = HandleScope::new(&isolate);
    let extensions = ExtensionConfiguration::new(["integration-missing"]);
    assert!(scope.context(Some(&extensions), None).is_err());
}
