//! Value inspection and GC-protected value storage

use jsbridge_sys::*;
use std::ptr;

use crate::error::{BridgeError, BridgeResult, ScriptException};
use crate::handle::{Local, Object, Value, ValueKind};
use crate::scope::HandleScope;
use crate::string::{JsStr, js_string_to_rust};

/// A value kept alive outside any handle scope.
///
/// Holds a reference on the global context it was protected with, so it may
/// outlive the isolate that created it.
pub(crate) struct Persistent {
    ctx: JSGlobalContextRef,
    value: JSValueRef,
}

impl Persistent {
    /// # Safety
    /// `ctx` must be a live global context and `value` must belong to its
    /// context group.
    pub(crate) unsafe fn new(ctx: JSGlobalContextRef, value: JSValueRef) -> Self {
        // SAFETY: per caller contract
        unsafe {
            JSGlobalContextRetain(ctx);
            if !value.is_null() {
                JSValueProtect(ctx, value);
            }
        }
        Self { ctx, value }
    }

    pub(crate) fn get(&self) -> JSValueRef {
        self.value
    }
}

impl Drop for Persistent {
    fn drop(&mut self) {
        // SAFETY: both were retained in `new`
        unsafe {
            if !self.value.is_null() {
                JSValueUnprotect(self.ctx, self.value);
            }
            JSGlobalContextRelease(self.ctx);
        }
    }
}

impl<'s, K: ValueKind> Local<'s, K> {
    pub fn is_undefined(&self, scope: &HandleScope<'_>) -> bool {
        // SAFETY: the slot holds a protected value
        unsafe { JSValueIsUndefined(scope.isolate().allocation_context(), self.raw_value()) }
    }

    pub fn is_null(&self, scope: &HandleScope<'_>) -> bool {
        // SAFETY: the slot holds a protected value
        unsafe { JSValueIsNull(scope.isolate().allocation_context(), self.raw_value()) }
    }

    pub fn is_boolean(&self, scope: &HandleScope<'_>) -> bool {
        // SAFETY: the slot holds a protected value
        unsafe { JSValueIsBoolean(scope.isolate().allocation_context(), self.raw_value()) }
    }

    pub fn is_number(&self, scope: &HandleScope<'_>) -> bool {
        // SAFETY: the slot holds a protected value
        unsafe { JSValueIsNumber(scope.isolate().allocation_context(), self.raw_value()) }
    }

    pub fn is_string(&self, scope: &HandleScope<'_>) -> bool {
        // SAFETY: the slot holds a protected value
        unsafe { JSValueIsString(scope.isolate().allocation_context(), self.raw_value()) }
    }

    pub fn is_object(&self, scope: &HandleScope<'_>) -> bool {
        // SAFETY: the slot holds a protected value
        unsafe { JSValueIsObject(scope.isolate().allocation_context(), self.raw_value()) }
    }

    pub fn is_function(&self, scope: &HandleScope<'_>) -> bool {
        let ctx = scope.isolate().allocation_context();
        let value = self.raw_value();
        // SAFETY: the slot holds a protected value
        unsafe { JSValueIsObject(ctx, value) && JSObjectIsFunction(ctx, value) }
    }

    pub fn to_boolean(&self, scope: &HandleScope<'_>) -> bool {
        // SAFETY: the slot holds a protected value
        unsafe { JSValueToBoolean(scope.isolate().allocation_context(), self.raw_value()) }
    }

    pub fn to_number(&self, scope: &HandleScope<'_>) -> BridgeResult<f64> {
        let ctx = scope.isolate().allocation_context();
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: the slot holds a protected value
        let number = unsafe { JSValueToNumber(ctx, self.raw_value(), &mut exception) };
        if !exception.is_null() {
            // SAFETY: exception was set by JSC
            return Err(unsafe { extract_exception(ctx, exception) }.into());
        }
        Ok(number)
    }

    /// JS `String(value)` as a Rust string.
    pub fn to_rust_string(&self, scope: &HandleScope<'_>) -> BridgeResult<String> {
        let ctx = scope.isolate().allocation_context();
        // SAFETY: the slot holds a protected value
        unsafe { to_js_string(ctx, self.raw_value()) }.map(|s| s.to_string_lossy())
    }

    /// JS `===`.
    pub fn strict_equals<T: ValueKind>(&self, scope: &HandleScope<'_>, other: Local<'_, T>) -> bool {
        let ctx = scope.isolate().allocation_context();
        // SAFETY: both slots hold protected values
        unsafe { JSValueIsStrictEqual(ctx, self.raw_value(), other.raw_value()) }
    }
}

impl<'s> Local<'s, Object> {
    /// Read a property.
    pub fn get<'a>(&self, scope: &'a HandleScope<'_>, name: &str) -> BridgeResult<Local<'a, Value>> {
        let ctx = scope.isolate().allocation_context();
        let key = JsStr::new(name);
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: object slot holds a protected object
        let value = unsafe { JSObjectGetProperty(ctx, self.raw_value(), key.raw(), &mut exception) };
        if !exception.is_null() {
            // SAFETY: exception was set by JSC
            return Err(unsafe { extract_exception(ctx, exception) }.into());
        }
        if value.is_null() {
            return Ok(scope.undefined());
        }
        Ok(scope.value(value))
    }

    /// Write a property with default attributes.
    pub fn set<T: ValueKind>(
        &self,
        scope: &HandleScope<'_>,
        name: &str,
        value: Local<'_, T>,
    ) -> BridgeResult<()> {
        let ctx = scope.isolate().allocation_context();
        // SAFETY: object slot holds a protected object; value is protected
        unsafe { set_property(ctx, self.raw_value(), name, value.raw_value()) }
    }
}

/// Convert a value with `String(value)` semantics.
///
/// # Safety
/// `ctx` and `value` must be valid and belong to the same context group.
pub(crate) unsafe fn to_js_string(ctx: JSContextRef, value: JSValueRef) -> BridgeResult<JsStr> {
    let mut exception: JSValueRef = ptr::null_mut();
    // SAFETY: per caller contract
    let raw = unsafe { JSValueToStringCopy(ctx, value, &mut exception) };
    if !exception.is_null() {
        // SAFETY: exception was set by JSC
        return Err(unsafe { extract_exception(ctx, exception) }.into());
    }
    // SAFETY: JSValueToStringCopy returns an owned (+1) string
    unsafe { JsStr::adopt(raw) }
        .ok_or_else(|| BridgeError::StringEncoding("JSValueToStringCopy returned null".into()))
}

/// # Safety
/// `ctx` must be valid and `object` must be an object of its group.
pub(crate) unsafe fn set_property(
    ctx: JSContextRef,
    object: JSObjectRef,
    name: &str,
    value: JSValueRef,
) -> BridgeResult<()> {
    let key = JsStr::new(name);
    let mut exception: JSValueRef = ptr::null_mut();
    // SAFETY: per caller contract
    unsafe {
        JSObjectSetProperty(
            ctx,
            object,
            key.raw(),
            value,
            K_JS_PROPERTY_ATTRIBUTE_NONE,
            &mut exception,
        );
    }
    if !exception.is_null() {
        // SAFETY: exception was set by JSC
        return Err(unsafe { extract_exception(ctx, exception) }.into());
    }
    Ok(())
}

/// Extract structured details from a JS exception value
///
/// Error objects contribute their type, message, stack and source location
/// (JSC names these `line`, `column` and `sourceURL`). Anything else that
/// was thrown is rendered with `String(value)`.
///
/// # Safety
/// - `ctx` must be a valid JSContextRef
/// - `exception` can be null
pub(crate) unsafe fn extract_exception(ctx: JSContextRef, exception: JSValueRef) -> ScriptException {
    if exception.is_null() {
        return ScriptException::thrown("Null exception");
    }

    // SAFETY: ctx and exception are valid per caller contract
    unsafe {
        if JSValueIsObject(ctx, exception) {
            extract_error_object(ctx, exception)
        } else {
            // Primitive exception (throw "string" or throw 42)
            let message =
                value_to_string(ctx, exception).unwrap_or_else(|| "Unknown error".to_string());
            ScriptException::thrown(message)
        }
    }
}

/// Extract details from an Error object
unsafe fn extract_error_object(ctx: JSContextRef, exception: JSValueRef) -> ScriptException {
    // SAFETY: All operations in this block require ctx and exception to be valid,
    // which is guaranteed by the caller
    unsafe {
        let obj = exception as JSObjectRef;

        let error_type =
            get_string_property(ctx, obj, "name").unwrap_or_else(|| "Error".to_string());
        let message = get_string_property(ctx, obj, "message").unwrap_or_else(|| {
            value_to_string(ctx, exception).unwrap_or_else(|| "Unknown error".to_string())
        });

        let file = get_string_property(ctx, obj, "sourceURL")
            .or_else(|| get_string_property(ctx, obj, "fileName"));
        let line = get_number_property(ctx, obj, "line")
            .or_else(|| get_number_property(ctx, obj, "lineNumber"))
            .map(|n| n as u32);
        let column = get_number_property(ctx, obj, "column")
            .or_else(|| get_number_property(ctx, obj, "columnNumber"))
            .map(|n| n as u32);

        let mut details = ScriptException::error(error_type, message).at(file, line, column);
        details.stack = get_string_property(ctx, obj, "stack").filter(|s| !s.is_empty());
        details
    }
}

/// Get a string property from a JS object
unsafe fn get_string_property(ctx: JSContextRef, obj: JSObjectRef, name: &str) -> Option<String> {
    let key = JsStr::new(name);
    // SAFETY: ctx and obj are valid per caller contract
    unsafe {
        let mut exception: JSValueRef = ptr::null_mut();
        let value = JSObjectGetProperty(ctx, obj, key.raw(), &mut exception);

        if exception.is_null() && !value.is_null() && !JSValueIsUndefined(ctx, value) {
            value_to_string(ctx, value)
        } else {
            None
        }
    }
}

/// Get a number property from a JS object
unsafe fn get_number_property(ctx: JSContextRef, obj: JSObjectRef, name: &str) -> Option<f64> {
    let key = JsStr::new(name);
    // SAFETY: ctx and obj are valid per caller contract
    unsafe {
        let mut exception: JSValueRef = ptr::null_mut();
        let value = JSObjectGetProperty(ctx, obj, key.raw(), &mut exception);

        if exception.is_null() && !value.is_null() && JSValueIsNumber(ctx, value) {
            let mut ex: JSValueRef = ptr::null_mut();
            let num = JSValueToNumber(ctx, value, &mut ex);
            if ex.is_null() && !num.is_nan() {
                Some(num)
            } else {
                None
            }
        } else {
            None
        }
    }
}

/// Convert a JS value to a Rust string, swallowing conversion exceptions
unsafe fn value_to_string(ctx: JSContextRef, value: JSValueRef) -> Option<String> {
    // SAFETY: ctx and value are valid per caller contract
    unsafe {
        let mut exception: JSValueRef = ptr::null_mut();
        let js_str = JSValueToStringCopy(ctx, value, &mut exception);
        if !exception.is_null() || js_str.is_null() {
            return None;
        }
        let result = js_string_to_rust(js_str);
        JSStringRelease(js_str);
        Some(result)
    }
}
