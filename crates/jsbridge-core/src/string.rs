//! String marshaling between Rust and JSC
//!
//! JSC strings are UTF-16. Strings are created from UTF-16 code units rather
//! than C strings so that embedded NUL characters survive the round trip.

use jsbridge_sys::*;
use std::ffi::c_char;
use std::fmt;
use std::ptr;

use crate::handle::{JsString, Local, ValueKind};
use crate::scope::HandleScope;
use crate::value::to_js_string;

/// RAII wrapper for JSStringRef with automatic release
pub(crate) struct JsStr {
    raw: JSStringRef,
}

impl JsStr {
    pub(crate) fn new(s: &str) -> Self {
        let units: Vec<JSChar> = s.encode_utf16().collect();
        // SAFETY: `units` is a valid buffer of `units.len()` code units
        let raw = unsafe { JSStringCreateWithCharacters(units.as_ptr(), units.len()) };
        Self { raw }
    }

    /// Take ownership of a +1 string reference.
    ///
    /// # Safety
    /// `raw` must be null or a string the caller owns a reference to.
    pub(crate) unsafe fn adopt(raw: JSStringRef) -> Option<Self> {
        (!raw.is_null()).then_some(Self { raw })
    }

    pub(crate) fn raw(&self) -> JSStringRef {
        self.raw
    }

    /// Length in UTF-16 code units
    pub(crate) fn len(&self) -> usize {
        // SAFETY: self.raw is valid
        unsafe { JSStringGetLength(self.raw) }
    }

    /// Convert to Rust String; unpaired surrogates become U+FFFD.
    pub(crate) fn to_string_lossy(&self) -> String {
        // SAFETY: self.raw is valid
        unsafe { js_string_to_rust(self.raw) }
    }
}

impl Clone for JsStr {
    fn clone(&self) -> Self {
        // SAFETY: self.raw is valid; the retain is balanced by Drop
        let raw = unsafe { JSStringRetain(self.raw) };
        Self { raw }
    }
}

impl Drop for JsStr {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: we own one reference
            unsafe { JSStringRelease(self.raw) };
        }
    }
}

impl fmt::Debug for JsStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsStr({:?})", self.to_string_lossy())
    }
}

/// Convert JSStringRef to Rust String
///
/// # Safety
/// The js_str must be a valid JSStringRef or null
pub(crate) unsafe fn js_string_to_rust(js_str: JSStringRef) -> String {
    if js_str.is_null() {
        return String::new();
    }
    // SAFETY: js_str is valid per caller contract; the character buffer is
    // owned by the string and valid for `len` units
    unsafe {
        let len = JSStringGetLength(js_str);
        if len == 0 {
            return String::new();
        }
        let chars = JSStringGetCharactersPtr(js_str);
        if chars.is_null() {
            return String::new();
        }
        String::from_utf16_lossy(std::slice::from_raw_parts(chars, len))
    }
}

impl HandleScope<'_> {
    /// Create a JS string.
    pub fn string(&self, s: &str) -> Local<'_, JsString> {
        let js = JsStr::new(s);
        // SAFETY: js.raw() is a valid string
        let value = unsafe { JSValueMakeString(self.isolate().allocation_context(), js.raw()) };
        self.value(value)
    }

    /// Create a JS string from UTF-8 bytes.
    ///
    /// Invalid sequences are replaced with U+FFFD; embedded NULs are kept.
    pub fn string_from_utf8(&self, bytes: &[u8]) -> Local<'_, JsString> {
        self.string(&String::from_utf8_lossy(bytes))
    }
}

impl Local<'_, JsString> {
    /// Length in UTF-16 code units.
    pub fn length(&self, scope: &HandleScope<'_>) -> usize {
        // SAFETY: the slot holds a protected string
        unsafe { to_js_string(scope.isolate().allocation_context(), self.raw_value()) }
            .map_or(0, |s| s.len())
    }
}

/// UTF-8 rendering of a value, owned by the caller.
///
/// The buffer is always NUL-terminated; [`len`](Self::len) does not count the
/// terminator. Embedded NULs are preserved, so C callers must use the length
/// rather than scanning for the terminator.
#[derive(Clone, PartialEq, Eq)]
pub struct Utf8Value {
    text: String,
}

impl Utf8Value {
    /// Convert `value` with `String(value)` semantics.
    ///
    /// If the conversion throws, the exception is reported like any other
    /// (to the innermost `TryCatch` or the message handler) and the result is
    /// empty.
    pub fn new<K: ValueKind>(scope: &HandleScope<'_>, value: Local<'_, K>) -> Self {
        let isolate = scope.isolate();
        let ctx = isolate.allocation_context();
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: the slot holds a protected value
        let raw = unsafe { JSValueToStringCopy(ctx, value.raw_value(), &mut exception) };
        if !exception.is_null() {
            isolate.report_exception(ctx, exception);
            return Self::empty();
        }
        // SAFETY: JSValueToStringCopy returns an owned (+1) string
        match unsafe { JsStr::adopt(raw) } {
            Some(js) => Self::from(js.to_string_lossy()),
            None => Self::empty(),
        }
    }

    pub fn empty() -> Self {
        Self::from(String::new())
    }

    /// Length in bytes, excluding the terminator.
    pub fn len(&self) -> usize {
        self.text.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_str(&self) -> &str {
        &self.text[..self.len()]
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.as_str().as_bytes()
    }

    /// Pointer to the NUL-terminated buffer, valid while `self` is.
    pub fn as_ptr(&self) -> *const c_char {
        self.text.as_ptr().cast()
    }

    pub fn into_string(mut self) -> String {
        self.text.pop();
        self.text
    }
}

impl From<String> for Utf8Value {
    fn from(mut text: String) -> Self {
        text.push('\0');
        Self { text }
    }
}

impl fmt::Display for Utf8Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Utf8Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Utf8Value({:?})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_value_is_nul_terminated() {
        let value = Utf8Value::from("hi".to_string());
        assert_eq!(value.len(), 2);
        assert_eq!(value.as_str(), "hi");
        // SAFETY: the buffer holds len + 1 bytes
        let terminator = unsafe { *value.as_ptr().add(value.len()) };
        assert_eq!(terminator, 0);
    }

    #[test]
    fn test_utf8_value_keeps_embedded_nul() {
        let value = Utf8Value::from("a\0b".to_string());
        assert_eq!(value.len(), 3);
        assert_eq!(value.as_bytes(), b"a\0b");
        assert_eq!(value.into_string(), "a\0b");
    }

    #[test]
    fn test_empty_utf8_value() {
        let value = Utf8Value::empty();
        assert!(value.is_empty());
        assert_eq!(value.to_string(), "");
    }
}
