//! Scoped handles, templates and script execution over JavaScriptCore.
//!
//! This crate layers the embedding model of a classic JS engine API (handle
//! scopes, object and function templates, compiled scripts, try/catch
//! blocks) on top of the JSC C API in `jsbridge-sys`. `jsbridge-capi` exposes
//! the same model through a C ABI.
//!
//! # Example
//!
//! ```
//! use jsbridge_core::{ContextScope, HandleScope, Isolate, TryCatch};
//!
//! let isolate = Isolate::new().unwrap();
//! let scope = HandleScope::new(&isolate);
//!
//! let global = scope.object_template();
//! let answer = scope.number(42.0);
//! global.set_named(&scope, "answer", answer).unwrap();
//!
//! let context = scope.context(None, Some(global)).unwrap();
//! let _entered = ContextScope::new(&scope, context);
//!
//! let try_catch = TryCatch::new(&isolate);
//! let source = scope.string("answer + 1");
//! let script = scope.compile(source).unwrap().unwrap();
//! let result = script.run(&scope).unwrap();
//! assert_eq!(result.to_number(&scope).unwrap(), 43.0);
//! assert!(!try_catch.has_caught());
//! ```
//!
//! # Thread Safety
//!
//! All VM-facing types are `!Send` and `!Sync`. An isolate and everything
//! created from it stay on the thread that created the isolate.
//!
//! ## Example: Wrong (won't compile)
//!
//! ```compile_fail
//! use jsbridge_core::Isolate;
//! use std::thread;
//!
//! let isolate = Isolate::new().unwrap();
//! thread::spawn(move || {
//!     let _ = isolate.live_handles(); // Error: Isolate is !Send
//! });
//! ```
//!
//! Sharing an isolate through an `Arc` does not help; it is `!Sync` too:
//!
//! ```compile_fail
//! use jsbridge_core::Isolate;
//! use std::sync::Arc;
//!
//! let isolate = Arc::new(Isolate::new().unwrap());
//! let shared = isolate.clone();
//! std::thread::spawn(move || {
//!     let _ = shared.open_scopes(); // Error: Isolate is !Sync
//! });
//! ```
//!
//! Handles and try/catch blocks stay on their thread as well:
//!
//! ```compile_fail
//! use jsbridge_core::{HandleScope, Isolate};
//!
//! let isolate = Isolate::new().unwrap();
//! let scope = HandleScope::new(&isolate);
//! let value = scope.number(42.0);
//! std::thread::scope(|s| {
//!     s.spawn(move || {
//!         let _ = value.kind(); // Error: Local is !Send
//!     });
//! });
//! ```
//!
//! ```compile_fail
//! use jsbridge_core::{Isolate, TryCatch};
//!
//! let isolate = Isolate::new().unwrap();
//! let try_catch = TryCatch::new(&isolate);
//! std::thread::scope(|s| {
//!     s.spawn(move || {
//!         let _ = try_catch.has_caught(); // Error: TryCatch is !Send
//!     });
//! });
//! ```
//!
//! Handles cannot outlive the scope that owns them:
//!
//! ```compile_fail
//! use jsbridge_core::{HandleScope, Isolate};
//!
//! let isolate = Isolate::new().unwrap();
//! let escaped = {
//!     let scope = HandleScope::new(&isolate);
//!     scope.number(1.0) // Error: borrowed value does not live long enough
//! };
//! ```

mod callback;
mod config;
mod context;
mod error;
mod extension;
mod handle;
mod isolate;
mod message;
mod scope;
mod script;
mod string;
mod template;
mod try_catch;
mod value;

pub use callback::{Arguments, NativeCallback, live_callback_bindings};
pub use config::{DEFAULT_SCRIPT_NAME, EngineConfig};
pub use context::ContextScope;
pub use error::{BridgeError, BridgeResult, ScriptException};
pub use extension::{Extension, ExtensionConfiguration, is_extension_registered, register_extension};
pub use handle::{
    Context, Data, DataKind, Function, FunctionTemplate, Handle, HandleKind, JsString, Kind,
    Local, Object, ObjectTemplate, Script, Template, TemplateKindMarker, Value, ValueKind,
};
pub use isolate::Isolate;
pub use message::{reset_message_handler, set_message_handler};
pub use scope::HandleScope;
pub use string::Utf8Value;
pub use try_catch::TryCatch;

// Re-export jsbridge-sys for direct FFI access when needed
pub use jsbridge_sys;
