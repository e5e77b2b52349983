//! Error types for bridge operations
//!
//! Script exceptions keep the details JSC attaches to thrown errors (type,
//! message, source location, stack) so they can be rendered as the message a
//! `TryCatch` hands out. Contract violations that the typed handle layer can
//! detect get their own variants instead of being undefined behavior.

use std::fmt;
use thiserror::Error;

use crate::handle::HandleKind;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// A JavaScript exception captured from the VM.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptException {
    /// Constructor name (`SyntaxError`, `TypeError`, ...). `None` when a
    /// primitive was thrown.
    pub error_type: Option<String>,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub stack: Option<String>,
}

impl ScriptException {
    /// Exception carrying a thrown primitive (`throw "x"`, `throw 42`).
    pub fn thrown(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Exception carrying an `Error` object.
    pub fn error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: Some(error_type.into()),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Attach a source location.
    pub fn at(mut self, file: Option<String>, line: Option<u32>, column: Option<u32>) -> Self {
        self.file = file;
        self.line = line;
        self.column = column;
        self
    }

    pub fn is_syntax_error(&self) -> bool {
        self.error_type.as_deref() == Some("SyntaxError")
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}: ")?,
            (None, Some(line)) => write!(f, "line {line}: ")?,
            _ => {}
        }
        match &self.error_type {
            Some(error_type) => write!(f, "{error_type}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ScriptException {}

/// Structured error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// JSC refused to create a context or context group
    #[error("Context creation failed: {message}")]
    ContextCreation { message: String },

    /// A script threw or failed to compile
    #[error(transparent)]
    Exception(#[from] ScriptException),

    /// A handle-producing operation ran with no open handle scope
    #[error("No handle scope is open")]
    NoActiveScope,

    /// An operation needing the current context ran outside any context
    #[error("No context is entered")]
    NoActiveContext,

    /// `exit` was called for a context that is not the current one
    #[error("Context exit does not match the most recently entered context")]
    ContextMismatch,

    /// A handle was empty where a value was required
    #[error("Empty handle where a {expected} was expected")]
    EmptyHandle { expected: &'static str },

    /// A handle does not point at a live slot (its scope has closed)
    #[error("Handle {address:#x} is not live in any open scope")]
    StaleHandle { address: usize },

    /// A handle of one kind was passed where another was expected
    #[error("Handle kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        expected: &'static str,
        actual: HandleKind,
    },

    /// Setting the template would make it contain itself
    #[error("Template property '{name}' would create a cycle")]
    TemplateCycle { name: String },

    /// A command-line flag was recognized but its value was not
    #[error("Invalid value for flag --{flag}: {reason}")]
    InvalidFlag { flag: String, reason: String },

    /// Extension registry errors
    #[error("Extension error: {0}")]
    Extension(String),

    /// An extension's source threw while a context was being created
    #[error("Extension '{name}' failed: {exception}")]
    ExtensionFailed {
        name: String,
        #[source]
        exception: ScriptException,
    },

    /// String encoding error
    #[error("String encoding error: {0}")]
    StringEncoding(String),
}

impl BridgeError {
    /// The script exception behind this error, if a script threw
    pub fn exception(&self) -> Option<&ScriptException> {
        match self {
            Self::Exception(exception) | Self::ExtensionFailed { exception, .. } => Some(exception),
            _ => None,
        }
    }
}
