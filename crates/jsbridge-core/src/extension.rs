//! Named script extensions
//!
//! An extension is JavaScript source registered once per process under a
//! name. Contexts created with an [`ExtensionConfiguration`] naming it
//! evaluate the source (after its dependencies) before any user script runs.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

/// JavaScript source installed into contexts on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    name: String,
    source: String,
    dependencies: Vec<String>,
}

impl Extension {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            dependencies: Vec::new(),
        }
    }

    /// Extensions that must be installed first.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

static EXTENSIONS: LazyLock<Mutex<HashMap<String, Arc<Extension>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Register an extension for the whole process.
///
/// Names are unique; registering a name twice is an error.
pub fn register_extension(extension: Extension) -> BridgeResult<()> {
    let mut registry = EXTENSIONS.lock();
    if registry.contains_key(extension.name()) {
        return Err(BridgeError::Extension(format!(
            "extension '{}' is already registered",
            extension.name()
        )));
    }
    debug!(target: "jsbridge::extension", name = extension.name(), "extension registered");
    registry.insert(extension.name.clone(), Arc::new(extension));
    Ok(())
}

/// Whether `name` is registered.
pub fn is_extension_registered(name: &str) -> bool {
    EXTENSIONS.lock().contains_key(name)
}

/// The set of extensions a new context should install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionConfiguration {
    names: Vec<String>,
}

impl ExtensionConfiguration {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Registered extensions in install order: dependencies first, each once.
    pub(crate) fn resolve(&self) -> BridgeResult<Vec<Arc<Extension>>> {
        let registry = EXTENSIONS.lock();
        let mut ordered = Vec::new();
        let mut done = HashSet::new();
        let mut visiting = HashSet::new();
        for name in &self.names {
            visit(&registry, name, &mut visiting, &mut done, &mut ordered)?;
        }
        Ok(ordered)
    }
}

fn visit(
    registry: &HashMap<String, Arc<Extension>>,
    name: &str,
    visiting: &mut HashSet<String>,
    done: &mut HashSet<String>,
    ordered: &mut Vec<Arc<Extension>>,
) -> BridgeResult<()> {
    if done.contains(name) {
        return Ok(());
    }
    if !visiting.insert(name.to_string()) {
        return Err(BridgeError::Extension(format!(
            "extension '{name}' depends on itself"
        )));
    }
    let extension = registry
        .get(name)
        .ok_or_else(|| BridgeError::Extension(format!("extension '{name}' is not registered")))?;
    for dependency in extension.dependencies() {
        visit(registry, dependency, visiting, done, ordered)?;
    }
    visiting.remove(name);
    done.insert(name.to_string());
    ordered.push(extension.clone());
    Ok(())
}
