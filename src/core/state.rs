//! Runtime value store that steps use to hand arguments to each other

use crate::core::argument::{Argument, ArgumentType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from reading or writing state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("no value set for argument '{0}'")]
    NotFound(String),

    #[error("argument '{key}' holds a {found} value, not {expected}")]
    KindMismatch {
        key: String,
        expected: ArgumentType,
        found: ArgumentType,
    },
}

/// A value stored for an argument
#[derive(Clone, PartialEq)]
pub enum StateValue {
    String(String),
    Int64(i64),
    Float64(f64),
    Bool(bool),
    File(PathBuf),
    Directory(PathBuf),
    Secret(String),
}

impl StateValue {
    pub fn kind(&self) -> ArgumentType {
        match self {
            StateValue::String(_) => ArgumentType::String,
            StateValue::Int64(_) => ArgumentType::Int64,
            StateValue::Float64(_) => ArgumentType::Float64,
            StateValue::Bool(_) => ArgumentType::Bool,
            StateValue::File(_) => ArgumentType::File,
            StateValue::Directory(_) => ArgumentType::Directory,
            StateValue::Secret(_) => ArgumentType::Secret,
        }
    }

    /// Parse a raw string (e.g. from a step's output file) as the given kind
    pub fn parse(kind: ArgumentType, raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let value = match kind {
            ArgumentType::String => StateValue::String(raw.to_string()),
            ArgumentType::Secret => StateValue::Secret(raw.to_string()),
            ArgumentType::Int64 => StateValue::Int64(raw.parse().map_err(|e| format!("{}: {}", raw, e))?),
            ArgumentType::Float64 => StateValue::Float64(raw.parse().map_err(|e| format!("{}: {}", raw, e))?),
            ArgumentType::Bool => StateValue::Bool(raw.parse().map_err(|e| format!("{}: {}", raw, e))?),
            ArgumentType::File => StateValue::File(PathBuf::from(raw)),
            ArgumentType::Directory => StateValue::Directory(PathBuf::from(raw)),
        };
        Ok(value)
    }

    /// The value as it would appear in an environment variable.
    ///
    /// Unlike `Display`, this exposes secrets; only hand it to the process
    /// that needs the value.
    pub fn expose(&self) -> String {
        match self {
            StateValue::String(s) | StateValue::Secret(s) => s.clone(),
            StateValue::Int64(v) => v.to_string(),
            StateValue::Float64(v) => v.to_string(),
            StateValue::Bool(v) => v.to_string(),
            StateValue::File(p) | StateValue::Directory(p) => p.display().to_string(),
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Secret(_) => f.write_str("********"),
            other => f.write_str(&other.expose()),
        }
    }
}

impl fmt::Debug for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self)
    }
}

/// Storage for argument values during a pipeline run.
///
/// Typed accessors check both the argument's declared kind and the kind of
/// the stored value.
pub trait StateHandler: Send + Sync {
    fn get(&self, arg: &Argument) -> Result<StateValue, StateError>;

    /// Store a value. Implementations must reject values whose kind differs
    /// from `arg.kind`.
    fn set(&self, arg: &Argument, value: StateValue) -> Result<(), StateError>;

    fn exists(&self, arg: &Argument) -> bool;

    fn get_string(&self, arg: &Argument) -> Result<String, StateError> {
        match self.get_kind(arg, ArgumentType::String)? {
            StateValue::String(v) => Ok(v),
            other => Err(mismatch(arg, ArgumentType::String, other.kind())),
        }
    }

    fn set_string(&self, arg: &Argument, value: &str) -> Result<(), StateError> {
        self.set(arg, StateValue::String(value.to_string()))
    }

    fn get_int64(&self, arg: &Argument) -> Result<i64, StateError> {
        match self.get_kind(arg, ArgumentType::Int64)? {
            StateValue::Int64(v) => Ok(v),
            other => Err(mismatch(arg, ArgumentType::Int64, other.kind())),
        }
    }

    fn set_int64(&self, arg: &Argument, value: i64) -> Result<(), StateError> {
        self.set(arg, StateValue::Int64(value))
    }

    fn get_float64(&self, arg: &Argument) -> Result<f64, StateError> {
        match self.get_kind(arg, ArgumentType::Float64)? {
            StateValue::Float64(v) => Ok(v),
            other => Err(mismatch(arg, ArgumentType::Float64, other.kind())),
        }
    }

    fn set_float64(&self, arg: &Argument, value: f64) -> Result<(), StateError> {
        self.set(arg, StateValue::Float64(value))
    }

    fn get_bool(&self, arg: &Argument) -> Result<bool, StateError> {
        match self.get_kind(arg, ArgumentType::Bool)? {
            StateValue::Bool(v) => Ok(v),
            other => Err(mismatch(arg, ArgumentType::Bool, other.kind())),
        }
    }

    fn set_bool(&self, arg: &Argument, value: bool) -> Result<(), StateError> {
        self.set(arg, StateValue::Bool(value))
    }

    fn get_file(&self, arg: &Argument) -> Result<PathBuf, StateError> {
        match self.get_kind(arg, ArgumentType::File)? {
            StateValue::File(v) => Ok(v),
            other => Err(mismatch(arg, ArgumentType::File, other.kind())),
        }
    }

    fn set_file(&self, arg: &Argument, path: &Path) -> Result<(), StateError> {
        self.set(arg, StateValue::File(path.to_path_buf()))
    }

    fn get_directory(&self, arg: &Argument) -> Result<PathBuf, StateError> {
        match self.get_kind(arg, ArgumentType::Directory)? {
            StateValue::Directory(v) => Ok(v),
            other => Err(mismatch(arg, ArgumentType::Directory, other.kind())),
        }
    }

    fn set_directory(&self, arg: &Argument, path: &Path) -> Result<(), StateError> {
        self.set(arg, StateValue::Directory(path.to_path_buf()))
    }

    fn get_secret(&self, arg: &Argument) -> Result<String, StateError> {
        match self.get_kind(arg, ArgumentType::Secret)? {
            StateValue::Secret(v) => Ok(v),
            other => Err(mismatch(arg, ArgumentType::Secret, other.kind())),
        }
    }

    fn set_secret(&self, arg: &Argument, value: &str) -> Result<(), StateError> {
        self.set(arg, StateValue::Secret(value.to_string()))
    }

    /// Fetch a value and make sure it is of `expected` kind
    fn get_kind(&self, arg: &Argument, expected: ArgumentType) -> Result<StateValue, StateError> {
        let value = self.get(arg)?;
        if value.kind() != expected {
            return Err(mismatch(arg, expected, value.kind()));
        }
        Ok(value)
    }
}

fn mismatch(arg: &Argument, expected: ArgumentType, found: ArgumentType) -> StateError {
    StateError::KindMismatch {
        key: arg.key.to_string(),
        expected,
        found,
    }
}

/// In-process state shared by every step of a local run
#[derive(Default)]
pub struct InMemoryState {
    values: RwLock<HashMap<String, StateValue>>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateHandler for InMemoryState {
    fn get(&self, arg: &Argument) -> Result<StateValue, StateError> {
        self.values
            .read()
            .get(arg.key.as_ref())
            .cloned()
            .ok_or_else(|| StateError::NotFound(arg.key.to_string()))
    }

    fn set(&self, arg: &Argument, value: StateValue) -> Result<(), StateError> {
        if value.kind() != arg.kind {
            return Err(mismatch(arg, arg.kind, value.kind()));
        }

        self.values.write().insert(arg.key.to_string(), value);
        Ok(())
    }

    fn exists(&self, arg: &Argument) -> bool {
        self.values.read().contains_key(arg.key.as_ref())
    }
}

impl fmt::Debug for InMemoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.values.read().iter()).finish()
    }
}
