//! Typed argument descriptors
//!
//! An [`Argument`] names a value that one step provides and others require.
//! Arguments are compared by key and kind only; two arguments declared in
//! unrelated places with the same key and kind are the same dependency.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// The kind of value an argument carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentType {
    String,
    Int64,
    Float64,
    Bool,
    File,
    Directory,
    /// A string that backends must never render in plaintext
    Secret,
}

impl fmt::Display for ArgumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgumentType::String => "string",
            ArgumentType::Int64 => "int64",
            ArgumentType::Float64 => "float64",
            ArgumentType::Bool => "bool",
            ArgumentType::File => "file",
            ArgumentType::Directory => "directory",
            ArgumentType::Secret => "secret",
        };
        f.write_str(name)
    }
}

/// A named, typed value that steps communicate through
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Argument {
    pub key: Cow<'static, str>,
    pub kind: ArgumentType,
}

impl Argument {
    pub fn new(key: impl Into<String>, kind: ArgumentType) -> Self {
        Self {
            key: Cow::Owned(key.into()),
            kind,
        }
    }

    /// Declare an argument in a `const`
    pub const fn from_static(key: &'static str, kind: ArgumentType) -> Self {
        Self {
            key: Cow::Borrowed(key),
            kind,
        }
    }

    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, ArgumentType::String)
    }

    pub fn int64(key: impl Into<String>) -> Self {
        Self::new(key, ArgumentType::Int64)
    }

    pub fn float64(key: impl Into<String>) -> Self {
        Self::new(key, ArgumentType::Float64)
    }

    pub fn bool(key: impl Into<String>) -> Self {
        Self::new(key, ArgumentType::Bool)
    }

    pub fn file(key: impl Into<String>) -> Self {
        Self::new(key, ArgumentType::File)
    }

    pub fn directory(key: impl Into<String>) -> Self {
        Self::new(key, ArgumentType::Directory)
    }

    pub fn secret(key: impl Into<String>) -> Self {
        Self::new(key, ArgumentType::Secret)
    }

    pub fn is_secret(&self) -> bool {
        self.kind == ArgumentType::Secret
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.kind)
    }
}

/// Commit SHA of the revision being built
pub const ARGUMENT_COMMIT_SHA: Argument = Argument::from_static("git-commit-sha", ArgumentType::String);

/// Full git ref, e.g. `refs/tags/v1.0.0`
pub const ARGUMENT_COMMIT_REF: Argument = Argument::from_static("git-commit-ref", ArgumentType::String);

pub const ARGUMENT_BRANCH: Argument = Argument::from_static("git-branch", ArgumentType::String);

pub const ARGUMENT_REMOTE_URL: Argument = Argument::from_static("remote-url", ArgumentType::String);

/// Directory holding the checked-out source tree
pub const ARGUMENT_SOURCE_FS: Argument = Argument::from_static("source", ArgumentType::Directory);

pub const ARGUMENT_DOCKER_SOCKET_FS: Argument = Argument::from_static("docker-socket", ArgumentType::File);

/// Identifier of the current run, unique per execution
pub const ARGUMENT_BUILD_ID: Argument = Argument::from_static("build-id", ArgumentType::String);

/// Arguments every built-in client makes available before the first step runs
pub fn client_provided_arguments() -> Vec<Argument> {
    vec![ARGUMENT_SOURCE_FS, ARGUMENT_DOCKER_SOCKET_FS, ARGUMENT_BUILD_ID]
}

/// Keys of a list of arguments, for messages
pub fn argument_keys(args: &[Argument]) -> Vec<&str> {
    args.iter().map(|a| a.key.as_ref()).collect()
}
