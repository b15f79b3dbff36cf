//! Trigger events and their filters
//!
//! Events are declarations only: they say which triggers a pipeline reacts to
//! and which arguments the trigger makes available. Matching filters against a
//! real trigger is left to whichever client runs the pipeline remotely.

use crate::core::argument::{
    Argument, ARGUMENT_BRANCH, ARGUMENT_COMMIT_REF, ARGUMENT_COMMIT_SHA, ARGUMENT_REMOTE_URL,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

pub const EVENT_GIT_COMMIT: &str = "git-commit";
pub const EVENT_GIT_TAG: &str = "git-tag";
pub const EVENT_PULL_REQUEST: &str = "pull-request";

/// A value to filter an event field by
#[derive(Debug, Clone)]
pub enum FilterValue {
    String(String),
    Regex(Regex),
    Glob(String),
}

impl FilterValue {
    pub fn string(value: impl Into<String>) -> Self {
        FilterValue::String(value.into())
    }

    pub fn glob(pattern: impl Into<String>) -> Self {
        FilterValue::Glob(pattern.into())
    }

    /// Compile a regex filter
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(FilterValue::Regex(Regex::new(pattern)?))
    }

    pub fn as_str(&self) -> &str {
        match self {
            FilterValue::String(s) | FilterValue::Glob(s) => s,
            FilterValue::Regex(r) => r.as_str(),
        }
    }
}

impl PartialEq for FilterValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FilterValue::String(a), FilterValue::String(b)) => a == b,
            (FilterValue::Glob(a), FilterValue::Glob(b)) => a == b,
            (FilterValue::Regex(a), FilterValue::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trigger that causes a pipeline to run
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub filters: BTreeMap<String, FilterValue>,

    /// Arguments that are available before the first step runs when this
    /// event triggers the pipeline
    pub provides: Vec<Argument>,
}

impl Event {
    /// Structural checks only; filters are never evaluated here
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("event name must not be empty".to_string());
        }

        for (key, value) in &self.filters {
            if key.trim().is_empty() {
                return Err(format!("event '{}' has a filter without a name", self.name));
            }
            if let FilterValue::String(v) | FilterValue::Glob(v) = value {
                if v.is_empty() {
                    return Err(format!("filter '{}' of event '{}' is empty", key, self.name));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct GitCommitFilters {
    pub branch: Option<FilterValue>,
}

#[derive(Debug, Clone, Default)]
pub struct GitTagFilters {
    pub name: Option<FilterValue>,
}

#[derive(Debug, Clone, Default)]
pub struct PullRequestFilters;

pub fn git_commit_event(filters: GitCommitFilters) -> Event {
    let mut f = BTreeMap::new();
    if let Some(branch) = filters.branch {
        f.insert("branch".to_string(), branch);
    }

    Event {
        name: EVENT_GIT_COMMIT.to_string(),
        filters: f,
        provides: vec![ARGUMENT_COMMIT_SHA, ARGUMENT_BRANCH, ARGUMENT_REMOTE_URL],
    }
}

pub fn git_tag_event(filters: GitTagFilters) -> Event {
    let mut f = BTreeMap::new();
    if let Some(name) = filters.name {
        f.insert("tag".to_string(), name);
    }

    Event {
        name: EVENT_GIT_TAG.to_string(),
        filters: f,
        provides: vec![ARGUMENT_COMMIT_SHA, ARGUMENT_COMMIT_REF, ARGUMENT_REMOTE_URL],
    }
}

pub fn pull_request_event(_filters: PullRequestFilters) -> Event {
    Event {
        name: EVENT_PULL_REQUEST.to_string(),
        filters: BTreeMap::new(),
        provides: Vec::new(),
    }
}
