//! Entry point shapes.
//!
//! Bundlers accept an entry as a single module path, an ordered list of
//! module paths, or a map of named bundles whose values are either of the
//! first two. Anything else is rejected rather than dropped.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::{json_kind, ConfigurationError, Result};

/// The value of one named bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EntryPoint {
    Single(String),
    List(Vec<String>),
}

impl EntryPoint {
    /// Module paths in declaration order.
    pub fn modules(&self) -> Vec<&str> {
        match self {
            EntryPoint::Single(module) => vec![module.as_str()],
            EntryPoint::List(modules) => modules.iter().map(String::as_str).collect(),
        }
    }

    pub fn into_modules(self) -> Vec<String> {
        match self {
            EntryPoint::Single(module) => vec![module],
            EntryPoint::List(modules) => modules,
        }
    }
}

/// The `entry` field of a build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Entry {
    Single(String),
    List(Vec<String>),
    Named(IndexMap<String, EntryPoint>),
}

impl Entry {
    /// Parse the raw `entry` value.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(module) => Ok(Entry::Single(module.clone())),
            Value::Array(items) => Ok(Entry::List(parse_list(items, None)?)),
            Value::Object(bundles) => {
                let mut named = IndexMap::with_capacity(bundles.len());
                for (name, value) in bundles {
                    let point = match value {
                        Value::String(module) => EntryPoint::Single(module.clone()),
                        Value::Array(items) => EntryPoint::List(parse_list(items, Some(name))?),
                        other => {
                            return Err(ConfigurationError::UnrecognizedEntry {
                                bundle: Some(name.clone()),
                                found: json_kind(other),
                            });
                        }
                    };
                    named.insert(name.clone(), point);
                }
                Ok(Entry::Named(named))
            }
            other => Err(ConfigurationError::UnrecognizedEntry {
                bundle: None,
                found: json_kind(other),
            }),
        }
    }

    /// Every module referenced by the entry, bundles in declaration order.
    pub fn modules(&self) -> Vec<&str> {
        match self {
            Entry::Single(module) => vec![module.as_str()],
            Entry::List(modules) => modules.iter().map(String::as_str).collect(),
            Entry::Named(bundles) => bundles.values().flat_map(EntryPoint::modules).collect(),
        }
    }
}

fn parse_list(items: &[Value], bundle: Option<&String>) -> Result<Vec<String>> {
    items
        .iter()
        .map(|item| match item {
            Value::String(module) => Ok(module.clone()),
            other => Err(ConfigurationError::UnrecognizedEntry {
                bundle: bundle.cloned(),
                found: json_kind(other),
            }),
        })
        .collect()
}
