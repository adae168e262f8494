//! Dynamic configuration trees used as actor message payloads.
//!
//! A [`ConfigNode`] is a tagged sum over the shapes a message can take:
//! dictionaries, arrays, integers, floats, strings and booleans. Accessors
//! are fallible; the `*_or` helpers recover from a missing key or a shape
//! mismatch by returning a caller-supplied default.
//!
//! The binary wire form lives in [`wire`]; nodes travel between actor
//! systems in that encoding.
//!
//! # Example
//! ```rust
//! use floe::config::ConfigNode;
//!
//! let mut msg = ConfigNode::dict();
//! msg.set("op", "scale");
//! msg.set("factor", 3i64);
//!
//! assert_eq!(msg.int_or("factor", 1), 3);
//! assert_eq!(msg.int_or("offset", 0), 0);
//! assert_eq!(msg.str_or("op", ""), "scale");
//! ```
pub mod wire;

use thiserror::Error;

/// List of possible errors raised when accessing or decoding a config tree.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no entry for key '{0}'")]
    MissingKey(String),
    #[error("index {index} out of range (len {len})")]
    MissingIndex { index: usize, len: usize },
    #[error("expected a {expected} node")]
    WrongShape { expected: &'static str },
    #[error("malformed config data: {0}")]
    Malformed(&'static str),
    #[error("config data exceeds limits: {0}")]
    TooLarge(&'static str),
}

/// A dynamically shaped configuration value.
///
/// Dictionaries preserve insertion order; [`set`](Self::set) replaces an
/// existing entry in place.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
    Dict(Vec<(String, ConfigNode)>),
    Array(Vec<ConfigNode>),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl ConfigNode {
    /// An empty dictionary node.
    pub fn dict() -> Self {
        ConfigNode::Dict(Vec::new())
    }

    /// An empty array node.
    pub fn array() -> Self {
        ConfigNode::Array(Vec::new())
    }

    /// Insert or replace `key` in a dictionary node.
    ///
    /// Has no effect on non-dictionary nodes.
    pub fn set(&mut self, key: &str, value: impl Into<ConfigNode>) {
        if let ConfigNode::Dict(entries) = self {
            let value = value.into();
            if let Some(entry) = entries.iter_mut().find(|(k, _)| k == key) {
                entry.1 = value;
            } else {
                entries.push((key.to_string(), value));
            }
        }
    }

    /// Append a value to an array node.
    ///
    /// Has no effect on non-array nodes.
    pub fn push(&mut self, value: impl Into<ConfigNode>) {
        if let ConfigNode::Array(items) = self {
            items.push(value.into());
        }
    }

    /// Look up `key` in a dictionary node.
    pub fn get(&self, key: &str) -> Result<&ConfigNode, ConfigError> {
        match self {
            ConfigNode::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v)
                .ok_or_else(|| ConfigError::MissingKey(key.to_string())),
            _ => Err(ConfigError::WrongShape { expected: "dict" }),
        }
    }

    /// Access index `i` of an array node.
    pub fn index(&self, i: usize) -> Result<&ConfigNode, ConfigError> {
        match self {
            ConfigNode::Array(items) => items.get(i).ok_or(ConfigError::MissingIndex {
                index: i,
                len: items.len(),
            }),
            _ => Err(ConfigError::WrongShape { expected: "array" }),
        }
    }

    /// True if the node contains `key`.
    pub fn contains(&self, key: &str) -> bool {
        matches!(self, ConfigNode::Dict(entries) if entries.iter().any(|(k, _)| k == key))
    }

    /// Number of entries in a container node, 0 otherwise.
    pub fn len(&self) -> usize {
        match self {
            ConfigNode::Dict(entries) => entries.len(),
            ConfigNode::Array(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_int(&self) -> Result<i64, ConfigError> {
        match self {
            ConfigNode::Int(i) => Ok(*i),
            _ => Err(ConfigError::WrongShape { expected: "int" }),
        }
    }

    pub fn as_float(&self) -> Result<f64, ConfigError> {
        match self {
            ConfigNode::Float(f) => Ok(*f),
            ConfigNode::Int(i) => Ok(*i as f64),
            _ => Err(ConfigError::WrongShape { expected: "float" }),
        }
    }

    pub fn as_str(&self) -> Result<&str, ConfigError> {
        match self {
            ConfigNode::Str(s) => Ok(s),
            _ => Err(ConfigError::WrongShape { expected: "string" }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ConfigError> {
        match self {
            ConfigNode::Bool(b) => Ok(*b),
            _ => Err(ConfigError::WrongShape { expected: "bool" }),
        }
    }

    /// Integer at `key`, or `default` on absence or shape mismatch.
    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|n| n.as_int()).unwrap_or(default)
    }

    /// Float at `key`, or `default` on absence or shape mismatch.
    pub fn float_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(|n| n.as_float()).unwrap_or(default)
    }

    /// String at `key`, or `default` on absence or shape mismatch.
    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(|n| n.as_str().map(str::to_string))
            .unwrap_or_else(|_| default.to_string())
    }

    /// Boolean at `key`, or `default` on absence or shape mismatch.
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|n| n.as_bool()).unwrap_or(default)
    }
}

impl From<i64> for ConfigNode {
    fn from(value: i64) -> Self {
        ConfigNode::Int(value)
    }
}

impl From<i32> for ConfigNode {
    fn from(value: i32) -> Self {
        ConfigNode::Int(value as i64)
    }
}

impl From<f64> for ConfigNode {
    fn from(value: f64) -> Self {
        ConfigNode::Float(value)
    }
}

impl From<bool> for ConfigNode {
    fn from(value: bool) -> Self {
        ConfigNode::Bool(value)
    }
}

impl From<&str> for ConfigNode {
    fn from(value: &str) -> Self {
        ConfigNode::Str(value.to_string())
    }
}

impl From<String> for ConfigNode {
    fn from(value: String) -> Self {
        ConfigNode::Str(value)
    }
}
