//! Typed attributes attached to the server and to each connection.
//!
//! Keys come from a small closed set plus a `Custom` escape hatch, values are
//! text, integers or flags. Server attributes are frozen inside
//! [`ServerConfiguration`](super::options::ServerConfiguration); connection
//! attributes are copied out of the defaults when a connection is accepted.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Attribute key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeKey {
    /// Human readable server name
    ServerName,
    /// Identifier handed to every client connection
    ClientId,
    Custom(String),
}

impl AttributeKey {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ServerName => "server_name",
            Self::ClientId => "client_id",
            Self::Custom(name) => name,
        }
    }
}

impl FromStr for AttributeKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Flag(bool),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub const fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Flag(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

/// Ordered attribute map. Cloning produces an independent copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: BTreeMap<AttributeKey, AttributeValue>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &AttributeKey) -> Option<&AttributeValue> {
        self.entries.get(key)
    }

    /// Returns the previous value for `key`, if any.
    pub fn insert(
        &mut self,
        key: AttributeKey,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.entries.insert(key, value.into())
    }

    pub fn remove(&mut self, key: &AttributeKey) -> Option<AttributeValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<AttributeKey>,
    V: Into<AttributeValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl From<&str> for AttributeKey {
    fn from(value: &str) -> Self {
        match value {
            "server_name" | "serverName" => Self::ServerName,
            "client_id" | "clientId" => Self::ClientId,
            other => Self::Custom(other.to_string()),
        }
    }
}
