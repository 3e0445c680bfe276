use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Selector part of a node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(Uuid),
    Opaque(Vec<u8>),
}

/// Renders the selector in the usual `i=` / `s=` / `g=` / `b=` text form.
/// Opaque identifiers are rendered as lowercase hex.
impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(v) => write!(f, "i={v}"),
            Identifier::String(v) => write!(f, "s={v}"),
            Identifier::Guid(v) => write!(f, "g={v}"),
            Identifier::Opaque(v) => write!(f, "b={}", hex::encode(v)),
        }
    }
}

/// Fully resolved node address on a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAddress {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeAddress {
    #[inline]
    pub fn new(namespace: u16, identifier: Identifier) -> Self {
        Self {
            namespace,
            identifier,
        }
    }

    #[inline]
    pub fn numeric(namespace: u16, value: u32) -> Self {
        Self::new(namespace, Identifier::Numeric(value))
    }

    #[inline]
    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self::new(namespace, Identifier::String(value.into()))
    }

    /// Key under which values for this node are cached.
    ///
    /// Only the identifier takes part: the namespace index of a node can be renumbered
    /// by the server across reconnects while the identifier stays stable.
    #[inline]
    pub fn cache_key(&self) -> String {
        self.identifier.to_string()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};{}", self.namespace, self.identifier)
    }
}
