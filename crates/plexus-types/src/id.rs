//! Module identifiers.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// Recipient name that fans a message out to every long-poll UI client.
pub const RPC_RECIPIENT: &str = "rpc";

/// Prefix carried by the subscription ids of long-poll UI clients.
pub const RPC_CLIENT_PREFIX: &str = "rpc-";

/// Identifier of a module (and of its mailbox on the bus).
///
/// Module ids are plain strings (e.g. `"audio"`, `"rpc-3f2a"`). The newtype
/// borrows as `str`, so maps keyed by `ModuleId` can be queried with `&str`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id is the `"rpc"` fan-out recipient.
    pub fn is_rpc_fanout(&self) -> bool {
        self.0 == RPC_RECIPIENT
    }

    /// Whether this id belongs to a long-poll UI client subscription.
    pub fn is_rpc_client(&self) -> bool {
        self.0.starts_with(RPC_CLIENT_PREFIX)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&ModuleId> for ModuleId {
    fn from(value: &ModuleId) -> Self {
        value.clone()
    }
}

impl AsRef<str> for ModuleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ModuleId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ModuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ModuleId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ModuleId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn rpc_predicates() {
        assert!(ModuleId::from("rpc").is_rpc_fanout());
        assert!(!ModuleId::from("rpc").is_rpc_client());
        assert!(ModuleId::from("rpc-1234").is_rpc_client());
        assert!(!ModuleId::from("audio").is_rpc_client());
    }

    #[test]
    fn map_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(ModuleId::from("audio"), 1);
        assert_eq!(map.get("audio"), Some(&1));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ModuleId::from("network");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"network\"");
        assert_eq!(id.to_string(), "network");
    }
}
