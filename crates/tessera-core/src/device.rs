//! Placement targets for data and computation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a placement target: a node, its address or resource key, the
/// kind of device and a slot on that node.
///
/// Device ids are created once when a backend enumerates its resources and
/// are used as map keys wherever placement decisions are made.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId {
    /// Index of the node in the backend's device list.
    pub node_index: usize,
    /// Node address, host name, or scheduler resource tag.
    pub node_key: String,
    /// Device kind, e.g. `"cpu"`.
    pub device_kind: String,
    /// Slot on the node (rank for message-passing backends).
    pub device_slot: usize,
}

impl DeviceId {
    pub fn new(
        node_index: usize,
        node_key: impl Into<String>,
        device_kind: impl Into<String>,
        device_slot: usize,
    ) -> Self {
        Self {
            node_index,
            node_key: node_key.into(),
            device_kind: device_kind.into(),
            device_slot,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            self.node_index, self.node_key, self.device_kind, self.device_slot
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_structural_equality_and_hashing() {
        let a = DeviceId::new(1, "node:10.0.0.2", "cpu", 1);
        let b = DeviceId::new(1, "node:10.0.0.2", "cpu", 1);
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, "worker");
        assert_eq!(map.get(&b), Some(&"worker"));
        assert!(!map.contains_key(&DeviceId::new(1, "node:10.0.0.2", "cpu", 2)));
    }

    #[test]
    fn test_display() {
        let d = DeviceId::new(0, "localhost", "cpu", 0);
        assert_eq!(d.to_string(), "0/localhost/cpu:0");
    }
}
