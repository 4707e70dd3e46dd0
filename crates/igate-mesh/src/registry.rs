//! Live node identity cache
//!
//! The registry tracks what the mesh has told us about each node: names,
//! hardware, role, last position. It is mutated by the interpreter on every
//! NodeInfo/MyInfo/decoded-position event and only ever cleared by an
//! explicit operator reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MeshError, Result};
use igate_proto::proto;

/// A mesh node number.
///
/// The canonical textual form is `!` followed by 8 lowercase hex digits,
/// matching what devices print and what the backend mapping table uses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The broadcast pseudo-address
    pub const BROADCAST: NodeId = NodeId(0xFFFF_FFFF);

    /// Canonical mesh id string (`!` + 8 lowercase hex digits)
    pub fn mesh_id(&self) -> String {
        format!("!{:08x}", self.0)
    }

    /// Parse a canonical mesh id string
    pub fn parse(s: &str) -> Result<NodeId> {
        let hex = s
            .strip_prefix('!')
            .ok_or_else(|| MeshError::InvalidMeshId(s.to_string()))?;
        if hex.len() != 8 {
            return Err(MeshError::InvalidMeshId(s.to_string()));
        }
        u32::from_str_radix(hex, 16)
            .map(NodeId)
            .map_err(|_| MeshError::InvalidMeshId(s.to_string()))
    }

    /// Low byte of the node number, the only part some relay fields carry
    pub fn low_byte(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Whether this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mesh_id())
    }
}

/// Last known position of a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastPosition {
    /// Latitude, degrees
    pub latitude: f64,
    /// Longitude, degrees
    pub longitude: f64,
    /// Altitude above MSL, meters
    pub altitude: Option<i32>,
}

/// Identity cache entry for one mesh node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node number
    pub id: NodeId,
    /// Short display name (up to 4 chars)
    pub short_name: Option<String>,
    /// Full display name
    pub long_name: Option<String>,
    /// Hardware model code
    pub hw_model: Option<i32>,
    /// Device role code
    pub role: Option<i32>,
    /// When the node was last heard
    pub last_seen: DateTime<Utc>,
    /// Last decoded position, if any
    pub last_position: Option<LastPosition>,
}

impl NodeRecord {
    fn new(id: NodeId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            short_name: None,
            long_name: None,
            hw_model: None,
            role: None,
            last_seen: now,
            last_position: None,
        }
    }

    /// Display label: `"{long or short name} ({mesh id})"`, falling back to
    /// the bare mesh id when no name is known.
    pub fn label(&self) -> String {
        let name = self
            .long_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.short_name.as_deref().filter(|s| !s.is_empty()));
        match name {
            Some(name) => format!("{} ({})", name, self.id.mesh_id()),
            None => self.id.mesh_id(),
        }
    }

    /// Whether a full identity record (a name) has been received
    pub fn has_identity(&self) -> bool {
        self.long_name.as_deref().is_some_and(|s| !s.is_empty())
            || self.short_name.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// In-memory node identity cache keyed by node number
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, NodeRecord>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted records
    pub fn from_records(records: Vec<NodeRecord>) -> Self {
        Self {
            nodes: records.into_iter().map(|r| (r.id, r)).collect(),
        }
    }

    /// Apply a user (identity) record, returning the updated entry
    pub fn apply_user(&mut self, id: NodeId, user: &proto::User, now: DateTime<Utc>) -> &NodeRecord {
        let entry = self
            .nodes
            .entry(id)
            .or_insert_with(|| NodeRecord::new(id, now));
        if !user.long_name.is_empty() {
            entry.long_name = Some(user.long_name.clone());
        }
        if !user.short_name.is_empty() {
            entry.short_name = Some(user.short_name.clone());
        }
        entry.hw_model = Some(user.hw_model);
        entry.role = Some(user.role);
        entry.last_seen = now;
        entry
    }

    /// Record a decoded position for a node
    pub fn apply_position(
        &mut self,
        id: NodeId,
        position: LastPosition,
        now: DateTime<Utc>,
    ) -> &NodeRecord {
        let entry = self
            .nodes
            .entry(id)
            .or_insert_with(|| NodeRecord::new(id, now));
        entry.last_position = Some(position);
        entry.last_seen = now;
        entry
    }

    /// Bump a node's last-seen time without changing identity data
    pub fn touch(&mut self, id: NodeId, now: DateTime<Utc>) {
        let entry = self
            .nodes
            .entry(id)
            .or_insert_with(|| NodeRecord::new(id, now));
        entry.last_seen = now;
    }

    /// Look up a node record
    pub fn get(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    /// Whether a node has a full identity record (names known)
    pub fn has_identity(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(NodeRecord::has_identity)
    }

    /// Display label for a node, falling back to the bare mesh id
    pub fn label(&self, id: NodeId) -> String {
        match self.nodes.get(&id) {
            Some(record) => record.label(),
            None => id.mesh_id(),
        }
    }

    /// Node numbers whose low byte matches `tail`
    pub fn ids_with_low_byte(&self, tail: u8) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .keys()
            .copied()
            .filter(|id| id.low_byte() == tail)
            .collect();
        ids.sort();
        ids
    }

    /// All records, for persistence and snapshots
    pub fn records(&self) -> Vec<NodeRecord> {
        let mut records: Vec<NodeRecord> = self.nodes.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Number of known nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Operator reset: forget every node
    pub fn reset(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(long: &str, short: &str) -> proto::User {
        proto::User {
            id: String::new(),
            long_name: long.to_string(),
            short_name: short.to_string(),
            hw_model: 9,
            is_licensed: false,
            role: 1,
        }
    }

    #[test]
    fn mesh_id_formatting_and_parsing() {
        let id = NodeId(0x0A1B_2C3D);
        assert_eq!(id.mesh_id(), "!0a1b2c3d");
        assert_eq!(NodeId::parse("!0a1b2c3d").unwrap(), id);
        assert!(NodeId::parse("0a1b2c3d").is_err());
        assert!(NodeId::parse("!xyz").is_err());
        assert_eq!(id.low_byte(), 0x3D);
    }

    #[test]
    fn label_prefers_long_name() {
        let mut reg = NodeRegistry::new();
        let id = NodeId(0x1234_5678);
        reg.apply_user(id, &user("Basecamp", "BC"), Utc::now());
        assert_eq!(reg.label(id), "Basecamp (!12345678)");
    }

    #[test]
    fn label_falls_back_to_short_name_then_id() {
        let mut reg = NodeRegistry::new();
        let id = NodeId(0x1234_5678);
        reg.apply_user(id, &user("", "BC"), Utc::now());
        assert_eq!(reg.label(id), "BC (!12345678)");

        let unknown = NodeId(0xDEAD_BEEF);
        assert_eq!(reg.label(unknown), "!deadbeef");
    }

    #[test]
    fn position_updates_do_not_clobber_identity() {
        let mut reg = NodeRegistry::new();
        let id = NodeId(7);
        reg.apply_user(id, &user("Node Seven", "N7"), Utc::now());
        reg.apply_position(
            id,
            LastPosition {
                latitude: 47.6,
                longitude: -122.3,
                altitude: Some(80),
            },
            Utc::now(),
        );

        let record = reg.get(id).unwrap();
        assert_eq!(record.long_name.as_deref(), Some("Node Seven"));
        assert!(record.last_position.is_some());
    }

    #[test]
    fn low_byte_lookup() {
        let mut reg = NodeRegistry::new();
        reg.touch(NodeId(0x0000_0042), Utc::now());
        reg.touch(NodeId(0x1111_1142), Utc::now());
        reg.touch(NodeId(0x0000_0099), Utc::now());

        let hits = reg.ids_with_low_byte(0x42);
        assert_eq!(hits, vec![NodeId(0x0000_0042), NodeId(0x1111_1142)]);
    }

    #[test]
    fn records_roundtrip() {
        let mut reg = NodeRegistry::new();
        reg.apply_user(NodeId(1), &user("One", "1"), Utc::now());
        reg.apply_user(NodeId(2), &user("Two", "2"), Utc::now());

        let rebuilt = NodeRegistry::from_records(reg.records());
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt.label(NodeId(1)), "One (!00000001)");
    }

    #[test]
    fn reset_clears_everything() {
        let mut reg = NodeRegistry::new();
        reg.touch(NodeId(1), Utc::now());
        assert!(!reg.is_empty());
        reg.reset();
        assert!(reg.is_empty());
    }
}
