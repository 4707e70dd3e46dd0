//! Provisioning identity and the device→callsign mapping table
//!
//! Both records are owned by the backend: provisioning is replaced wholesale
//! whenever the heartbeat carries a new value, and the mapping table is
//! refreshed on a hash-mismatch response. Content hashes over normalized
//! JSON detect no-op updates so an unchanged push never tears anything down.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use igate_aprs::Symbol;

/// Backend-supplied station identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    /// Callsign base without SSID
    pub callsign: String,
    /// Optional SSID appended as `-N`
    #[serde(default)]
    pub ssid: Option<u8>,
    /// APRS symbol table or overlay character
    #[serde(default)]
    pub symbol_table: Option<char>,
    /// APRS symbol code
    #[serde(default)]
    pub symbol_code: Option<char>,
    /// Power-Height-Gain digits for the self beacon
    #[serde(default)]
    pub phg: Option<String>,
    /// Beacon comment text
    #[serde(default)]
    pub comment: Option<String>,
    /// Station latitude, degrees
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Station longitude, degrees
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Station altitude, meters
    #[serde(default)]
    pub altitude: Option<f64>,
}

impl ProvisioningRecord {
    /// Full APRS callsign: `BASE[-SSID]`
    pub fn aprs_callsign(&self) -> String {
        let base = self.callsign.to_ascii_uppercase();
        match self.ssid {
            Some(ssid) if ssid > 0 => format!("{}-{}", base, ssid),
            _ => base,
        }
    }

    /// Station symbol, falling back to the gateway default
    pub fn symbol(&self) -> Symbol {
        match (self.symbol_table, self.symbol_code) {
            (Some(table), Some(code)) => Symbol { table, code },
            _ => Symbol::default(),
        }
    }

    /// Station position when the backend supplied one
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// One mesh-id → callsign mapping entry from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Canonical mesh id (`!` + 8 lowercase hex digits)
    pub mesh_id: String,
    /// APRS callsign base for the mapped station
    pub callsign: String,
    /// Optional SSID appended as `-N`
    #[serde(default)]
    pub ssid: Option<u8>,
    /// Symbol table override
    #[serde(default)]
    pub symbol_table: Option<char>,
    /// Symbol code override
    #[serde(default)]
    pub symbol_code: Option<char>,
    /// Comment override for forwarded positions
    #[serde(default)]
    pub comment: Option<String>,
}

impl MappingEntry {
    /// Full APRS callsign: `BASE[-SSID]`
    pub fn aprs_callsign(&self) -> String {
        let base = self.callsign.to_ascii_uppercase();
        match self.ssid {
            Some(ssid) if ssid > 0 => format!("{}-{}", base, ssid),
            _ => base,
        }
    }

    /// Symbol override, when both halves are present
    pub fn symbol(&self) -> Option<Symbol> {
        match (self.symbol_table, self.symbol_code) {
            (Some(table), Some(code)) => Some(Symbol { table, code }),
            _ => None,
        }
    }
}

/// Content hash of a serializable value over normalized JSON.
///
/// serde_json sorts object keys, so serializing a `Value` round-trip yields
/// a canonical byte string independent of the producer's field order.
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let normalized = serde_json::to_value(value)
        .and_then(|v| serde_json::to_string(&v))
        .unwrap_or_default();
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ProvisioningRecord {
        ProvisioningRecord {
            callsign: "n0call".to_string(),
            ssid: Some(10),
            symbol_table: Some('/'),
            symbol_code: Some('&'),
            phg: Some("2360".to_string()),
            comment: Some("mesh gateway".to_string()),
            latitude: Some(25.033),
            longitude: Some(121.565),
            altitude: Some(40.0),
        }
    }

    #[test]
    fn callsign_derivation() {
        assert_eq!(record().aprs_callsign(), "N0CALL-10");

        let bare = ProvisioningRecord {
            ssid: None,
            ..record()
        };
        assert_eq!(bare.aprs_callsign(), "N0CALL");

        let zero = ProvisioningRecord {
            ssid: Some(0),
            ..record()
        };
        assert_eq!(zero.aprs_callsign(), "N0CALL");
    }

    #[test]
    fn symbol_falls_back_to_default() {
        assert_eq!(record().symbol(), Symbol { table: '/', code: '&' });

        let bare = ProvisioningRecord {
            symbol_code: None,
            ..record()
        };
        assert_eq!(bare.symbol(), Symbol::default());
    }

    #[test]
    fn hash_ignores_field_order() {
        let a: serde_json::Value = json!({"callsign": "N0CALL", "ssid": 10});
        let b: serde_json::Value =
            serde_json::from_str(r#"{"ssid": 10, "callsign": "N0CALL"}"#).unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_detects_changes() {
        let a = record();
        let mut b = record();
        assert_eq!(content_hash(&a), content_hash(&b));

        b.comment = Some("different".to_string());
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn mapping_deserializes_with_sparse_fields() {
        let entry: MappingEntry = serde_json::from_value(json!({
            "mesh_id": "!0a1b2c3d",
            "callsign": "kd8abc",
        }))
        .unwrap();
        assert_eq!(entry.aprs_callsign(), "KD8ABC");
        assert!(entry.symbol().is_none());
    }
}
