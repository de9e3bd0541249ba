//! Backup manifest stored next to each uploaded archive.

use super::archive::Compression;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MANIFEST_VERSION: &str = "1.0.0";
pub const DATABASE_TYPE: &str = "badgerdb";
pub const DATA_CHECKSUM: &str = "data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionInfo {
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
}

impl EncryptionInfo {
    pub fn age(recipients: &[String]) -> Self {
        Self {
            algorithm: "age-x25519".to_string(),
            key_id: recipients.first().cloned(),
            recipients: recipients.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub version: String,
    pub node_id: String,
    pub node_name: String,
    pub network: String,
    pub timestamp: DateTime<Utc>,
    pub checksums: BTreeMap<String, String>,
    pub database_type: String,
    pub incremental: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
    pub latest_version: u64,
    pub wallet_count: usize,
    pub key_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub size: u64,
    /// Storage folder name, filled in when listing.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl BackupManifest {
    pub fn new(node_id: &str, node_name: &str, network: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            network: network.to_string(),
            timestamp,
            checksums: BTreeMap::new(),
            database_type: DATABASE_TYPE.to_string(),
            incremental: false,
            base_version: None,
            latest_version: timestamp.timestamp().max(0) as u64,
            wallet_count: 0,
            key_count: 0,
            encryption: None,
            metadata: BTreeMap::new(),
            compression: Compression::Zstd,
            size: 0,
            name: String::new(),
        }
    }

    pub fn data_checksum(&self) -> Option<&str> {
        self.checksums
            .get(DATA_CHECKSUM)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_manifest_json_shape() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let mut manifest = BackupManifest::new("abc123", "mpc-node-1", "devnet", ts);
        manifest
            .checksums
            .insert(DATA_CHECKSUM.to_string(), "deadbeef".to_string());
        manifest.encryption = Some(EncryptionInfo::age(&["age1example".to_string()]));

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["version"], "1.0.0");
        assert_eq!(json["nodeId"], "abc123");
        assert_eq!(json["databaseType"], "badgerdb");
        assert_eq!(json["checksums"]["data"], "deadbeef");
        assert_eq!(json["encryption"]["algorithm"], "age-x25519");
        assert_eq!(json["latestVersion"], ts.timestamp());
        assert!(json.get("baseVersion").is_none());
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_reads_manifest_without_optional_fields() {
        let raw = r#"{
            "version": "1.0.0", "nodeId": "n", "nodeName": "mpc-node-1", "network": "testnet",
            "timestamp": "2025-01-02T03:04:05Z", "checksums": {"data": ""},
            "databaseType": "badgerdb", "incremental": false, "latestVersion": 0,
            "walletCount": 0, "keyCount": 0
        }"#;
        let manifest: BackupManifest = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.data_checksum(), None);
        assert!(!manifest.is_encrypted());
        assert_eq!(manifest.compression, Compression::Zstd);
    }
}
