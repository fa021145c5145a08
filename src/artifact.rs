//! Normalized artifact records handed over by the external extractors.

use crate::error::{DeepScanError, Result};
use crate::time;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Upper bound on a byte fragment carried by a record
pub const MAX_BYTE_FRAGMENT: usize = 4096;

/// Identifies an artifact type in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub u16);

/// Index of a record inside the record list of one search session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordRef(pub usize);

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record#{}", self.0)
    }
}

/// One extracted artifact occurrence. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub artifact_id: ArtifactId,
    pub source_path: PathBuf,
    /// `None` when the extractor could not produce a valid instant; such a
    /// record never takes part in time-window matching.
    pub timestamp_utc: Option<DateTime<Utc>>,
    #[serde(default, with = "hex_bytes")]
    pub byte_fragment: Vec<u8>,
    #[serde(default)]
    pub text_fragment: String,
}

impl ArtifactRecord {
    pub fn new(
        artifact_id: ArtifactId,
        source_path: impl Into<PathBuf>,
        timestamp_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            artifact_id,
            source_path: source_path.into(),
            timestamp_utc: Some(timestamp_utc),
            byte_fragment: Vec::new(),
            text_fragment: String::new(),
        }
    }

    /// Build a record from a local wall-clock time in the device's zone.
    pub fn from_local(
        artifact_id: ArtifactId,
        source_path: impl Into<PathBuf>,
        local: NaiveDateTime,
        zone: Tz,
    ) -> Result<Self> {
        Ok(Self::new(artifact_id, source_path, time::to_utc(local, zone)?))
    }

    /// A record whose timestamp could not be recovered.
    pub fn without_timestamp(artifact_id: ArtifactId, source_path: impl Into<PathBuf>) -> Self {
        Self {
            artifact_id,
            source_path: source_path.into(),
            timestamp_utc: None,
            byte_fragment: Vec::new(),
            text_fragment: String::new(),
        }
    }

    /// Attach a byte fragment, truncated to [`MAX_BYTE_FRAGMENT`].
    pub fn with_bytes(mut self, fragment: impl Into<Vec<u8>>) -> Self {
        let mut fragment = fragment.into();
        fragment.truncate(MAX_BYTE_FRAGMENT);
        self.byte_fragment = fragment;
        self
    }

    pub fn with_text(mut self, fragment: impl Into<String>) -> Self {
        self.text_fragment = fragment.into();
        self
    }

    pub fn has_fragments(&self) -> bool {
        !self.byte_fragment.is_empty() || !self.text_fragment.is_empty()
    }
}

/// Artifact type catalog (id -> name). Opaque metadata for presentation and
/// timeline labeling; matching never looks at it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCatalog {
    entries: BTreeMap<ArtifactId, String>,
}

impl ArtifactCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The artifact types the extractors ship with.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for (id, name) in [
            (1, "bootstat"),
            (2, "recovery.log"),
            (3, "last_install"),
            (4, "suggestions.xml"),
            (5, "persistent_properties"),
            (6, "settings_secure.xml"),
            (7, "usagestats"),
            (8, "setupwizard"),
            (9, "dropbox"),
            (10, "logd"),
            (11, "WifiConfigStore.xml"),
            (12, "accounts.db"),
        ] {
            catalog.insert(ArtifactId(id), name);
        }
        catalog
    }

    pub fn insert(&mut self, id: ArtifactId, name: impl Into<String>) {
        self.entries.insert(id, name.into());
    }

    pub fn name(&self, id: ArtifactId) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode a hex byte fragment; whitespace between digits is ignored.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    hex_bytes::decode(text).map_err(DeepScanError::Decode)
}

/// Byte fragments travel as hex strings in JSON.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode(&text).map_err(serde::de::Error::custom)
    }

    pub fn decode(text: &str) -> Result<Vec<u8>, String> {
        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if !cleaned.is_ascii() {
            return Err(format!("non-hex characters in '{}'", text));
        }
        if cleaned.len() % 2 != 0 {
            return Err(format!("odd-length hex string '{}'", text));
        }
        (0..cleaned.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&cleaned[i..i + 2], 16)
                    .map_err(|e| format!("invalid hex '{}': {}", &cleaned[i..i + 2], e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn test_from_local_normalizes_to_utc() {
        let local = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let record = ArtifactRecord::from_local(
            ArtifactId(1),
            "/data/misc/bootstat/factory_reset",
            local,
            chrono_tz::Asia::Seoul,
        )
        .unwrap();
        assert_eq!(
            record.timestamp_utc,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_byte_fragment_is_bounded() {
        let record = ArtifactRecord::without_timestamp(ArtifactId(2), "recovery.log")
            .with_bytes(vec![0xAA; MAX_BYTE_FRAGMENT + 10]);
        assert_eq!(record.byte_fragment.len(), MAX_BYTE_FRAGMENT);
        assert!(record.has_fragments());
        assert!(!ArtifactRecord::without_timestamp(ArtifactId(2), "x").has_fragments());
    }

    #[test]
    fn test_record_json_uses_hex_fragment() {
        let record = ArtifactRecord::new(
            ArtifactId(1),
            "bootstat",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .with_bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["byte_fragment"], "deadbeef");

        let parsed: ArtifactRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_hex_decode_rejects_garbage() {
        assert!(hex_bytes::decode("abc").is_err());
        assert!(hex_bytes::decode("zz").is_err());
        assert!(parse_hex("aéa").is_err());
        assert_eq!(hex_bytes::decode("de ad").unwrap(), vec![0xDE, 0xAD]);
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = ArtifactCatalog::builtin();
        assert_eq!(catalog.name(ArtifactId(1)), Some("bootstat"));
        assert_eq!(catalog.name(ArtifactId(999)), None);
        assert_eq!(catalog.len(), 12);
    }
}
