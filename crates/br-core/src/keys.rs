//! Raw key helpers
//!
//! Keys travel as raw bytes inside the process and as hex strings in JSON
//! documents and log lines.

/// Format a raw key for logging (upper-case hex, empty key shown as `""`)
pub fn format_key(key: &[u8]) -> String {
    if key.is_empty() {
        "\"\"".to_string()
    } else {
        hex::encode_upper(key)
    }
}

/// Serde adapter storing `Vec<u8>` as a hex string
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.as_str()).map_err(serde::de::Error::custom)
    }
}
