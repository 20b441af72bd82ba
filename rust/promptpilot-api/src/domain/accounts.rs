//! License account models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One licensed installation of the browser extension.
///
/// The plaintext license key is never stored; only its SHA-256 digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseAccount {
    /// Unique account ID.
    pub id: i64,
    /// SHA-256 hex digest of the license key.
    pub key_hash: String,
    /// Optional operator-facing label.
    pub label: Option<String>,
    /// Inactive accounts fail validation and their schedules are skipped.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// SHA-256 hex digest of a plaintext license key.
#[must_use]
pub fn hash_license_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_license_key("test"),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn test_hash_is_deterministic_and_key_sensitive() {
        assert_eq!(hash_license_key("pp-key-1"), hash_license_key("pp-key-1"));
        assert_ne!(hash_license_key("pp-key-1"), hash_license_key("pp-key-2"));
    }
}
