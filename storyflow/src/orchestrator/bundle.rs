//! Portable save bundles.

use crate::errors::ImportError;
use crate::store::StoreTables;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Current bundle format.
pub const FORMAT_VERSION: u32 = 1;

/// Everything needed to restore a save elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    /// Bundle format version.
    pub format_version: u32,
    /// When the bundle was written.
    pub exported_at: DateTime<Utc>,
    /// Checkpoint tables.
    pub tables: StoreTables,
    /// The primary game snapshot.
    pub snapshot: Value,
    /// SHA-256 hex digest of the canonical JSON of `tables` and `snapshot`.
    pub checksum: String,
}

#[derive(Serialize)]
struct Content<'a> {
    tables: &'a StoreTables,
    snapshot: &'a Value,
}

/// Computes the checksum of bundle content.
#[must_use]
pub fn checksum(tables: &StoreTables, snapshot: &Value) -> String {
    let canonical = serde_json::to_vec(&Content { tables, snapshot }).unwrap_or_default();
    hex::encode(Sha256::digest(canonical))
}

impl ExportBundle {
    /// Creates a bundle and seals it with its checksum.
    #[must_use]
    pub fn new(tables: StoreTables, snapshot: Value) -> Self {
        let checksum = checksum(&tables, &snapshot);
        Self {
            format_version: FORMAT_VERSION,
            exported_at: Utc::now(),
            tables,
            snapshot,
            checksum,
        }
    }

    /// Checks the format version and checksum.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown version or a content mismatch.
    pub fn verify(&self) -> Result<(), ImportError> {
        if self.format_version != FORMAT_VERSION {
            return Err(ImportError::UnsupportedVersion(self.format_version));
        }
        let computed = checksum(&self.tables, &self.snapshot);
        if computed != self.checksum {
            return Err(ImportError::ChecksumMismatch {
                expected: self.checksum.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Encodes the bundle as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a JSON bundle.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Decode`] for malformed input.
    pub fn from_json(raw: &str) -> Result<Self, ImportError> {
        serde_json::from_str(raw).map_err(|e| ImportError::Decode(e.to_string()))
    }

    /// Encodes the bundle as a base64 save string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_save_string(&self) -> Result<String, serde_json::Error> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    /// Decodes a base64 save string.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Decode`] for malformed input.
    pub fn from_save_string(encoded: &str) -> Result<Self, ImportError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ImportError::Decode(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ImportError::Decode(e.to_string()))
    }
}
