//! Content digests.
//!
//! A digest is the SHA-256 of a blob's raw (uncompressed) bytes, encoded
//! as unpadded base64url so it can be used in file names. It identifies
//! content for integrity checks; it is not a uniqueness guarantee.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    Sha256,
}

impl DigestAlgorithm {
    /// Resolve a configured algorithm name.
    ///
    /// An unknown name is a fatal configuration failure: the store must not
    /// start without its digest algorithm.
    pub fn from_name(name: &str) -> Result<Self, StoreError> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "SHA256" => Ok(DigestAlgorithm::Sha256),
            _ => Err(StoreError::Configuration(format!(
                "unsupported digest algorithm: {name}"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA-256",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Digest a complete in-memory buffer.
    pub fn of(bytes: &[u8]) -> Self {
        let mut digester = Digester::new();
        digester.update(bytes);
        digester.finalize()
    }

    /// Wrap an already encoded digest, e.g. one read back from a durable record.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        ContentDigest(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental digest over a byte stream.
#[derive(Clone, Default)]
pub struct Digester {
    hasher: Sha256,
}

impl Digester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finalize(self) -> ContentDigest {
        ContentDigest(URL_SAFE_NO_PAD.encode(self.hasher.finalize()))
    }
}

impl fmt::Debug for Digester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digester").finish_non_exhaustive()
    }
}
