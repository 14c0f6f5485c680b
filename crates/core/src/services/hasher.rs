use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::{BuildArtifact, ContentHash};

#[derive(Debug, Error)]
#[error("Failed to hash `{function}`: {reason}")]
pub struct HashError {
    pub function: String,
    pub reason: String,
}

/// Trait implemented by content-identity engines.
///
/// Implementations must depend on the code bytes only: never on paths,
/// timestamps, or iteration order.
pub trait ContentHasher: Send + Sync {
    fn hash(&self, function: &str, code: &str) -> Result<ContentHash, HashError>;
    fn name(&self) -> &'static str;
}

/// SHA-256 over the exact UTF-8 bytes of the compiled code, as lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash(&self, function: &str, code: &str) -> Result<ContentHash, HashError> {
        Ok(ContentHash { function: function.to_string(), hash: sha256_hex(code.as_bytes()) })
    }

    fn name(&self) -> &'static str {
        "sha256"
    }
}

/// Compute the SHA-256 of `bytes` and return it as a hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash every artifact, splitting successes from failures.
///
/// Every artifact is attempted so all failures can be reported together.
pub fn hash_all(
    hasher: &dyn ContentHasher,
    artifacts: &[BuildArtifact],
) -> (Vec<ContentHash>, Vec<HashError>) {
    let mut hashes = Vec::with_capacity(artifacts.len());
    let mut errors = Vec::new();
    for artifact in artifacts {
        match hasher.hash(&artifact.function, &artifact.code) {
            Ok(hash) => hashes.push(hash),
            Err(err) => errors.push(err),
        }
    }
    (hashes, errors)
}
