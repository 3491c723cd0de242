use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha512};

use crate::error::SyncError;

/// Change-detection digest: lowercase hex SHA-512 over `salt ++ canonical_json(value)`.
///
/// The digest only tells two versions of state apart. The salt is not a
/// secret and the output carries no integrity guarantee.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateHasher {
    salt: String,
}

impl StateHasher {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    pub fn digest<T: Serialize>(&self, value: &T) -> Result<String, SyncError> {
        let rendered = canonical_json(value)?;
        let mut hasher = Sha512::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(rendered.as_bytes());
        Ok(hex(&hasher.finalize()))
    }
}

fn hex(digest: &[u8]) -> String {
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, SyncError> {
    let json =
        serde_json::to_value(value).map_err(|err| SyncError::HashComputation(err.to_string()))?;
    let canonical = canonicalize_value(json);
    serde_json::to_string(&canonical).map_err(|err| SyncError::HashComputation(err.to_string()))
}

fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(String, Value)> = object.into_iter().collect();
            entries.sort_by(|left, right| left.0.cmp(&right.0));

            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize_value(value));
            }
            Value::Object(sorted)
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize_value).collect()),
        scalar => scalar,
    }
}

/// A state payload paired with the hash of the version it represents.
#[derive(Debug, Clone, PartialEq)]
pub struct Hashed<T> {
    data: T,
    hash: String,
}

impl<T: Serialize> Hashed<T> {
    pub fn sealed(data: T, hasher: &StateHasher) -> Result<Self, SyncError> {
        let hash = hasher.digest(&data)?;
        Ok(Self { data, hash })
    }
}

impl<T> Hashed<T> {
    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// True only for a non-empty agent hash equal to the stored one.
    pub fn matches(&self, agent_hash: &str) -> bool {
        !agent_hash.is_empty() && self.hash == agent_hash
    }
}
