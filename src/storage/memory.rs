use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use super::protocol::DataPayload;

/// An in-memory string map together with the version of its last mutation.
///
/// Versions are wall-clock milliseconds. They only ever move forward: a stamp taken
/// while the clock reads earlier than the current version keeps the current version,
/// so two mutations within the same millisecond share a version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionedMap {
    data: HashMap<String, String>,
    version: i64,
}

impl VersionedMap {
    pub fn new(data: HashMap<String, String>, version: i64) -> Self {
        Self { data, version }
    }

    pub fn data(&self) -> &HashMap<String, String> {
        &self.data
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Merges `patch` into the map, overwriting conflicting keys, and stamps a new version.
    /// An empty patch still advances the version.
    pub fn merge(&mut self, patch: HashMap<String, String>) -> i64 {
        self.data.extend(patch);
        self.stamp()
    }

    /// Removes every listed key that is present and stamps a new version.
    /// Missing keys are ignored.
    pub fn remove<I, S>(&mut self, keys: I) -> i64
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.data.remove(key.as_ref());
        }
        self.stamp()
    }

    /// Replaces data and version wholesale, as a replica does after pulling a snapshot.
    pub fn replace(&mut self, data: HashMap<String, String>, version: i64) {
        self.data = data;
        self.version = version;
    }

    pub fn to_payload(&self) -> DataPayload {
        DataPayload::authoritative(self.version, self.data.clone())
    }

    fn stamp(&mut self) -> i64 {
        self.version = self.version.max(now_ms());
        self.version
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
