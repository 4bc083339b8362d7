//! Message model shared by providers and the consumer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// One unit of work fetched from a queue backend.
///
/// `id` is unique within a single fetch batch and is the key used for
/// acknowledgment and dead-lettering. Providers create messages; the consumer only
/// reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Message {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// String attribute lookup, e.g. an SQS receipt handle
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// Opaque identifier of one polling lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LaneId(Uuid);

impl LaneId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LaneId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for LaneId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// The caller's verdict for one fetched batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleResult {
    pub finished: Vec<Message>,
    pub dead: Vec<Message>,
}

impl CycleResult {
    pub fn new(finished: Vec<Message>, dead: Vec<Message>) -> Self {
        Self { finished, dead }
    }

    pub fn finished(finished: Vec<Message>) -> Self {
        Self {
            finished,
            dead: Vec::new(),
        }
    }

    /// Drop from `finished` every message whose id is also dead-lettered.
    ///
    /// Returns how many messages were removed. A message is never both acknowledged
    /// and dead-lettered in the same cycle.
    pub fn make_disjoint(&mut self) -> usize {
        if self.dead.is_empty() {
            return 0;
        }
        let dead_ids: HashSet<&str> = self.dead.iter().map(|m| m.id.as_str()).collect();
        let before = self.finished.len();
        self.finished.retain(|m| !dead_ids.contains(m.id.as_str()));
        before - self.finished.len()
    }
}
