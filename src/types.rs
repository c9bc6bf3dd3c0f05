use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub type Timestamp = u64;
pub type Namespace = String;
pub type PeerUri = String;

pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Peer identity is the URI without a trailing slash.
pub fn normalize_uri(uri: &str) -> PeerUri {
    uri.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: String,
    pub timestamp: Timestamp,
}

impl VersionedValue {
    pub fn new(value: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            value: value.into(),
            timestamp,
        }
    }

    /// Total LWW order: timestamp first, value breaks ties.
    pub fn lww_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.value.cmp(&other.value))
    }
}

/// Keeps `current` only if it is strictly fresher than `prev`.
pub fn lww_merge(
    prev: &Option<VersionedValue>,
    current: &Option<VersionedValue>,
) -> Option<VersionedValue> {
    match (prev, current) {
        (Some(p), Some(c)) if c.lww_cmp(p) == Ordering::Greater => Some(c.clone()),
        (Some(p), _) => Some(p.clone()),
        (None, c) => c.clone(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamespaceEntries {
    pub namespace: Namespace,
    pub entries: Vec<KeyValue>,
}

impl NamespaceEntries {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Accepted(Timestamp),
    Rejected { stored: Timestamp },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PutAck {
    Accepted { timestamp: Timestamp },
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteReceipt {
    pub timestamp: Timestamp,
    pub replicated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutRequest {
    pub value: String,
    pub timestamp: Option<Timestamp>,
}
