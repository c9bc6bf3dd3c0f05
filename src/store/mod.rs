mod memory;
mod sled_store;

pub use memory::*;
pub use sled_store::*;

use crate::error::Result;
use crate::types::{KeyValue, PutOutcome, Timestamp, VersionedValue};

pub type EntryIter = Box<dyn Iterator<Item = Result<KeyValue>>>;

/// Local LWW storage shared by the request path and anti-entropy.
pub trait LocalStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<VersionedValue>>;

    /// Stores the value unless an entry with a timestamp `>=` the candidate
    /// already exists. A missing timestamp means "now". Advances the
    /// namespace watermark on acceptance.
    fn put_if_newer(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        timestamp: Option<Timestamp>,
    ) -> Result<PutOutcome>;

    fn watermark(&self, namespace: &str) -> Result<Option<Timestamp>>;

    /// No-op unless `timestamp` is greater than the recorded watermark.
    fn advance_watermark(&self, namespace: &str, timestamp: Timestamp) -> Result<()>;

    /// Entries with timestamp `>= since`, ascending by timestamp.
    fn entries_since(&self, namespace: &str, since: Timestamp) -> Result<EntryIter>;

    fn namespaces(&self) -> Result<Vec<String>>;

    /// Namespaces whose watermark is `>= since`.
    fn namespaces_since(&self, since: Timestamp) -> Result<Vec<String>> {
        let mut touched = Vec::new();
        for ns in self.namespaces()? {
            if self.watermark(&ns)?.is_some_and(|w| w >= since) {
                touched.push(ns);
            }
        }
        Ok(touched)
    }

    /// Minimum watermark across namespaces, the lower bound for catch-up
    /// pulls. An empty store pulls everything; `None` means there are
    /// namespaces but none has a watermark yet.
    fn low_watermark(&self) -> Result<Option<Timestamp>> {
        let namespaces = self.namespaces()?;
        if namespaces.is_empty() {
            return Ok(Some(0));
        }
        let mut low: Option<Timestamp> = None;
        for ns in namespaces {
            if let Some(w) = self.watermark(&ns)? {
                low = Some(low.map_or(w, |l| l.min(w)));
            }
        }
        Ok(low)
    }
}
