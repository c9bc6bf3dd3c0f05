use crate::error::Result;
use crate::store::{EntryIter, LocalStore};
use crate::types::{now_millis, KeyValue, PutOutcome, Timestamp, VersionedValue};
use arc_swap::ArcSwap;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct NamespaceData {
    values: HashMap<String, VersionedValue>,
    by_time: BTreeSet<(Timestamp, String)>,
}

/// Non-persistent store, selected with `in_memory = true` in the node config.
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, NamespaceData>>,
    watermarks: ArcSwap<HashMap<String, Timestamp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            watermarks: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.namespaces
            .read()
            .unwrap()
            .values()
            .map(|ns| ns.values.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<VersionedValue>> {
        Ok(self
            .namespaces
            .read()
            .unwrap()
            .get(namespace)
            .and_then(|ns| ns.values.get(key))
            .cloned())
    }

    fn put_if_newer(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        timestamp: Option<Timestamp>,
    ) -> Result<PutOutcome> {
        let timestamp = timestamp.unwrap_or_else(now_millis);
        {
            let mut namespaces = self.namespaces.write().unwrap();
            let ns = namespaces.entry(namespace.to_string()).or_default();
            if let Some(existing) = ns.values.get(key) {
                if existing.timestamp >= timestamp {
                    return Ok(PutOutcome::Rejected {
                        stored: existing.timestamp,
                    });
                }
                ns.by_time.remove(&(existing.timestamp, key.to_string()));
            }
            ns.values
                .insert(key.to_string(), VersionedValue::new(value, timestamp));
            ns.by_time.insert((timestamp, key.to_string()));
        }
        self.advance_watermark(namespace, timestamp)?;
        Ok(PutOutcome::Accepted(timestamp))
    }

    fn watermark(&self, namespace: &str) -> Result<Option<Timestamp>> {
        Ok(self.watermarks.load().get(namespace).copied())
    }

    fn advance_watermark(&self, namespace: &str, timestamp: Timestamp) -> Result<()> {
        loop {
            let current = self.watermarks.load_full();
            if current.get(namespace).is_some_and(|w| *w >= timestamp) {
                return Ok(());
            }
            let mut next = (*current).clone();
            next.insert(namespace.to_string(), timestamp);
            let prev = self.watermarks.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*prev, &current) {
                return Ok(());
            }
        }
    }

    fn entries_since(&self, namespace: &str, since: Timestamp) -> Result<EntryIter> {
        let namespaces = self.namespaces.read().unwrap();
        let entries: Vec<Result<KeyValue>> = match namespaces.get(namespace) {
            Some(ns) => ns
                .by_time
                .range((since, String::new())..)
                .filter_map(|(ts, key)| {
                    ns.values.get(key).map(|v| {
                        Ok(KeyValue {
                            key: key.clone(),
                            value: v.value.clone(),
                            timestamp: *ts,
                        })
                    })
                })
                .collect(),
            None => Vec::new(),
        };
        Ok(Box::new(entries.into_iter()))
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.watermarks.load().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
