use crate::error::{Error, Result};
use crate::store::{EntryIter, LocalStore};
use crate::types::{now_millis, KeyValue, PutOutcome, Timestamp, VersionedValue};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;
use tracing::{debug, info};

const WATERMARKS_TREE: &str = "watermarks";
const DATA_PREFIX: &str = "data/";
const INDEX_PREFIX: &str = "idx/";

#[derive(Debug, Serialize, Deserialize)]
struct StoredValue {
    timestamp: Timestamp,
    value: String,
}

/// sled-backed store. Per namespace there is a data tree (key -> value) and
/// an index tree ordered by `timestamp ++ key`, plus one shared tree of
/// namespace watermarks.
pub struct SledStore {
    db: sled::Db,
    watermarks: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        let watermarks = db.open_tree(WATERMARKS_TREE)?;
        info!(
            "Opened store at {:?} with {} namespace(s)",
            path.as_ref(),
            watermarks.len()
        );
        Ok(Self { db, watermarks })
    }

    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let watermarks = db.open_tree(WATERMARKS_TREE)?;
        Ok(Self { db, watermarks })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn trees(&self, namespace: &str) -> Result<(sled::Tree, sled::Tree)> {
        let data = self.db.open_tree(format!("{}{}", DATA_PREFIX, namespace))?;
        let idx = self.db.open_tree(format!("{}{}", INDEX_PREFIX, namespace))?;
        Ok((data, idx))
    }

    /// Read paths only open trees of namespaces that have been written to.
    fn existing_trees(&self, namespace: &str) -> Result<Option<(sled::Tree, sled::Tree)>> {
        if !self.watermarks.contains_key(namespace.as_bytes())? {
            return Ok(None);
        }
        self.trees(namespace).map(Some)
    }

    pub fn tree_count(&self) -> usize {
        self.db.tree_names().len()
    }

    fn index_key(timestamp: Timestamp, key: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + key.len());
        out.extend_from_slice(&timestamp.to_be_bytes());
        out.extend_from_slice(key.as_bytes());
        out
    }

    fn split_index_key(raw: &[u8]) -> Result<(Timestamp, String)> {
        if raw.len() < 8 {
            return Err(Error::CorruptEntry(format!(
                "index key too short: {} bytes",
                raw.len()
            )));
        }
        let (ts, key) = raw.split_at(8);
        let timestamp = decode_timestamp(ts)?;
        let key = String::from_utf8(key.to_vec())
            .map_err(|e| Error::CorruptEntry(format!("index key is not utf-8: {}", e)))?;
        Ok((timestamp, key))
    }
}

fn decode_timestamp(raw: &[u8]) -> Result<Timestamp> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| Error::CorruptEntry(format!("timestamp of {} bytes", raw.len())))?;
    Ok(Timestamp::from_be_bytes(bytes))
}

impl LocalStore for SledStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<VersionedValue>> {
        let Some((data, _)) = self.existing_trees(namespace)? else {
            return Ok(None);
        };
        match data.get(key.as_bytes())? {
            Some(raw) => {
                let stored: StoredValue = bincode::deserialize(&raw)?;
                Ok(Some(VersionedValue::new(stored.value, stored.timestamp)))
            }
            None => Ok(None),
        }
    }

    fn put_if_newer(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        timestamp: Option<Timestamp>,
    ) -> Result<PutOutcome> {
        let timestamp = timestamp.unwrap_or_else(now_millis);
        let encoded = bincode::serialize(&StoredValue {
            timestamp,
            value: value.to_string(),
        })?;
        let (data, idx) = self.trees(namespace)?;

        let outcome = (&data, &idx)
            .transaction(|(data, idx)| {
                let previous = match data.get(key.as_bytes())? {
                    Some(raw) => {
                        let stored: StoredValue = bincode::deserialize(&raw)
                            .map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?;
                        if stored.timestamp >= timestamp {
                            return Ok(PutOutcome::Rejected {
                                stored: stored.timestamp,
                            });
                        }
                        Some(stored.timestamp)
                    }
                    None => None,
                };

                data.insert(key.as_bytes(), encoded.clone())?;
                if let Some(old) = previous {
                    idx.remove(Self::index_key(old, key))?;
                }
                idx.insert(Self::index_key(timestamp, key), &[] as &[u8])?;
                Ok(PutOutcome::Accepted(timestamp))
            })
            .map_err(|e: TransactionError<String>| match e {
                TransactionError::Abort(reason) => Error::CorruptEntry(reason),
                TransactionError::Storage(e) => Error::Storage(e),
            })?;

        match outcome {
            PutOutcome::Accepted(ts) => {
                self.advance_watermark(namespace, ts)?;
                debug!("Stored {}/{} at {}", namespace, key, ts);
            }
            PutOutcome::Rejected { stored } => {
                debug!(
                    "Rejected {}/{} at {}: stored timestamp {}",
                    namespace, key, timestamp, stored
                );
            }
        }
        Ok(outcome)
    }

    fn watermark(&self, namespace: &str) -> Result<Option<Timestamp>> {
        self.watermarks
            .get(namespace.as_bytes())?
            .map(|raw| decode_timestamp(&raw))
            .transpose()
    }

    fn advance_watermark(&self, namespace: &str, timestamp: Timestamp) -> Result<()> {
        loop {
            let current = self.watermarks.get(namespace.as_bytes())?;
            if let Some(raw) = &current {
                if decode_timestamp(raw)? >= timestamp {
                    return Ok(());
                }
            }
            let swapped = self.watermarks.compare_and_swap(
                namespace.as_bytes(),
                current,
                Some(timestamp.to_be_bytes().to_vec()),
            )?;
            if swapped.is_ok() {
                return Ok(());
            }
        }
    }

    fn entries_since(&self, namespace: &str, since: Timestamp) -> Result<EntryIter> {
        let Some((data, idx)) = self.existing_trees(namespace)? else {
            return Ok(Box::new(std::iter::empty()));
        };
        let iter = idx
            .range(since.to_be_bytes().to_vec()..)
            .filter_map(move |item| {
                let (raw_key, _) = match item {
                    Ok(kv) => kv,
                    Err(e) => return Some(Err(Error::Storage(e))),
                };
                let (timestamp, key) = match Self::split_index_key(&raw_key) {
                    Ok(parts) => parts,
                    Err(e) => return Some(Err(e)),
                };
                // The index entry may have been superseded since the cursor
                // was opened; skip it if the data tree moved on.
                match data.get(key.as_bytes()) {
                    Ok(Some(raw)) => match bincode::deserialize::<StoredValue>(&raw) {
                        Ok(stored) if stored.timestamp == timestamp => Some(Ok(KeyValue {
                            key,
                            value: stored.value,
                            timestamp,
                        })),
                        Ok(_) => None,
                        Err(e) => Some(Err(Error::Encoding(e))),
                    },
                    Ok(None) => None,
                    Err(e) => Some(Err(Error::Storage(e))),
                }
            });
        Ok(Box::new(iter))
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        self.watermarks
            .iter()
            .keys()
            .map(|k| {
                let k = k?;
                String::from_utf8(k.to_vec())
                    .map_err(|e| Error::CorruptEntry(format!("namespace is not utf-8: {}", e)))
            })
            .collect()
    }
}
