//! Context stores.

use crate::codec::ContextCodec;
use crate::error::PersistError;
use bytes::Bytes;
use dashmap::DashMap;
use statechart_core::StateMachineContext;

/// A keyed store for machine contexts.
///
/// Implement this for durable backends; the persister and interceptor only
/// depend on this trait.
pub trait StateMachinePersist: Send + Sync {
    fn write(&self, context: &StateMachineContext, key: &str) -> Result<(), PersistError>;

    /// Returns `None` when nothing is stored under `key`.
    fn read(&self, key: &str) -> Result<Option<StateMachineContext>, PersistError>;
}

/// Keeps encoded records in memory.
///
/// Records are stored in their framed form so every read goes through the
/// codec, the same as a durable store would.
#[derive(Debug, Default)]
pub struct InMemoryStateMachinePersist {
    records: DashMap<String, Bytes>,
}

impl InMemoryStateMachinePersist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Sorted keys of stored records.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn remove(&self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    /// Raw record stored under `key`.
    pub fn record(&self, key: &str) -> Option<Bytes> {
        self.records.get(key).map(|r| r.value().clone())
    }
}

impl StateMachinePersist for InMemoryStateMachinePersist {
    fn write(&self, context: &StateMachineContext, key: &str) -> Result<(), PersistError> {
        let record = ContextCodec::encode(context)?;
        tracing::trace!("Stored context under {} ({} bytes)", key, record.len());
        self.records.insert(key.to_string(), record);
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<StateMachineContext>, PersistError> {
        match self.record(key) {
            Some(record) => Ok(Some(ContextCodec::decode(&record)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let store = InMemoryStateMachinePersist::new();
        assert!(store.read("k1").unwrap().is_none());

        let ctx = StateMachineContext::new(Some("S1".into()));
        store.write(&ctx, "k1").unwrap();
        store.write(&StateMachineContext::new(Some("S2".into())), "k0").unwrap();
        assert_eq!(store.read("k1").unwrap(), Some(ctx));
        assert_eq!(store.keys(), vec!["k0", "k1"]);

        assert!(store.remove("k1"));
        assert!(!store.contains("k1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_corrupted_record_surfaces() {
        let store = InMemoryStateMachinePersist::new();
        store
            .write(&StateMachineContext::new(Some("S1".into())), "k")
            .unwrap();
        let mut record = store.record("k").unwrap().to_vec();
        let last = record.len() - 2;
        record[last] ^= 0xff;
        store.records.insert("k".into(), Bytes::from(record));
        assert!(store.read("k").is_err());
    }
}
