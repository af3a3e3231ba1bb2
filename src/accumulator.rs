use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::record::AdvertisementRecord;

#[derive(Default)]
struct Store {
    records: HashMap<String, AdvertisementRecord>,
    // Insertion order of peer ids, so live views keep row positions stable.
    order: Vec<String>,
}

/// Deduplicating store of the most-recently-seen record per peer identity.
///
/// Upserts arrive from the source's event task while readers take snapshots
/// concurrently; a single lock guards the store. The owning session never
/// exposes the store itself, only cloned snapshots.
pub struct Accumulator {
    inner: RwLock<Store>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Store::default()),
        }
    }

    /// Insert a sighting, or merge it into the existing record for the same
    /// peer identity. Total operation, no error paths.
    pub async fn upsert(&self, record: AdvertisementRecord) {
        let mut store = self.inner.write().await;
        let Store { records, order } = &mut *store;
        match records.get_mut(&record.peer_id) {
            Some(existing) => existing.merge(record),
            None => {
                order.push(record.peer_id.clone());
                records.insert(record.peer_id.clone(), record);
            }
        }
    }

    /// Insertion-ordered copy of all held records. No side effects.
    pub async fn snapshot(&self) -> Vec<AdvertisementRecord> {
        let store = self.inner.read().await;
        store
            .order
            .iter()
            .filter_map(|id| store.records.get(id).cloned())
            .collect()
    }

    pub async fn clear(&self) {
        let mut store = self.inner.write().await;
        store.records.clear();
        store.order.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}
