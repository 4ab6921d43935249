// Copyright 2026 revcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Debug, sync::Arc};

use hashbrown::HashMap;
use parking_lot::RwLock;
use revcache_common::{metrics::Metrics, strict_assert_eq};

use crate::{
    location::{LocationInfo, RevisionLocation},
    reader::Reader,
    record::{ChunkId, CollectionId, DatafileId, RevisionId},
    wal::WalReferences,
};

/// Per-collection map from revision id to the current location of the revision.
///
/// Every entry accounts for exactly one reference (a WAL datafile reference or a durable chunk reference). Replacing,
/// removing or invalidating an entry releases the reference of the previous location exactly once, and dropping the
/// index releases the references of all remaining entries.
///
/// The whole table is guarded by one reader/writer lock. References are released after the lock is dropped.
pub struct CollectionIndex {
    collection_id: CollectionId,
    mapping: RwLock<HashMap<RevisionId, RevisionLocation>>,
    wal: Arc<dyn WalReferences>,
    metrics: Arc<Metrics>,
}

impl Debug for CollectionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionIndex")
            .field("collection_id", &self.collection_id)
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for CollectionIndex {
    fn drop(&mut self) {
        let mapping = std::mem::take(self.mapping.get_mut());
        let len = mapping.len();
        for (_, location) in mapping {
            location.release(self.wal.as_ref());
        }
        tracing::debug!(
            "[collection index]: collection {} dropped, {len} locations released",
            self.collection_id
        );
    }
}

impl CollectionIndex {
    /// Create an empty index for `collection_id`.
    pub fn new(collection_id: CollectionId, wal: Arc<dyn WalReferences>) -> Self {
        Self {
            collection_id,
            mapping: RwLock::new(HashMap::new()),
            wal,
            metrics: Arc::new(Metrics::noop()),
        }
    }

    /// Report index operations to `metrics`, e.g. the metrics of the global cache.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Collection this index belongs to.
    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    /// Count of indexed revisions.
    pub fn len(&self) -> usize {
        self.mapping.read().len()
    }

    /// Returns `true` if no revision is indexed.
    pub fn is_empty(&self) -> bool {
        self.mapping.read().is_empty()
    }

    /// Record that `revision_id` lives in the write-ahead log.
    pub fn insert_from_wal(&self, revision_id: RevisionId, datafile_id: DatafileId, offset: u64) {
        let location = RevisionLocation::wal(datafile_id, offset, self.wal.as_ref());
        self.metrics.index_insert_wal.increase(1);
        self.emplace(revision_id, location);
    }

    /// Record that `revision_id` lives in the revision cache at the record leased by `reader`.
    ///
    /// The index takes over the reader's durable reference. The reader keeps its reader slot and releases it when it
    /// is dropped.
    pub fn insert_from_revision_cache(&self, revision_id: RevisionId, reader: &mut Reader) {
        strict_assert_eq!(reader.collection_id(), self.collection_id);
        let location = RevisionLocation::adopt(reader);
        self.metrics.index_insert_cache.increase(1);
        self.emplace(revision_id, location);
    }

    fn emplace(&self, revision_id: RevisionId, location: RevisionLocation) {
        let old = self.mapping.write().insert(revision_id, location);
        if let Some(old) = old {
            self.metrics.index_replace.increase(1);
            old.release(self.wal.as_ref());
        }
    }

    /// Remove `revision_id`. Returns `true` if it was indexed.
    pub fn remove(&self, revision_id: RevisionId) -> bool {
        let old = self.mapping.write().remove(&revision_id);
        match old {
            Some(old) => {
                self.metrics.index_remove.increase(1);
                old.release(self.wal.as_ref());
                true
            }
            None => false,
        }
    }

    /// Remove `revision_id` only if it still points at the record at `offset` of chunk `chunk_id`.
    ///
    /// Used by collection callbacks. A revision that has been overwritten since is left alone.
    pub fn invalidate(&self, revision_id: RevisionId, chunk_id: ChunkId, offset: usize) -> bool {
        let old = {
            let mut mapping = self.mapping.write();
            match mapping.get(&revision_id) {
                Some(location) if location.points_to(chunk_id, offset) => mapping.remove(&revision_id),
                _ => None,
            }
        };
        match old {
            Some(old) => {
                self.metrics.index_invalidate.increase(1);
                old.release(self.wal.as_ref());
                true
            }
            None => false,
        }
    }

    /// Remove every revision that points into chunk `chunk_id`. Returns the count of removed revisions.
    pub fn invalidate_chunk(&self, chunk_id: ChunkId) -> usize {
        let removed = {
            let mut mapping = self.mapping.write();
            mapping
                .extract_if(|_, location| location.is_in_chunk(chunk_id))
                .map(|(_, location)| location)
                .collect::<Vec<_>>()
        };
        let count = removed.len();
        self.metrics.index_invalidate.increase(count as _);
        for location in removed {
            location.release(self.wal.as_ref());
        }
        count
    }

    /// Lease `revision_id` from the revision cache.
    ///
    /// Returns `None` if the revision is not indexed, is WAL-resident, or points at a chunk that has been collected
    /// or is being collected. The returned reader owns a fresh reader slot and a fresh durable reference.
    pub fn lookup(&self, revision_id: RevisionId) -> Option<Reader> {
        let mapping = self.mapping.read();
        let Some(location) = mapping.get(&revision_id) else {
            self.metrics.index_miss.increase(1);
            return None;
        };
        match location.lease() {
            Some(reader) => {
                self.metrics.index_hit.increase(1);
                Some(reader)
            }
            None if location.is_cached() => {
                self.metrics.index_stale.increase(1);
                None
            }
            None => {
                self.metrics.index_miss.increase(1);
                None
            }
        }
    }

    /// Current location of `revision_id`.
    pub fn location(&self, revision_id: RevisionId) -> Option<LocationInfo> {
        self.mapping.read().get(&revision_id).map(RevisionLocation::info)
    }
}
