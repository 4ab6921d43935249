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

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use parking_lot::RwLock;
use revcache_common::{
    bits,
    metrics::{registry::noop::NoopMetricsRegistry, BoxedRegistry, Metrics},
};

use crate::{
    chunk::Chunk,
    error::{Error, Result},
    reader::Reader,
    record::{physical_size, ChunkId, CollectedRecord, CollectionId, RECORD_ALIGN},
};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Callback invoked once per record of a chunk that is being collected.
///
/// The receiver is supposed to find the collection index of [`CollectedRecord::collection_id`] and drop or relocate
/// the entry if it still points at the collected record, e.g. with [`crate::CollectionIndex::invalidate`].
///
/// The callback runs while no lock of the global cache is held.
pub trait GarbageCollectionCallback: Fn(CollectedRecord<'_>) + Send + Sync + 'static {}
impl<T> GarbageCollectionCallback for T where T: Fn(CollectedRecord<'_>) + Send + Sync + 'static {}

/// Point-in-time statistics of a [`GlobalRevisionCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    /// Bytes held by live chunks.
    pub total_allocated: usize,
    /// Soft memory budget.
    pub total_target_size: usize,
    /// Default chunk size.
    pub chunk_size: usize,
    /// Chunks offered for new records.
    pub free_chunks: usize,
    /// Full chunks waiting to be collected.
    pub used_chunks: usize,
    /// Chunks collected so far.
    pub collected_chunks: usize,
}

#[derive(Debug, Default)]
struct Lists {
    /// Chunks with spare capacity. The last one is tried first.
    free: Vec<Arc<Chunk>>,
    /// Chunks no longer offered for new records, in retirement order.
    used: Vec<Arc<Chunk>>,
}

impl Lists {
    /// Move `chunk` from the free list to the used list. Returns `false` if someone else did already.
    fn retire(&mut self, chunk: &Arc<Chunk>) -> bool {
        match self.free.iter().position(|c| Arc::ptr_eq(c, chunk)) {
            Some(pos) => {
                let chunk = self.free.remove(pos);
                self.used.push(chunk);
                true
            }
            None => false,
        }
    }

    /// Take the first used chunk without readers and references.
    fn pick_evictable(&mut self) -> Option<Arc<Chunk>> {
        let pos = self
            .used
            .iter()
            .position(|chunk| !chunk.has_readers() && !chunk.has_references())?;
        Some(self.used.remove(pos))
    }
}

struct GlobalRevisionCacheInner {
    name: &'static str,

    lists: RwLock<Lists>,

    chunk_size: usize,
    total_target_size: usize,
    total_allocated: AtomicUsize,

    next_chunk_id: AtomicU64,
    collected_chunks: AtomicUsize,

    callback: Arc<dyn GarbageCollectionCallback>,

    metrics: Arc<Metrics>,
}

/// The global revision cache.
///
/// Hands out chunk capacity to store serialized revisions while enforcing a soft memory budget. Full chunks are
/// retired to a used list and collected once they have neither readers nor references and the budget is exceeded.
/// Collected chunks are destroyed, never reused.
///
/// The cache is cheap to clone. All clones share the same chunks.
#[derive(Clone)]
pub struct GlobalRevisionCache {
    inner: Arc<GlobalRevisionCacheInner>,
}

impl Debug for GlobalRevisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalRevisionCache")
            .field("name", &self.inner.name)
            .field("statistics", &self.statistics())
            .finish()
    }
}

impl GlobalRevisionCache {
    /// Store `data` for `collection_id` and lease it out.
    ///
    /// Only fails with [`Error::OutOfMemory`] if a new chunk cannot be allocated.
    pub fn store_and_lease(&self, collection_id: CollectionId, data: &[u8]) -> Result<Reader> {
        let reader = self.admit(data.len(), |chunk| chunk.store_and_lease(collection_id, data))?;
        self.inner.metrics.cache_lease.increase(1);
        Ok(reader)
    }

    /// Store `data` for `collection_id` without leasing it.
    ///
    /// Only fails with [`Error::OutOfMemory`] if a new chunk cannot be allocated.
    pub fn store(&self, collection_id: CollectionId, data: &[u8]) -> Result<()> {
        self.admit(data.len(), |chunk| chunk.store(collection_id, data))?;
        self.inner.metrics.cache_store.increase(1);
        Ok(())
    }

    fn admit<T>(&self, len: usize, f: impl Fn(&Arc<Chunk>) -> Result<T>) -> Result<T> {
        loop {
            let chunk = self.inner.lists.read().free.last().cloned();
            if let Some(chunk) = chunk.as_ref() {
                match f(chunk) {
                    Ok(res) => {
                        self.inner.metrics.cache_store_bytes.increase(physical_size(len) as _);
                        return Ok(res);
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::trace!("[revision cache]: chunk {} rejects {len} bytes: {e}", chunk.id());
                        self.inner.metrics.cache_retry.increase(1);
                    }
                    Err(e) => return Err(e),
                }
            }
            self.add_chunk(len, chunk.as_ref())?;
        }
    }

    /// Make sure the free list offers a chunk for a record of `len` bytes.
    ///
    /// `full` is the chunk the caller failed to store into. It is retired if it is still on the free list. If another
    /// chunk is on the free list afterwards, nothing is allocated. If the budget is exceeded, one evictable chunk is
    /// collected before the new one is allocated.
    fn add_chunk(&self, len: usize, full: Option<&Arc<Chunk>>) -> Result<()> {
        let victim = {
            let mut lists = self.inner.lists.write();
            if let Some(full) = full {
                if lists.retire(full) {
                    self.inner.metrics.chunk_retire.increase(1);
                    self.inner.metrics.chunk_free.decrease(1);
                    self.inner.metrics.chunk_used.increase(1);
                    tracing::debug!(
                        "[revision cache]: chunk {} retired, write position: {}/{}",
                        full.id(),
                        full.write_position(),
                        full.size()
                    );
                }
            }
            if !lists.free.is_empty() {
                return Ok(());
            }
            if self.is_over_budget() {
                self.pick_evictable(&mut lists)
            } else {
                None
            }
        };

        if let Some(victim) = victim {
            self.collect(victim);
        }

        let size = self.inner.chunk_size.max(physical_size(len));
        let id = self.inner.next_chunk_id.fetch_add(1, Ordering::Relaxed);
        let chunk = Arc::new(Chunk::new(id, size)?);

        let mut lists = self.inner.lists.write();
        lists.free.push(chunk);
        let total = self.inner.total_allocated.fetch_add(size, Ordering::AcqRel) + size;
        drop(lists);

        self.inner.metrics.chunk_alloc.increase(1);
        self.inner.metrics.chunk_free.increase(1);
        self.inner.metrics.cache_allocated_bytes.absolute(total as _);
        tracing::debug!(
            "[revision cache]: chunk {id} allocated with {size} bytes, total allocated: {total}/{}",
            self.inner.total_target_size
        );

        Ok(())
    }

    fn pick_evictable(&self, lists: &mut Lists) -> Option<Arc<Chunk>> {
        let victim = lists.pick_evictable();
        match victim.as_ref() {
            Some(_) => self.inner.metrics.chunk_used.decrease(1),
            None => {
                self.inner.metrics.chunk_collect_skip.increase(1);
                tracing::warn!(
                    "[revision cache]: budget exceeded but no chunk is evictable, allocated: {}/{}, used chunks: {}",
                    self.total_allocated(),
                    self.inner.total_target_size,
                    lists.used.len()
                );
            }
        }
        victim
    }

    /// Collect `chunk` and release its memory. Must be called without holding the list lock.
    fn collect(&self, chunk: Arc<Chunk>) {
        let now = Instant::now();
        let records = chunk.garbage_collect(|record| (self.inner.callback)(record));

        let size = chunk.size();
        let total = self.inner.total_allocated.fetch_sub(size, Ordering::AcqRel) - size;
        self.inner.collected_chunks.fetch_add(1, Ordering::Relaxed);

        self.inner.metrics.chunk_collect.increase(1);
        self.inner.metrics.chunk_collect_records.increase(records as _);
        self.inner.metrics.chunk_collect_duration.record(now.elapsed().as_secs_f64());
        self.inner.metrics.cache_allocated_bytes.absolute(total as _);
        tracing::debug!(
            "[revision cache]: chunk {} collected, records: {records}, total allocated: {total}/{}",
            chunk.id(),
            self.inner.total_target_size
        );
    }

    /// Collect one evictable chunk if the budget is exceeded.
    ///
    /// Returns `true` if a chunk has been collected. A no-op while the cache is within its budget.
    pub fn garbage_collect(&self) -> bool {
        if !self.is_over_budget() {
            return false;
        }
        let victim = {
            let mut lists = self.inner.lists.write();
            self.pick_evictable(&mut lists)
        };
        match victim {
            Some(victim) => {
                self.collect(victim);
                true
            }
            None => false,
        }
    }

    /// Retire all free chunks and collect every evictable chunk, regardless of the budget.
    ///
    /// Returns the count of collected chunks.
    pub fn collect_all(&self) -> usize {
        {
            let mut lists = self.inner.lists.write();
            let free = std::mem::take(&mut lists.free);
            self.inner.metrics.chunk_retire.increase(free.len() as _);
            self.inner.metrics.chunk_free.decrease(free.len() as _);
            self.inner.metrics.chunk_used.increase(free.len() as _);
            lists.used.extend(free);
        }

        let mut collected = 0;
        loop {
            let victim = self.inner.lists.write().pick_evictable();
            let Some(victim) = victim else { break };
            self.inner.metrics.chunk_used.decrease(1);
            self.collect(victim);
            collected += 1;
        }
        collected
    }

    fn is_over_budget(&self) -> bool {
        self.total_allocated() >= self.inner.total_target_size
    }

    /// Name of the cache.
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Bytes held by live chunks.
    pub fn total_allocated(&self) -> usize {
        self.inner.total_allocated.load(Ordering::Acquire)
    }

    /// Soft memory budget.
    pub fn total_target_size(&self) -> usize {
        self.inner.total_target_size
    }

    /// Default chunk size.
    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    /// Metrics of the cache, to be shared with collection indexes.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Snapshot of the cache statistics.
    pub fn statistics(&self) -> Statistics {
        let lists = self.inner.lists.read();
        Statistics {
            total_allocated: self.total_allocated(),
            total_target_size: self.inner.total_target_size,
            chunk_size: self.inner.chunk_size,
            free_chunks: lists.free.len(),
            used_chunks: lists.used.len(),
            collected_chunks: self.inner.collected_chunks.load(Ordering::Relaxed),
        }
    }

    /// Ids of the free chunks, the most recently added last.
    pub fn free_chunk_ids(&self) -> Vec<ChunkId> {
        self.inner.lists.read().free.iter().map(|c| c.id()).collect()
    }

    /// Ids of the used chunks, in retirement order.
    pub fn used_chunk_ids(&self) -> Vec<ChunkId> {
        self.inner.lists.read().used.iter().map(|c| c.id()).collect()
    }
}

/// Builder of [`GlobalRevisionCache`].
pub struct GlobalRevisionCacheBuilder {
    name: &'static str,
    total_target_size: usize,
    chunk_size: usize,
    callback: Arc<dyn GarbageCollectionCallback>,
    registry: BoxedRegistry,
}

impl Debug for GlobalRevisionCacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalRevisionCacheBuilder")
            .field("name", &self.name)
            .field("total_target_size", &self.total_target_size)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl GlobalRevisionCacheBuilder {
    /// Create a builder with a soft memory budget of `total_target_size` bytes.
    pub fn new(total_target_size: usize) -> Self {
        Self {
            name: "revcache",
            total_target_size,
            chunk_size: DEFAULT_CHUNK_SIZE,
            callback: Arc::new(|_: CollectedRecord<'_>| {}),
            registry: Box::new(NoopMetricsRegistry),
        }
    }

    /// Set the name of the cache. The name is used as the metrics label.
    ///
    /// The default value is "revcache".
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Set the default chunk size. Records larger than a chunk get a chunk of their own.
    ///
    /// Must be a non-zero multiple of 8. The default value is 4 MiB.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the callback invoked for every record of a collected chunk.
    ///
    /// The default callback does nothing.
    pub fn with_garbage_collection_callback(mut self, callback: impl GarbageCollectionCallback) -> Self {
        self.callback = Arc::new(callback);
        self
    }

    /// Set the metrics registry.
    ///
    /// The default registry discards everything.
    pub fn with_metrics_registry(mut self, registry: BoxedRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Build the global revision cache.
    pub fn build(self) -> Result<GlobalRevisionCache> {
        if self.chunk_size == 0 || !bits::is_aligned(RECORD_ALIGN, self.chunk_size) {
            return Err(Error::ConfigError(format!(
                "chunk size must be a non-zero multiple of {RECORD_ALIGN}, given: {}",
                self.chunk_size
            )));
        }

        let metrics = Arc::new(Metrics::new(self.name, self.registry.as_ref()));
        metrics.cache_allocated_bytes.absolute(0);

        tracing::debug!(
            "[revision cache]: {} created, target size: {}, chunk size: {}",
            self.name,
            self.total_target_size,
            self.chunk_size
        );

        Ok(GlobalRevisionCache {
            inner: Arc::new(GlobalRevisionCacheInner {
                name: self.name,
                lists: RwLock::default(),
                chunk_size: self.chunk_size,
                total_target_size: self.total_target_size,
                total_allocated: AtomicUsize::new(0),
                next_chunk_id: AtomicU64::new(0),
                collected_chunks: AtomicUsize::new(0),
                callback: self.callback,
                metrics,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use itertools::Itertools;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;
    use crate::{index::CollectionIndex, test_utils::Recorder, wal::NoopWalReferences};

    fn cache(total_target_size: usize, chunk_size: usize) -> (GlobalRevisionCache, Recorder) {
        let recorder = Recorder::default();
        let r = recorder.clone();
        let cache = GlobalRevisionCacheBuilder::new(total_target_size)
            .with_chunk_size(chunk_size)
            .with_garbage_collection_callback(move |record: CollectedRecord<'_>| r.record(record))
            .build()
            .unwrap();
        (cache, recorder)
    }

    #[test]
    fn test_build_rejects_invalid_chunk_size() {
        for chunk_size in [0, 7, 65] {
            let res = GlobalRevisionCacheBuilder::new(1024).with_chunk_size(chunk_size).build();
            assert!(matches!(res, Err(Error::ConfigError(_))), "{res:?}");
        }
    }

    #[test_log::test]
    fn test_first_store_allocates_chunk() {
        let (cache, _) = cache(1024, 64);
        assert_eq!(cache.statistics().free_chunks, 0);

        cache.store(1, &[1; 10]).unwrap();

        let stats = cache.statistics();
        assert_eq!(stats.free_chunks, 1);
        assert_eq!(stats.used_chunks, 0);
        assert_eq!(stats.total_allocated, 64);
    }

    #[test_log::test]
    fn test_full_chunk_is_retired() {
        let (cache, _) = cache(1024, 64);

        // 40 bytes each, the second one does not fit.
        cache.store(1, &[1; 32]).unwrap();
        cache.store(1, &[2; 32]).unwrap();

        assert_eq!(cache.used_chunk_ids(), vec![0]);
        assert_eq!(cache.free_chunk_ids(), vec![1]);
        assert_eq!(cache.total_allocated(), 128);
    }

    #[test_log::test]
    fn test_large_record_gets_own_chunk() {
        let (cache, _) = cache(1024, 64);

        let reader = cache.store_and_lease(7, &[7; 100]).unwrap();

        assert_eq!(reader.payload(), &[7; 100]);
        assert_eq!(reader.chunk().size(), physical_size(100));
        assert_eq!(cache.total_allocated(), physical_size(100));
    }

    #[test_log::test]
    fn test_held_reader_blocks_collection() {
        let (cache, recorder) = cache(64, 64);

        let reader = cache.store_and_lease(1, &[0xaa; 32]).unwrap();
        let chunk = reader.chunk().clone();

        // Over budget, but the only used chunk has a reader.
        cache.store(2, &[0xbb; 32]).unwrap();
        assert_eq!(cache.used_chunk_ids(), vec![chunk.id()]);
        assert!(!cache.garbage_collect());
        assert!(recorder.is_empty());
        assert_eq!(reader.payload(), &[0xaa; 32]);
        assert!(reader.is_current());

        drop(reader);
        assert!(!chunk.has_readers());
        assert!(!chunk.has_references());

        assert!(cache.garbage_collect());
        assert!(chunk.is_collected());
        assert_eq!(chunk.write_position(), 0);
        assert_eq!(cache.total_allocated(), 64);
        assert_eq!(cache.statistics().collected_chunks, 1);

        let records = recorder.dump();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chunk_id, chunk.id());
        assert_eq!(records[0].collection_id, 1);
        assert_eq!(records[0].payload, vec![0xaa; 32]);
    }

    #[test_log::test]
    fn test_index_reference_blocks_collection() {
        let (cache, recorder) = cache(64, 64);
        let index = CollectionIndex::new(1, Arc::new(NoopWalReferences));

        let mut reader = cache.store_and_lease(1, &[1; 16]).unwrap();
        index.insert_from_revision_cache(42, &mut reader);
        let chunk = reader.chunk().clone();
        drop(reader);
        assert_eq!(chunk.references(), 1);
        assert!(!chunk.has_readers());

        assert_eq!(cache.collect_all(), 0);
        assert!(recorder.is_empty());
        assert_eq!(index.lookup(42).unwrap().payload(), &[1; 16]);

        assert!(index.remove(42));
        assert_eq!(chunk.references(), 0);
        assert_eq!(cache.collect_all(), 1);
        assert_eq!(recorder.len(), 1);
        assert!(index.lookup(42).is_none());
    }

    #[test_log::test]
    fn test_collect_all_visits_every_record_once() {
        let (cache, recorder) = cache(1 << 20, 64);

        let payloads = (0..20u8).map(|i| vec![i; i as usize]).collect_vec();
        for (i, payload) in payloads.iter().enumerate() {
            cache.store(i as u64, payload).unwrap();
        }

        let chunks = cache.statistics().free_chunks + cache.statistics().used_chunks;
        assert_eq!(cache.collect_all(), chunks);
        assert_eq!(cache.total_allocated(), 0);

        let stats = cache.statistics();
        assert_eq!(stats.free_chunks, 0);
        assert_eq!(stats.used_chunks, 0);
        assert_eq!(stats.collected_chunks, chunks);

        let records = recorder.dump();
        assert_eq!(records.len(), payloads.len());
        for (record, (i, payload)) in records
            .iter()
            .sorted_by_key(|r| r.collection_id)
            .zip_eq(payloads.iter().enumerate())
        {
            assert_eq!(record.collection_id, i as u64);
            assert_eq!(&record.payload, payload);
        }

        // Stores keep working after everything is gone.
        cache.store(99, &[9; 9]).unwrap();
        assert_eq!(cache.statistics().free_chunks, 1);
    }

    #[test_log::test]
    fn test_budget_converges() {
        const TARGET: usize = 256;
        const CHUNK: usize = 64;

        let (cache, recorder) = cache(TARGET, CHUNK);

        for i in 0..200u64 {
            cache.store(i, &[i as u8; 24]).unwrap();
            assert!(
                cache.total_allocated() <= TARGET + CHUNK,
                "total allocated: {}",
                cache.total_allocated()
            );
        }
        while cache.garbage_collect() {}

        let stats = cache.statistics();
        assert!(stats.collected_chunks > 0);
        assert!(stats.total_allocated <= TARGET + CHUNK, "{stats:?}");
        assert_eq!(recorder.len(), stats.collected_chunks * 2);
    }

    #[test_log::test]
    fn test_garbage_collect_within_budget_is_noop() {
        let (cache, recorder) = cache(1024, 64);
        cache.store(1, &[1; 32]).unwrap();
        cache.store(1, &[1; 32]).unwrap();

        assert!(!cache.garbage_collect());
        assert!(recorder.is_empty());
        assert_eq!(cache.used_chunk_ids().len(), 1);
    }

    #[test_log::test]
    fn test_concurrent_store_and_lease() {
        const THREADS: usize = 8;
        const OPS: usize = 500;

        let (cache, _) = cache(4096, 256);

        thread::scope(|s| {
            for t in 0..THREADS {
                let cache = cache.clone();
                s.spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(t as u64);
                    let mut held = vec![];
                    for i in 0..OPS {
                        let len = rng.random_range(0..64);
                        let byte = (t * OPS + i) as u8;
                        let reader = cache.store_and_lease(t as u64, &vec![byte; len]).unwrap();
                        assert_eq!(reader.collection_id(), t as u64);
                        assert!(reader.payload().iter().all(|b| *b == byte));
                        if rng.random_bool(0.1) {
                            held.push((reader, byte));
                        }
                        if held.len() > 8 {
                            held.remove(0);
                        }
                        cache.garbage_collect();
                    }
                    for (reader, byte) in held {
                        assert!(reader.payload().iter().all(|b| *b == byte));
                    }
                });
            }
        });

        while cache.garbage_collect() {}
        cache.collect_all();
        assert_eq!(cache.total_allocated(), 0);
    }
}
