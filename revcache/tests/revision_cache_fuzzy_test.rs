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

//! Fuzzy test for the global revision cache with collection indexes and a background collector.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, OnceLock,
    },
    thread,
    time::Duration,
};

use rand::{rng, Rng};
use revcache::{
    CollectedRecord, CollectionIndex, Collector, CollectorConfig, GlobalRevisionCacheBuilder, LocationInfo,
    NoopWalReferences, RevisionId,
};

const KB: usize = 1024;

const COLLECTIONS: u64 = 4;

const WRITERS: usize = 4;
const READERS: usize = 4;
const REMOVERS: usize = 2;

const WRITES: usize = 2000;
const READS: usize = 4000;
const REMOVES: usize = 1000;

const MAX_PAYLOAD: usize = 200;

fn payload(revision_id: RevisionId, len: usize) -> Vec<u8> {
    let mut buf = revision_id.to_le_bytes().to_vec();
    buf.resize(8 + len, revision_id as u8);
    buf
}

fn verify(revision_id: RevisionId, data: &[u8]) {
    assert!(data.len() >= 8, "revision {revision_id}: {} bytes", data.len());
    let mut header = [0u8; 8];
    header.copy_from_slice(&data[..8]);
    assert_eq!(u64::from_le_bytes(header), revision_id);
    assert!(data[8..].iter().all(|b| *b == revision_id as u8), "revision {revision_id}");
}

#[test_log::test]
fn test_concurrent_store_lookup_and_collect() {
    let indexes: Arc<OnceLock<Vec<Arc<CollectionIndex>>>> = Arc::new(OnceLock::new());
    let invalidated = Arc::new(AtomicU64::new(0));

    let callback = {
        let indexes = indexes.clone();
        let invalidated = invalidated.clone();
        move |record: CollectedRecord<'_>| {
            let revision_id = u64::from_le_bytes(record.payload()[..8].try_into().unwrap());
            verify(revision_id, record.payload());
            let index = &indexes.get().unwrap()[record.collection_id() as usize];
            if index.invalidate(revision_id, record.chunk_id(), record.offset()) {
                invalidated.fetch_add(1, Ordering::Relaxed);
            }
        }
    };

    let cache = GlobalRevisionCacheBuilder::new(64 * KB)
        .with_name("fuzzy")
        .with_chunk_size(4 * KB)
        .with_garbage_collection_callback(callback)
        .build()
        .unwrap();

    indexes
        .set(
            (0..COLLECTIONS)
                .map(|id| {
                    Arc::new(CollectionIndex::new(id, Arc::new(NoopWalReferences)).with_metrics(cache.metrics().clone()))
                })
                .collect(),
        )
        .unwrap();
    let indexes = indexes.get().unwrap();

    let collector = Collector::spawn(
        cache.clone(),
        CollectorConfig {
            interval: Duration::from_millis(1),
        },
    )
    .unwrap();

    let next = AtomicU64::new(0);
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        let writers = (0..WRITERS)
            .map(|_| {
                s.spawn(|| {
                    let mut rng = rng();
                    for _ in 0..WRITES {
                        let revision_id = next.fetch_add(1, Ordering::Relaxed);
                        let collection_id = revision_id % COLLECTIONS;
                        let data = payload(revision_id, rng.random_range(0..MAX_PAYLOAD));
                        if rng.random_bool(0.5) {
                            let mut reader = cache.store_and_lease(collection_id, &data).unwrap();
                            verify(revision_id, reader.payload());
                            indexes[collection_id as usize].insert_from_revision_cache(revision_id, &mut reader);
                        } else {
                            indexes[collection_id as usize].insert_from_wal(revision_id, revision_id / 100, 0);
                            cache.store(collection_id, &data).unwrap();
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for _ in 0..READERS {
            s.spawn(|| {
                let mut rng = rng();
                for _ in 0..READS {
                    let upper = next.load(Ordering::Relaxed).max(1);
                    let revision_id = rng.random_range(0..upper);
                    if let Some(reader) = indexes[(revision_id % COLLECTIONS) as usize].lookup(revision_id) {
                        verify(revision_id, reader.payload());
                        if rng.random_bool(0.1) {
                            thread::yield_now();
                            verify(revision_id, reader.payload());
                        }
                    }
                }
            });
        }

        for _ in 0..REMOVERS {
            s.spawn(|| {
                let mut rng = rng();
                let mut removed = 0;
                while removed < REMOVES && !stop.load(Ordering::Relaxed) {
                    let upper = next.load(Ordering::Relaxed).max(1);
                    let revision_id = rng.random_range(0..upper);
                    if indexes[(revision_id % COLLECTIONS) as usize].remove(revision_id) {
                        removed += 1;
                    }
                }
            });
        }

        for writer in writers {
            writer.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
    });

    collector.stop();

    tracing::info!(
        "statistics: {:?}, invalidated: {}",
        cache.statistics(),
        invalidated.load(Ordering::Relaxed)
    );

    // Every cached entry still in an index must be readable.
    for revision_id in 0..next.load(Ordering::Relaxed) {
        let index = &indexes[(revision_id % COLLECTIONS) as usize];
        if let Some(LocationInfo::Cached { .. }) = index.location(revision_id) {
            if let Some(reader) = index.lookup(revision_id) {
                verify(revision_id, reader.payload());
            }
        }
    }

    // Once the indexes let go, everything can be collected.
    for index in indexes {
        for revision_id in 0..next.load(Ordering::Relaxed) {
            index.remove(revision_id);
        }
        assert!(index.is_empty());
    }
    cache.collect_all();
    assert_eq!(cache.total_allocated(), 0);
}
