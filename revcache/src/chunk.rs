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
    ptr::{self, NonNull},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use revcache_common::{bits, strict_assert, strict_assert_eq};

use crate::{
    error::{Error, Result},
    reader::Reader,
    record::{physical_size, ChunkId, CollectedRecord, CollectionId, RECORD_ALIGN, RECORD_HEADER_SIZE},
};

/// Bit 0 of the user word: a collector holds the chunk exclusively.
const WRITER: usize = 1;
/// Every active reader adds this to the user word.
const READER: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: usize,
    len: usize,
}

#[derive(Debug, Default)]
struct Cursor {
    position: usize,
    slots: Vec<Slot>,
}

/// A fixed-size memory arena holding appended revision records.
///
/// Records are laid out as `[collection id][payload]` padded to 8 bytes. Stores reserve disjoint byte ranges by
/// advancing the write position under a mutex and copy their bytes without holding it.
///
/// Access is arbitrated by a single atomic user word: bit 0 is set while a collector holds the chunk exclusively,
/// the remaining bits count active readers in steps of 2. Durable holders (collection index entries) are counted
/// separately as references.
pub struct Chunk {
    id: ChunkId,

    memory: NonNull<u8>,
    size: usize,

    cursor: Mutex<Cursor>,

    version: AtomicU64,
    users: AtomicUsize,
    references: AtomicUsize,
    collected: AtomicBool,
}

// The raw memory is only written through disjoint reserved ranges, or exclusively while the writer bit is held.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("version", &self.version())
            .field("users", &self.users.load(Ordering::Relaxed))
            .field("references", &self.references())
            .finish()
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: `memory` is leaked from a boxed slice of `size` bytes in `Chunk::new`.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.memory.as_ptr(), self.size)));
        }
    }
}

impl Chunk {
    /// Allocate a zeroed chunk of `size` bytes.
    ///
    /// Returns [`Error::OutOfMemory`] if the allocator refuses the buffer.
    pub fn new(id: ChunkId, size: usize) -> Result<Self> {
        bits::debug_assert_aligned(RECORD_ALIGN, size);

        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(size).map_err(|e| {
            tracing::warn!("[chunk]: allocate chunk {id} with {size} bytes error: {e}");
            Error::OutOfMemory {
                requested: size,
                available: 0,
            }
        })?;
        buf.resize(size, 0);
        let memory = NonNull::from(Box::leak(buf.into_boxed_slice())).cast::<u8>();

        Ok(Self {
            id,
            memory,
            size,
            cursor: Mutex::default(),
            version: AtomicU64::new(0),
            users: AtomicUsize::new(0),
            references: AtomicUsize::new(0),
            collected: AtomicBool::new(false),
        })
    }

    /// Chunk id.
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Capacity in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Next free offset.
    pub fn write_position(&self) -> usize {
        self.cursor.lock().position
    }

    /// Bytes left for new records.
    pub fn remaining(&self) -> usize {
        self.size - self.write_position()
    }

    /// Count of records currently stored.
    pub fn records(&self) -> usize {
        self.cursor.lock().slots.len()
    }

    /// Collection cycle counter. Bumped once per collection.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Count of active readers.
    pub fn readers(&self) -> usize {
        self.users.load(Ordering::Acquire) / READER
    }

    /// Returns `true` if any reader is active.
    pub fn has_readers(&self) -> bool {
        self.readers() > 0
    }

    /// Returns `true` while a collector holds the chunk exclusively.
    pub fn is_locked(&self) -> bool {
        self.users.load(Ordering::Acquire) & WRITER != 0
    }

    /// Returns `true` once the chunk has been collected. A collected chunk never hands out readers again.
    pub fn is_collected(&self) -> bool {
        self.collected.load(Ordering::Acquire)
    }

    /// Count of durable references.
    pub fn references(&self) -> usize {
        self.references.load(Ordering::Acquire)
    }

    /// Returns `true` if any durable reference is held.
    pub fn has_references(&self) -> bool {
        self.references() > 0
    }

    /// Take a durable reference.
    pub fn add_reference(&self) {
        self.references.fetch_add(1, Ordering::AcqRel);
    }

    /// Release a durable reference.
    pub fn remove_reference(&self) {
        let prev = self.references.fetch_sub(1, Ordering::AcqRel);
        strict_assert!(prev > 0, "chunk {} reference underflow", self.id);
    }

    /// Take a reader slot.
    ///
    /// Lock-free unless a collector holds the chunk, in which case the increment is undone and `false` is returned.
    pub fn add_reader(&self) -> bool {
        let prev = self.users.fetch_add(READER, Ordering::AcqRel);
        if prev & WRITER != 0 {
            self.users.fetch_sub(READER, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Release a reader slot.
    pub fn remove_reader(&self) {
        let prev = self.users.fetch_sub(READER, Ordering::AcqRel);
        strict_assert!(prev >= READER, "chunk {} reader underflow", self.id);
    }

    /// Gain exclusive access.
    ///
    /// Spins until all active readers are gone, then sets the writer bit, which keeps new readers out.
    pub fn add_writer(&self) {
        while self
            .users
            .compare_exchange_weak(0, WRITER, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    /// Release exclusive access.
    pub fn remove_writer(&self) {
        let res = self
            .users
            .compare_exchange(WRITER, 0, Ordering::AcqRel, Ordering::Acquire);
        strict_assert!(res.is_ok(), "chunk {} is not held by a writer: {res:?}", self.id);
    }

    /// Take a reader slot that is valid for the current collection cycle.
    ///
    /// Fails with [`Error::ChunkLocked`] if a collector holds the chunk, has already bumped the version, or has
    /// finished collecting it. Returns the version the slot is valid for.
    pub(crate) fn pin(&self) -> Result<u64> {
        let version = self.version();
        if !self.add_reader() {
            return Err(Error::ChunkLocked);
        }
        if self.version() != version || self.is_collected() {
            self.remove_reader();
            return Err(Error::ChunkLocked);
        }
        Ok(version)
    }

    /// Append a record and return its offset.
    ///
    /// The chunk is pinned with a reader slot while the bytes are copied, so a collection never observes a
    /// half-written record. Fails with [`Error::OutOfMemory`] if the remaining capacity is too small, leaving the
    /// write position untouched, or with [`Error::ChunkLocked`] if the chunk is being collected.
    pub fn store(&self, collection_id: CollectionId, data: &[u8]) -> Result<usize> {
        self.pin()?;
        let res = self.store_pinned(collection_id, data);
        self.remove_reader();
        res
    }

    /// Append a record and lease it out.
    ///
    /// The returned [`Reader`] owns a reader slot and a durable reference. Nothing is stored if the chunk is locked.
    /// If the chunk is full, the reader slot is released before the error is returned.
    pub fn store_and_lease(self: &Arc<Self>, collection_id: CollectionId, data: &[u8]) -> Result<Reader> {
        let version = self.pin()?;
        let offset = match self.store_pinned(collection_id, data) {
            Ok(offset) => offset,
            Err(e) => {
                self.remove_reader();
                return Err(e);
            }
        };
        self.add_reference();
        Ok(Reader::new(self.clone(), offset, data.len(), version))
    }

    /// Caller must hold a reader slot.
    fn store_pinned(&self, collection_id: CollectionId, data: &[u8]) -> Result<usize> {
        let offset = self.reserve(data.len())?;
        // SAFETY: `reserve` hands out a range no other store owns, and the reader slot keeps collectors away.
        unsafe { self.write_record(offset, collection_id, data) };
        Ok(offset)
    }

    fn reserve(&self, len: usize) -> Result<usize> {
        let size = physical_size(len);
        let mut cursor = self.cursor.lock();
        let available = self.size - cursor.position;
        if size > available {
            return Err(Error::OutOfMemory {
                requested: size,
                available,
            });
        }
        let offset = cursor.position;
        cursor.position += size;
        cursor.slots.push(Slot { offset, len });
        Ok(offset)
    }

    /// # Safety
    ///
    /// `[offset, offset + physical_size(data.len()))` must be reserved by the caller and within the chunk.
    unsafe fn write_record(&self, offset: usize, collection_id: CollectionId, data: &[u8]) {
        strict_assert!(offset + physical_size(data.len()) <= self.size);
        let dst = self.memory.as_ptr().add(offset);
        let header = collection_id.to_le_bytes();
        ptr::copy_nonoverlapping(header.as_ptr(), dst, RECORD_HEADER_SIZE);
        ptr::copy_nonoverlapping(data.as_ptr(), dst.add(RECORD_HEADER_SIZE), data.len());
    }

    /// Read the record at `offset` with a payload of `len` bytes.
    ///
    /// # Safety
    ///
    /// The record must have been written by a finished store, and the caller must keep the chunk from being
    /// collected (a reader slot or the writer bit) for the lifetime of the returned slice.
    pub(crate) unsafe fn record(&self, offset: usize, len: usize) -> (CollectionId, &[u8]) {
        strict_assert!(offset + RECORD_HEADER_SIZE + len <= self.size);
        let src = self.memory.as_ptr().add(offset);
        let mut header = [0u8; RECORD_HEADER_SIZE];
        ptr::copy_nonoverlapping(src, header.as_mut_ptr(), RECORD_HEADER_SIZE);
        let payload = std::slice::from_raw_parts(src.add(RECORD_HEADER_SIZE), len);
        (CollectionId::from_le_bytes(header), payload)
    }

    /// Raw bytes in `[offset, offset + len)`.
    ///
    /// # Safety
    ///
    /// Same as [`Chunk::record`].
    pub(crate) unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        strict_assert!(offset + len <= self.size);
        std::slice::from_raw_parts(self.memory.as_ptr().add(offset), len)
    }

    /// Collect the chunk.
    ///
    /// Bumps the version, waits for active readers to leave and keeps new ones out, then invokes `f` once per stored
    /// record so that the owners can drop or relocate their entries. Finally zeroes the memory and resets the write
    /// position. Returns the count of visited records.
    pub fn garbage_collect<F>(&self, mut f: F) -> usize
    where
        F: FnMut(CollectedRecord<'_>),
    {
        self.version.fetch_add(1, Ordering::AcqRel);
        self.add_writer();

        let (position, slots) = {
            let mut cursor = self.cursor.lock();
            (cursor.position, std::mem::take(&mut cursor.slots))
        };

        for slot in slots.iter() {
            // SAFETY: The writer bit is held and every reserved record has been written by a pinned store.
            let (collection_id, payload) = unsafe { self.record(slot.offset, slot.len) };
            tracing::trace!(
                "[chunk]: collect record, chunk: {}, offset: {}, collection: {collection_id}, len: {}",
                self.id,
                slot.offset,
                slot.len
            );
            f(CollectedRecord {
                chunk_id: self.id,
                offset: slot.offset,
                collection_id,
                payload,
            });
        }

        // SAFETY: The writer bit is held, nobody else can access the memory.
        unsafe { ptr::write_bytes(self.memory.as_ptr(), 0, position) };
        {
            let mut cursor = self.cursor.lock();
            strict_assert_eq!(cursor.position, position);
            cursor.position = 0;
        }
        self.collected.store(true, Ordering::Release);

        self.remove_writer();

        slots.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use itertools::Itertools;

    use super::*;

    #[test_log::test]
    fn test_store_offsets() {
        let chunk = Chunk::new(1, 64).unwrap();

        let records = [(1u64, vec![1u8; 5]), (2, vec![2u8; 10]), (3, vec![3u8; 3])];
        let offsets = records
            .iter()
            .map(|(collection_id, data)| chunk.store(*collection_id, data).unwrap())
            .collect_vec();

        assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{offsets:?}");
        assert!(offsets.iter().all(|offset| offset % RECORD_ALIGN == 0), "{offsets:?}");
        assert_eq!(
            chunk.write_position(),
            records.iter().map(|(_, data)| physical_size(data.len())).sum::<usize>()
        );
        assert_eq!(chunk.write_position(), 56);
        assert_eq!(chunk.records(), 3);
    }

    #[test_log::test]
    fn test_store_read_back() {
        let chunk = Chunk::new(1, 256).unwrap();

        let payloads = [b"hello".to_vec(), b"revision cache".to_vec(), vec![], vec![0xff; 17]];
        let offsets = payloads
            .iter()
            .enumerate()
            .map(|(i, data)| chunk.store(i as u64 + 100, data).unwrap())
            .collect_vec();

        for (i, (offset, data)) in offsets.iter().zip_eq(payloads.iter()).enumerate() {
            let (collection_id, payload) = unsafe { chunk.record(*offset, data.len()) };
            assert_eq!(collection_id, i as u64 + 100);
            assert_eq!(payload, &data[..]);

            let raw = unsafe { chunk.bytes(*offset, physical_size(data.len())) };
            assert_eq!(&raw[..RECORD_HEADER_SIZE], &(i as u64 + 100).to_le_bytes());
            assert_eq!(&raw[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + data.len()], &data[..]);
            assert!(raw[RECORD_HEADER_SIZE + data.len()..].iter().all(|b| *b == 0));
        }
    }

    #[test_log::test]
    fn test_store_out_of_memory() {
        let chunk = Chunk::new(1, 64).unwrap();
        chunk.store(1, &[1; 30]).unwrap();
        assert_eq!(chunk.write_position(), 40);

        let err = chunk.store(1, &[1; 20]).unwrap_err();
        assert!(
            matches!(
                err,
                Error::OutOfMemory {
                    requested: 32,
                    available: 24
                }
            ),
            "{err:?}"
        );
        assert_eq!(chunk.write_position(), 40);
        assert_eq!(chunk.records(), 1);
        assert!(!chunk.has_readers());

        // A smaller record still fits.
        chunk.store(1, &[1; 16]).unwrap();
        assert_eq!(chunk.write_position(), 64);
    }

    #[test_log::test]
    fn test_store_and_lease_out_of_memory_releases_reader() {
        let chunk = Arc::new(Chunk::new(1, 32).unwrap());
        let err = chunk.store_and_lease(1, &[0; 64]).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }), "{err:?}");
        assert!(!chunk.has_readers());
        assert!(!chunk.has_references());
        assert_eq!(chunk.write_position(), 0);
    }

    #[test_log::test]
    fn test_reader_writer_exclusion() {
        let chunk = Chunk::new(1, 64).unwrap();

        assert!(chunk.add_reader());
        assert!(chunk.add_reader());
        assert_eq!(chunk.readers(), 2);
        chunk.remove_reader();
        chunk.remove_reader();
        assert!(!chunk.has_readers());

        chunk.add_writer();
        assert!(chunk.is_locked());
        assert!(!chunk.add_reader());
        assert!(!chunk.has_readers());
        assert!(matches!(chunk.store(1, b"x"), Err(Error::ChunkLocked)));
        chunk.remove_writer();

        assert!(!chunk.is_locked());
        assert!(chunk.add_reader());
        chunk.remove_reader();
    }

    #[test_log::test]
    fn test_store_and_lease_locked() {
        let chunk = Arc::new(Chunk::new(1, 64).unwrap());
        chunk.add_writer();
        assert!(matches!(chunk.store_and_lease(1, b"x"), Err(Error::ChunkLocked)));
        chunk.remove_writer();
        assert_eq!(chunk.write_position(), 0);
        assert_eq!(chunk.users.load(Ordering::Acquire), 0);
        assert!(!chunk.has_references());
    }

    #[test_log::test]
    fn test_garbage_collect() {
        let chunk = Arc::new(Chunk::new(7, 128).unwrap());
        chunk.store(1, b"first").unwrap();
        let reader = chunk.store_and_lease(2, b"second").unwrap();
        drop(reader);
        chunk.store(3, b"").unwrap();

        let mut visited = vec![];
        let count = chunk.garbage_collect(|record| {
            assert_eq!(record.chunk_id(), 7);
            visited.push((record.offset(), record.collection_id(), record.payload().to_vec()));
        });

        assert_eq!(count, 3);
        assert_eq!(
            visited,
            vec![
                (0, 1, b"first".to_vec()),
                (16, 2, b"second".to_vec()),
                (32, 3, vec![]),
            ]
        );
        assert_eq!(chunk.write_position(), 0);
        assert_eq!(chunk.records(), 0);
        assert_eq!(chunk.version(), 1);
        assert!(chunk.is_collected());
        assert!(!chunk.is_locked());
        assert!(unsafe { chunk.bytes(0, 40) }.iter().all(|b| *b == 0));

        // A collected chunk refuses new readers.
        assert!(matches!(chunk.store(1, b"late"), Err(Error::ChunkLocked)));
        assert!(!chunk.has_readers());
    }

    #[test_log::test]
    fn test_garbage_collect_waits_for_readers() {
        let chunk = Arc::new(Chunk::new(1, 64).unwrap());
        let reader = chunk.store_and_lease(1, b"pinned").unwrap();

        let done = AtomicBool::new(false);
        thread::scope(|s| {
            let handle = s.spawn(|| {
                let count = chunk.garbage_collect(|_| {});
                done.store(true, Ordering::Release);
                count
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!done.load(Ordering::Acquire));
            assert_eq!(reader.payload(), b"pinned");

            drop(reader);
            assert_eq!(handle.join().unwrap(), 1);
        });
        assert!(done.load(Ordering::Acquire));
        assert_eq!(chunk.write_position(), 0);
    }

    #[test_log::test]
    fn test_concurrent_readers_never_overlap_collection() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 2000;

        let chunk = Chunk::new(1, 64).unwrap();
        let collecting = AtomicBool::new(false);
        let violations = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..ROUNDS {
                        if chunk.add_reader() {
                            if collecting.load(Ordering::Acquire) {
                                violations.fetch_add(1, Ordering::Relaxed);
                            }
                            chunk.remove_reader();
                        }
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..ROUNDS / 10 {
                    chunk.add_writer();
                    collecting.store(true, Ordering::Release);
                    assert!(!chunk.has_readers());
                    collecting.store(false, Ordering::Release);
                    chunk.remove_writer();
                }
            });
        });

        assert_eq!(violations.load(Ordering::Relaxed), 0);
        assert_eq!(chunk.users.load(Ordering::Acquire), 0);
    }

    #[test_log::test]
    fn test_concurrent_stores_are_disjoint() {
        const THREADS: usize = 8;
        const STORES: usize = 64;

        let chunk = Chunk::new(1, THREADS * STORES * physical_size(13)).unwrap();

        let stored = thread::scope(|s| {
            let handles = (0..THREADS)
                .map(|t| {
                    let chunk = &chunk;
                    s.spawn(move || {
                        (0..STORES)
                            .map(|i| {
                                let data = [(t * STORES + i) as u8; 13];
                                (chunk.store(t as u64, &data).unwrap(), t as u64, data)
                            })
                            .collect_vec()
                    })
                })
                .collect_vec();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect_vec()
        });

        assert_eq!(chunk.remaining(), 0);
        assert_eq!(stored.iter().map(|(offset, _, _)| *offset).unique().count(), THREADS * STORES);
        for (offset, collection_id, data) in stored {
            let (cid, payload) = unsafe { chunk.record(offset, data.len()) };
            assert_eq!(cid, collection_id);
            assert_eq!(payload, &data[..]);
        }
    }
}
