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

use std::{fmt::Debug, ops::Deref, sync::Arc};

use crate::{
    chunk::Chunk,
    record::{ChunkId, CollectionId},
};

/// A lease on a record stored in a [`Chunk`].
///
/// While a reader is alive, the record bytes stay valid and the chunk cannot be collected. A reader owns one reader
/// slot and, unless it has been stolen by a collection index, one durable reference of the chunk. Both are released
/// exactly once on drop.
///
/// Readers are move-only. Cloning one would duplicate a slot the chunk counted once.
pub struct Reader {
    chunk: Arc<Chunk>,
    offset: usize,
    len: usize,
    version: u64,

    reference: bool,
    reader: bool,
}

impl Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("chunk", &self.chunk.id())
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("version", &self.version)
            .field("reference", &self.reference)
            .field("reader", &self.reader)
            .finish()
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if self.reference {
            self.chunk.remove_reference();
            self.reference = false;
        }
        if self.reader {
            self.chunk.remove_reader();
            self.reader = false;
        }
    }
}

impl Reader {
    /// The caller hands over one reader slot and one reference of `chunk`.
    pub(crate) fn new(chunk: Arc<Chunk>, offset: usize, len: usize, version: u64) -> Self {
        Self {
            chunk,
            offset,
            len,
            version,
            reference: true,
            reader: true,
        }
    }

    /// Give up the durable reference without releasing it.
    ///
    /// The caller becomes responsible for the matching [`Chunk::remove_reference`]. The reader slot is still released
    /// on drop. Returns `false` if the reference has already been stolen.
    pub fn steal_reference(&mut self) -> bool {
        std::mem::replace(&mut self.reference, false)
    }

    /// Returns `true` if the reader still owns its durable reference.
    pub fn owns_reference(&self) -> bool {
        self.reference
    }

    /// The leased chunk.
    pub fn chunk(&self) -> &Arc<Chunk> {
        &self.chunk
    }

    /// Id of the leased chunk.
    pub fn chunk_id(&self) -> ChunkId {
        self.chunk.id()
    }

    /// Offset of the record within the chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Chunk version captured when the record was leased.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns `true` if the chunk has not entered a collection cycle since the record was leased.
    pub fn is_current(&self) -> bool {
        self.chunk.version() == self.version
    }

    /// Collection the record belongs to.
    pub fn collection_id(&self) -> CollectionId {
        // SAFETY: The reader slot keeps the chunk from being collected.
        unsafe { self.chunk.record(self.offset, self.len) }.0
    }

    /// Payload of the record.
    pub fn payload(&self) -> &[u8] {
        // SAFETY: The reader slot keeps the chunk from being collected.
        unsafe { self.chunk.record(self.offset, self.len) }.1
    }
}

impl Deref for Reader {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.payload()
    }
}

impl AsRef<[u8]> for Reader {
    fn as_ref(&self) -> &[u8] {
        self.payload()
    }
}
