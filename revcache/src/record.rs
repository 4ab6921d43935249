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

use revcache_common::bits;

/// Identifier of a collection.
pub type CollectionId = u64;
/// Identifier of a document revision within a collection.
pub type RevisionId = u64;
/// Identifier of a chunk, unique within one global cache.
pub type ChunkId = u64;
/// Identifier of a write-ahead log datafile.
pub type DatafileId = u64;

/// Every record starts at a multiple of this alignment.
pub const RECORD_ALIGN: usize = 8;
/// Size of the collection id prefix of each record.
pub const RECORD_HEADER_SIZE: usize = std::mem::size_of::<CollectionId>();

/// Bytes a record with a payload of `len` bytes occupies in a chunk.
///
/// A record is laid out as `[collection id: 8 bytes][payload]`, padded to the next multiple of 8 bytes.
#[inline]
pub fn physical_size(len: usize) -> usize {
    bits::align_up(RECORD_ALIGN, RECORD_HEADER_SIZE + len)
}

/// A record visited while its chunk is being collected.
///
/// The view is only valid for the duration of the collection callback.
#[derive(Debug, Clone, Copy)]
pub struct CollectedRecord<'a> {
    pub(crate) chunk_id: ChunkId,
    pub(crate) offset: usize,
    pub(crate) collection_id: CollectionId,
    pub(crate) payload: &'a [u8],
}

impl<'a> CollectedRecord<'a> {
    /// Id of the chunk being collected.
    pub fn chunk_id(&self) -> ChunkId {
        self.chunk_id
    }

    /// Offset of the record within the chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Collection the record belongs to.
    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    /// Payload of the record.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}
