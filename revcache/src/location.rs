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

use std::sync::{Arc, Weak};

use crate::{
    chunk::Chunk,
    reader::Reader,
    record::{ChunkId, DatafileId},
    wal::WalReferences,
};

/// Where a revision currently lives.
///
/// A location accounts for exactly one reference: a WAL datafile reference, or a durable reference of a chunk. The
/// cache-resident variant only keeps a weak back-pointer to the chunk and never keeps it alive.
///
/// Locations are not [`Clone`]. The owning collection index releases each one exactly once.
#[derive(Debug)]
pub enum RevisionLocation {
    /// The revision is only available from the write-ahead log.
    Wal {
        /// WAL datafile.
        datafile_id: DatafileId,
        /// Offset within the datafile.
        offset: u64,
    },
    /// The revision is stored in a chunk of the revision cache.
    Cached {
        /// Back-pointer to the chunk.
        chunk: Weak<Chunk>,
        /// Id of the chunk.
        chunk_id: ChunkId,
        /// Offset of the record within the chunk.
        offset: usize,
        /// Payload length.
        len: usize,
        /// Chunk version the record was stored with.
        version: u64,
    },
}

/// A plain copy of a [`RevisionLocation`], without ownership of its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationInfo {
    /// See [`RevisionLocation::Wal`].
    Wal {
        /// WAL datafile.
        datafile_id: DatafileId,
        /// Offset within the datafile.
        offset: u64,
    },
    /// See [`RevisionLocation::Cached`].
    Cached {
        /// Id of the chunk.
        chunk_id: ChunkId,
        /// Offset of the record within the chunk.
        offset: usize,
        /// Chunk version the record was stored with.
        version: u64,
    },
}

impl RevisionLocation {
    /// Record a WAL position, taking a reference on the datafile.
    pub(crate) fn wal(datafile_id: DatafileId, offset: u64, wal: &dyn WalReferences) -> Self {
        wal.add_reference(datafile_id);
        Self::Wal { datafile_id, offset }
    }

    /// Record the position of a leased record, taking over the reader's durable reference.
    ///
    /// If the reference has already been taken away from the reader, a new one is taken on the chunk.
    pub(crate) fn adopt(reader: &mut Reader) -> Self {
        if !reader.steal_reference() {
            reader.chunk().add_reference();
        }
        Self::Cached {
            chunk: Arc::downgrade(reader.chunk()),
            chunk_id: reader.chunk_id(),
            offset: reader.offset(),
            len: reader.len(),
            version: reader.version(),
        }
    }

    /// Release the reference the location accounts for.
    pub(crate) fn release(self, wal: &dyn WalReferences) {
        match self {
            RevisionLocation::Wal { datafile_id, .. } => wal.remove_reference(datafile_id),
            RevisionLocation::Cached { chunk, .. } => {
                if let Some(chunk) = chunk.upgrade() {
                    chunk.remove_reference();
                }
            }
        }
    }

    /// Lease the record again.
    ///
    /// Returns `None` if the location is WAL-resident, or if the chunk is gone, being collected, or has been
    /// collected since the record was stored. The returned reader owns a fresh reader slot and a fresh reference.
    pub(crate) fn lease(&self) -> Option<Reader> {
        let RevisionLocation::Cached {
            chunk,
            offset,
            len,
            version,
            ..
        } = self
        else {
            return None;
        };

        let chunk = chunk.upgrade()?;
        let pinned = chunk.pin().ok()?;
        if pinned != *version {
            chunk.remove_reader();
            return None;
        }
        chunk.add_reference();
        Some(Reader::new(chunk, *offset, *len, *version))
    }

    /// Returns `true` if the location is WAL-resident.
    pub fn is_wal(&self) -> bool {
        matches!(self, RevisionLocation::Wal { .. })
    }

    /// Returns `true` if the location is cache-resident.
    pub fn is_cached(&self) -> bool {
        matches!(self, RevisionLocation::Cached { .. })
    }

    /// Returns `true` if the location is the record at `offset` of chunk `chunk_id`.
    pub fn points_to(&self, chunk_id: ChunkId, offset: usize) -> bool {
        matches!(self, RevisionLocation::Cached { chunk_id: c, offset: o, .. } if *c == chunk_id && *o == offset)
    }

    /// Returns `true` if the location is any record of chunk `chunk_id`.
    pub fn is_in_chunk(&self, chunk_id: ChunkId) -> bool {
        matches!(self, RevisionLocation::Cached { chunk_id: c, .. } if *c == chunk_id)
    }

    /// Plain copy of the location.
    pub fn info(&self) -> LocationInfo {
        match self {
            RevisionLocation::Wal { datafile_id, offset } => LocationInfo::Wal {
                datafile_id: *datafile_id,
                offset: *offset,
            },
            RevisionLocation::Cached {
                chunk_id,
                offset,
                version,
                ..
            } => LocationInfo::Cached {
                chunk_id: *chunk_id,
                offset: *offset,
                version: *version,
            },
        }
    }
}
