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

//! Utilities for testing the revision cache.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::{
    record::{ChunkId, CollectedRecord, CollectionId, DatafileId},
    wal::WalReferences,
};

/// WAL reference hooks that count calls per datafile.
#[derive(Debug, Default)]
pub struct CountingWalReferences {
    counts: Mutex<HashMap<DatafileId, (usize, usize)>>,
}

impl WalReferences for CountingWalReferences {
    fn add_reference(&self, datafile_id: DatafileId) {
        self.counts.lock().entry(datafile_id).or_default().0 += 1;
    }

    fn remove_reference(&self, datafile_id: DatafileId) {
        self.counts.lock().entry(datafile_id).or_default().1 += 1;
    }
}

impl CountingWalReferences {
    /// Count of `add_reference` calls on `datafile_id`.
    pub fn added(&self, datafile_id: DatafileId) -> usize {
        self.counts.lock().get(&datafile_id).map(|c| c.0).unwrap_or_default()
    }

    /// Count of `remove_reference` calls on `datafile_id`.
    pub fn removed(&self, datafile_id: DatafileId) -> usize {
        self.counts.lock().get(&datafile_id).map(|c| c.1).unwrap_or_default()
    }

    /// References still held on `datafile_id`.
    pub fn held(&self, datafile_id: DatafileId) -> usize {
        self.added(datafile_id) - self.removed(datafile_id)
    }
}

/// An owned copy of a [`CollectedRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collected {
    /// Id of the collected chunk.
    pub chunk_id: ChunkId,
    /// Offset of the record.
    pub offset: usize,
    /// Collection of the record.
    pub collection_id: CollectionId,
    /// Payload of the record.
    pub payload: Vec<u8>,
}

/// Collection callback that remembers every visited record.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    records: Arc<Mutex<Vec<Collected>>>,
}

impl Recorder {
    /// Remember `record`.
    pub fn record(&self, record: CollectedRecord<'_>) {
        self.records.lock().push(Collected {
            chunk_id: record.chunk_id(),
            offset: record.offset(),
            collection_id: record.collection_id(),
            payload: record.payload().to_vec(),
        });
    }

    /// All records visited so far.
    pub fn dump(&self) -> Vec<Collected> {
        self.records.lock().clone()
    }

    /// Count of records visited so far.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if no record has been visited.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
