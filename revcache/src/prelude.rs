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

pub use crate::{
    cache::{GarbageCollectionCallback, GlobalRevisionCache, GlobalRevisionCacheBuilder, Statistics, DEFAULT_CHUNK_SIZE},
    chunk::Chunk,
    collector::{Collector, CollectorConfig},
    error::{Error, Result},
    index::CollectionIndex,
    location::{LocationInfo, RevisionLocation},
    reader::Reader,
    record::{
        physical_size, ChunkId, CollectedRecord, CollectionId, DatafileId, RevisionId, RECORD_ALIGN, RECORD_HEADER_SIZE,
    },
    wal::{NoopWalReferences, WalReferences},
};
