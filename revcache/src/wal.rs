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

use std::fmt::Debug;

use crate::record::DatafileId;

/// Reference counting hooks of the write-ahead log.
///
/// A collection index takes one reference on a datafile for every revision it records as WAL-resident, and releases
/// it when the entry is overwritten, removed or the index is dropped.
pub trait WalReferences: Send + Sync + 'static + Debug {
    /// Pin `datafile_id`.
    fn add_reference(&self, datafile_id: DatafileId);
    /// Unpin `datafile_id`.
    fn remove_reference(&self, datafile_id: DatafileId);
}

/// WAL reference hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWalReferences;

impl WalReferences for NoopWalReferences {
    fn add_reference(&self, _: DatafileId) {}

    fn remove_reference(&self, _: DatafileId) {}
}
