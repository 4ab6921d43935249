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

/// Revision cache error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Not enough memory for a record.
    ///
    /// Raised by a chunk whose remaining capacity is too small, which the global cache recovers from by moving on
    /// to another chunk, or by the allocator refusing a fresh chunk, which is surfaced to the caller.
    #[error("out of memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory {
        /// Requested bytes.
        requested: usize,
        /// Available bytes.
        available: usize,
    },
    /// The chunk is being collected and refuses new readers.
    ///
    /// Not a real error. The caller is supposed to retry with another chunk.
    #[error("chunk is locked by an in-progress collection")]
    ChunkLocked,
    /// Config error.
    #[error("config error: {0}")]
    ConfigError(String),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if the error can be recovered from by retrying with another chunk.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. } | Error::ChunkLocked)
    }
}

/// Revision cache result.
pub type Result<T> = std::result::Result<T, Error>;
