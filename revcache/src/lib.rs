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

//! An in-memory cache of recently written document revisions.
//!
//! Serialized revisions are appended to fixed-size memory chunks owned by a [`GlobalRevisionCache`]. Readers pin a
//! chunk with a [`Reader`] lease, [`CollectionIndex`] entries keep durable references, and full chunks without either
//! are collected whenever the cache exceeds its memory budget. Every record of a collected chunk is reported to the
//! [`GarbageCollectionCallback`] before the memory is released.
//!
//! ```
//! use std::sync::Arc;
//!
//! use revcache::{CollectionIndex, GlobalRevisionCacheBuilder, NoopWalReferences};
//!
//! let cache = GlobalRevisionCacheBuilder::new(64 * 1024 * 1024)
//!     .with_chunk_size(1024 * 1024)
//!     .build()
//!     .unwrap();
//! let index = CollectionIndex::new(1, Arc::new(NoopWalReferences)).with_metrics(cache.metrics().clone());
//!
//! let mut reader = cache.store_and_lease(1, b"{\"_key\":\"a\"}").unwrap();
//! index.insert_from_revision_cache(42, &mut reader);
//! drop(reader);
//!
//! let reader = index.lookup(42).unwrap();
//! assert_eq!(reader.payload(), b"{\"_key\":\"a\"}");
//! ```

mod cache;
mod chunk;
mod collector;
mod error;
mod index;
mod location;
mod reader;
mod record;
mod wal;

/// Utilities for testing.
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

/// Re-exports of the public types.
pub mod prelude;
pub use prelude::*;
