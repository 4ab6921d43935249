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

use super::{
    registry::noop::NoopMetricsRegistry, BoxedCounter, BoxedGauge, BoxedHistogram, CounterVecOps, GaugeVecOps,
    HistogramVecOps, RegistryOps,
};

// FIXME: https://github.com/rust-lang/rust-analyzer/issues/17685
// #[expect(missing_docs)]
/// ... ...
#[derive(Debug)]
pub struct Metrics {
    /* global cache metrics */
    /// ... ...
    pub cache_store: BoxedCounter,
    /// ... ...
    pub cache_lease: BoxedCounter,
    /// ... ...
    pub cache_retry: BoxedCounter,
    /// ... ...
    pub cache_store_bytes: BoxedCounter,

    /// ... ...
    pub chunk_alloc: BoxedCounter,
    /// ... ...
    pub chunk_retire: BoxedCounter,
    /// ... ...
    pub chunk_collect: BoxedCounter,
    /// ... ...
    pub chunk_collect_skip: BoxedCounter,
    /// ... ...
    pub chunk_collect_records: BoxedCounter,

    /// ... ...
    pub chunk_collect_duration: BoxedHistogram,

    /// ... ...
    pub cache_allocated_bytes: BoxedGauge,
    /// ... ...
    pub chunk_free: BoxedGauge,
    /// ... ...
    pub chunk_used: BoxedGauge,

    /* collection index metrics */
    /// ... ...
    pub index_insert_wal: BoxedCounter,
    /// ... ...
    pub index_insert_cache: BoxedCounter,
    /// ... ...
    pub index_replace: BoxedCounter,
    /// ... ...
    pub index_remove: BoxedCounter,
    /// ... ...
    pub index_invalidate: BoxedCounter,
    /// ... ...
    pub index_hit: BoxedCounter,
    /// ... ...
    pub index_miss: BoxedCounter,
    /// ... ...
    pub index_stale: BoxedCounter,
}

impl Metrics {
    /// Create a new metric with the given name.
    pub fn new(name: &'static str, registry: &dyn RegistryOps) -> Self {
        /* global cache metrics */

        let revcache_cache_op_total = registry.register_counter_vec(
            "revcache_cache_op_total",
            "revcache global cache operations",
            &["name", "op"],
        );
        let revcache_cache_op_bytes = registry.register_counter_vec(
            "revcache_cache_op_bytes",
            "revcache global cache operation bytes",
            &["name", "op"],
        );
        let revcache_chunk_op_total = registry.register_counter_vec(
            "revcache_chunk_op_total",
            "revcache chunk lifecycle operations",
            &["name", "op"],
        );
        let revcache_chunk_op_duration = registry.register_histogram_vec(
            "revcache_chunk_op_duration",
            "revcache chunk lifecycle operation durations",
            &["name", "op"],
        );
        let revcache_cache_usage_bytes = registry.register_gauge_vec(
            "revcache_cache_usage_bytes",
            "revcache global cache allocated bytes",
            &["name"],
        );
        let revcache_chunk = registry.register_gauge_vec("revcache_chunk", "revcache chunks", &["name", "type"]);

        let cache_store = revcache_cache_op_total.counter(&[name, "store"]);
        let cache_lease = revcache_cache_op_total.counter(&[name, "lease"]);
        let cache_retry = revcache_cache_op_total.counter(&[name, "retry"]);
        let cache_store_bytes = revcache_cache_op_bytes.counter(&[name, "store"]);

        let chunk_alloc = revcache_chunk_op_total.counter(&[name, "alloc"]);
        let chunk_retire = revcache_chunk_op_total.counter(&[name, "retire"]);
        let chunk_collect = revcache_chunk_op_total.counter(&[name, "collect"]);
        let chunk_collect_skip = revcache_chunk_op_total.counter(&[name, "collect_skip"]);
        let chunk_collect_records = revcache_chunk_op_total.counter(&[name, "collect_record"]);

        let chunk_collect_duration = revcache_chunk_op_duration.histogram(&[name, "collect"]);

        let cache_allocated_bytes = revcache_cache_usage_bytes.gauge(&[name]);
        let chunk_free = revcache_chunk.gauge(&[name, "free"]);
        let chunk_used = revcache_chunk.gauge(&[name, "used"]);

        /* collection index metrics */

        let revcache_index_op_total = registry.register_counter_vec(
            "revcache_index_op_total",
            "revcache collection index operations",
            &["name", "op"],
        );

        let index_insert_wal = revcache_index_op_total.counter(&[name, "insert_wal"]);
        let index_insert_cache = revcache_index_op_total.counter(&[name, "insert_cache"]);
        let index_replace = revcache_index_op_total.counter(&[name, "replace"]);
        let index_remove = revcache_index_op_total.counter(&[name, "remove"]);
        let index_invalidate = revcache_index_op_total.counter(&[name, "invalidate"]);
        let index_hit = revcache_index_op_total.counter(&[name, "hit"]);
        let index_miss = revcache_index_op_total.counter(&[name, "miss"]);
        let index_stale = revcache_index_op_total.counter(&[name, "stale"]);

        Self {
            cache_store,
            cache_lease,
            cache_retry,
            cache_store_bytes,
            chunk_alloc,
            chunk_retire,
            chunk_collect,
            chunk_collect_skip,
            chunk_collect_records,
            chunk_collect_duration,
            cache_allocated_bytes,
            chunk_free,
            chunk_used,

            index_insert_wal,
            index_insert_cache,
            index_replace,
            index_remove,
            index_invalidate,
            index_hit,
            index_miss,
            index_stale,
        }
    }

    /// Build noop metrics.
    ///
    /// Note: `noop` is only supposed to be called by other revcache components.
    #[doc(hidden)]
    pub fn noop() -> Self {
        Self::new("test", &NoopMetricsRegistry)
    }
}
