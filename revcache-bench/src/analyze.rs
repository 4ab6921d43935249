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
    fmt::Display,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytesize::ByteSize;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use revcache::{GlobalRevisionCache, Statistics};

/// Latency histogram in microseconds.
pub type Latency = Arc<RwLock<Histogram<u64>>>;

fn latency() -> Latency {
    // 1us to 60s with 3 significant digits.
    Arc::new(RwLock::new(
        Histogram::new_with_bounds(1, 60 * 1_000_000, 3).expect("valid histogram bounds"),
    ))
}

#[derive(Debug, Clone)]
pub struct Metrics {
    pub store_ops: Arc<AtomicUsize>,
    pub store_bytes: Arc<AtomicUsize>,
    pub store_lats: Latency,

    pub lookup_ops: Arc<AtomicUsize>,
    pub lookup_bytes: Arc<AtomicUsize>,
    pub lookup_hit_lats: Latency,
    pub lookup_miss_ops: Arc<AtomicUsize>,
    pub lookup_miss_lats: Latency,

    pub remove_ops: Arc<AtomicUsize>,
    pub invalidated: Arc<AtomicU64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            store_ops: Arc::default(),
            store_bytes: Arc::default(),
            store_lats: latency(),
            lookup_ops: Arc::default(),
            lookup_bytes: Arc::default(),
            lookup_hit_lats: latency(),
            lookup_miss_ops: Arc::default(),
            lookup_miss_lats: latency(),
            remove_ops: Arc::default(),
            invalidated: Arc::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Percentiles {
    p50: u64,
    p90: u64,
    p99: u64,
    p999: u64,
    max: u64,
}

impl Percentiles {
    fn of(histogram: &Histogram<u64>) -> Self {
        Self {
            p50: histogram.value_at_quantile(0.5),
            p90: histogram.value_at_quantile(0.9),
            p99: histogram.value_at_quantile(0.99),
            p999: histogram.value_at_quantile(0.999),
            max: histogram.max(),
        }
    }
}

impl Display for Percentiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pmax: {}us, p50: {}us, p90: {}us, p99: {}us, p999: {}us",
            self.max, self.p50, self.p90, self.p99, self.p999
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsDump {
    store_ops: usize,
    store_bytes: usize,
    lookup_ops: usize,
    lookup_bytes: usize,
    lookup_miss_ops: usize,
    remove_ops: usize,
    invalidated: u64,

    store_lats: Percentiles,
    lookup_hit_lats: Percentiles,
    lookup_miss_lats: Percentiles,
}

impl Metrics {
    pub fn dump(&self) -> MetricsDump {
        MetricsDump {
            store_ops: self.store_ops.load(Ordering::Relaxed),
            store_bytes: self.store_bytes.load(Ordering::Relaxed),
            lookup_ops: self.lookup_ops.load(Ordering::Relaxed),
            lookup_bytes: self.lookup_bytes.load(Ordering::Relaxed),
            lookup_miss_ops: self.lookup_miss_ops.load(Ordering::Relaxed),
            remove_ops: self.remove_ops.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            store_lats: Percentiles::of(&self.store_lats.read()),
            lookup_hit_lats: Percentiles::of(&self.lookup_hit_lats.read()),
            lookup_miss_lats: Percentiles::of(&self.lookup_miss_lats.read()),
        }
    }
}

#[derive(Debug)]
pub struct Analysis {
    elapsed: Duration,

    store_iops: f64,
    store_throughput: f64,
    lookup_iops: f64,
    lookup_throughput: f64,
    lookup_hit_ratio: f64,
    remove_iops: f64,
    invalidated: u64,

    store_lats: Percentiles,
    lookup_hit_lats: Percentiles,
    lookup_miss_lats: Percentiles,

    statistics: Statistics,
}

pub fn analyze(elapsed: Duration, start: &MetricsDump, end: &MetricsDump, statistics: Statistics) -> Analysis {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let per_sec = |a: usize, b: usize| b.saturating_sub(a) as f64 / secs;

    let lookups = end.lookup_ops.saturating_sub(start.lookup_ops);
    let misses = end.lookup_miss_ops.saturating_sub(start.lookup_miss_ops);
    let lookup_hit_ratio = if lookups == 0 {
        0.0
    } else {
        (lookups - misses.min(lookups)) as f64 / lookups as f64
    };

    Analysis {
        elapsed,
        store_iops: per_sec(start.store_ops, end.store_ops),
        store_throughput: per_sec(start.store_bytes, end.store_bytes),
        lookup_iops: per_sec(start.lookup_ops, end.lookup_ops),
        lookup_throughput: per_sec(start.lookup_bytes, end.lookup_bytes),
        lookup_hit_ratio,
        remove_iops: per_sec(start.remove_ops, end.remove_ops),
        invalidated: end.invalidated.saturating_sub(start.invalidated),
        store_lats: end.store_lats,
        lookup_hit_lats: end.lookup_hit_lats,
        lookup_miss_lats: end.lookup_miss_lats,
        statistics,
    }
}

impl Display for Analysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Elapsed: {:?}", self.elapsed)?;
        writeln!(f, "Store IOPS: {:.0}/s", self.store_iops)?;
        writeln!(f, "Store Throughput: {}/s", ByteSize::b(self.store_throughput as u64))?;
        writeln!(f, "Store Latency: {}", self.store_lats)?;
        writeln!(f, "Lookup IOPS: {:.0}/s", self.lookup_iops)?;
        writeln!(f, "Lookup Throughput: {}/s", ByteSize::b(self.lookup_throughput as u64))?;
        writeln!(f, "Lookup Hit Ratio: {:.2}%", self.lookup_hit_ratio * 100.0)?;
        writeln!(f, "Lookup Hit Latency: {}", self.lookup_hit_lats)?;
        writeln!(f, "Lookup Miss Latency: {}", self.lookup_miss_lats)?;
        writeln!(f, "Remove IOPS: {:.0}/s", self.remove_iops)?;
        writeln!(f, "Invalidated By Collection: {}", self.invalidated)?;
        writeln!(
            f,
            "Cache: allocated {} / target {}, free chunks: {}, used chunks: {}, collected chunks: {}",
            ByteSize::b(self.statistics.total_allocated as u64),
            ByteSize::b(self.statistics.total_target_size as u64),
            self.statistics.free_chunks,
            self.statistics.used_chunks,
            self.statistics.collected_chunks,
        )
    }
}

/// Print a report every `interval` until `stop` is set.
pub fn monitor(cache: GlobalRevisionCache, metrics: Metrics, interval: Duration, stop: Arc<AtomicBool>) {
    let mut last = metrics.dump();
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(interval);
        let now = metrics.dump();
        let analysis = analyze(interval, &last, &now, cache.statistics());
        println!("{analysis}");
        last = now;
    }
}
