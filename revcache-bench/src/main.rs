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

//! Bench tool for the global revision cache.

mod analyze;
mod text;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use analyze::{analyze, monitor, Metrics};
use bytesize::{KIB, MIB};
use clap::Parser;
use itertools::Itertools;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use revcache::{
    CollectedRecord, CollectionIndex, Collector, CollectorConfig, GlobalRevisionCache, GlobalRevisionCacheBuilder,
    NoopWalReferences,
};
use text::document;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Revision cache memory budget. (MiB)
    #[arg(long, default_value_t = 256)]
    mem: usize,

    /// Chunk size. (KiB)
    #[arg(long, default_value_t = 4096)]
    chunk_size: usize,

    /// (s)
    #[arg(short, long, default_value_t = 60)]
    time: u64,

    /// (s)
    #[arg(long, default_value_t = 2)]
    report_interval: u64,

    /// Collector interval. (ms)
    #[arg(long, default_value_t = 100)]
    collect_interval: u64,

    /// Min document size (B).
    #[arg(long, default_value_t = 64)]
    entry_size_min: usize,

    /// Max document size (B).
    #[arg(long, default_value_t = 4 * 1024)]
    entry_size_max: usize,

    /// Collection count.
    #[arg(long, default_value_t = 16)]
    collections: u64,

    /// Reader lookup range, counted back from the latest revision.
    #[arg(long, default_value_t = 100000)]
    get_range: u64,

    /// Ratio of stores that go to the WAL instead of the revision cache.
    #[arg(long, default_value_t = 0.0)]
    wal_ratio: f64,

    /// Writer count.
    #[arg(long, default_value_t = 4)]
    writers: usize,

    /// Reader count.
    #[arg(long, default_value_t = 16)]
    readers: usize,

    /// Remover count.
    #[arg(long, default_value_t = 2)]
    removers: usize,

    /// Dump the prometheus metrics of the cache at exit.
    #[arg(long, default_value_t = false)]
    metrics: bool,
}

struct Context {
    cache: GlobalRevisionCache,
    indexes: Arc<OnceLock<Vec<CollectionIndex>>>,
    next: AtomicU64,
    stop: Arc<AtomicBool>,
    metrics: Metrics,
    args: Args,
}

impl Context {
    fn index(&self, revision_id: u64) -> &CollectionIndex {
        let indexes = self.indexes.get().expect("indexes are set before the bench starts");
        &indexes[(revision_id % self.args.collections) as usize]
    }

    fn pick(&self, rng: &mut SmallRng) -> Option<u64> {
        let latest = self.next.load(Ordering::Relaxed);
        if latest == 0 {
            return None;
        }
        Some(rng.random_range(latest.saturating_sub(self.args.get_range)..latest))
    }
}

fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();
}

#[cfg(feature = "deadlock")]
fn detect_deadlock() {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_secs(1));
        let deadlocks = parking_lot::deadlock::check_deadlock();
        if deadlocks.is_empty() {
            continue;
        }

        println!("{} deadlocks detected", deadlocks.len());
        for (i, threads) in deadlocks.iter().enumerate() {
            println!("Deadlock #{}", i);
            for t in threads {
                println!("Thread Id {:#?}", t.thread_id());
                println!("{:#?}", t.backtrace());
            }
        }
        panic!()
    });
}

fn main() -> anyhow::Result<()> {
    init_logger();

    #[cfg(feature = "deadlock")]
    detect_deadlock();

    let args = Args::parse();
    println!("{:#?}", args);
    anyhow::ensure!(args.collections > 0, "\"--collections\" value must be greater than 0");
    anyhow::ensure!(args.get_range > 0, "\"--get-range\" value must be greater than 0");
    anyhow::ensure!(
        args.entry_size_min <= args.entry_size_max,
        "\"--entry-size-min\" must not exceed \"--entry-size-max\""
    );

    let metrics = Metrics::default();
    let indexes: Arc<OnceLock<Vec<CollectionIndex>>> = Arc::new(OnceLock::new());

    let callback = {
        let indexes = indexes.clone();
        let invalidated = metrics.invalidated.clone();
        let collections = args.collections;
        move |record: CollectedRecord<'_>| {
            let Some(indexes) = indexes.get() else { return };
            let Some(header) = record.payload().get(..8) else { return };
            let mut buf = [0u8; 8];
            buf.copy_from_slice(header);
            let revision_id = u64::from_le_bytes(buf);
            let index = &indexes[(record.collection_id() % collections) as usize];
            if index.invalidate(revision_id, record.chunk_id(), record.offset()) {
                invalidated.fetch_add(1, Ordering::Relaxed);
            }
        }
    };

    let builder = GlobalRevisionCacheBuilder::new(args.mem * MIB as usize)
        .with_name("bench")
        .with_chunk_size(args.chunk_size * KIB as usize)
        .with_garbage_collection_callback(callback);

    #[cfg(feature = "prometheus")]
    let (builder, prometheus_registry) = {
        let registry = prometheus::Registry::new();
        let builder = builder.with_metrics_registry(Box::new(
            revcache_common::metrics::registry::prometheus::PrometheusMetricsRegistry::new(registry.clone()),
        ));
        (builder, registry)
    };

    let cache = builder.build()?;

    if indexes
        .set(
            (0..args.collections)
                .map(|id| CollectionIndex::new(id, Arc::new(NoopWalReferences)).with_metrics(cache.metrics().clone()))
                .collect(),
        )
        .is_err()
    {
        anyhow::bail!("collection indexes are already set");
    }

    let collector = Collector::spawn(
        cache.clone(),
        CollectorConfig {
            interval: Duration::from_millis(args.collect_interval),
        },
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let context = Arc::new(Context {
        cache: cache.clone(),
        indexes,
        next: AtomicU64::new(0),
        stop: stop.clone(),
        metrics: metrics.clone(),
        args: args.clone(),
    });

    let handle_monitor = thread::spawn({
        let cache = cache.clone();
        let metrics = metrics.clone();
        let stop = stop.clone();
        let interval = Duration::from_secs(args.report_interval);
        move || monitor(cache, metrics, interval, stop)
    });

    let start = Instant::now();
    let metrics_dump_start = metrics.dump();

    let handles = (0..args.writers)
        .map(|id| {
            let context = context.clone();
            thread::spawn(move || write(id as u64, &context))
        })
        .chain((0..args.readers).map(|id| {
            let context = context.clone();
            thread::spawn(move || read(id as u64, &context))
        }))
        .chain((0..args.removers).map(|id| {
            let context = context.clone();
            thread::spawn(move || remove(id as u64, &context))
        }))
        .collect_vec();

    while start.elapsed() < Duration::from_secs(args.time) {
        thread::sleep(Duration::from_millis(100));
    }
    stop.store(true, Ordering::Relaxed);

    for handle in handles {
        if handle.join().is_err() {
            anyhow::bail!("bench thread panicked");
        }
    }

    let metrics_dump_end = metrics.dump();
    let analysis = analyze(
        start.elapsed(),
        &metrics_dump_start,
        &metrics_dump_end,
        cache.statistics(),
    );

    collector.stop();
    if handle_monitor.join().is_err() {
        tracing::warn!("monitor thread panicked");
    }

    println!("\nTotal:\n{}", analysis);

    #[cfg(feature = "prometheus")]
    {
        use prometheus::{Encoder, TextEncoder};

        if args.metrics {
            let mut buf = vec![];
            TextEncoder::new().encode(&prometheus_registry.gather(), &mut buf)?;
            println!("{}", String::from_utf8(buf)?);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        if args.metrics {
            tracing::warn!("\"--metrics\" requires the \"prometheus\" feature");
        }
    }

    Ok(())
}

fn write(id: u64, context: &Context) {
    let mut rng = SmallRng::seed_from_u64(id);

    while !context.stop.load(Ordering::Relaxed) {
        let revision_id = context.next.fetch_add(1, Ordering::Relaxed);
        let collection_id = revision_id % context.args.collections;
        let len = rng.random_range(context.args.entry_size_min..=context.args.entry_size_max);
        let data = document(revision_id, len);
        let index = context.index(revision_id);

        let time = Instant::now();
        if rng.random_bool(context.args.wal_ratio.clamp(0.0, 1.0)) {
            index.insert_from_wal(revision_id, revision_id >> 16, revision_id);
        } else {
            match context.cache.store_and_lease(collection_id, &data) {
                Ok(mut reader) => index.insert_from_revision_cache(revision_id, &mut reader),
                Err(e) => {
                    tracing::error!("store revision {revision_id} error: {e}");
                    continue;
                }
            }
        }
        let lat = time.elapsed().as_micros() as u64;

        if let Err(e) = context.metrics.store_lats.write().record(lat) {
            tracing::error!("metrics error: {:?}, value: {}", e, lat);
        }
        context.metrics.store_ops.fetch_add(1, Ordering::Relaxed);
        context.metrics.store_bytes.fetch_add(data.len(), Ordering::Relaxed);
    }
}

fn read(id: u64, context: &Context) {
    let mut rng = SmallRng::seed_from_u64(u64::MAX - id);

    while !context.stop.load(Ordering::Relaxed) {
        let Some(revision_id) = context.pick(&mut rng) else {
            thread::sleep(Duration::from_millis(1));
            continue;
        };

        let time = Instant::now();
        let res = context.index(revision_id).lookup(revision_id);
        let lat = time.elapsed().as_micros() as u64;

        match res {
            Some(reader) => {
                let payload = reader.payload();
                assert_eq!(payload, &document(revision_id, payload.len())[..]);
                if let Err(e) = context.metrics.lookup_hit_lats.write().record(lat) {
                    tracing::error!("metrics error: {:?}, value: {}", e, lat);
                }
                context.metrics.lookup_bytes.fetch_add(payload.len(), Ordering::Relaxed);
            }
            None => {
                if let Err(e) = context.metrics.lookup_miss_lats.write().record(lat) {
                    tracing::error!("metrics error: {:?}, value: {}", e, lat);
                }
                context.metrics.lookup_miss_ops.fetch_add(1, Ordering::Relaxed);
            }
        }
        context.metrics.lookup_ops.fetch_add(1, Ordering::Relaxed);
    }
}

fn remove(id: u64, context: &Context) {
    let mut rng = SmallRng::seed_from_u64(id << 32);

    while !context.stop.load(Ordering::Relaxed) {
        let Some(revision_id) = context.pick(&mut rng) else {
            thread::sleep(Duration::from_millis(1));
            continue;
        };
        if context.index(revision_id).remove(revision_id) {
            context.metrics.remove_ops.fetch_add(1, Ordering::Relaxed);
        }
        thread::yield_now();
    }
}
