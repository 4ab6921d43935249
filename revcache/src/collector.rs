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

use std::{thread::JoinHandle, time::Duration};

use flume::{RecvTimeoutError, Sender};

use crate::{
    cache::GlobalRevisionCache,
    error::{Error, Result},
};

/// Config of the background [`Collector`].
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Pause between two collection rounds.
    ///
    /// The default value is 100ms.
    pub interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
        }
    }
}

/// Background thread that periodically collects chunks while the global cache exceeds its budget.
///
/// The thread stops when [`Collector::stop`] is called or the collector is dropped.
#[derive(Debug)]
pub struct Collector {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Collector {
    /// Spawn a collector thread for `cache`.
    pub fn spawn(cache: GlobalRevisionCache, config: CollectorConfig) -> Result<Self> {
        if config.interval.is_zero() {
            return Err(Error::ConfigError("collector interval must be non-zero".to_string()));
        }

        let (stop_tx, stop_rx) = flume::bounded(1);
        let handle = std::thread::Builder::new()
            .name(format!("{}-collector", cache.name()))
            .spawn(move || {
                tracing::info!(
                    "[collector]: started for {}, interval: {:?}",
                    cache.name(),
                    config.interval
                );
                loop {
                    match stop_rx.recv_timeout(config.interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let mut collected = 0;
                    while cache.garbage_collect() {
                        collected += 1;
                    }
                    if collected > 0 {
                        tracing::debug!(
                            "[collector]: {collected} chunks collected, total allocated: {}/{}",
                            cache.total_allocated(),
                            cache.total_target_size()
                        );
                    }
                }
                tracing::info!("[collector]: stopped for {}", cache.name());
            })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Stop the collector and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else { return };
        let _ = self.stop_tx.try_send(());
        if handle.join().is_err() {
            tracing::warn!("[collector]: collector thread panicked");
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::cache::GlobalRevisionCacheBuilder;

    #[test]
    fn test_zero_interval_rejected() {
        let cache = GlobalRevisionCacheBuilder::new(1024).build().unwrap();
        let res = Collector::spawn(
            cache,
            CollectorConfig {
                interval: Duration::ZERO,
            },
        );
        assert!(matches!(res, Err(Error::ConfigError(_))), "{res:?}");
    }

    #[test_log::test]
    fn test_collector_brings_cache_back_into_budget() {
        let cache = GlobalRevisionCacheBuilder::new(64)
            .with_chunk_size(64)
            .build()
            .unwrap();

        // Hold readers so that allocation cannot collect inline.
        let readers = (0..8u64)
            .map(|i| cache.store_and_lease(i, &[i as u8; 32]).unwrap())
            .collect::<Vec<_>>();
        assert!(cache.total_allocated() > 64);

        let collector = Collector::spawn(
            cache.clone(),
            CollectorConfig {
                interval: Duration::from_millis(5),
            },
        )
        .unwrap();

        drop(readers);

        let start = Instant::now();
        while cache.total_allocated() > 64 {
            assert!(start.elapsed() < Duration::from_secs(10), "{:?}", cache.statistics());
            std::thread::sleep(Duration::from_millis(5));
        }
        collector.stop();

        assert_eq!(cache.statistics().used_chunks, 0);
    }
}
