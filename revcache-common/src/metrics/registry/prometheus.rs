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

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry,
    Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

use crate::metrics::{
    Boxer, BoxedCounter, BoxedCounterVec, BoxedGauge, BoxedGaugeVec, BoxedHistogram, BoxedHistogramVec, CounterOps,
    CounterVecOps, GaugeOps, GaugeVecOps, HistogramOps, HistogramVecOps, RegistryOps,
};

#[derive(Debug, Clone)]
enum MetricVec {
    Counter(IntCounterVec),
    Gauge(IntGaugeVec),
    Histogram(HistogramVec),
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
struct Metadata {
    name: &'static str,
    desc: &'static str,
    label_names: &'static [&'static str],
}

impl CounterOps for IntCounter {
    fn increase(&self, val: u64) {
        self.inc_by(val);
    }
}

impl CounterVecOps for IntCounterVec {
    fn counter(&self, labels: &[&'static str]) -> BoxedCounter {
        self.with_label_values(labels).boxed()
    }
}

impl GaugeOps for IntGauge {
    fn increase(&self, val: u64) {
        self.add(val as _);
    }

    fn decrease(&self, val: u64) {
        self.sub(val as _);
    }

    fn absolute(&self, val: u64) {
        self.set(val as _);
    }
}

impl GaugeVecOps for IntGaugeVec {
    fn gauge(&self, labels: &[&'static str]) -> BoxedGauge {
        self.with_label_values(labels).boxed()
    }
}

impl HistogramOps for Histogram {
    fn record(&self, val: f64) {
        self.observe(val);
    }
}

impl HistogramVecOps for HistogramVec {
    fn histogram(&self, labels: &[&'static str]) -> BoxedHistogram {
        self.with_label_values(labels).boxed()
    }
}

/// Prometheus metric registry with lib `prometheus`.
///
/// The registry can be cloned and shared by multiple revcache instances. Metric vectors with the same metadata are
/// registered only once.
#[derive(Debug, Clone)]
pub struct PrometheusMetricsRegistry {
    registry: Registry,
    vecs: Arc<Mutex<HashMap<Metadata, MetricVec>>>,
}

impl PrometheusMetricsRegistry {
    /// Create an Prometheus metrics registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            vecs: Arc::default(),
        }
    }

    fn get_or_register(&self, metadata: Metadata, register: impl FnOnce(&Registry) -> MetricVec) -> MetricVec {
        self.vecs
            .lock()
            .entry(metadata)
            .or_insert_with(|| register(&self.registry))
            .clone()
    }
}

impl RegistryOps for PrometheusMetricsRegistry {
    fn register_counter_vec(
        &self,
        name: &'static str,
        desc: &'static str,
        label_names: &'static [&'static str],
    ) -> BoxedCounterVec {
        let metadata = Metadata {
            name,
            desc,
            label_names,
        };
        match self.get_or_register(metadata, |registry| {
            MetricVec::Counter(
                register_int_counter_vec_with_registry!(name, desc, label_names, registry)
                    .unwrap_or_else(|e| panic!("register counter vec {name} error: {e}")),
            )
        }) {
            MetricVec::Counter(v) => v.boxed(),
            v => panic!("metric {name} is already registered as {v:?}"),
        }
    }

    fn register_gauge_vec(
        &self,
        name: &'static str,
        desc: &'static str,
        label_names: &'static [&'static str],
    ) -> BoxedGaugeVec {
        let metadata = Metadata {
            name,
            desc,
            label_names,
        };
        match self.get_or_register(metadata, |registry| {
            MetricVec::Gauge(
                register_int_gauge_vec_with_registry!(name, desc, label_names, registry)
                    .unwrap_or_else(|e| panic!("register gauge vec {name} error: {e}")),
            )
        }) {
            MetricVec::Gauge(v) => v.boxed(),
            v => panic!("metric {name} is already registered as {v:?}"),
        }
    }

    fn register_histogram_vec(
        &self,
        name: &'static str,
        desc: &'static str,
        label_names: &'static [&'static str],
    ) -> BoxedHistogramVec {
        let metadata = Metadata {
            name,
            desc,
            label_names,
        };
        match self.get_or_register(metadata, |registry| {
            MetricVec::Histogram(
                register_histogram_vec_with_registry!(name, desc, label_names, registry)
                    .unwrap_or_else(|e| panic!("register histogram vec {name} error: {e}")),
            )
        }) {
            MetricVec::Histogram(v) => v.boxed(),
            v => panic!("metric {name} is already registered as {v:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_registry() {
        let registry = Registry::new();
        let prom = PrometheusMetricsRegistry::new(registry.clone());

        let cv = prom.register_counter_vec("test_counter_1", "test counter 1", &["label1", "label2"]);
        cv.counter(&["l1", "l2"]).increase(42);

        // Registering the same vector twice must not fail.
        let cv = prom.register_counter_vec("test_counter_1", "test counter 1", &["label1", "label2"]);
        cv.counter(&["l1", "l2"]).increase(1);

        let gv = prom.register_gauge_vec("test_gauge_1", "test gauge 1", &["label1"]);
        let g = gv.gauge(&["l1"]);
        g.absolute(114);
        g.increase(2);
        g.decrease(1);

        let hv = prom.register_histogram_vec("test_histogram_1", "test histogram 1", &["label1"]);
        hv.histogram(&["l1"]).record(0.5);

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains(r#"test_counter_1{label1="l1",label2="l2"} 43"#), "{text}");
        assert!(text.contains(r#"test_gauge_1{label1="l1"} 115"#), "{text}");
        assert!(text.contains(r#"test_histogram_1_count{label1="l1"} 1"#), "{text}");
    }
}
