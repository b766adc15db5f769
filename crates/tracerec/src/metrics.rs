//! Metrics collection and reporting using metrics-rs.
//!
//! The engine records into whatever global recorder is installed. The CLI
//! installs [`CliRecorder`] when `--metrics` is given and prints a summary on exit.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use parking_lot::RwLock;
use tracerec_journal::RecordStats;

// ============================================================================
// Metric descriptions
// ============================================================================

/// Initialize metric descriptions.
///
/// Call this once at startup to register metric descriptions.
pub fn init() {
    describe_counter!(
        "tracerec_instructions_total",
        Unit::Count,
        "Instructions reported to the trace engine"
    );
    describe_counter!(
        "tracerec_records_written_total",
        Unit::Count,
        "Run-trace records appended to trace files"
    );
    describe_counter!(
        "tracerec_record_bytes_total",
        Unit::Bytes,
        "Bytes of run-trace records appended to trace files"
    );
    describe_counter!(
        "tracerec_full_dumps_total",
        Unit::Count,
        "Run-trace records carrying every register"
    );
    describe_counter!(
        "tracerec_trace_records_read_total",
        Unit::Count,
        "Run-trace records decoded from trace files"
    );

    describe_gauge!(
        "tracerec_pages_armed",
        Unit::Count,
        "Pages currently collecting execution statistics"
    );

    describe_histogram!(
        "tracerec_record_size_bytes",
        Unit::Bytes,
        "Encoded size of run-trace records"
    );
}

// ============================================================================
// Metric recording functions
// ============================================================================

/// Count one instruction reported by the stepping loop.
pub fn record_instruction() {
    counter!("tracerec_instructions_total").increment(1);
}

/// Record the outcome of appending one run-trace record.
pub fn record_written(stats: RecordStats) {
    if stats.bytes == 0 {
        return;
    }
    counter!("tracerec_records_written_total").increment(1);
    counter!("tracerec_record_bytes_total").increment(stats.bytes as u64);
    histogram!("tracerec_record_size_bytes").record(stats.bytes as f64);
    if stats.full_dump {
        counter!("tracerec_full_dumps_total").increment(1);
    }
}

/// Record records decoded from a trace file.
pub fn record_read(arch: &str, records: u64) {
    let labels = [("arch", arch.to_string())];
    counter!("tracerec_trace_records_read_total", &labels).increment(records);
}

/// Record the number of armed pages.
pub fn set_pages_armed(pages: usize) {
    gauge!("tracerec_pages_armed").set(pages as f64);
}

// ============================================================================
// CLI Recorder for terminal output
// ============================================================================

#[derive(Default)]
struct CounterStorage {
    values: RwLock<HashMap<String, u64>>,
}

#[derive(Default)]
struct GaugeStorage {
    values: RwLock<HashMap<String, f64>>,
}

#[derive(Default)]
struct HistogramStorage {
    values: RwLock<HashMap<String, Vec<f64>>>,
}

struct CliCounter {
    key: String,
    storage: Arc<CounterStorage>,
}

impl metrics::CounterFn for CliCounter {
    fn increment(&self, value: u64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

struct CliGauge {
    key: String,
    storage: Arc<GaugeStorage>,
}

impl metrics::GaugeFn for CliGauge {
    fn increment(&self, value: f64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

struct CliHistogram {
    key: String,
    storage: Arc<HistogramStorage>,
}

impl metrics::HistogramFn for CliHistogram {
    fn record(&self, value: f64) {
        let mut values = self.storage.values.write();
        values.entry(self.key.clone()).or_default().push(value);
    }
}

/// Recorder that keeps metrics in memory for a terminal summary.
pub struct CliRecorder {
    counters: Arc<CounterStorage>,
    gauges: Arc<GaugeStorage>,
    histograms: Arc<HistogramStorage>,
}

impl CliRecorder {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(CounterStorage::default()),
            gauges: Arc::new(GaugeStorage::default()),
            histograms: Arc::new(HistogramStorage::default()),
        }
    }

    /// Install this recorder as the global metrics recorder.
    ///
    /// Returns `None` if a global recorder is already installed.
    pub fn install(self) -> Option<CliRecorderHandle> {
        let counters = Arc::clone(&self.counters);
        let gauges = Arc::clone(&self.gauges);
        let histograms = Arc::clone(&self.histograms);

        metrics::set_global_recorder(self).ok()?;

        Some(CliRecorderHandle {
            counters,
            gauges,
            histograms,
        })
    }
}

impl Default for CliRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn key_to_string(key: &Key) -> String {
    let name = key.name();
    let labels = key.labels();
    if labels.len() == 0 {
        name.to_string()
    } else {
        let label_str: Vec<String> = labels
            .map(|l| format!("{}={}", l.key(), l.value()))
            .collect();
        format!("{}{{{}}}", name, label_str.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CliCounter {
            key: key_to_string(key),
            storage: Arc::clone(&self.counters),
        }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(CliGauge {
            key: key_to_string(key),
            storage: Arc::clone(&self.gauges),
        }))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(CliHistogram {
            key: key_to_string(key),
            storage: Arc::clone(&self.histograms),
        }))
    }
}

/// Handle for reading metrics after the CLI recorder is installed.
pub struct CliRecorderHandle {
    counters: Arc<CounterStorage>,
    gauges: Arc<GaugeStorage>,
    histograms: Arc<HistogramStorage>,
}

impl CliRecorderHandle {
    pub fn get_counter(&self, key: &str) -> Option<u64> {
        self.counters.values.read().get(key).copied()
    }

    pub fn get_gauge(&self, key: &str) -> Option<f64> {
        self.gauges.values.read().get(key).copied()
    }

    /// Print all collected metrics in a human-readable format.
    pub fn print_summary(&self) {
        let counters = self.counters.values.read();
        let gauges = self.gauges.values.read();
        let histograms = self.histograms.values.read();

        if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
            println!("No metrics collected.");
            return;
        }

        println!();
        println!("## Metrics Summary");
        println!();

        if !counters.is_empty() {
            println!("### Counters");
            let mut keys: Vec<_> = counters.keys().collect();
            keys.sort();
            for key in keys {
                println!("  {}: {}", key, counters[key]);
            }
            println!();
        }

        if !gauges.is_empty() {
            println!("### Gauges");
            let mut keys: Vec<_> = gauges.keys().collect();
            keys.sort();
            for key in keys {
                println!("  {}: {:.0}", key, gauges[key]);
            }
            println!();
        }

        if !histograms.is_empty() {
            println!("### Histograms");
            let mut keys: Vec<_> = histograms.keys().collect();
            keys.sort();
            for key in keys {
                let values = &histograms[key];
                if values.is_empty() {
                    continue;
                }
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let avg = values.iter().sum::<f64>() / values.len() as f64;
                println!(
                    "  {}: count={}, min={:.1}, max={:.1}, avg={:.1}",
                    key,
                    values.len(),
                    min,
                    max,
                    avg
                );
            }
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::Label;

    #[test]
    fn test_key_to_string() {
        let key = Key::from_name("tracerec_pages_armed");
        assert_eq!(key_to_string(&key), "tracerec_pages_armed");

        let key = Key::from_parts(
            "tracerec_trace_records_read_total",
            vec![Label::new("arch", "x64")],
        );
        assert_eq!(
            key_to_string(&key),
            "tracerec_trace_records_read_total{arch=x64}"
        );
    }

    #[test]
    fn test_recorder_storage() {
        let recorder = CliRecorder::new();
        let handle = CliRecorderHandle {
            counters: Arc::clone(&recorder.counters),
            gauges: Arc::clone(&recorder.gauges),
            histograms: Arc::clone(&recorder.histograms),
        };

        metrics::with_local_recorder(&recorder, || {
            record_written(RecordStats {
                bytes: 40,
                full_dump: true,
            });
            record_written(RecordStats {
                bytes: 12,
                full_dump: false,
            });
            // The seed call of a session writes nothing.
            record_written(RecordStats::default());
            set_pages_armed(3);
        });

        assert_eq!(handle.get_counter("tracerec_records_written_total"), Some(2));
        assert_eq!(handle.get_counter("tracerec_record_bytes_total"), Some(52));
        assert_eq!(handle.get_counter("tracerec_full_dumps_total"), Some(1));
        assert_eq!(handle.get_gauge("tracerec_pages_armed"), Some(3.0));
    }
}
