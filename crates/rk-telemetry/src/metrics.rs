use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;

// ---------------------------------------------------------------------------
// Metric names
// ---------------------------------------------------------------------------

/// Remote commands run through the executor, labelled by `outcome`.
pub const REMOTE_COMMANDS_TOTAL: &str = "remote_commands_total";
/// Wall time of each executor `run`, retries included.
pub const REMOTE_COMMAND_DURATION: &str = "remote_command_duration_seconds";
/// Sessions currently held by the pool.
pub const POOL_SESSIONS: &str = "pool_sessions";
/// Fresh SSH dials performed by the pool.
pub const POOL_DIALS_TOTAL: &str = "pool_dials_total";
/// Scheduled task runs, labelled by `outcome`.
pub const SCHEDULED_TASKS_TOTAL: &str = "scheduled_tasks_total";
/// Automatic backups, labelled by `outcome`.
pub const BACKUPS_TOTAL: &str = "backups_total";
/// Backup records removed by retention.
pub const BACKUPS_PRUNED_TOTAL: &str = "backups_pruned_total";

/// Bucket bounds (seconds) for remote command latency: sub-second `print`
/// commands up to multi-minute exports.
const COMMAND_LATENCY_BOUNDS: [f64; 11] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Fixed-bucket latency histogram. Each observation lands in the first
/// bucket whose bound is `>=` the value; the export accumulates.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    hits: Vec<AtomicU64>,
    /// f64 bits.
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: Vec<f64>) -> Self {
        let hits = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            hits,
            sum: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    pub fn command_latency() -> Self {
        Self::new(COMMAND_LATENCY_BOUNDS.to_vec())
    }

    pub fn observe(&self, value: f64) {
        if let Some(slot) = self.bounds.iter().position(|bound| value <= *bound) {
            self.hits[slot].fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// `(bound, cumulative count)` pairs in ascending bound order.
    pub fn cumulative(&self) -> Vec<(f64, u64)> {
        let mut running = 0;
        self.bounds
            .iter()
            .zip(&self.hits)
            .map(|(bound, hits)| {
                running += hits.load(Ordering::Relaxed);
                (*bound, running)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Label pairs sorted by key, so `[("a", ..), ("b", ..)]` and
/// `[("b", ..), ("a", ..)]` name the same series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut owned: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        owned.sort();
        Self(owned)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// `{k="v",...}`, or an empty string when there are no labels.
    pub fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let body = self
            .0
            .iter()
            .map(|(k, v)| format!("{k}=\"{v}\""))
            .collect::<Vec<_>>()
            .join(",");
        format!("{{{body}}}")
    }
}

type SeriesKey = (String, Labels);

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// In-process registry for the pool, executor, scheduler and backup metrics.
///
/// Series are created on first use. The maps are locked for writing only
/// when a new series appears; updates to existing ones are atomic.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<SeriesKey, AtomicU64>>,
    gauges: RwLock<AHashMap<String, AtomicI64>>,
    histograms: RwLock<AHashMap<String, Histogram>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A collector whose command-latency histogram exists before the first
    /// command, so exports always carry it.
    pub fn with_defaults() -> Self {
        let collector = Self::new();
        write(&collector.histograms)
            .insert(REMOTE_COMMAND_DURATION.to_owned(), Histogram::command_latency());
        collector
    }

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.increment_counter_by(name, labels, 1);
    }

    pub fn increment_counter_by(&self, name: &str, labels: &[(&str, &str)], amount: u64) {
        let key = (name.to_owned(), Labels::new(labels));
        if let Some(counter) = read(&self.counters).get(&key) {
            counter.fetch_add(amount, Ordering::Relaxed);
            return;
        }
        write(&self.counters)
            .entry(key)
            .or_default()
            .fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        read(&self.counters)
            .get(&(name.to_owned(), Labels::new(labels)))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn set_gauge(&self, name: &str, value: i64) {
        if let Some(gauge) = read(&self.gauges).get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        write(&self.gauges)
            .entry(name.to_owned())
            .or_default()
            .store(value, Ordering::Relaxed);
    }

    pub fn get_gauge(&self, name: &str) -> i64 {
        read(&self.gauges)
            .get(name)
            .map_or(0, |g| g.load(Ordering::Relaxed))
    }

    /// Observe `value`; an unknown histogram gets the command-latency bounds.
    pub fn record_histogram(&self, name: &str, value: f64) {
        if let Some(histogram) = read(&self.histograms).get(name) {
            histogram.observe(value);
            return;
        }
        write(&self.histograms)
            .entry(name.to_owned())
            .or_insert_with(Histogram::command_latency)
            .observe(value);
    }

    pub fn histogram_count(&self, name: &str) -> u64 {
        read(&self.histograms).get(name).map_or(0, Histogram::count)
    }

    /// Prometheus text exposition of every series, sorted by name.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();
        self.write_counters(&mut out);
        self.write_gauges(&mut out);
        self.write_histograms(&mut out);
        out
    }

    fn write_counters(&self, out: &mut String) {
        let counters = read(&self.counters);
        let mut series: Vec<(&SeriesKey, u64)> = counters
            .iter()
            .map(|(key, value)| (key, value.load(Ordering::Relaxed)))
            .collect();
        series.sort_by(|a, b| a.0.cmp(b.0));

        let mut current: Option<&str> = None;
        for ((name, labels), value) in series {
            if current != Some(name.as_str()) {
                let _ = writeln!(out, "# TYPE {name} counter");
                current = Some(name.as_str());
            }
            let _ = writeln!(out, "{name}{} {value}", labels.prometheus_str());
        }
    }

    fn write_gauges(&self, out: &mut String) {
        let gauges = read(&self.gauges);
        let mut names: Vec<&String> = gauges.keys().collect();
        names.sort();
        for name in names {
            let value = gauges[name].load(Ordering::Relaxed);
            let _ = writeln!(out, "# TYPE {name} gauge\n{name} {value}");
        }
    }

    fn write_histograms(&self, out: &mut String) {
        let histograms = read(&self.histograms);
        let mut names: Vec<&String> = histograms.keys().collect();
        names.sort();
        for name in names {
            let h = &histograms[name];
            let _ = writeln!(out, "# TYPE {name} histogram");
            for (bound, count) in h.cumulative() {
                let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {count}");
            }
            let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", h.count());
            let _ = writeln!(out, "{name}_sum {}", h.sum());
            let _ = writeln!(out, "{name}_count {}", h.count());
        }
    }
}

/// Process-wide collector shared by the pool, executor, scheduler and
/// backup automation.
pub fn global_metrics() -> &'static MetricsCollector {
    static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
    INSTANCE.get_or_init(MetricsCollector::with_defaults)
}
