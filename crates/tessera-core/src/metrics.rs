//! Workspace-owned timing samples and counters.
//!
//! Every [`crate::workspace::Workspace`] carries one [`Metrics`]; nothing is
//! global. Durations are grouped by operation name and reported as
//! p50/p95/p99.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::eval::EvalMetrics;
use crate::plan::RefreshMode;

/// Aggregated timing report across instrumented operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingReport {
    pub operations: Vec<OpTiming>,
}

/// Timing statistics for a single named operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpTiming {
    pub name: String,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub count: usize,
}

/// Event counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub plans: BTreeMap<RefreshMode, u64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub saves_ok: u64,
    pub saves_failed: u64,
    pub exports_ok: u64,
    pub exports_failed: u64,
    pub eval_failures: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Metrics {
    samples: BTreeMap<&'static str, Vec<Duration>>,
    pub counters: Counters,
    pub last_eval: Option<EvalMetrics>,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &'static str, elapsed: Duration) {
        self.samples.entry(name).or_default().push(elapsed);
    }

    /// Run `f`, recording its duration under `name`.
    pub fn timed<R>(&mut self, name: &'static str, f: impl FnOnce() -> R) -> R {
        let started = Instant::now();
        let result = f();
        self.record(name, started.elapsed());
        result
    }

    pub fn count_plan(&mut self, mode: RefreshMode) {
        *self.counters.plans.entry(mode).or_default() += 1;
    }

    /// Snapshot of every operation's percentiles.
    #[must_use]
    pub fn report(&self) -> TimingReport {
        let operations = self
            .samples
            .iter()
            .map(|(name, values)| {
                let mut values = values.clone();
                values.sort_unstable();
                OpTiming {
                    name: (*name).to_string(),
                    p50: percentile(&values, 50),
                    p95: percentile(&values, 95),
                    p99: percentile(&values, 99),
                    count: values.len(),
                }
            })
            .collect();
        TimingReport { operations }
    }

    /// Timings and counters as JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let plans: serde_json::Map<_, _> = self
            .counters
            .plans
            .iter()
            .map(|(mode, n)| (mode.to_string(), json!(n)))
            .collect();
        json!({
            "timings": self.report().to_json(),
            "plans": plans,
            "cache": { "hits": self.counters.cache_hits, "misses": self.counters.cache_misses },
            "saves": { "ok": self.counters.saves_ok, "failed": self.counters.saves_failed },
            "exports": { "ok": self.counters.exports_ok, "failed": self.counters.exports_failed },
            "eval_failures": self.counters.eval_failures,
            "last_eval": self.last_eval,
        })
    }
}

impl TimingReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let operations = self
            .operations
            .iter()
            .map(|op| {
                json!({
                    "name": op.name,
                    "count": op.count,
                    "p50_us": op.p50.as_micros(),
                    "p95_us": op.p95.as_micros(),
                    "p99_us": op.p99.as_micros(),
                })
            })
            .collect::<Vec<_>>();

        json!({ "operations": operations })
    }

    /// Render the report as a simple table for terminal output.
    #[must_use]
    pub fn display_table(&self) -> String {
        if self.operations.is_empty() {
            return "No timing samples recorded.".to_string();
        }

        let mut out = String::new();
        out.push_str("operation                    count      p50      p95      p99\n");
        out.push_str("--------------------------------------------------------------\n");
        for op in &self.operations {
            let _ = writeln!(
                out,
                "{:<28} {:>6} {:>8} {:>8} {:>8}",
                op.name,
                op.count,
                format_duration(op.p50),
                format_duration(op.p95),
                format_duration(op.p99)
            );
        }
        out
    }
}

fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = pct.min(100).saturating_mul(sorted.len()).saturating_add(99) / 100;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}

fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros >= 1_000_000 {
        format!("{}.{:03}s", micros / 1_000_000, (micros % 1_000_000) / 1_000)
    } else if micros >= 1_000 {
        format!("{}.{:03}ms", micros / 1_000, micros % 1_000)
    } else {
        format!("{micros}µs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_groups_and_sorts() {
        let mut m = Metrics::new();
        m.record("save", Duration::from_micros(3_000));
        m.record("save", Duration::from_micros(1_000));
        m.record("save", Duration::from_micros(2_000));
        m.record("plan", Duration::from_micros(5));

        let report = m.report();
        assert_eq!(report.operations.len(), 2);
        let save = &report.operations[1];
        assert_eq!(save.name, "save");
        assert_eq!(save.count, 3);
        assert_eq!(save.p50, Duration::from_micros(2_000));
        assert_eq!(save.p99, Duration::from_micros(3_000));
    }

    #[test]
    fn timed_records_a_sample() {
        let mut m = Metrics::new();
        assert_eq!(m.timed("work", || 7_u8), 7);
        assert_eq!(m.report().operations[0].count, 1);
    }

    #[test]
    fn plan_counters_and_json() {
        let mut m = Metrics::new();
        m.count_plan(RefreshMode::Incremental);
        m.count_plan(RefreshMode::Incremental);
        m.count_plan(RefreshMode::Full);
        let value = m.to_json();
        assert_eq!(value["plans"]["incremental"], 2);
        assert_eq!(value["plans"]["full"], 1);
        assert!(value["last_eval"].is_null());
    }

    #[test]
    fn empty_report_table() {
        assert_eq!(
            Metrics::new().report().display_table(),
            "No timing samples recorded."
        );
    }

    #[test]
    fn durations_format_by_magnitude() {
        assert_eq!(format_duration(Duration::from_micros(12)), "12µs");
        assert_eq!(format_duration(Duration::from_micros(1_500)), "1.500ms");
        assert_eq!(format_duration(Duration::from_millis(2_250)), "2.250s");
    }
}
