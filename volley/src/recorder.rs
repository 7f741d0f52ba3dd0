//! Concurrent, order-independent sample store.
//!
//! Every VU records straight into shared sinks: trend values go into a lock-free
//! [`AtomicBucket`], counters into an atomic event count and running total, rate samples into a
//! pair of atomic counters. Trends are never pre-aggregated, so percentiles in a [`Snapshot`]
//! are exact and do not depend on the order samples arrived in.
use crate::error::RecordError;
use arc_swap::ArcSwap;
use metrics_util::AtomicBucket;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{
    Aggregate, CheckTally, MetricKind, MetricSelector, MetricSummary, Sample, SampleValue,
    CHECKS, DATA_RECEIVED, DATA_SENT, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, ITERATIONS,
    ITERATION_DURATION, ITERATION_FAILED,
};

const BUILTIN: [(&str, MetricKind); 9] = [
    (HTTP_REQS, MetricKind::Counter),
    (HTTP_REQ_DURATION, MetricKind::Trend),
    (HTTP_REQ_FAILED, MetricKind::Rate),
    (ITERATIONS, MetricKind::Counter),
    (ITERATION_DURATION, MetricKind::Trend),
    (ITERATION_FAILED, MetricKind::Rate),
    (CHECKS, MetricKind::Rate),
    (DATA_SENT, MetricKind::Counter),
    (DATA_RECEIVED, MetricKind::Counter),
];

type Table<T> = ArcSwap<HashMap<String, Arc<T>>>;

struct Sink {
    kind: MetricKind,
    /// Trend samples only.
    values: AtomicBucket<f64>,
    trues: AtomicU64,
    falses: AtomicU64,
    events: AtomicU64,
    /// `f64` bits of the counter total.
    total: AtomicU64,
}

impl Sink {
    fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            values: AtomicBucket::new(),
            trues: AtomicU64::new(0),
            falses: AtomicU64::new(0),
            events: AtomicU64::new(0),
            total: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn push(&self, value: SampleValue) {
        match self.kind {
            MetricKind::Rate => {
                if value.as_bool() {
                    self.trues.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.falses.fetch_add(1, Ordering::Relaxed);
                }
            }
            MetricKind::Counter => {
                let add = value.as_f64();
                // The closure always returns Some, so this cannot fail.
                let _ = self
                    .total
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                        Some((f64::from_bits(bits) + add).to_bits())
                    });
                self.events.fetch_add(1, Ordering::Relaxed);
            }
            MetricKind::Trend => self.values.push(value.as_f64()),
        }
    }

    fn total(&self) -> f64 {
        f64::from_bits(self.total.load(Ordering::Relaxed))
    }

    fn aggregate(&self, elapsed: Duration) -> Aggregate {
        match self.kind {
            MetricKind::Rate => Aggregate::from_rate(
                self.trues.load(Ordering::Relaxed),
                self.falses.load(Ordering::Relaxed),
                elapsed,
            ),
            MetricKind::Counter => {
                Aggregate::from_counter(self.events.load(Ordering::Relaxed), self.total(), elapsed)
            }
            MetricKind::Trend => {
                Aggregate::from_values(MetricKind::Trend, self.values.data(), elapsed)
            }
        }
    }
}

#[derive(Default)]
struct CheckCell {
    passes: AtomicU64,
    fails: AtomicU64,
}

/// Exact aggregates of every metric at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub elapsed: Duration,
    /// Keyed by metric name, sub-metrics by their selector (`http_req_duration{status:200}`).
    pub aggregates: BTreeMap<String, Aggregate>,
    pub checks: BTreeMap<String, CheckTally>,
}

impl Snapshot {
    pub fn get(&self, selector: &MetricSelector) -> Option<&Aggregate> {
        self.aggregates.get(&selector.to_string())
    }

    pub fn summaries(&self) -> BTreeMap<String, MetricSummary> {
        self.aggregates
            .iter()
            .map(|(name, agg)| (name.clone(), agg.summary()))
            .collect()
    }
}

pub struct Recorder {
    start: Instant,
    sinks: Table<Sink>,
    checks: Table<CheckCell>,
    submetrics: Vec<MetricSelector>,
    sealed_at: OnceLock<Duration>,
    dropped: AtomicU64,
}

impl Recorder {
    /// `submetrics` are tag selectors which get their own sink, typically the ones thresholds
    /// reference.
    pub fn new(submetrics: impl IntoIterator<Item = MetricSelector>) -> Self {
        let mut submetrics: Vec<_> = submetrics
            .into_iter()
            .filter(MetricSelector::is_submetric)
            .collect();
        submetrics.sort();
        submetrics.dedup();

        let sinks: HashMap<_, _> = BUILTIN
            .iter()
            .map(|(name, kind)| (name.to_string(), Arc::new(Sink::new(*kind))))
            .collect();

        Self {
            start: Instant::now(),
            sinks: ArcSwap::from_pointee(sinks),
            checks: ArcSwap::from_pointee(HashMap::new()),
            submetrics,
            sealed_at: OnceLock::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Time since the recorder was created, frozen once sealed.
    pub fn elapsed(&self) -> Duration {
        match self.sealed_at.get() {
            Some(at) => *at,
            None => self.start.elapsed(),
        }
    }

    pub fn record(&self, sample: Sample) -> Result<(), RecordError> {
        if self.is_sealed() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropping sample for {} after seal", sample.metric);
            return Ok(());
        }

        if let SampleValue::Number(v) = sample.value {
            if !v.is_finite() {
                return Err(RecordError::NonFinite {
                    metric: sample.metric,
                });
            }
        }

        self.sink(&sample.metric, sample.kind)?.push(sample.value);

        for selector in &self.submetrics {
            if selector.matches(&sample.metric, &sample.tags) {
                self.sink(&selector.to_string(), sample.kind)?
                    .push(sample.value);
            }
        }

        if sample.metric == CHECKS {
            if let Some(name) = sample.tags.get("check") {
                let cell = self.check_cell(name);
                if sample.value.as_bool() {
                    cell.passes.fetch_add(1, Ordering::Relaxed);
                } else {
                    cell.fails.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        #[cfg(feature = "metrics")]
        forward(&sample);

        Ok(())
    }

    /// Stop accepting samples. Anything recorded afterwards is counted and discarded.
    pub fn seal(&self) {
        if self.sealed_at.set(self.start.elapsed()).is_ok() {
            debug!("Recorder sealed after {:?}", self.elapsed());
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed_at.get().is_some()
    }

    /// Samples discarded because they arrived after [`Recorder::seal`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Snapshot {
        let elapsed = self.elapsed();
        let aggregates = self
            .sinks
            .load()
            .iter()
            .map(|(name, sink)| (name.clone(), sink.aggregate(elapsed)))
            .collect();
        let checks = self
            .checks
            .load()
            .iter()
            .map(|(name, cell)| {
                (
                    name.clone(),
                    CheckTally {
                        passes: cell.passes.load(Ordering::Relaxed),
                        fails: cell.fails.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        Snapshot {
            elapsed,
            aggregates,
            checks,
        }
    }

    /// Aggregate of a single metric or sub-metric, `None` if nothing was ever recorded for it
    /// and it is not built in. Only that sink is read.
    pub fn aggregate(&self, selector: &MetricSelector) -> Option<Aggregate> {
        let elapsed = self.elapsed();
        self.sinks
            .load()
            .get(&selector.to_string())
            .map(|sink| sink.aggregate(elapsed))
    }

    /// Running total of a counter, `0` for unknown or non-counter metrics.
    pub fn total(&self, name: &str) -> f64 {
        match self.sinks.load().get(name) {
            Some(sink) if sink.kind == MetricKind::Counter => sink.total(),
            _ => 0.,
        }
    }

    fn sink(&self, name: &str, kind: MetricKind) -> Result<Arc<Sink>, RecordError> {
        let sink = match self.sinks.load().get(name) {
            Some(sink) => sink.clone(),
            None => get_or_insert(&self.sinks, name, || Sink::new(kind)),
        };

        if sink.kind != kind {
            return Err(RecordError::KindMismatch {
                metric: name.to_string(),
                registered: sink.kind,
                emitted: kind,
            });
        }
        Ok(sink)
    }

    fn check_cell(&self, name: &str) -> Arc<CheckCell> {
        match self.checks.load().get(name) {
            Some(cell) => cell.clone(),
            None => get_or_insert(&self.checks, name, CheckCell::default),
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("metrics", &self.sinks.load().len())
            .field("submetrics", &self.submetrics)
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

fn get_or_insert<T>(table: &Table<T>, name: &str, init: impl Fn() -> T) -> Arc<T> {
    let mut found = None;
    table.rcu(|current| {
        if let Some(existing) = current.get(name) {
            found = Some(existing.clone());
            return Arc::clone(current);
        }
        let created = Arc::new(init());
        found = Some(created.clone());
        let mut next = HashMap::clone(current);
        next.insert(name.to_string(), created);
        Arc::new(next)
    });

    match found {
        Some(entry) => entry,
        None => unreachable!(),
    }
}

#[cfg(feature = "metrics")]
fn forward(sample: &Sample) {
    let name = sample.metric.clone();
    match sample.kind {
        MetricKind::Trend => metrics::histogram!(name).record(sample.value.as_f64()),
        MetricKind::Counter => match counter_increment(sample.value.as_f64()) {
            Some(n) => metrics::counter!(name).increment(n),
            None => trace!("Not forwarding increment {} of {name}", sample.value.as_f64()),
        },
        MetricKind::Rate => {
            let suffix = if sample.value.as_bool() { "true" } else { "false" };
            metrics::counter!(format!("{name}_{suffix}")).increment(1)
        }
    }
}

/// `metrics` counters are `u64`. Fractional or negative increments stay in the run summary
/// only.
#[cfg(feature = "metrics")]
fn counter_increment(value: f64) -> Option<u64> {
    (value >= 0. && value.fract() == 0. && value < u64::MAX as f64).then_some(value as u64)
}
