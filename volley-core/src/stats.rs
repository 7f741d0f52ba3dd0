use crate::{
    MetricKind, Statistic, Threshold, EXIT_INTERRUPTED, EXIT_THRESHOLDS_FAILED,
    EXIT_THRESHOLD_ABORT,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Linear-interpolated percentile over an ascending slice. `q` is in `0..=100`.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let rank = (q / 100.).clamp(0., 1.) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
        }
    }
}

/// Why a statistic could not be computed for a metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatError {
    NoSamples,
    NotApplicable(MetricKind),
}

impl fmt::Display for StatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatError::NoSamples => f.write_str("metric has no samples"),
            StatError::NotApplicable(kind) => {
                write!(f, "statistic is not defined for {kind} metrics")
            }
        }
    }
}

/// Full, order-independent view of one metric at a point in time.
///
/// Trend values are kept sorted, so every statistic is a pure function of the multiset of
/// samples regardless of the order or shard they were recorded from. Counters only carry their
/// event count and total.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub kind: MetricKind,
    values: Vec<f64>,
    events: u64,
    total: f64,
    trues: u64,
    falses: u64,
    elapsed: Duration,
}

impl Aggregate {
    /// A counter's values are folded into its total.
    pub fn from_values(kind: MetricKind, mut values: Vec<f64>, elapsed: Duration) -> Self {
        if kind == MetricKind::Counter {
            return Self::from_counter(values.len() as u64, values.iter().sum(), elapsed);
        }
        values.sort_by(f64::total_cmp);
        Self {
            kind,
            values,
            events: 0,
            total: 0.,
            trues: 0,
            falses: 0,
            elapsed,
        }
    }

    pub fn from_counter(events: u64, total: f64, elapsed: Duration) -> Self {
        Self {
            kind: MetricKind::Counter,
            values: vec![],
            events,
            total,
            trues: 0,
            falses: 0,
            elapsed,
        }
    }

    pub fn from_rate(trues: u64, falses: u64, elapsed: Duration) -> Self {
        Self {
            kind: MetricKind::Rate,
            values: vec![],
            events: 0,
            total: 0.,
            trues,
            falses,
            elapsed,
        }
    }

    /// Number of samples recorded.
    pub fn samples(&self) -> u64 {
        match self.kind {
            MetricKind::Rate => self.trues + self.falses,
            MetricKind::Counter => self.events,
            MetricKind::Trend => self.values.len() as u64,
        }
    }

    pub fn sum(&self) -> f64 {
        match self.kind {
            MetricKind::Rate => self.trues as f64,
            MetricKind::Counter => self.total,
            MetricKind::Trend => self.values.iter().sum(),
        }
    }

    pub fn min(&self) -> Option<f64> {
        self.values.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.values.last().copied()
    }

    pub fn avg(&self) -> Option<f64> {
        (!self.values.is_empty()).then(|| self.sum() / self.values.len() as f64)
    }

    pub fn percentile(&self, q: f64) -> Option<f64> {
        percentile(&self.values, q)
    }

    /// Fraction of `true` samples for rates, per-second throughput for counters.
    pub fn rate(&self) -> Option<f64> {
        match self.kind {
            MetricKind::Rate => {
                let total = self.trues + self.falses;
                (total > 0).then(|| self.trues as f64 / total as f64)
            }
            MetricKind::Counter => {
                let secs = self.elapsed.as_secs_f64();
                (secs > 0.).then(|| self.sum() / secs)
            }
            MetricKind::Trend => None,
        }
    }

    pub fn statistic(&self, stat: &Statistic) -> Result<f64, StatError> {
        if !stat.applies_to(self.kind) {
            return Err(StatError::NotApplicable(self.kind));
        }
        if self.samples() == 0 {
            return Err(StatError::NoSamples);
        }

        let value = match (stat, self.kind) {
            (Statistic::Count, MetricKind::Counter) => Some(self.sum()),
            (Statistic::Count, _) => Some(self.samples() as f64),
            (Statistic::Sum, _) => Some(self.sum()),
            (Statistic::Rate, _) => self.rate(),
            (Statistic::Avg, _) => self.avg(),
            (Statistic::Min, _) => self.min(),
            (Statistic::Max, _) => self.max(),
            (Statistic::Med, _) => self.percentile(50.),
            (Statistic::Percentile(q), _) => self.percentile(*q),
        };

        // NOTE: Only a zero-length run can make the counter rate undefined here.
        value.ok_or(StatError::NoSamples)
    }

    pub fn summary(&self) -> MetricSummary {
        MetricSummary {
            kind: self.kind,
            count: match self.kind {
                MetricKind::Counter => self.sum(),
                _ => self.samples() as f64,
            },
            sum: self.sum(),
            min: self.min(),
            max: self.max(),
            avg: self.avg(),
            med: self.percentile(50.),
            p90: self.percentile(90.),
            p95: self.percentile(95.),
            p99: self.percentile(99.),
            rate: self.rate(),
            trues: self.trues,
            falses: self.falses,
        }
    }
}

/// Serializable per-metric statistics reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub count: f64,
    pub sum: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub med: Option<f64>,
    #[serde(rename = "p(90)", skip_serializing_if = "Option::is_none")]
    pub p90: Option<f64>,
    #[serde(rename = "p(95)", skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
    #[serde(rename = "p(99)", skip_serializing_if = "Option::is_none")]
    pub p99: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(skip_serializing_if = "is_zero")]
    pub trues: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub falses: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTally {
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ThresholdOutcome {
    Passed { observed: f64 },
    Failed { observed: Option<f64>, reason: Option<String> },
    /// Could not be decided (no samples). Counts as a failure.
    Indeterminate { reason: String },
}

impl ThresholdOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, ThresholdOutcome::Passed { .. })
    }

    pub fn observed(&self) -> Option<f64> {
        match self {
            ThresholdOutcome::Passed { observed } => Some(*observed),
            ThresholdOutcome::Failed { observed, .. } => *observed,
            ThresholdOutcome::Indeterminate { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReport {
    pub metric: String,
    pub expression: String,
    #[serde(flatten)]
    pub outcome: ThresholdOutcome,
}

impl ThresholdReport {
    pub fn new(threshold: &Threshold, outcome: ThresholdOutcome) -> Self {
        Self {
            metric: threshold.metric.to_string(),
            expression: threshold.source.clone(),
            outcome,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome.passed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// All stages ran to the end.
    Completed,
    /// Stopped early by a signal or a deadline.
    Interrupted,
    /// Stopped early by an `abortOnFail` threshold.
    AbortedByThreshold,
}

/// Final verdict and aggregates of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub name: String,
    pub status: RunStatus,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub iterations: u64,
    pub vus_max: u64,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: BTreeMap<String, CheckTally>,
    pub thresholds: Vec<ThresholdReport>,
}

impl RunResult {
    /// Logical AND over every threshold. A run without thresholds passes.
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(ThresholdReport::passed)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdReport> {
        self.thresholds.iter().filter(|t| !t.passed())
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::AbortedByThreshold => EXIT_THRESHOLD_ABORT,
            _ if !self.passed() => EXIT_THRESHOLDS_FAILED,
            RunStatus::Interrupted => EXIT_INTERRUPTED,
            RunStatus::Completed => 0,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1_000.)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        Duration::try_from_secs_f64(ms.max(0.) / 1_000.).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&values, 0.), Some(1.));
        assert_eq!(percentile(&values, 100.), Some(100.));
        assert!((percentile(&values, 50.).unwrap() - 50.5).abs() < 1e-9);
        assert!((percentile(&values, 95.).unwrap() - 95.05).abs() < 1e-9);
        assert_eq!(percentile(&[], 50.), None);
        assert_eq!(percentile(&[7.], 99.), Some(7.));
    }

    #[test]
    fn test_trend_statistics() {
        let agg = Aggregate::from_values(
            MetricKind::Trend,
            vec![30., 10., 20., 40.],
            Duration::from_secs(1),
        );
        assert_eq!(agg.min(), Some(10.));
        assert_eq!(agg.max(), Some(40.));
        assert_eq!(agg.avg(), Some(25.));
        assert_eq!(agg.statistic(&Statistic::Med), Ok(25.));
        assert_eq!(agg.statistic(&Statistic::Count), Ok(4.));
        assert_eq!(
            agg.statistic(&Statistic::Rate),
            Err(StatError::NotApplicable(MetricKind::Trend))
        );
    }

    #[test]
    fn test_rate_statistics() {
        let agg = Aggregate::from_rate(3, 97, Duration::from_secs(1));
        assert_eq!(agg.statistic(&Statistic::Rate), Ok(0.03));
        assert_eq!(agg.statistic(&Statistic::Count), Ok(100.));

        let empty = Aggregate::from_rate(0, 0, Duration::from_secs(1));
        assert_eq!(empty.statistic(&Statistic::Rate), Err(StatError::NoSamples));
    }

    #[test]
    fn test_counter_statistics() {
        let agg = Aggregate::from_values(MetricKind::Counter, vec![1.; 50], Duration::from_secs(10));
        assert_eq!(agg.statistic(&Statistic::Count), Ok(50.));
        assert_eq!(agg.statistic(&Statistic::Rate), Ok(5.));
        assert_eq!(agg.summary().count, 50.);
        assert_eq!(agg.summary().min, None);

        let bytes = Aggregate::from_counter(3, 1_536., Duration::from_secs(2));
        assert_eq!(bytes.samples(), 3);
        assert_eq!(bytes.statistic(&Statistic::Sum), Ok(1_536.));
        assert_eq!(bytes.statistic(&Statistic::Rate), Ok(768.));
    }

    #[test]
    fn test_exit_codes() {
        let mut result = RunResult {
            name: "t".into(),
            status: RunStatus::Completed,
            duration: Duration::from_secs(1),
            iterations: 1,
            vus_max: 1,
            metrics: BTreeMap::new(),
            checks: BTreeMap::new(),
            thresholds: vec![],
        };
        assert!(result.passed());
        assert_eq!(result.exit_code(), 0);

        result.status = RunStatus::Interrupted;
        assert_eq!(result.exit_code(), EXIT_INTERRUPTED);

        result.thresholds.push(ThresholdReport {
            metric: "http_req_failed".into(),
            expression: "rate<0.02".into(),
            outcome: ThresholdOutcome::Indeterminate {
                reason: "metric has no samples".into(),
            },
        });
        assert!(!result.passed());
        assert_eq!(result.exit_code(), EXIT_THRESHOLDS_FAILED);

        result.status = RunStatus::AbortedByThreshold;
        assert_eq!(result.exit_code(), EXIT_THRESHOLD_ABORT);
    }
}
