//! Threshold verdicts over recorder snapshots.
use crate::recorder::{Recorder, Snapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{
    Aggregate, StatError, Threshold, ThresholdOutcome, ThresholdReport, HTTP_REQS, ITERATIONS,
};

/// Evaluate one threshold. A metric without samples is indeterminate; a statistic which does
/// not exist for the metric's kind fails.
pub fn evaluate(threshold: &Threshold, snapshot: &Snapshot) -> ThresholdOutcome {
    evaluate_aggregate(threshold, snapshot.get(&threshold.metric))
}

fn evaluate_aggregate(threshold: &Threshold, aggregate: Option<&Aggregate>) -> ThresholdOutcome {
    let Some(aggregate) = aggregate else {
        return ThresholdOutcome::Indeterminate {
            reason: format!("no samples recorded for {}", threshold.metric),
        };
    };

    match aggregate.statistic(&threshold.expression.statistic) {
        Ok(observed) if threshold.expression.holds(observed) => {
            ThresholdOutcome::Passed { observed }
        }
        Ok(observed) => ThresholdOutcome::Failed {
            observed: Some(observed),
            reason: None,
        },
        Err(StatError::NoSamples) => ThresholdOutcome::Indeterminate {
            reason: format!("no samples recorded for {}", threshold.metric),
        },
        Err(err @ StatError::NotApplicable(_)) => ThresholdOutcome::Failed {
            observed: None,
            reason: Some(err.to_string()),
        },
    }
}

pub fn evaluate_all(thresholds: &[Threshold], snapshot: &Snapshot) -> Vec<ThresholdReport> {
    thresholds
        .iter()
        .map(|t| ThresholdReport::new(t, evaluate(t, snapshot)))
        .collect()
}

/// Logs progress and re-evaluates `abortOnFail` thresholds while the run is in progress.
///
/// Each tick reads only the sinks the abort thresholds reference, never a full snapshot.
pub(crate) struct RunWatch {
    pub recorder: Arc<Recorder>,
    /// Only the `abortOnFail` ones are evaluated.
    pub thresholds: Vec<Threshold>,
    pub interval: Duration,
    /// Kept current by the engine.
    pub live_vus: Arc<AtomicU64>,
    /// Cancelled by the watch when a threshold breaches.
    pub trigger: CancellationToken,
    /// Cancelled by the engine to stop watching.
    pub stop: CancellationToken,
}

impl RunWatch {
    /// Returns the first breached threshold, if any.
    pub async fn run(self) -> Option<ThresholdReport> {
        let abort_on_fail: Vec<_> = self
            .thresholds
            .iter()
            .filter(|t| t.abort_on_fail)
            .collect();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // NOTE: First tick completes instantly
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return None,
                _ = ticker.tick() => {}
            }

            let elapsed = self.recorder.elapsed();
            self.log_progress(elapsed);

            for threshold in &abort_on_fail {
                if let Some(delay) = threshold.delay_abort_eval {
                    if elapsed < delay {
                        continue;
                    }
                }

                let aggregate = self.recorder.aggregate(&threshold.metric);
                let outcome = evaluate_aggregate(threshold, aggregate.as_ref());
                // NOTE: Mid-run, a metric without samples yet is not a breach.
                if matches!(outcome, ThresholdOutcome::Failed { .. }) {
                    let report = ThresholdReport::new(*threshold, outcome);
                    warn!(
                        "Threshold {threshold} breached (observed {}), aborting run",
                        report
                            .outcome
                            .observed()
                            .map(|v| format!("{v:.4}"))
                            .unwrap_or_else(|| "n/a".to_string())
                    );
                    self.trigger.cancel();
                    return Some(report);
                }
            }
        }
    }

    fn log_progress(&self, elapsed: Duration) {
        info!(
            "{} elapsed, {} VUs, {} iterations, {} requests",
            humantime::format_duration(Duration::from_secs(elapsed.as_secs())),
            self.live_vus.load(Ordering::Relaxed),
            self.recorder.total(ITERATIONS) as u64,
            self.recorder.total(HTTP_REQS) as u64
        );
    }
}
