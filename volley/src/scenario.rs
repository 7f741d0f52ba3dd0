//! User-supplied workload and the per-iteration bookkeeping around it.
use crate::error::IterationError;
use crate::vu::Vu;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{Sample, ITERATIONS, ITERATION_DURATION, ITERATION_FAILED};

/// One iteration of work, executed in a loop by every VU.
///
/// The iteration receives a [`Vu`] handle for HTTP, checks and custom metrics. Returning an
/// error (or panicking) marks the iteration as failed; the VU keeps going either way.
pub trait Scenario: Send + Sync + 'static {
    fn iteration(&self, vu: Vu) -> impl Future<Output = Result<(), IterationError>> + Send;
}

/// A [`Scenario`] made from an async closure. See [`scenario_fn`].
pub struct FnScenario<T>(T);

/// Wrap an async closure into a [`Scenario`].
///
/// # Example
/// ```no_run
/// use volley::{scenario_fn, Vu};
///
/// let scenario = scenario_fn(|vu: Vu| async move {
///     let res = vu.http().get("/v1/events").send().await?;
///     vu.check("status is 200", &res, |r| r.status == 200);
///     Ok(())
/// });
/// ```
pub fn scenario_fn<T, F>(func: T) -> FnScenario<T>
where
    T: Fn(Vu) -> F + Send + Sync + 'static,
    F: Future<Output = Result<(), IterationError>> + Send,
{
    FnScenario(func)
}

impl<T, F> Scenario for FnScenario<T>
where
    T: Fn(Vu) -> F + Send + Sync + 'static,
    F: Future<Output = Result<(), IterationError>> + Send,
{
    fn iteration(&self, vu: Vu) -> impl Future<Output = Result<(), IterationError>> + Send {
        (self.0)(vu)
    }
}

#[derive(Debug)]
pub(crate) struct IterationOutcome {
    pub elapsed: Duration,
    pub error: Option<IterationError>,
}

/// Run one iteration, contain panics and record the iteration metrics.
pub(crate) async fn run_iteration<S: Scenario>(scenario: &S, vu: Vu) -> IterationOutcome {
    let id = vu.id();
    let iteration = vu.iteration();
    let emitter = vu.emitter().clone();

    let start = Instant::now();
    let result = AssertUnwindSafe(scenario.iteration(vu)).catch_unwind().await;
    let elapsed = start.elapsed();

    let error = match result {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(panic) => Some(IterationError::Panic(panic_message(&*panic))),
    };

    let samples = [
        Sample::counter(ITERATIONS, 1.),
        Sample::trend(ITERATION_DURATION, elapsed.as_secs_f64() * 1_000.),
        Sample::rate(ITERATION_FAILED, error.is_some()),
    ];
    for sample in samples {
        if let Err(err) = emitter.emit(sample) {
            error!("Unable to record iteration metrics: {err}");
        }
    }

    if let Some(err) = &error {
        let step = emitter.step();
        warn!(
            vu = id,
            iteration,
            step = step.as_deref().unwrap_or("-"),
            "Iteration failed: {err}"
        );
    }

    IterationOutcome { elapsed, error }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Recorder;
    use crate::vu::tests::test_vu;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_successful_iteration() {
        let recorder = Arc::new(Recorder::new([]));
        let scenario = scenario_fn(|vu: Vu| async move {
            vu.step("think");
            vu.sleep(Duration::from_millis(5)).await;
            Ok(())
        });

        let outcome = run_iteration(&scenario, test_vu(recorder.clone())).await;
        assert!(outcome.error.is_none());
        assert!(outcome.elapsed >= Duration::from_millis(5));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.aggregates[ITERATIONS].sum(), 1.);
        assert_eq!(snapshot.aggregates[ITERATION_FAILED].rate(), Some(0.));
        assert!(snapshot.aggregates[ITERATION_DURATION].min().unwrap() >= 5.);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_failed_iteration_logs_step() {
        let recorder = Arc::new(Recorder::new([]));
        let scenario = scenario_fn(|vu: Vu| async move {
            vu.step("reserve seat");
            Err(IterationError::custom("sold out"))
        });

        let outcome = run_iteration(&scenario, test_vu(recorder.clone())).await;
        assert!(matches!(outcome.error, Some(IterationError::Custom(_))));
        assert_eq!(recorder.snapshot().aggregates[ITERATION_FAILED].rate(), Some(1.));
        assert!(logs_contain("reserve seat"));
        assert!(logs_contain("sold out"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let recorder = Arc::new(Recorder::new([]));
        let scenario = scenario_fn(|vu: Vu| async move {
            if vu.id() > 0 {
                panic!("boom");
            }
            Ok(())
        });

        let outcome = run_iteration(&scenario, test_vu(recorder.clone())).await;
        match outcome.error {
            Some(IterationError::Panic(msg)) => assert_eq!(msg, "boom"),
            other => panic!("Unexpected outcome {other:?}"),
        }
        assert_eq!(recorder.snapshot().aggregates[ITERATIONS].sum(), 1.);
    }
}
