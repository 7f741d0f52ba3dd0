use crate::error::EngineError;
use crate::evaluator::{evaluate_all, RunWatch};
use crate::http::Http;
use crate::pool::{VuContext, VuPool};
use crate::recorder::Recorder;
use crate::scenario::Scenario;
use crate::scheduler::Scheduler;
use crate::vu::Emitter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};
use volley_core::{RunPlan, RunResult, RunStatus, ITERATIONS};

/// Executes a [`RunPlan`] against a [`Scenario`].
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use volley::{scenario_fn, Engine, Vu};
/// use volley::core::{RunPlan, Threshold};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let plan = RunPlan::new("events")
///     .base_url("http://localhost:8080".parse()?)
///     .stage(Duration::from_secs(30), 50)
///     .stage(Duration::from_secs(30), 0)
///     .threshold(Threshold::parse("http_req_failed", "rate<0.02")?);
///
/// let result = Engine::new(plan)?
///     .run(scenario_fn(|vu: Vu| async move {
///         vu.http().get("/v1/events").send().await?;
///         Ok(())
///     }))
///     .await?;
///
/// std::process::exit(result.exit_code());
/// # }
/// ```
pub struct Engine {
    plan: RunPlan,
    client: Option<reqwest::Client>,
    cancel: CancellationToken,
    abort: CancellationToken,
    deadline: Option<Duration>,
}

impl Engine {
    /// Validates the plan. Nothing is started until [`Engine::run`].
    pub fn new(plan: RunPlan) -> Result<Self, EngineError> {
        Ok(Self {
            plan: plan.validate()?,
            client: None,
            cancel: CancellationToken::new(),
            abort: CancellationToken::new(),
            deadline: None,
        })
    }

    /// Use a preconfigured client instead of one built from the plan.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Stop the run after `deadline` even if stages remain. Reported as interrupted.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Cancelling this token stops the run gracefully: VUs finish their current iteration
    /// within the plan's graceful stop window.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancelling this token drops in-flight iterations immediately.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    #[instrument(name = "run", skip_all, fields(name = %self.plan.name))]
    pub async fn run<S: Scenario>(self, scenario: S) -> Result<RunResult, EngineError> {
        let Engine {
            plan,
            client,
            cancel,
            abort,
            deadline,
        } = self;

        info!(
            "Starting run with {} stages over {}, {} thresholds",
            plan.schedule.stages.len(),
            humantime::format_duration(plan.schedule.total_duration()),
            plan.thresholds.len()
        );

        let client = match client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(plan.request_timeout)
                .pool_max_idle_per_host(plan.schedule.peak() as usize)
                .build()?,
        };

        let recorder = Arc::new(Recorder::new(
            plan.thresholds.iter().map(|t| t.metric.clone()),
        ));
        let emitter = Emitter::new(recorder.clone(), Arc::new(plan.tags.clone()));
        let http = Http::new(client, &plan, emitter.clone())?;

        let graceful = CancellationToken::new();
        let mut pool = VuPool::new(
            scenario,
            VuContext {
                http,
                emitter,
                sleep: plan.sleep,
                graceful: graceful.clone(),
                abort: abort.clone(),
            },
            plan.max_vus,
        );

        let breach = CancellationToken::new();
        let stop_watch = CancellationToken::new();
        let live_vus = Arc::new(AtomicU64::new(0));
        let watch = tokio::spawn(
            RunWatch {
                recorder: recorder.clone(),
                thresholds: plan.thresholds.clone(),
                interval: plan.threshold_interval,
                live_vus: live_vus.clone(),
                trigger: breach.clone(),
                stop: stop_watch.clone(),
            }
            .run(),
        );

        let deadline_reached = async {
            match deadline {
                Some(deadline) => tokio::time::sleep(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline_reached);

        let mut scheduler = Scheduler::new(plan.schedule.clone(), plan.tick);
        let outcome: Result<RunStatus, EngineError> = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Run cancelled, stopping VUs");
                    break Ok(RunStatus::Interrupted);
                }
                _ = abort.cancelled() => {
                    warn!("Run aborted, dropping in-flight iterations");
                    break Ok(RunStatus::Interrupted);
                }
                _ = breach.cancelled() => break Ok(RunStatus::AbortedByThreshold),
                _ = &mut deadline_reached => {
                    info!("Deadline reached, stopping VUs");
                    break Ok(RunStatus::Interrupted);
                }
                tick = scheduler.tick() => {
                    if let Err(err) = pool.reap().await {
                        break Err(err);
                    }
                    if tick.finished {
                        debug!("All stages complete after {:?}", tick.elapsed);
                        break Ok(RunStatus::Completed);
                    }
                    if let Err(err) = pool.set_target(tick.target) {
                        break Err(err);
                    }
                    live_vus.store(pool.live(), Ordering::Relaxed);
                    trace!("{} live VUs, {} draining", pool.live(), pool.draining());
                }
            }
        };

        stop_watch.cancel();
        let breached = watch.await.ok().flatten();

        let grace = match &outcome {
            Ok(_) => plan.graceful_stop,
            Err(_) => Duration::ZERO,
        };
        let shutdown = pool.shutdown(grace).await;
        recorder.seal();
        let snapshot = recorder.snapshot();

        let status = match (outcome, shutdown) {
            (Err(err), _) | (Ok(_), Err(err)) => return Err(fault(err, &snapshot)),
            (Ok(status), Ok(report)) => {
                debug!(
                    "VUs stopped: {} retired, {} aborted",
                    report.retired, report.aborted
                );
                status
            }
        };

        if let Some(report) = &breached {
            debug!("Run aborted by {}: {}", report.metric, report.expression);
        }
        if recorder.dropped() > 0 {
            debug!("{} samples arrived after the run ended", recorder.dropped());
        }

        let result = RunResult {
            name: plan.name.clone(),
            status,
            duration: snapshot.elapsed,
            iterations: snapshot
                .aggregates
                .get(ITERATIONS)
                .map(|a| a.sum() as u64)
                .unwrap_or(0),
            vus_max: pool.peak(),
            metrics: snapshot.summaries(),
            checks: snapshot.checks.clone(),
            thresholds: evaluate_all(&plan.thresholds, &snapshot),
        };

        info!(
            "Run {:?} after {}: {} iterations, thresholds {}",
            result.status,
            humantime::format_duration(Duration::from_millis(result.duration.as_millis() as u64)),
            result.iterations,
            if result.passed() { "passed" } else { "failed" }
        );

        Ok(result)
    }
}

fn fault(err: EngineError, snapshot: &crate::recorder::Snapshot) -> EngineError {
    match err {
        EngineError::Fault { reason, .. } => {
            error!("{reason}");
            EngineError::Fault {
                reason,
                partial: Box::new(snapshot.summaries()),
            }
        }
        other => other,
    }
}
