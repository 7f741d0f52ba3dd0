use crate::error::EngineError;
use crate::http::Http;
use crate::scenario::{run_iteration, Scenario};
use crate::vu::{Emitter, Vu};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{ConfigError, SleepPolicy, MAX_DURATION};

/// Upper bound on how long VUs get to unwind once the hard abort fired.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// What every VU is spawned with.
pub(crate) struct VuContext {
    pub http: Http,
    pub emitter: Emitter,
    pub sleep: Option<SleepPolicy>,
    /// Cancelled to retire every VU at once. Each VU watches a child of it.
    pub graceful: CancellationToken,
    /// Cancelled to drop in-flight iterations.
    pub abort: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VuExit {
    Retired,
    Aborted,
}

struct VuTask {
    id: u64,
    retire: CancellationToken,
    handle: JoinHandle<VuExit>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShutdownReport {
    pub retired: usize,
    /// Dropped mid-iteration after the graceful window.
    pub aborted: usize,
}

/// The set of running VU tasks.
///
/// Growing spawns fresh VUs; shrinking marks the newest ones for retirement. A marked VU
/// finishes its current iteration and exits; it is never counted as live again.
pub(crate) struct VuPool<S> {
    scenario: Arc<S>,
    ctx: VuContext,
    max_vus: u64,
    active: Vec<VuTask>,
    draining: Vec<VuTask>,
    next_id: u64,
    peak: u64,
}

impl<S: Scenario> VuPool<S> {
    pub fn new(scenario: S, ctx: VuContext, max_vus: u64) -> Self {
        Self {
            scenario: Arc::new(scenario),
            ctx,
            max_vus,
            active: vec![],
            draining: vec![],
            next_id: 1,
            peak: 0,
        }
    }

    pub fn set_target(&mut self, target: u64) -> Result<(), EngineError> {
        if target > self.max_vus {
            return Err(ConfigError::VuCapExceeded {
                index: 0,
                target,
                max_vus: self.max_vus,
            }
            .into());
        }

        let target = target as usize;
        if self.active.len() == target {
            return Ok(());
        } else if self.active.len() > target {
            let retired = self.active.len() - target;
            for task in self.active.drain(target..) {
                task.retire.cancel();
                self.draining.push(task);
            }
            debug!("Retiring {retired} VUs, {target} live");
        } else {
            let spawned = target - self.active.len();
            while self.active.len() < target {
                self.spawn();
            }
            debug!("Spawned {spawned} VUs, {target} live");
        }

        self.peak = self.peak.max(self.live() + self.draining.len() as u64);
        Ok(())
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let emitter = self.ctx.emitter.fork();
        let vu = Vu::new(id, self.ctx.http.fork(emitter.clone()), emitter);
        let retire = self.ctx.graceful.child_token();

        let handle = tokio::spawn(
            vu_loop(
                self.scenario.clone(),
                vu,
                retire.clone(),
                self.ctx.abort.clone(),
                self.ctx.sleep,
            )
            .instrument(tracing::debug_span!("vu", id)),
        );

        self.active.push(VuTask { id, retire, handle });
    }

    /// VUs counted towards the current target.
    pub fn live(&self) -> u64 {
        self.active.len() as u64
    }

    /// Retired VUs still finishing their last iteration.
    pub fn draining(&self) -> u64 {
        self.draining.len() as u64
    }

    /// Most VUs ever running at the same time, draining ones included.
    pub fn peak(&self) -> u64 {
        self.peak
    }

    /// Collect exited VUs. A VU task which panicked outside of its iteration is fatal.
    pub async fn reap(&mut self) -> Result<(), EngineError> {
        for tasks in [&mut self.active, &mut self.draining] {
            let (finished, running): (Vec<_>, Vec<_>) =
                tasks.drain(..).partition(|t| t.handle.is_finished());
            *tasks = running;

            for task in finished {
                let result = task.handle.await;
                check_exit(task.id, result)?;
            }
        }
        Ok(())
    }

    /// Retire every VU and wait up to `grace` for in-flight iterations. Whatever is still
    /// running afterwards is aborted.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ShutdownReport, EngineError> {
        self.ctx.graceful.cancel();
        let mut tasks: Vec<_> = self.active.drain(..).chain(self.draining.drain(..)).collect();
        debug!("Stopping {} VUs with a grace period of {grace:?}", tasks.len());

        let mut report = ShutdownReport::default();
        let mut fault = None;

        tasks = join_until(tasks, deadline_after(grace), &mut report, &mut fault).await;

        if !tasks.is_empty() {
            warn!(
                "{} VUs still busy after {}, aborting their iterations",
                tasks.len(),
                humantime::format_duration(grace)
            );
            self.ctx.abort.cancel();
            tasks = join_until(tasks, deadline_after(ABORT_GRACE), &mut report, &mut fault).await;
        }

        for task in tasks {
            task.handle.abort();
            report.aborted += 1;
            if let Err(err) = task.handle.await {
                if err.is_panic() {
                    fault.get_or_insert(panic_reason(task.id, err));
                }
            }
        }

        match fault {
            Some(reason) => Err(EngineError::Fault {
                reason,
                partial: Box::default(),
            }),
            None => Ok(report),
        }
    }
}

fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait).unwrap_or(now + MAX_DURATION)
}

async fn join_until(
    tasks: Vec<VuTask>,
    deadline: Instant,
    report: &mut ShutdownReport,
    fault: &mut Option<String>,
) -> Vec<VuTask> {
    let mut remaining = vec![];
    for mut task in tasks {
        // NOTE: timeout_at polls the handle before the deadline, so finished VUs are still
        // collected once the deadline has passed.
        match timeout_at(deadline, &mut task.handle).await {
            Ok(Ok(VuExit::Retired)) => report.retired += 1,
            Ok(Ok(VuExit::Aborted)) => report.aborted += 1,
            Ok(Err(err)) => {
                if err.is_panic() {
                    fault.get_or_insert(panic_reason(task.id, err));
                }
            }
            Err(_) => remaining.push(task),
        }
    }
    remaining
}

fn check_exit(id: u64, result: Result<VuExit, JoinError>) -> Result<(), EngineError> {
    match result {
        Ok(exit) => {
            trace!("VU {id} exited: {exit:?}");
            Ok(())
        }
        Err(err) if err.is_panic() => Err(EngineError::Fault {
            reason: panic_reason(id, err),
            partial: Box::default(),
        }),
        Err(_) => Ok(()),
    }
}

fn panic_reason(id: u64, err: JoinError) -> String {
    format!("VU {id} crashed outside of an iteration: {err}")
}

async fn vu_loop<S: Scenario>(
    scenario: Arc<S>,
    mut vu: Vu,
    retire: CancellationToken,
    abort: CancellationToken,
    sleep: Option<SleepPolicy>,
) -> VuExit {
    let mut rng = SmallRng::from_entropy();
    trace!("VU {} started", vu.id());

    loop {
        // NOTE: Retirement is only observed between iterations. A running iteration always
        // completes unless the hard abort fires.
        if retire.is_cancelled() {
            return VuExit::Retired;
        }

        vu.next_iteration();
        tokio::select! {
            biased;
            _ = abort.cancelled() => {
                debug!("VU {} dropped iteration {}", vu.id(), vu.iteration());
                return VuExit::Aborted;
            }
            outcome = run_iteration(&*scenario, vu.clone()) => {
                trace!(
                    vu = vu.id(),
                    iteration = vu.iteration(),
                    failed = outcome.error.is_some(),
                    "Iteration done in {:?}",
                    outcome.elapsed
                );
            }
        }

        if let Some(policy) = sleep {
            let pause = pause_for(policy, &mut rng);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = retire.cancelled() => {}
            }
        }
    }
}

fn pause_for(policy: SleepPolicy, rng: &mut impl Rng) -> Duration {
    match policy {
        SleepPolicy::Fixed(pause) => pause,
        SleepPolicy::Uniform { min, max } if min >= max => min,
        SleepPolicy::Uniform { min, max } => rng.gen_range(min..=max),
    }
}
