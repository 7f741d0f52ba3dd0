use crate::error::RecordError;
use crate::http::Http;
use crate::recorder::Recorder;
use std::sync::{Arc, Mutex};
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{Sample, Tags, CHECKS};

/// Stamps samples with the run offset and the plan-wide tags before they hit the [`Recorder`].
/// Also tracks the step the VU is currently in, for failure logs.
#[derive(Clone)]
pub(crate) struct Emitter {
    recorder: Arc<Recorder>,
    tags: Arc<Tags>,
    step: Arc<Mutex<Option<String>>>,
}

impl Emitter {
    pub fn new(recorder: Arc<Recorder>, tags: Arc<Tags>) -> Self {
        Self {
            recorder,
            tags,
            step: Arc::new(Mutex::new(None)),
        }
    }

    /// Same recorder and tags, fresh step slot. One per VU.
    pub fn fork(&self) -> Self {
        Self::new(self.recorder.clone(), self.tags.clone())
    }

    pub fn emit(&self, sample: Sample) -> Result<(), RecordError> {
        let offset = self.recorder.elapsed();
        self.recorder.record(sample.at(offset).with_tags(&self.tags))
    }

    pub fn set_step(&self, step: Option<String>) {
        if let Ok(mut current) = self.step.lock() {
            *current = step;
        }
    }

    pub fn step(&self) -> Option<String> {
        self.step.lock().ok().and_then(|s| s.clone())
    }
}

/// Handle given to every scenario iteration. Cheap to clone.
#[derive(Clone)]
pub struct Vu {
    id: u64,
    iteration: u64,
    http: Http,
    emitter: Emitter,
}

impl Vu {
    pub(crate) fn new(id: u64, http: Http, emitter: Emitter) -> Self {
        Self {
            id,
            iteration: 0,
            http,
            emitter,
        }
    }

    /// 1-based id, unique for the whole run. Ids of retired VUs are not reused.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 1-based iteration counter of this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub(crate) fn next_iteration(&mut self) {
        self.iteration += 1;
        self.emitter.set_step(None);
    }

    pub(crate) fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn http(&self) -> &Http {
        &self.http
    }

    /// Record a named check against `value`. Returns the verdict; a failed check never fails
    /// the iteration on its own.
    ///
    /// ```no_run
    /// # async fn demo(vu: volley::Vu) -> Result<(), volley::IterationError> {
    /// let res = vu.http().get("/v1/events").send().await?;
    /// vu.check("status is 200", &res, |r| r.status == 200);
    /// # Ok(())
    /// # }
    /// ```
    pub fn check<T: ?Sized>(&self, name: &str, value: &T, predicate: impl FnOnce(&T) -> bool) -> bool {
        let passed = predicate(value);
        if let Err(err) = self
            .emitter
            .emit(Sample::rate(CHECKS, passed).tag("check", name))
        {
            error!("Unable to record check {name}: {err}");
        }
        passed
    }

    /// Think time inside an iteration.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }

    /// Emit custom metrics.
    pub fn metrics(&self) -> Metrics<'_> {
        Metrics {
            emitter: &self.emitter,
        }
    }

    /// Label what the iteration is doing now. Shows up in failure logs.
    pub fn step(&self, name: impl Into<String>) {
        self.emitter.set_step(Some(name.into()));
    }
}

impl std::fmt::Debug for Vu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vu")
            .field("id", &self.id)
            .field("iteration", &self.iteration)
            .finish()
    }
}

pub struct Metrics<'a> {
    emitter: &'a Emitter,
}

impl Metrics<'_> {
    pub fn counter(&self, name: &str, value: f64) -> Result<(), RecordError> {
        self.emit(Sample::counter(name, value))
    }

    pub fn trend(&self, name: &str, value: f64) -> Result<(), RecordError> {
        self.emit(Sample::trend(name, value))
    }

    pub fn rate(&self, name: &str, value: bool) -> Result<(), RecordError> {
        self.emit(Sample::rate(name, value))
    }

    /// Emit a fully built sample, tags included.
    pub fn emit(&self, sample: Sample) -> Result<(), RecordError> {
        self.emitter.emit(sample)
    }
}
