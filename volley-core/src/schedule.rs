use std::time::Duration;

/// One segment of the concurrency ramp: move linearly to `target` VUs over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// The piecewise-linear target concurrency curve described by an ordered list of stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub start_vus: u64,
    pub stages: Vec<Stage>,
}

impl Schedule {
    pub fn new(start_vus: u64, stages: Vec<Stage>) -> Self {
        Self { start_vus, stages }
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    /// Highest VU count the schedule ever asks for.
    pub fn peak(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .chain(std::iter::once(self.start_vus))
            .max()
            .unwrap_or(0)
    }

    /// Exact target concurrency at `elapsed`.
    ///
    /// Interpolates from the previous stage's target (or `start_vus`) to the active stage's
    /// target. Zero-duration stages are jumps. Past the end of the last stage the target is 0.
    pub fn target_at(&self, elapsed: Duration) -> f64 {
        let mut stage_start = Duration::ZERO;
        let mut prev = self.start_vus as f64;

        for stage in &self.stages {
            let stage_end = stage_start.saturating_add(stage.duration);
            if elapsed < stage_end {
                let progress = (elapsed.saturating_sub(stage_start)).as_secs_f64()
                    / stage.duration.as_secs_f64();
                return prev + (stage.target as f64 - prev) * progress;
            }
            stage_start = stage_end;
            prev = stage.target as f64;
        }

        // NOTE: The final boundary is inclusive so the last stage still reaches its target.
        if !self.stages.is_empty() && elapsed == stage_start {
            prev
        } else {
            0.
        }
    }

    /// Target VU count at `elapsed`, rounded to the nearest whole VU.
    pub fn vus_at(&self, elapsed: Duration) -> u64 {
        self.target_at(elapsed).round().max(0.) as u64
    }

    /// Index of the stage active at `elapsed`, `None` once the schedule is over.
    pub fn stage_at(&self, elapsed: Duration) -> Option<usize> {
        let mut stage_end = Duration::ZERO;
        for (idx, stage) in self.stages.iter().enumerate() {
            stage_end = stage_end.saturating_add(stage.duration);
            if elapsed < stage_end {
                return Some(idx);
            }
        }
        None
    }

    pub fn is_finished(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }
}
