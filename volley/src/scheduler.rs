//! Converts wall-clock time into a target VU count on a fixed tick.
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::Schedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tick {
    pub elapsed: Duration,
    pub target: u64,
    /// Every stage has run to completion.
    pub finished: bool,
}

pub(crate) struct Scheduler {
    schedule: Schedule,
    interval: Interval,
    start: Instant,
    stage: Option<usize>,
}

impl Scheduler {
    /// The first tick fires immediately with the schedule's starting target.
    pub fn new(schedule: Schedule, tick: Duration) -> Self {
        let start = Instant::now();
        let mut interval = interval_at(start, tick);
        // NOTE: A stalled runtime delays later ticks rather than firing a burst of them.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            schedule,
            interval,
            start,
            stage: None,
        }
    }

    pub async fn tick(&mut self) -> Tick {
        let now = self.interval.tick().await;
        let elapsed = now.saturating_duration_since(self.start);

        let stage = self.schedule.stage_at(elapsed);
        if stage != self.stage {
            if let Some(index) = stage {
                let next = &self.schedule.stages[index];
                info!(
                    "Stage {}/{}: ramping to {} VUs over {}",
                    index + 1,
                    self.schedule.stages.len(),
                    next.target,
                    humantime::format_duration(next.duration)
                );
            }
            self.stage = stage;
        }

        Tick {
            elapsed,
            target: self.schedule.vus_at(elapsed),
            finished: self.schedule.is_finished(elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_core::Stage;

    fn schedule() -> Schedule {
        Schedule::new(
            0,
            vec![
                Stage::new(Duration::from_secs(1), 10),
                Stage::new(Duration::from_secs(1), 10),
                Stage::new(Duration::from_secs(1), 0),
            ],
        )
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_follows_schedule() {
        let mut scheduler = Scheduler::new(schedule(), Duration::from_millis(100));

        let first = scheduler.tick().await;
        assert_eq!(first.elapsed, Duration::ZERO);
        assert_eq!(first.target, 0);

        let mut ticks = vec![first];
        loop {
            let tick = scheduler.tick().await;
            ticks.push(tick);
            if tick.finished {
                break;
            }
        }

        let at = |ms: u64| {
            ticks
                .iter()
                .find(|t| t.elapsed == Duration::from_millis(ms))
                .map(|t| t.target)
        };
        assert_eq!(at(500), Some(5));
        assert_eq!(at(1_000), Some(10));
        assert_eq!(at(1_500), Some(10));
        assert_eq!(at(2_500), Some(5));

        let last = ticks.last().unwrap();
        assert_eq!(last.elapsed, Duration::from_secs(3));
        assert_eq!(last.target, 0);

        assert!(logs_contain("Stage 1/3: ramping to 10 VUs over 1s"));
        assert!(logs_contain("Stage 3/3: ramping to 0 VUs over 1s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_schedule_finishes_immediately() {
        let mut scheduler = Scheduler::new(Schedule::default(), Duration::from_millis(100));
        let tick = scheduler.tick().await;
        assert!(tick.finished);
        assert_eq!(tick.target, 0);
    }
}
