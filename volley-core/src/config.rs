use crate::{
    ConfigError, Schedule, Stage, Tags, Threshold, DEFAULT_EXPECTED_STATUSES,
    DEFAULT_GRACEFUL_STOP, DEFAULT_MAX_VUS, DEFAULT_REQUEST_TIMEOUT, DEFAULT_THRESHOLD_INTERVAL,
    DEFAULT_TICK, MAX_DURATION,
};
use std::ops::Range;
use std::time::Duration;
use url::Url;

/// Pause inserted by the engine between two iterations of the same VU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepPolicy {
    Fixed(Duration),
    /// Uniformly random in `min..=max`.
    Uniform { min: Duration, max: Duration },
}

/// Everything the engine needs to execute a run. Immutable once the run starts.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use volley_core::{RunPlan, Threshold};
///
/// let plan = RunPlan::new("events")
///     .stage(Duration::from_secs(30), 50)
///     .stage(Duration::from_secs(60), 50)
///     .stage(Duration::from_secs(30), 0)
///     .threshold(Threshold::parse("http_req_failed", "rate<0.02").unwrap())
///     .validate()
///     .unwrap();
/// assert_eq!(plan.schedule.total_duration(), Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub name: String,
    pub schedule: Schedule,
    pub base_url: Option<Url>,
    /// Sent with every request unless the request overrides them.
    pub headers: Vec<(String, String)>,
    pub sleep: Option<SleepPolicy>,
    pub thresholds: Vec<Threshold>,
    pub max_vus: u64,
    pub tick: Duration,
    pub graceful_stop: Duration,
    pub request_timeout: Duration,
    pub threshold_interval: Duration,
    /// Added to every sample emitted during the run.
    pub tags: Tags,
    pub expected_statuses: Range<u16>,
}

impl RunPlan {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            schedule: Schedule::default(),
            base_url: None,
            headers: vec![],
            sleep: None,
            thresholds: vec![],
            max_vus: DEFAULT_MAX_VUS,
            tick: DEFAULT_TICK,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            threshold_interval: DEFAULT_THRESHOLD_INTERVAL,
            tags: Tags::new(),
            expected_statuses: DEFAULT_EXPECTED_STATUSES,
        }
    }

    /// Append a ramp stage: move to `target` VUs over `duration`.
    pub fn stage(mut self, duration: Duration, target: u64) -> Self {
        self.schedule.stages.push(Stage::new(duration, target));
        self
    }

    pub fn stages(mut self, stages: Vec<Stage>) -> Self {
        self.schedule.stages = stages;
        self
    }

    pub fn start_vus(mut self, vus: u64) -> Self {
        self.schedule.start_vus = vus;
        self
    }

    pub fn base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Adds an `Authorization: Bearer` default header.
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", &format!("Bearer {token}"))
    }

    pub fn sleep(mut self, sleep: SleepPolicy) -> Self {
        self.sleep = Some(sleep);
        self
    }

    pub fn threshold(mut self, threshold: Threshold) -> Self {
        self.thresholds.push(threshold);
        self
    }

    pub fn max_vus(mut self, max_vus: u64) -> Self {
        self.max_vus = max_vus;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn graceful_stop(mut self, grace: Duration) -> Self {
        self.graceful_stop = grace;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn threshold_interval(mut self, interval: Duration) -> Self {
        self.threshold_interval = interval;
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Check every invariant the engine relies on. Nothing is capped silently.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_vus == 0 {
            return Err(ConfigError::ZeroVuCap);
        }
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }

        let total = self
            .schedule
            .stages
            .iter()
            .try_fold(Duration::ZERO, |acc, s| acc.checked_add(s.duration))
            .unwrap_or(Duration::MAX);
        for (what, value) in [
            ("Schedule", total),
            ("tick", self.tick),
            ("gracefulStop", self.graceful_stop),
            ("timeout", self.request_timeout),
            ("thresholdInterval", self.threshold_interval),
        ] {
            within_bounds(what, value)?;
        }
        for threshold in &self.thresholds {
            if let Some(delay) = threshold.delay_abort_eval {
                within_bounds("delayAbortEval", delay)?;
            }
        }

        if self.schedule.start_vus > self.max_vus {
            return Err(ConfigError::VuCapExceeded {
                index: 0,
                target: self.schedule.start_vus,
                max_vus: self.max_vus,
            });
        }
        for (index, stage) in self.schedule.stages.iter().enumerate() {
            if stage.target > self.max_vus {
                return Err(ConfigError::VuCapExceeded {
                    index,
                    target: stage.target,
                    max_vus: self.max_vus,
                });
            }
        }

        match self.sleep {
            Some(SleepPolicy::Uniform { min, max }) if min > max => {
                return Err(ConfigError::InvertedSleep { min, max });
            }
            Some(SleepPolicy::Uniform { max: d, .. }) | Some(SleepPolicy::Fixed(d)) => {
                within_bounds("sleep", d)?;
            }
            None => {}
        }

        for (name, value) in &self.headers {
            validate_header(name, value)?;
        }

        Ok(self)
    }
}

fn within_bounds(what: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value > MAX_DURATION {
        return Err(ConfigError::DurationTooLong {
            what,
            value,
            max: MAX_DURATION,
        });
    }
    Ok(())
}

pub(crate) fn validate_header(name: &str, value: &str) -> Result<(), ConfigError> {
    const TOKEN_EXTRA: &str = "!#$%&'*+-.^_`|~";
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || TOKEN_EXTRA.contains(c))
    {
        return Err(ConfigError::InvalidHeader {
            name: name.to_string(),
            reason: "not a valid header name".to_string(),
        });
    }
    if value.chars().any(|c| (c.is_control() && c != '\t') || c as u32 > 0xff) {
        return Err(ConfigError::InvalidHeader {
            name: name.to_string(),
            reason: "value contains control or non-latin1 characters".to_string(),
        });
    }
    Ok(())
}

/// Parse `"30s"`, `"1m30s"`, `"250ms"` or a bare number of seconds (`"1.5"`).
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    let invalid = |reason: String| ConfigError::InvalidDuration {
        input: input.to_string(),
        reason,
    };

    if let Ok(secs) = trimmed.parse::<f64>() {
        return seconds_to_duration(secs)
            .map_err(|_| invalid("must be a non-negative number of seconds".into()));
    }

    humantime::parse_duration(trimmed).map_err(|e| invalid(e.to_string()))
}

pub(crate) fn seconds_to_duration(secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidDuration {
        input: secs.to_string(),
        reason: format!("must be a non-negative number of seconds ({e})"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("0.25").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("-5").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_vu_cap_is_fatal() {
        let err = RunPlan::new("cap")
            .stage(Duration::from_secs(1), 10)
            .stage(Duration::from_secs(1), 200)
            .max_vus(100)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::VuCapExceeded {
                index: 1,
                target: 200,
                max_vus: 100
            }
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            RunPlan::new("x").max_vus(0).validate(),
            Err(ConfigError::ZeroVuCap)
        ));
        assert!(matches!(
            RunPlan::new("x").tick(Duration::ZERO).validate(),
            Err(ConfigError::ZeroTick)
        ));
        assert!(matches!(
            RunPlan::new("x")
                .sleep(SleepPolicy::Uniform {
                    min: Duration::from_secs(2),
                    max: Duration::from_secs(1)
                })
                .validate(),
            Err(ConfigError::InvertedSleep { .. })
        ));
        assert!(matches!(
            RunPlan::new("x").header("Bad Header", "v").validate(),
            Err(ConfigError::InvalidHeader { .. })
        ));
        assert!(matches!(
            RunPlan::new("x").header("X-Test", "line\nbreak").validate(),
            Err(ConfigError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        assert!(matches!(
            seconds_to_duration(1e30),
            Err(ConfigError::InvalidDuration { .. })
        ));
        assert!(parse_duration("1e30").is_err());

        let huge = Duration::from_secs(10_000_000_000_000_000_000);
        let err = RunPlan::new("x")
            .stage(huge, 1)
            .stage(huge, 1)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DurationTooLong {
                what: "Schedule",
                ..
            }
        ));

        assert!(matches!(
            RunPlan::new("x").graceful_stop(Duration::MAX).validate(),
            Err(ConfigError::DurationTooLong {
                what: "gracefulStop",
                ..
            })
        ));
        assert!(matches!(
            RunPlan::new("x")
                .sleep(SleepPolicy::Fixed(MAX_DURATION * 2))
                .validate(),
            Err(ConfigError::DurationTooLong { what: "sleep", .. })
        ));
        assert!(RunPlan::new("x")
            .stage(MAX_DURATION, 1)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_bearer_header() {
        let plan = RunPlan::new("x").bearer("abc").validate().unwrap();
        assert_eq!(
            plan.headers,
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
    }
}
