use std::time::Duration;

/// Hard upper bound on concurrent VUs unless the plan raises it.
pub const DEFAULT_MAX_VUS: u64 = 10_000;

/// How often the scheduler re-evaluates the target VU count.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// How long VUs get to finish their current iteration once the run is stopping.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval for mid-run evaluation of `abortOnFail` thresholds.
pub const DEFAULT_THRESHOLD_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound for the schedule and every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Statuses outside this range count towards `http_req_failed`.
pub const DEFAULT_EXPECTED_STATUSES: std::ops::Range<u16> = 200..400;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATION_FAILED: &str = "iteration_failed";
pub const CHECKS: &str = "checks";
pub const DATA_SENT: &str = "data_sent";
pub const DATA_RECEIVED: &str = "data_received";

/// Exit code for a run whose thresholds failed.
pub const EXIT_THRESHOLDS_FAILED: i32 = 99;
pub const EXIT_ENGINE_FAULT: i32 = 103;
pub const EXIT_INVALID_CONFIG: i32 = 104;
/// Exit code for a run stopped by a signal or a deadline.
pub const EXIT_INTERRUPTED: i32 = 105;
pub const EXIT_THRESHOLD_ABORT: i32 = 108;
