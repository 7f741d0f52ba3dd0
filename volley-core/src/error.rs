use std::path::PathBuf;
use thiserror::Error;

/// A malformed run plan. Always fatal before any VU is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read plan file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Plan file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },

    #[error("Invalid threshold expression {input:?} on {metric}: {reason}")]
    InvalidThreshold {
        metric: String,
        input: String,
        reason: String,
    },

    #[error("Invalid metric selector {0:?}")]
    InvalidSelector(String),

    #[error("Stage {index} targets {target} VUs which exceeds the VU cap of {max_vus}")]
    VuCapExceeded {
        index: usize,
        target: u64,
        max_vus: u64,
    },

    #[error("maxVUs must be greater than zero")]
    ZeroVuCap,

    #[error("Invalid base URL {input:?}: {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Environment variable {0} referenced by the plan is not set")]
    MissingEnv(String),

    #[error("Sleep range is inverted: min {min:?} > max {max:?}")]
    InvertedSleep {
        min: std::time::Duration,
        max: std::time::Duration,
    },

    #[error("Invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Unsupported HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("Invalid request step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },

    #[error("Tick interval must be greater than zero")]
    ZeroTick,

    #[error("{what} of {value:?} exceeds the longest supported duration of {max:?}")]
    DurationTooLong {
        what: &'static str,
        value: std::time::Duration,
        max: std::time::Duration,
    },
}
