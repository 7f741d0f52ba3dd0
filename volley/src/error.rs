use std::collections::BTreeMap;
use thiserror::Error;
use volley_core::{ConfigError, MetricKind, MetricSummary};

/// A fault inside one scenario iteration. Recorded and logged; the VU carries on.
#[derive(Debug, Error)]
pub enum IterationError {
    #[error("{step}: transport error: {source}")]
    Transport {
        step: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: unexpected status {status}")]
    UnexpectedStatus { step: String, status: u16 },

    #[error("{step}: invalid response body: {source}")]
    Body {
        step: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid request: {0}")]
    Request(String),

    #[error("Metric error: {0}")]
    Record(#[from] RecordError),

    #[error("Iteration panicked: {0}")]
    Panic(String),

    #[error("{0}")]
    Custom(String),
}

impl IterationError {
    /// Fail the iteration with a free-form message.
    pub fn custom(msg: impl std::fmt::Display) -> Self {
        Self::Custom(msg.to_string())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("Metric {metric} is a {registered} but was emitted as a {emitted}")]
    KindMismatch {
        metric: String,
        registered: MetricKind,
        emitted: MetricKind,
    },

    #[error("Metric {metric} received a non-finite value")]
    NonFinite { metric: String },
}

/// Errors which halt the whole run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Unable to build the HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// Results can no longer be trusted. Carries whatever was aggregated up to the fault.
    #[error("Engine fault: {reason}")]
    Fault {
        reason: String,
        partial: Box<BTreeMap<String, MetricSummary>>,
    },
}
