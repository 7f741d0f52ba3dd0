//! Volley is a stage-driven load testing engine.
//!
//! A run ramps a pool of virtual users (VUs) up and down over a list of stages. Every VU
//! loops over a [`Scenario`] iteration, recording request, check and iteration metrics into a
//! shared recorder. Once the run ends the aggregates are checked against thresholds to produce
//! a pass/fail verdict.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use volley::prelude::*;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let plan = RunPlan::new("events")
//!     .base_url("http://localhost:8000".parse()?)
//!     .bearer("token")
//!     .stage(Duration::from_secs(30), 50)
//!     .stage(Duration::from_secs(60), 50)
//!     .stage(Duration::from_secs(30), 0)
//!     .sleep(SleepPolicy::Fixed(Duration::from_secs(1)))
//!     .threshold(Threshold::parse("http_req_failed", "rate<0.02")?)
//!     .threshold(Threshold::parse("http_req_duration", "p(95)<500")?);
//!
//! let result = Engine::new(plan)?
//!     .run(scenario_fn(|vu: Vu| async move {
//!         let res = vu.http().get("/v1/events").send().await?;
//!         vu.check("GET /events 200", &res, |r| r.status == 200);
//!         Ok(())
//!     }))
//!     .await?;
//!
//! println!("{}", volley::summary::render(&result));
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod engine;
mod error;
pub mod evaluator;
mod http;
mod pool;
pub mod recorder;
mod scenario;
mod scheduler;
pub mod script;
pub mod summary;
mod vu;

pub use engine::Engine;
pub use error::{EngineError, IterationError, RecordError};
pub use http::{Http, HttpRequest, HttpResponse};
pub use reqwest::Method;
pub use scenario::{scenario_fn, FnScenario, Scenario};
pub use script::HttpScript;
pub use vu::{Metrics, Vu};

/// Plan, sample and result types.
pub use volley_core as core;

pub mod prelude {
    pub use crate::{scenario_fn, Engine, HttpScript, IterationError, Scenario, Vu};
    pub use volley_core::{RunPlan, RunResult, SleepPolicy, Stage, Threshold};
}
