//! JSON plan files: the declarative form of a [`RunPlan`] plus the HTTP steps of a scripted
//! scenario. Shaped after k6 `options` so existing scripts translate field by field.
use crate::config::{parse_duration, seconds_to_duration, validate_header};
use crate::{ConfigError, RunPlan, SleepPolicy, Stage, Tags, Threshold};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

const METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// A duration written as a humantime string (`"30s"`) or a number of seconds (`30`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationSpec {
    Seconds(f64),
    Text(String),
}

impl DurationSpec {
    pub fn to_duration(&self) -> Result<Duration, ConfigError> {
        match self {
            DurationSpec::Seconds(secs) => seconds_to_duration(*secs),
            DurationSpec::Text(text) => parse_duration(text),
        }
    }
}

impl From<Duration> for DurationSpec {
    fn from(value: Duration) -> Self {
        DurationSpec::Text(humantime::format_duration(value).to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    pub duration: DurationSpec,
    pub target: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdSpec {
    Expression(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
        #[serde(default)]
        delay_abort_eval: Option<DurationSpec>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SleepSpec {
    Fixed(DurationSpec),
    Range { min: DurationSpec, max: DurationSpec },
}

/// One HTTP call of a scripted scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RequestStep {
    #[serde(default = "default_method")]
    pub method: String,
    /// Relative to `baseUrl` unless absolute. May reference captured values as `{{var}}`.
    pub url: String,
    /// Value of the `name` tag; defaults to the unresolved URL so ids do not explode tag sets.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub json: Option<serde_json::Value>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
    #[serde(default)]
    pub capture: Vec<CaptureSpec>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Named assertion on a response. Every condition present must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckSpec {
    pub name: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub status_in: Option<Vec<u16>>,
    #[serde(default)]
    pub body_contains: Option<String>,
    #[serde(default)]
    pub max_duration: Option<DurationSpec>,
}

/// Extract a value from a JSON response body into a variable for later steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CaptureSpec {
    pub var: String,
    /// JSON pointer (RFC 6901), applied to the body or to the picked array element.
    #[serde(default)]
    pub pointer: String,
    /// Pick a uniformly random element of an array body first.
    #[serde(default)]
    pub random: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
    #[serde(rename = "startVUs", default)]
    pub start_vus: Option<u64>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<ThresholdSpec>>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub sleep: Option<SleepSpec>,
    #[serde(rename = "maxVUs", default)]
    pub max_vus: Option<u64>,
    #[serde(default)]
    pub tick: Option<DurationSpec>,
    #[serde(default)]
    pub graceful_stop: Option<DurationSpec>,
    #[serde(default)]
    pub timeout: Option<DurationSpec>,
    #[serde(default)]
    pub threshold_interval: Option<DurationSpec>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub requests: Vec<RequestStep>,
}

/// A validated plan together with its environment-expanded request steps.
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub plan: RunPlan,
    pub requests: Vec<RequestStep>,
}

impl PlanFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<LoadedPlan, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve `${NAME}` placeholders through `env`, then build and validate the plan.
    pub fn resolve_with<F>(&self, env: F) -> Result<LoadedPlan, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut plan = RunPlan::new(self.name.as_deref().unwrap_or("default"));

        plan.schedule.start_vus = self.start_vus.unwrap_or(0);
        for stage in &self.stages {
            plan.schedule
                .stages
                .push(Stage::new(stage.duration.to_duration()?, stage.target));
        }

        for (metric, specs) in &self.thresholds {
            for spec in specs {
                let threshold = match spec {
                    ThresholdSpec::Expression(expr) => Threshold::parse(metric, expr)?,
                    ThresholdSpec::Detailed {
                        threshold,
                        abort_on_fail,
                        delay_abort_eval,
                    } => {
                        let parsed = Threshold::parse(metric, threshold)?;
                        if *abort_on_fail {
                            let delay = delay_abort_eval
                                .as_ref()
                                .map(DurationSpec::to_duration)
                                .transpose()?;
                            parsed.abort_on_fail(delay)
                        } else {
                            parsed
                        }
                    }
                };
                plan.thresholds.push(threshold);
            }
        }

        if let Some(base_url) = &self.base_url {
            let expanded = expand_env(base_url, &env)?;
            let url = Url::parse(&expanded).map_err(|source| ConfigError::InvalidUrl {
                input: expanded.clone(),
                source,
            })?;
            plan.base_url = Some(url);
        }

        for (name, value) in &self.headers {
            plan.headers.push((name.clone(), expand_env(value, &env)?));
        }

        plan.sleep = match &self.sleep {
            None => None,
            Some(SleepSpec::Fixed(d)) => Some(SleepPolicy::Fixed(d.to_duration()?)),
            Some(SleepSpec::Range { min, max }) => Some(SleepPolicy::Uniform {
                min: min.to_duration()?,
                max: max.to_duration()?,
            }),
        };

        if let Some(max_vus) = self.max_vus {
            plan.max_vus = max_vus;
        }
        if let Some(tick) = &self.tick {
            plan.tick = tick.to_duration()?;
        }
        if let Some(grace) = &self.graceful_stop {
            plan.graceful_stop = grace.to_duration()?;
        }
        if let Some(timeout) = &self.timeout {
            plan.request_timeout = timeout.to_duration()?;
        }
        if let Some(interval) = &self.threshold_interval {
            plan.threshold_interval = interval.to_duration()?;
        }
        plan.tags = self.tags.clone();

        let requests = self
            .requests
            .iter()
            .enumerate()
            .map(|(index, step)| resolve_step(index, step, &env))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Resolved plan {} with {} stages, {} thresholds and {} request steps",
            plan.name,
            plan.schedule.stages.len(),
            plan.thresholds.len(),
            requests.len()
        );

        Ok(LoadedPlan {
            plan: plan.validate()?,
            requests,
        })
    }
}

fn resolve_step<F>(index: usize, step: &RequestStep, env: &F) -> Result<RequestStep, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let method = step.method.to_ascii_uppercase();
    if !METHODS.contains(&method.as_str()) {
        return Err(ConfigError::InvalidMethod(step.method.clone()));
    }
    if step.json.is_some() && step.body.is_some() {
        return Err(ConfigError::InvalidStep {
            index,
            reason: "`json` and `body` are mutually exclusive".to_string(),
        });
    }
    for check in &step.checks {
        if let Some(max) = &check.max_duration {
            max.to_duration()?;
        }
    }

    let mut headers = BTreeMap::new();
    for (name, value) in &step.headers {
        let value = expand_env(value, env)?;
        validate_header(name, &value)?;
        headers.insert(name.clone(), value);
    }

    Ok(RequestStep {
        method,
        url: expand_env(&step.url, env)?,
        headers,
        body: step.body.as_deref().map(|b| expand_env(b, env)).transpose()?,
        ..step.clone()
    })
}

/// Replace every `${NAME}` with the value `env` returns for `NAME`.
pub fn expand_env<F>(input: &str, env: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        let value = env(name).ok_or_else(|| ConfigError::MissingEnv(name.to_string()))?;
        out.push_str(&rest[..start]);
        out.push_str(&value);
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    Ok(out)
}
