use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub type Tags = BTreeMap<String, String>;

/// How samples of a metric are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Cumulative sum of values.
    Counter,
    /// Fraction of boolean samples that are `true`.
    Rate,
    /// Distribution of values; answers percentile queries.
    Trend,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Counter => "counter",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Bool(bool),
}

impl SampleValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            SampleValue::Number(v) => v,
            SampleValue::Bool(true) => 1.,
            SampleValue::Bool(false) => 0.,
        }
    }

    /// Boolean view used by rate metrics. Non-zero numbers count as `true`.
    pub fn as_bool(&self) -> bool {
        match *self {
            SampleValue::Number(v) => v != 0.,
            SampleValue::Bool(b) => b,
        }
    }
}

impl From<f64> for SampleValue {
    fn from(value: f64) -> Self {
        SampleValue::Number(value)
    }
}

impl From<bool> for SampleValue {
    fn from(value: bool) -> Self {
        SampleValue::Bool(value)
    }
}

/// A single data point emitted by a scenario iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric: String,
    pub kind: MetricKind,
    pub value: SampleValue,
    /// Time since the start of the run.
    pub offset: Duration,
    pub tags: Tags,
}

impl Sample {
    pub fn new(metric: impl Into<String>, kind: MetricKind, value: impl Into<SampleValue>) -> Self {
        Self {
            metric: metric.into(),
            kind,
            value: value.into(),
            offset: Duration::ZERO,
            tags: Tags::new(),
        }
    }

    pub fn trend(metric: impl Into<String>, value: f64) -> Self {
        Self::new(metric, MetricKind::Trend, value)
    }

    pub fn rate(metric: impl Into<String>, value: bool) -> Self {
        Self::new(metric, MetricKind::Rate, value)
    }

    pub fn counter(metric: impl Into<String>, value: f64) -> Self {
        Self::new(metric, MetricKind::Counter, value)
    }

    pub fn at(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: &Tags) -> Self {
        for (k, v) in tags {
            self.tags.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self
    }
}

/// Metric name plus an optional tag filter, written `name{key:value,other:value}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricSelector {
    pub name: String,
    pub tags: Vec<(String, String)>,
}

impl MetricSelector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: vec![],
        }
    }

    pub fn is_submetric(&self) -> bool {
        !self.tags.is_empty()
    }

    /// Whether a sample of `metric` tagged `tags` belongs to this selector.
    pub fn matches(&self, metric: &str, tags: &Tags) -> bool {
        self.name == metric
            && self
                .tags
                .iter()
                .all(|(k, v)| tags.get(k).map(|t| t == v).unwrap_or(false))
    }

    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let Some(open) = input.find('{') else {
            return (!input.is_empty() && !input.contains('}')).then(|| Self::new(input));
        };

        let name = input[..open].trim();
        let rest = input[open + 1..].strip_suffix('}')?;
        if name.is_empty() {
            return None;
        }

        let mut tags = vec![];
        for pair in rest.split(',').filter(|p| !p.trim().is_empty()) {
            let (k, v) = pair.split_once(':')?;
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() {
                return None;
            }
            tags.push((k.to_string(), v.to_string()));
        }
        tags.sort();

        Some(Self {
            name: name.to_string(),
            tags,
        })
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.is_submetric() {
            let tags: Vec<_> = self.tags.iter().map(|(k, v)| format!("{k}:{v}")).collect();
            write!(f, "{{{}}}", tags.join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_plain() {
        let sel = MetricSelector::parse("http_req_duration").unwrap();
        assert_eq!(sel.name, "http_req_duration");
        assert!(!sel.is_submetric());
        assert_eq!(sel.to_string(), "http_req_duration");
    }

    #[test]
    fn test_selector_tags() {
        let sel = MetricSelector::parse("http_req_duration{status:200, name:GET /v1/events}").unwrap();
        assert_eq!(
            sel.tags,
            vec![
                ("name".to_string(), "GET /v1/events".to_string()),
                ("status".to_string(), "200".to_string())
            ]
        );
        assert_eq!(sel.to_string(), "http_req_duration{name:GET /v1/events,status:200}");

        let tags: Tags = [("status", "200"), ("name", "GET /v1/events"), ("method", "GET")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(sel.matches("http_req_duration", &tags));
        assert!(!sel.matches("http_req_failed", &tags));

        let mut other = tags.clone();
        other.insert("status".into(), "500".into());
        assert!(!sel.matches("http_req_duration", &other));
    }

    #[test]
    fn test_selector_invalid() {
        assert!(MetricSelector::parse("").is_none());
        assert!(MetricSelector::parse("{a:b}").is_none());
        assert!(MetricSelector::parse("x{a:b").is_none());
        assert!(MetricSelector::parse("x{novalue}").is_none());
        assert!(MetricSelector::parse("x}").is_none());
    }

    #[test]
    fn test_sample_tags_do_not_override() {
        let base: Tags = [("scenario".to_string(), "events".to_string())].into();
        let sample = Sample::rate("checks", true)
            .tag("scenario", "custom")
            .with_tags(&base);
        assert_eq!(sample.tags["scenario"], "custom");
    }
}
