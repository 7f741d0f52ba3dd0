//! Threshold expressions: `p(95)<500`, `rate<0.02`, `avg <= 120.5`, ...
use crate::{ConfigError, MetricKind, MetricSelector};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    Rate,
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    Count,
    Sum,
}

impl Statistic {
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        use Statistic::*;
        match kind {
            MetricKind::Rate => matches!(self, Rate | Count),
            MetricKind::Counter => matches!(self, Rate | Count | Sum),
            MetricKind::Trend => !matches!(self, Rate),
        }
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stat = match s {
            "rate" => Statistic::Rate,
            "avg" => Statistic::Avg,
            "min" => Statistic::Min,
            "max" => Statistic::Max,
            "med" => Statistic::Med,
            "count" => Statistic::Count,
            "sum" => Statistic::Sum,
            _ => {
                let quantile = s
                    .strip_prefix("p(")
                    .and_then(|q| q.strip_suffix(')'))
                    .or_else(|| s.strip_prefix('p'))
                    .ok_or_else(|| format!("unknown statistic {s:?}"))?;
                let quantile: f64 = quantile
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile {quantile:?}"))?;
                if !(0. ..=100.).contains(&quantile) {
                    return Err(format!("percentile {quantile} is outside 0..=100"));
                }
                Statistic::Percentile(quantile)
            }
        };
        Ok(stat)
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Rate => f.write_str("rate"),
            Statistic::Percentile(q) => write!(f, "p({q})"),
            Statistic::Avg => f.write_str("avg"),
            Statistic::Min => f.write_str("min"),
            Statistic::Max => f.write_str("max"),
            Statistic::Med => f.write_str("med"),
            Statistic::Count => f.write_str("count"),
            Statistic::Sum => f.write_str("sum"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    pub fn compare(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::Lt => observed < bound,
            Comparator::Le => observed <= bound,
            Comparator::Gt => observed > bound,
            Comparator::Ge => observed >= bound,
            Comparator::Eq => observed == bound,
            Comparator::Ne => observed != bound,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }
}

/// `statistic comparator value`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expression {
    pub statistic: Statistic,
    pub comparator: Comparator,
    pub value: f64,
}

impl Expression {
    pub fn holds(&self, observed: f64) -> bool {
        self.comparator.compare(observed, self.value)
    }
}

impl FromStr for Expression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let op_start = s
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| "missing comparator".to_string())?;
        let (stat, rest) = s.split_at(op_start);

        // Longest match first. `===` is accepted as an alias of `==`.
        let (comparator, value) = [
            ("===", Comparator::Eq),
            ("<=", Comparator::Le),
            (">=", Comparator::Ge),
            ("==", Comparator::Eq),
            ("!=", Comparator::Ne),
            ("<", Comparator::Lt),
            (">", Comparator::Gt),
        ]
        .into_iter()
        .find_map(|(token, cmp)| rest.strip_prefix(token).map(|v| (cmp, v)))
        .ok_or_else(|| format!("invalid comparator in {rest:?}"))?;

        let statistic: Statistic = stat.trim().parse()?;
        let value = value.trim();
        let value: f64 = value
            .parse()
            .map_err(|_| format!("invalid bound {value:?}"))?;
        if !value.is_finite() {
            return Err(format!("bound {value} is not finite"));
        }

        Ok(Self {
            statistic,
            comparator,
            value,
        })
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.statistic, self.comparator.as_str(), self.value)
    }
}

/// A pass/fail condition over one aggregated metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: MetricSelector,
    pub expression: Expression,
    /// Expression as written in the plan, used for reporting.
    pub source: String,
    /// Stop the run as soon as this threshold fails mid-run.
    pub abort_on_fail: bool,
    /// Do not evaluate for `abort_on_fail` before this much of the run has elapsed.
    pub delay_abort_eval: Option<Duration>,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let selector = MetricSelector::parse(metric)
            .ok_or_else(|| ConfigError::InvalidSelector(metric.to_string()))?;
        let parsed = expression
            .parse()
            .map_err(|reason| ConfigError::InvalidThreshold {
                metric: metric.to_string(),
                input: expression.to_string(),
                reason,
            })?;

        Ok(Self {
            metric: selector,
            expression: parsed,
            source: expression.trim().to_string(),
            abort_on_fail: false,
            delay_abort_eval: None,
        })
    }

    pub fn abort_on_fail(mut self, delay: Option<Duration>) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(s: &str) -> Expression {
        s.parse().unwrap()
    }

    #[test]
    fn test_source_script_thresholds() {
        let e = expr("rate<0.02");
        assert_eq!(e.statistic, Statistic::Rate);
        assert_eq!(e.comparator, Comparator::Lt);
        assert_eq!(e.value, 0.02);

        let e = expr("p(95)<500");
        assert_eq!(e.statistic, Statistic::Percentile(95.));
        assert_eq!(e.value, 500.);
    }

    #[test]
    fn test_all_comparators() {
        assert_eq!(expr("avg <= 10").comparator, Comparator::Le);
        assert_eq!(expr("avg>=10").comparator, Comparator::Ge);
        assert_eq!(expr("avg > 10").comparator, Comparator::Gt);
        assert_eq!(expr("avg==10").comparator, Comparator::Eq);
        assert_eq!(expr("avg===10").comparator, Comparator::Eq);
        assert_eq!(expr("avg != 10").comparator, Comparator::Ne);
    }

    #[test]
    fn test_statistics() {
        assert_eq!(expr("p(99.9)<1").statistic, Statistic::Percentile(99.9));
        assert_eq!(expr("p95<1").statistic, Statistic::Percentile(95.));
        assert_eq!(expr("med<1").statistic, Statistic::Med);
        assert_eq!(expr("min>0").statistic, Statistic::Min);
        assert_eq!(expr("max<1").statistic, Statistic::Max);
        assert_eq!(expr("count>100").statistic, Statistic::Count);
        assert_eq!(expr("sum>1").statistic, Statistic::Sum);
    }

    #[test]
    fn test_invalid_expressions() {
        for bad in [
            "rate",
            "rate<",
            "rate<abc",
            "p(101)<5",
            "p(abc)<5",
            "stddev<5",
            "<5",
            "rate=>5",
            "rate<inf",
        ] {
            assert!(bad.parse::<Expression>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["p(95)<500", "rate<0.02", "avg>=1.5", "count!=3"] {
            assert_eq!(expr(s).to_string(), s);
        }
    }

    #[test]
    fn test_threshold_parse_errors() {
        let err = Threshold::parse("http_req_failed", "rate<<0.02").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { .. }));

        let err = Threshold::parse("bad{selector", "rate<0.02").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSelector(_)));
    }

    #[test]
    fn test_applicability() {
        assert!(Statistic::Rate.applies_to(MetricKind::Rate));
        assert!(!Statistic::Percentile(95.).applies_to(MetricKind::Rate));
        assert!(Statistic::Percentile(95.).applies_to(MetricKind::Trend));
        assert!(!Statistic::Rate.applies_to(MetricKind::Trend));
        assert!(Statistic::Count.applies_to(MetricKind::Counter));
        assert!(!Statistic::Avg.applies_to(MetricKind::Counter));
    }
}
