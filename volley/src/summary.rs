//! End-of-run report: human-readable text and a machine-readable JSON export.
use serde_json::{json, Map, Value};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use volley_core::{
    MetricKind, MetricSummary, RunResult, RunStatus, ThresholdOutcome, HTTP_REQ_DURATION,
};

const DOTS: usize = 28;

/// Render the k6-style text summary.
pub fn render(result: &RunResult) -> String {
    let mut out = String::new();
    // NOTE: Writing into a String cannot fail.
    let _ = write_summary(&mut out, result);
    out
}

fn write_summary(out: &mut String, result: &RunResult) -> std::fmt::Result {
    let status = match result.status {
        RunStatus::Completed => "completed",
        RunStatus::Interrupted => "interrupted",
        RunStatus::AbortedByThreshold => "aborted by threshold",
    };
    writeln!(
        out,
        "\n  run: {}  status: {status}  duration: {}  iterations: {}  vus_max: {}\n",
        result.name,
        format_ms(result.duration.as_secs_f64() * 1_000.),
        result.iterations,
        result.vus_max
    )?;

    if !result.checks.is_empty() {
        for (name, tally) in &result.checks {
            let total = tally.passes + tally.fails;
            let mark = if tally.fails == 0 { '✓' } else { '✗' };
            writeln!(
                out,
                "  {mark} {name}  {:.2}% ({} / {})",
                percent(tally.passes, total),
                tally.passes,
                total
            )?;
        }
        writeln!(out)?;
    }

    for (name, summary) in &result.metrics {
        if summary.count == 0. {
            continue;
        }
        let label = format!("{name}{}", ".".repeat(DOTS.saturating_sub(name.len())));
        writeln!(out, "  {label}: {}", describe(name, summary))?;
    }

    if !result.thresholds.is_empty() {
        writeln!(out, "\n  thresholds:")?;
        for report in &result.thresholds {
            let mark = if report.passed() { '✓' } else { '✗' };
            write!(out, "  {mark} {}: {}", report.metric, report.expression)?;
            match &report.outcome {
                ThresholdOutcome::Passed { observed } => write!(out, " (observed {observed:.4})")?,
                ThresholdOutcome::Failed {
                    observed: Some(observed),
                    ..
                } => write!(out, " (observed {observed:.4})")?,
                ThresholdOutcome::Failed {
                    reason: Some(reason),
                    ..
                } => write!(out, " ({reason})")?,
                ThresholdOutcome::Failed { .. } => {}
                ThresholdOutcome::Indeterminate { reason } => write!(out, " (indeterminate: {reason})")?,
            }
            writeln!(out)?;
        }
    }

    if !result.passed() {
        write_dominant_failures(out, result)?;
    }

    Ok(())
}

fn describe(name: &str, summary: &MetricSummary) -> String {
    match summary.kind {
        MetricKind::Rate => format!(
            "{:.2}%  ✓ {}  ✗ {}",
            summary.rate.unwrap_or(0.) * 100.,
            summary.trues,
            summary.falses
        ),
        MetricKind::Counter => match summary.rate {
            Some(rate) => format!("{}  {rate:.2}/s", summary.count),
            None => format!("{}", summary.count),
        },
        MetricKind::Trend => {
            let fmt = |v: Option<f64>| match v {
                // NOTE: Durations are recorded in milliseconds.
                Some(v) if name.contains("duration") => format_ms(v),
                Some(v) => format!("{v:.2}"),
                None => "-".to_string(),
            };
            format!(
                "avg={} min={} med={} max={} p(90)={} p(95)={}",
                fmt(summary.avg),
                fmt(summary.min),
                fmt(summary.med),
                fmt(summary.max),
                fmt(summary.p90),
                fmt(summary.p95)
            )
        }
    }
}

/// Point at what most likely made the run fail.
fn write_dominant_failures(out: &mut String, result: &RunResult) -> std::fmt::Result {
    writeln!(out, "\n  dominant failures:")?;

    let worst_rate = result
        .metrics
        .iter()
        .filter(|(name, m)| m.kind == MetricKind::Rate && name.contains("failed"))
        .filter_map(|(name, m)| Some((name, m.rate?)))
        .filter(|(_, rate)| *rate > 0.)
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((name, rate)) = worst_rate {
        writeln!(out, "    highest failure rate: {name} {:.2}%", rate * 100.)?;
    }

    let slowest = result
        .metrics
        .iter()
        .filter(|(name, m)| m.kind == MetricKind::Trend && name.starts_with(HTTP_REQ_DURATION))
        .filter_map(|(name, m)| Some((name, m.p95?)))
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((name, p95)) = slowest {
        writeln!(out, "    slowest p(95): {name} {}", format_ms(p95))?;
    }

    let failing_check = result
        .checks
        .iter()
        .filter(|(_, t)| t.fails > 0)
        .max_by_key(|(_, t)| t.fails);
    if let Some((name, tally)) = failing_check {
        writeln!(out, "    most failed check: {name} ({} failures)", tally.fails)?;
    }

    for report in result.failed_thresholds() {
        writeln!(out, "    failed threshold: {}: {}", report.metric, report.expression)?;
    }
    Ok(())
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.
    } else {
        part as f64 / total as f64 * 100.
    }
}

fn format_ms(ms: f64) -> String {
    if ms >= 1_000. {
        format!("{:.2}s", ms / 1_000.)
    } else if ms >= 1. {
        format!("{ms:.2}ms")
    } else {
        format!("{:.2}µs", ms * 1_000.)
    }
}

/// Machine-readable summary, shaped like k6's `--summary-export`: metric statistics keyed by
/// metric name, each carrying the verdicts of its thresholds.
pub fn to_json(result: &RunResult) -> Value {
    let mut metrics = Map::new();
    for (name, summary) in &result.metrics {
        let mut entry = match serde_json::to_value(summary) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let thresholds: Map<String, Value> = result
            .thresholds
            .iter()
            .filter(|t| &t.metric == name)
            .map(|t| (t.expression.clone(), json!({ "ok": t.passed() })))
            .collect();
        if !thresholds.is_empty() {
            entry.insert("thresholds".to_string(), Value::Object(thresholds));
        }
        metrics.insert(name.clone(), Value::Object(entry));
    }

    let checks: Map<String, Value> = result
        .checks
        .iter()
        .map(|(name, t)| (name.clone(), json!({ "passes": t.passes, "fails": t.fails })))
        .collect();

    json!({
        "state": {
            "name": result.name,
            "status": result.status,
            "testRunDurationMs": result.duration.as_secs_f64() * 1_000.,
            "iterations": result.iterations,
            "vusMax": result.vus_max,
            "passed": result.passed(),
        },
        "metrics": metrics,
        "checks": checks,
        "thresholds": result.thresholds,
    })
}

/// Write [`to_json`] to `path`.
pub fn export(result: &RunResult, path: impl AsRef<Path>) -> std::io::Result<()> {
    let mut writer = std::io::BufWriter::new(std::fs::File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &to_json(result))?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use volley_core::{Aggregate, CheckTally, ThresholdReport, HTTP_REQ_FAILED};

    fn result() -> RunResult {
        let durations: Vec<f64> = (1..=100).map(f64::from).collect();
        let mut metrics = BTreeMap::new();
        metrics.insert(
            HTTP_REQ_DURATION.to_string(),
            Aggregate::from_values(MetricKind::Trend, durations, Duration::from_secs(10)).summary(),
        );
        metrics.insert(
            HTTP_REQ_FAILED.to_string(),
            Aggregate::from_rate(5, 95, Duration::from_secs(10)).summary(),
        );

        let mut checks = BTreeMap::new();
        checks.insert(
            "GET /events 200".to_string(),
            CheckTally {
                passes: 95,
                fails: 5,
            },
        );

        RunResult {
            name: "events".into(),
            status: RunStatus::Completed,
            duration: Duration::from_secs(10),
            iterations: 100,
            vus_max: 10,
            metrics,
            checks,
            thresholds: vec![
                ThresholdReport {
                    metric: HTTP_REQ_FAILED.into(),
                    expression: "rate<0.02".into(),
                    outcome: ThresholdOutcome::Failed {
                        observed: Some(0.05),
                        reason: None,
                    },
                },
                ThresholdReport {
                    metric: HTTP_REQ_DURATION.into(),
                    expression: "p(95)<500".into(),
                    outcome: ThresholdOutcome::Passed { observed: 95.05 },
                },
            ],
        }
    }

    #[test]
    fn test_render() {
        let text = render(&result());
        assert!(text.contains("status: completed"));
        assert!(text.contains("✗ GET /events 200  95.00% (95 / 100)"));
        assert!(text.contains("http_req_failed.............: 5.00%  ✓ 5  ✗ 95"));
        assert!(text.contains("p(95)=95.05ms"));
        assert!(text.contains("✗ http_req_failed: rate<0.02 (observed 0.0500)"));
        assert!(text.contains("✓ http_req_duration: p(95)<500"));
        assert!(text.contains("highest failure rate: http_req_failed 5.00%"));
        assert!(text.contains("most failed check: GET /events 200 (5 failures)"));
    }

    #[test]
    fn test_export_shape() {
        let json = to_json(&result());
        assert_eq!(json["state"]["passed"], json!(false));
        assert_eq!(json["state"]["status"], json!("completed"));
        assert_eq!(json["metrics"]["http_req_failed"]["type"], json!("rate"));
        assert_eq!(json["metrics"]["http_req_failed"]["rate"], json!(0.05));
        assert_eq!(
            json["metrics"]["http_req_failed"]["thresholds"]["rate<0.02"]["ok"],
            json!(false)
        );
        assert_eq!(
            json["metrics"]["http_req_duration"]["thresholds"]["p(95)<500"]["ok"],
            json!(true)
        );
        assert_eq!(json["checks"]["GET /events 200"]["fails"], json!(5));
        assert_eq!(json["thresholds"][0]["outcome"], json!("failed"));
    }

    #[test]
    fn test_export_writes_file() {
        let path = std::env::temp_dir().join(format!("volley-summary-{}.json", std::process::id()));
        export(&result(), &path).unwrap();
        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        std::fs::remove_file(path).unwrap();

        // Parsed floats may differ from the in-memory ones in the last bit, so compare against
        // the same text round trip.
        let expected: Value =
            serde_json::from_str(&serde_json::to_string_pretty(&to_json(&result())).unwrap())
                .unwrap();
        assert_eq!(written, expected);

        let in_memory = to_json(&result());
        let avg = |json: &Value| json["metrics"]["http_req_duration"]["avg"].as_f64().unwrap();
        assert!((avg(&written) - avg(&in_memory)).abs() < 1e-9);
        assert_eq!(written["state"]["iterations"], json!(100));
    }
}
