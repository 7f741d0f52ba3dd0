//! Declarative scenario built from the `requests` of a plan file.
use crate::error::IterationError;
use crate::http::HttpResponse;
use crate::scenario::Scenario;
use crate::vu::Vu;
use rand::Rng;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{CaptureSpec, CheckSpec, ConfigError, RequestStep};

/// Runs its steps in order on every iteration.
///
/// URLs, headers and bodies may reference values captured from earlier responses as
/// `{{var}}`. A step whose variables were never captured is skipped for that iteration, the
/// way a script skips a detail lookup when a listing came back empty.
#[derive(Debug, Clone)]
pub struct HttpScript {
    steps: Vec<ScriptStep>,
}

#[derive(Debug, Clone)]
struct ScriptStep {
    method: Method,
    url: String,
    name: String,
    headers: Vec<(String, String)>,
    body: Option<Body>,
    checks: Vec<ResponseCheck>,
    captures: Vec<CaptureSpec>,
}

#[derive(Debug, Clone)]
enum Body {
    Json(Value),
    Text(String),
}

#[derive(Debug, Clone)]
struct ResponseCheck {
    name: String,
    status: Option<u16>,
    status_in: Option<Vec<u16>>,
    body_contains: Option<String>,
    max_duration: Option<Duration>,
}

impl ResponseCheck {
    fn new(spec: &CheckSpec) -> Result<Self, ConfigError> {
        Ok(Self {
            name: spec.name.clone(),
            status: spec.status,
            status_in: spec.status_in.clone(),
            body_contains: spec.body_contains.clone(),
            max_duration: spec
                .max_duration
                .as_ref()
                .map(|d| d.to_duration())
                .transpose()?,
        })
    }

    fn holds(&self, res: &HttpResponse) -> bool {
        self.status.map_or(true, |s| res.status == s)
            && self
                .status_in
                .as_ref()
                .map_or(true, |set| set.contains(&res.status))
            && self
                .body_contains
                .as_ref()
                .map_or(true, |needle| res.text().contains(needle.as_str()))
            && self.max_duration.map_or(true, |max| res.duration <= max)
    }
}

impl HttpScript {
    pub fn new(steps: &[RequestStep]) -> Result<Self, ConfigError> {
        let steps = steps
            .iter()
            .map(|step| {
                let method = Method::from_bytes(step.method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| ConfigError::InvalidMethod(step.method.clone()))?;
                let body = match (&step.json, &step.body) {
                    (Some(json), _) => Some(Body::Json(json.clone())),
                    (None, Some(text)) => Some(Body::Text(text.clone())),
                    (None, None) => None,
                };
                Ok(ScriptStep {
                    name: step.name.clone().unwrap_or_else(|| step.url.clone()),
                    method,
                    url: step.url.clone(),
                    headers: step
                        .headers
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    body,
                    checks: step
                        .checks
                        .iter()
                        .map(ResponseCheck::new)
                        .collect::<Result<_, _>>()?,
                    captures: step.capture.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    async fn run(&self, vu: Vu) -> Result<(), IterationError> {
        let mut vars: HashMap<String, String> = HashMap::new();

        for step in &self.steps {
            let Some(prepared) = prepare(step, &vars) else {
                trace!("Skipping {} {}: unresolved variables", step.method, step.name);
                continue;
            };

            let mut req = vu
                .http()
                .request(step.method.clone(), &prepared.url)
                .name(&step.name);
            for (name, value) in &prepared.headers {
                req = req.header(name, value);
            }
            req = match prepared.body {
                Some(Body::Json(json)) => req.json(&json),
                Some(Body::Text(text)) => req.body(text),
                None => req,
            };

            let res = req.send().await?;

            for check in &step.checks {
                vu.check(&check.name, &res, |r| check.holds(r));
            }
            for capture in &step.captures {
                match capture_value(&res, capture) {
                    Some(value) => {
                        vars.insert(capture.var.clone(), value);
                    }
                    None => trace!("Nothing captured into {}", capture.var),
                }
            }
        }

        Ok(())
    }
}

impl Scenario for HttpScript {
    fn iteration(&self, vu: Vu) -> impl Future<Output = Result<(), IterationError>> + Send {
        self.run(vu)
    }
}

struct Prepared {
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Body>,
}

fn prepare(step: &ScriptStep, vars: &HashMap<String, String>) -> Option<Prepared> {
    let headers = step
        .headers
        .iter()
        .map(|(k, v)| Some((k.clone(), render(v, vars)?)))
        .collect::<Option<_>>()?;
    let body = match &step.body {
        Some(Body::Json(json)) => Some(Body::Json(render_json(json, vars)?)),
        Some(Body::Text(text)) => Some(Body::Text(render(text, vars)?)),
        None => None,
    };
    Some(Prepared {
        url: render(&step.url, vars)?,
        headers,
        body,
    })
}

/// Substitute `{{var}}` placeholders. `None` if any variable is unknown.
fn render(template: &str, vars: &HashMap<String, String>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let Some(len) = rest[open + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..open]);
        let key = rest[open + 2..open + 2 + len].trim();
        out.push_str(vars.get(key)?);
        rest = &rest[open + 2 + len + 2..];
    }

    out.push_str(rest);
    Some(out)
}

fn render_json(value: &Value, vars: &HashMap<String, String>) -> Option<Value> {
    Some(match value {
        Value::String(s) => Value::String(render(s, vars)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_json(v, vars))
                .collect::<Option<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Some((k.clone(), render_json(v, vars)?)))
                .collect::<Option<_>>()?,
        ),
        other => other.clone(),
    })
}

fn capture_value(res: &HttpResponse, capture: &CaptureSpec) -> Option<String> {
    let body: Value = serde_json::from_slice(&res.body).ok()?;

    let picked = if capture.random {
        let items = body.as_array()?;
        if items.is_empty() {
            return None;
        }
        &items[rand::thread_rng().gen_range(0..items.len())]
    } else {
        &body
    };

    match picked.pointer(&capture.pointer)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn response(status: u16, body: Value) -> HttpResponse {
        HttpResponse {
            status,
            headers: HeaderMap::new(),
            body: serde_json::to_vec(&body).unwrap(),
            duration: Duration::from_millis(20),
            step: "GET /v1/events".to_string(),
        }
    }

    #[test]
    fn test_render() {
        let v = vars(&[("eventId", "42")]);
        assert_eq!(render("/events/{{eventId}}", &v).unwrap(), "/events/42");
        assert_eq!(render("/events/{{ eventId }}/seats", &v).unwrap(), "/events/42/seats");
        assert_eq!(render("/plain", &v).unwrap(), "/plain");
        assert_eq!(render("/open/{{eventId", &v).unwrap(), "/open/{{eventId");
        assert!(render("/locations/{{locationId}}", &v).is_none());
    }

    #[test]
    fn test_render_json() {
        let v = vars(&[("eventId", "b1a9")]);
        let body = json!({ "eventId": "{{eventId}}", "seats": [{ "row": 10 }], "totalPrice": 300.0 });
        assert_eq!(
            render_json(&body, &v).unwrap(),
            json!({ "eventId": "b1a9", "seats": [{ "row": 10 }], "totalPrice": 300.0 })
        );
        assert!(render_json(&json!(["{{missing}}"]), &v).is_none());
    }

    #[test]
    fn test_capture() {
        let listing = response(200, json!([{ "id": "a" }, { "id": "b" }, { "id": "c" }]));
        let random = CaptureSpec {
            var: "eventId".into(),
            pointer: "/id".into(),
            random: true,
        };
        for _ in 0..20 {
            let id = capture_value(&listing, &random).unwrap();
            assert!(["a", "b", "c"].contains(&id.as_str()));
        }

        let detail = response(200, json!({ "id": 7, "zone": { "number": 1 } }));
        let nested = CaptureSpec {
            var: "zone".into(),
            pointer: "/zone/number".into(),
            random: false,
        };
        assert_eq!(capture_value(&detail, &nested).unwrap(), "1");

        assert!(capture_value(&response(200, json!([])), &random).is_none());
    }

    #[test]
    fn test_checks() {
        let res = response(201, json!({ "status": "reserved" }));
        let check = |json: Value| {
            let spec: CheckSpec = serde_json::from_value(json).unwrap();
            ResponseCheck::new(&spec).unwrap().holds(&res)
        };

        assert!(check(json!({ "name": "created", "status": 201 })));
        assert!(!check(json!({ "name": "ok", "status": 200 })));
        assert!(check(json!({ "name": "2xx", "statusIn": [200, 201] })));
        assert!(check(json!({ "name": "body", "bodyContains": "reserved" })));
        assert!(!check(json!({ "name": "fast", "maxDuration": "10ms" })));
        assert!(check(json!({ "name": "all", "status": 201, "maxDuration": 1 })));
    }

    #[test]
    fn test_skips_steps_with_unresolved_vars() {
        let steps: Vec<RequestStep> = serde_json::from_value(json!([
            { "url": "/v1/events", "capture": [{ "var": "eventId", "pointer": "/id", "random": true }] },
            { "url": "/events/{{eventId}}", "name": "GET /events/:id" }
        ]))
        .unwrap();
        let script = HttpScript::new(&steps).unwrap();
        assert_eq!(script.len(), 2);
        assert!(prepare(&script.steps[0], &HashMap::new()).is_some());
        assert!(prepare(&script.steps[1], &HashMap::new()).is_none());
        assert_eq!(
            prepare(&script.steps[1], &vars(&[("eventId", "9")])).unwrap().url,
            "/events/9"
        );
        assert_eq!(script.steps[1].name, "GET /events/:id");
        assert_eq!(script.steps[0].name, "/v1/events");
    }
}
