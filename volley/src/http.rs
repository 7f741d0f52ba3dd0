//! Instrumented HTTP capability handed to scenarios through [`crate::Vu::http`].
use crate::error::{IterationError, RecordError};
use crate::vu::Emitter;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use url::Url;
use volley_core::{
    ConfigError, RunPlan, Sample, DATA_RECEIVED, DATA_SENT, HTTP_REQS, HTTP_REQ_DURATION,
    HTTP_REQ_FAILED,
};

/// Shared connection pool plus the plan's base URL and default headers.
///
/// Every request records `http_reqs`, `http_req_duration` (ms), `http_req_failed`,
/// `data_sent` and `data_received`, tagged with `method`, `name` and `status`. A transport
/// failure is recorded with status `0`.
#[derive(Clone)]
pub struct Http {
    client: reqwest::Client,
    base_url: Option<Arc<Url>>,
    headers: Arc<HeaderMap>,
    timeout: Duration,
    expected: Range<u16>,
    emitter: Emitter,
}

impl Http {
    pub(crate) fn new(
        client: reqwest::Client,
        plan: &RunPlan,
        emitter: Emitter,
    ) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &plan.headers {
            let (name, value) = header_pair(name, value).map_err(|reason| {
                ConfigError::InvalidHeader {
                    name: name.clone(),
                    reason,
                }
            })?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            base_url: plan.base_url.clone().map(Arc::new),
            headers: Arc::new(headers),
            timeout: plan.request_timeout,
            expected: plan.expected_statuses.clone(),
            emitter,
        })
    }

    /// Same connection pool and defaults, recording through another VU's emitter.
    pub(crate) fn fork(&self, emitter: Emitter) -> Self {
        Self {
            emitter,
            ..self.clone()
        }
    }

    pub fn get(&self, url: &str) -> HttpRequest<'_> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> HttpRequest<'_> {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> HttpRequest<'_> {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: &str) -> HttpRequest<'_> {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: &str) -> HttpRequest<'_> {
        self.request(Method::DELETE, url)
    }

    /// `url` is joined onto the plan's base URL unless it is absolute.
    pub fn request(&self, method: Method, url: &str) -> HttpRequest<'_> {
        HttpRequest {
            http: self,
            method,
            url: url.to_string(),
            name: None,
            headers: vec![],
            body: None,
            content_type: None,
        }
    }

    fn resolve(&self, url: &str) -> Result<Url, IterationError> {
        match Url::parse(url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => base
                    .join(url)
                    .map_err(|e| IterationError::Request(format!("{url}: {e}"))),
                None => Err(IterationError::Request(format!(
                    "{url} is relative but the plan has no base URL"
                ))),
            },
            Err(e) => Err(IterationError::Request(format!("{url}: {e}"))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        method: &Method,
        name: &str,
        status: u16,
        duration: Duration,
        failed: bool,
        sent: usize,
        received: usize,
    ) -> Result<(), RecordError> {
        let status = status.to_string();
        let tagged = |sample: Sample| {
            sample
                .tag("method", method.as_str())
                .tag("name", name)
                .tag("status", status.as_str())
        };

        self.emitter.emit(tagged(Sample::counter(HTTP_REQS, 1.)))?;
        self.emitter.emit(tagged(Sample::trend(
            HTTP_REQ_DURATION,
            duration.as_secs_f64() * 1_000.,
        )))?;
        self.emitter.emit(tagged(Sample::rate(HTTP_REQ_FAILED, failed)))?;
        self.emitter.emit(tagged(Sample::counter(DATA_SENT, sent as f64)))?;
        self.emitter
            .emit(tagged(Sample::counter(DATA_RECEIVED, received as f64)))?;
        Ok(())
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), String> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| e.to_string())?;
    let value = HeaderValue::from_str(value).map_err(|e| e.to_string())?;
    Ok((name, value))
}

/// A request being built. Nothing is sent until [`HttpRequest::send`].
#[must_use = "requests do nothing until sent"]
pub struct HttpRequest<'a> {
    http: &'a Http,
    method: Method,
    url: String,
    name: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<Result<Vec<u8>, String>>,
    content_type: Option<&'static str>,
}

impl HttpRequest<'_> {
    /// Overrides a default header of the same name.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        let value = format!("Bearer {token}");
        self.header(AUTHORIZATION.as_str(), &value)
    }

    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.body = Some(serde_json::to_vec(value).map_err(|e| e.to_string()));
        self.content_type = Some("application/json");
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(Ok(body.into()));
        self
    }

    /// Value of the `name` tag. Defaults to the URL as passed in, so use this to group URLs
    /// which carry ids.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub async fn send(self) -> Result<HttpResponse, IterationError> {
        let http = self.http;
        let name = self.name.unwrap_or_else(|| self.url.clone());
        let step = format!("{} {}", self.method, name);
        http.emitter.set_step(Some(step.clone()));

        let url = http.resolve(&self.url)?;

        let mut headers = HeaderMap::clone(&http.headers);
        for (name, value) in &self.headers {
            let (name, value) = header_pair(name, value)
                .map_err(|e| IterationError::Request(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }
        if let Some(content_type) = self.content_type {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(content_type));
        }

        let body = self.body.transpose().map_err(IterationError::Request)?;
        let sent = body.as_ref().map(Vec::len).unwrap_or(0);

        let mut builder = http
            .client
            .request(self.method.clone(), url)
            .timeout(http.timeout)
            .headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let start = Instant::now();
        let result = match builder.send().await {
            Ok(res) => {
                let status = res.status().as_u16();
                let headers = res.headers().clone();
                res.bytes().await.map(|body| (status, headers, body.to_vec()))
            }
            Err(e) => Err(e),
        };
        let duration = start.elapsed();

        match result {
            Ok((status, headers, body)) => {
                let failed = !http.expected.contains(&status);
                http.record(&self.method, &name, status, duration, failed, sent, body.len())?;
                trace!("{step} -> {status} in {duration:?}");
                Ok(HttpResponse {
                    status,
                    headers,
                    body,
                    duration,
                    step,
                })
            }
            Err(source) => {
                http.record(&self.method, &name, 0, duration, true, sent, 0)?;
                Err(IterationError::Transport { step, source })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Time from sending the request until the full body was read.
    pub duration: Duration,
    pub(crate) step: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, IterationError> {
        serde_json::from_slice(&self.body).map_err(|source| IterationError::Body {
            step: self.step.clone(),
            source,
        })
    }

    /// Turn 4xx and 5xx responses into an iteration failure.
    pub fn error_for_status(self) -> Result<Self, IterationError> {
        if self.status >= 400 {
            Err(IterationError::UnexpectedStatus {
                step: self.step,
                status: self.status,
            })
        } else {
            Ok(self)
        }
    }
}
