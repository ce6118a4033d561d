use crate::constants::{
    limits::ERROR_BODY_PREVIEW_BYTES, network::ACCEPT, pagination::PAGE_SIZE_PARAM,
    server::USER_AGENT,
};
use crate::errors::{ToolError, Violation};
use crate::services::config::{Config, RetrySettings};
use crate::services::credentials::CredentialProvider;
use crate::services::endpoint::{
    EndpointDescriptor, Encoding, HttpMethod, ParamLocation, ParamSpec,
};
use crate::services::logger::Logger;
use crate::services::transport::{
    AttachmentPayload, HttpTransport, PreparedRequest, RawResponse, RequestBody,
    TransportError, TransportErrorKind,
};
use crate::utils::data_path::set_path_value;
use crate::utils::merge::merge_deep;
use crate::utils::redact::redact_text;
use crate::utils::text::body_preview;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT as ACCEPT_HEADER, AUTHORIZATION, USER_AGENT as USER_AGENT_HEADER};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Argument values for one call, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundParameters {
    pub values: Map<String, Value>,
    /// Query pairs forwarded verbatim after the declared parameters.
    pub extra_query: Vec<(String, String)>,
    /// Deep-merged over the generated JSON body.
    pub raw_body: Option<Value>,
}

impl BoundParameters {
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    fn provided(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }
}

enum TransientCause {
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
    Transport(TransportError),
}

impl TransientCause {
    fn describe(&self) -> Value {
        match self {
            TransientCause::Status { status, body, .. } => {
                serde_json::json!({ "last_status": status, "body": body })
            }
            TransientCause::Transport(err) => serde_json::json!({
                "last_error": err.message,
                "error_kind": format!("{:?}", err.kind).to_lowercase(),
            }),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TransientCause::Status { retry_after, .. } => *retry_after,
            TransientCause::Transport(_) => None,
        }
    }
}

/// Sends authenticated requests for endpoint descriptors, retrying transient
/// failures on retry-safe operations.
#[derive(Clone)]
pub struct HttpExchange {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<CredentialProvider>,
    retry: RetrySettings,
    timeout: Duration,
    idempotent_overrides: HashSet<String>,
    default_page_size: u64,
    logger: Logger,
}

impl HttpExchange {
    pub fn new(
        config: &Config,
        credentials: Arc<CredentialProvider>,
        transport: Arc<dyn HttpTransport>,
        logger: &Logger,
    ) -> Self {
        Self {
            transport,
            credentials,
            retry: config.retry.clone(),
            timeout: config.timeout,
            idempotent_overrides: config.idempotent_operations.clone(),
            default_page_size: config.pagination.page_size,
            logger: logger.child("exchange"),
        }
    }

    pub fn is_retry_safe(&self, descriptor: &EndpointDescriptor) -> bool {
        descriptor.retry_safe_by_default() || self.idempotent_overrides.contains(&descriptor.key)
    }

    pub fn max_attempts(&self, descriptor: &EndpointDescriptor) -> usize {
        if self.is_retry_safe(descriptor) {
            self.retry.max_attempts.max(1)
        } else {
            1
        }
    }

    pub fn prepare(
        &self,
        descriptor: &EndpointDescriptor,
        params: &BoundParameters,
        attachment: Option<&AttachmentPayload>,
    ) -> Result<PreparedRequest, ToolError> {
        let mut missing = Vec::new();
        let mut resolved: Vec<(&ParamSpec, Value)> = Vec::new();
        for spec in descriptor.params.iter() {
            let value = params
                .provided(&spec.name)
                .cloned()
                .or_else(|| self.default_for(spec));
            match value {
                Some(value) => resolved.push((spec, value)),
                None if spec.required && is_enforced(spec, params) => {
                    missing.push(Violation::new(&spec.name, "missing required field"))
                }
                None => {}
            }
        }
        if !missing.is_empty() {
            return Err(ToolError::validation(&descriptor.key, missing));
        }

        let mut url = self.build_url(descriptor, &resolved)?;
        let mut pairs: Vec<(String, String)> = Vec::new();
        for (spec, value) in resolved.iter().filter(|(s, _)| s.location == ParamLocation::Query) {
            encode_query(spec, value, &mut pairs)?;
        }
        pairs.extend(params.extra_query.iter().cloned());
        if !pairs.is_empty() {
            let encoded = serde_urlencoded::to_string(&pairs)
                .map_err(|err| ToolError::internal(format!("Failed to encode query: {}", err)))?;
            url.set_query(Some(&encoded));
        }

        let mut body = match &descriptor.body_template {
            Some(Value::Object(template)) => template.clone(),
            _ => Map::new(),
        };
        let mut body_params = 0usize;
        for (spec, value) in resolved.iter().filter(|(s, _)| s.location == ParamLocation::Body) {
            set_path_value(&mut body, spec.wire_name(), encode_body(spec, value)?)?;
            body_params += 1;
        }
        let mut body = Value::Object(body);
        if let Some(raw) = &params.raw_body {
            merge_deep(&mut body, raw);
            body_params += 1;
        }

        let body = match (descriptor.attachment_param(), attachment) {
            (Some(_), Some(file)) => {
                if let Value::Object(map) = &mut body {
                    map.entry("fileName".to_string())
                        .or_insert_with(|| Value::String(file.file_name.clone()));
                }
                Some(RequestBody::Multipart {
                    metadata: body,
                    file: file.clone(),
                })
            }
            (Some(spec), None) => {
                return Err(ToolError::validation(
                    &descriptor.key,
                    vec![Violation::new(&spec.name, "an attachment file is required")],
                ))
            }
            (None, Some(_)) => {
                return Err(ToolError::internal(format!(
                    "Operation {} does not accept attachments",
                    descriptor.key
                )))
            }
            (None, None) => {
                let wants_body = matches!(
                    descriptor.method,
                    HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch
                );
                if wants_body || body_params > 0 {
                    Some(RequestBody::Json(body))
                } else {
                    None
                }
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.credentials.auth_header().clone());
        headers.insert(ACCEPT_HEADER, HeaderValue::from_static(ACCEPT));
        headers.insert(USER_AGENT_HEADER, HeaderValue::from_static(USER_AGENT));

        Ok(PreparedRequest {
            method: descriptor.method,
            url,
            headers,
            body,
        })
    }

    fn default_for(&self, spec: &ParamSpec) -> Option<Value> {
        if spec.name == PAGE_SIZE_PARAM && spec.location == ParamLocation::Query {
            return Some(Value::from(self.default_page_size));
        }
        spec.default.clone()
    }

    fn build_url(
        &self,
        descriptor: &EndpointDescriptor,
        resolved: &[(&ParamSpec, Value)],
    ) -> Result<url::Url, ToolError> {
        let rejected: Vec<Violation> = resolved
            .iter()
            .filter(|(s, _)| s.location == ParamLocation::Path)
            .filter_map(|(spec, value)| {
                path_value_problem(&scalar_text(value))
                    .map(|problem| Violation::new(&spec.name, problem))
            })
            .collect();
        if !rejected.is_empty() {
            return Err(ToolError::validation(&descriptor.key, rejected));
        }

        let mut url = self.credentials.base_url().clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ToolError::internal("Backend host cannot carry a path"))?;
            segments.pop_if_empty();
            for raw in descriptor.path.split('/').filter(|s| !s.is_empty()) {
                let mut segment = raw.to_string();
                for (spec, value) in resolved.iter().filter(|(s, _)| s.location == ParamLocation::Path) {
                    let placeholder = format!("{{{}}}", spec.wire_name());
                    if segment.contains(&placeholder) {
                        segment = segment.replace(&placeholder, &scalar_text(value));
                    }
                }
                segments.push(&segment);
            }
        }
        Ok(url)
    }

    pub async fn execute(
        &self,
        descriptor: &EndpointDescriptor,
        params: &BoundParameters,
        attachment: Option<&AttachmentPayload>,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, ToolError> {
        let request = self.prepare(descriptor, params, attachment)?;
        let retry_safe = self.is_retry_safe(descriptor);
        let max_attempts = self.max_attempts(descriptor);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(cancelled(descriptor, attempt - 1));
            }
            self.logger.debug(
                "sending request",
                Some(&serde_json::json!({
                    "operation": descriptor.key,
                    "method": request.method.as_str(),
                    "path": request.url.path(),
                    "attempt": attempt,
                })),
            );
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(descriptor, attempt)),
                outcome = self.transport.send(&request, self.timeout) => outcome,
            };

            let cause = match outcome {
                Ok(mut response) if response.is_success() => {
                    response.attempts = attempt;
                    return Ok(response);
                }
                Ok(response) if response.status == 429 || response.status >= 500 => {
                    TransientCause::Status {
                        status: response.status,
                        retry_after: parse_retry_after(&response),
                        body: self.preview(&response),
                    }
                }
                Ok(response) => return Err(self.client_error(descriptor, &response, attempt)),
                Err(err) if err.kind == TransportErrorKind::Other => {
                    return Err(ToolError::internal(format!(
                        "Failed to send {} request: {}",
                        descriptor.key, err.message
                    )))
                }
                Err(err) => TransientCause::Transport(err),
            };

            if attempt >= max_attempts {
                return Err(self.transient_failure(descriptor, &cause, attempt, retry_safe));
            }

            let delay = compute_retry_delay(attempt, &self.retry, cause.retry_after());
            let mut meta = cause.describe();
            if let Value::Object(map) = &mut meta {
                map.remove("body");
                map.insert("operation".to_string(), Value::String(descriptor.key.clone()));
                map.insert("attempt".to_string(), Value::from(attempt));
                map.insert("delay_ms".to_string(), Value::from(delay.as_millis() as u64));
            }
            self.logger.warn("transient failure, retrying", Some(&meta));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(descriptor, attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn preview(&self, response: &RawResponse) -> String {
        redact_text(
            &body_preview(&response.body, ERROR_BODY_PREVIEW_BYTES),
            ERROR_BODY_PREVIEW_BYTES,
            Some(self.credentials.secrets().as_slice()),
        )
    }

    fn client_error(
        &self,
        descriptor: &EndpointDescriptor,
        response: &RawResponse,
        attempts: usize,
    ) -> ToolError {
        let parsed = response.json().ok().flatten();
        let backend_message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let identifier = parsed
            .as_ref()
            .and_then(|v| v.get("errorIdentifier"))
            .cloned()
            .unwrap_or(Value::Null);
        let message = format!(
            "{} {} was rejected with HTTP {}{}",
            descriptor.method,
            descriptor.path,
            response.status,
            backend_message
                .as_ref()
                .map(|m| format!(": {}", m))
                .unwrap_or_default()
        );
        let mut err = ToolError::client(response.status, message).with_details(serde_json::json!({
            "status": response.status,
            "operation": descriptor.key,
            "attempts": attempts,
            "error_identifier": identifier,
            "body": self.preview(response),
        }));
        err = match response.status {
            401 => err.with_hint("Check OPENPROJECT_API_KEY; the backend rejected the credential"),
            403 => err.with_hint("The API key's user lacks permission for this operation"),
            404 => err.with_hint("The resource does not exist or is not visible to this user"),
            409 => err.with_hint("Conflict: reload the resource to get a fresh lockVersion"),
            422 => err.with_hint("The backend rejected the values; see body for field errors"),
            _ => err,
        };
        err
    }

    fn transient_failure(
        &self,
        descriptor: &EndpointDescriptor,
        cause: &TransientCause,
        attempts: usize,
        retry_safe: bool,
    ) -> ToolError {
        let last = match cause {
            TransientCause::Status { status, .. } => format!("HTTP {}", status),
            TransientCause::Transport(err) => err.message.clone(),
        };
        let mut details = cause.describe();
        if let Value::Object(map) = &mut details {
            map.insert("operation".to_string(), Value::String(descriptor.key.clone()));
            map.insert("attempts".to_string(), Value::from(attempts));
            map.insert("retry_safe".to_string(), Value::Bool(retry_safe));
        }
        let err = ToolError::retryable(format!(
            "{} failed after {} attempt{} (last: {})",
            descriptor.key,
            attempts,
            if attempts == 1 { "" } else { "s" },
            last
        ))
        .with_details(details);
        if retry_safe {
            err.with_hint("The backend kept failing; try again later")
        } else {
            err.with_hint(
                "This operation is not retry-safe; check whether it took effect before repeating it",
            )
        }
    }
}

/// Attachments are checked by the loader; a raw body may carry body fields.
fn is_enforced(spec: &ParamSpec, params: &BoundParameters) -> bool {
    match spec.location {
        ParamLocation::Attachment => false,
        ParamLocation::Body => params.raw_body.is_none(),
        ParamLocation::Path | ParamLocation::Query => true,
    }
}

fn cancelled(descriptor: &EndpointDescriptor, attempts: usize) -> ToolError {
    ToolError::cancelled(format!("{} was cancelled", descriptor.key)).with_details(
        serde_json::json!({ "operation": descriptor.key, "attempts": attempts }),
    )
}

/// `base * 2^(attempt-1)` capped at the max delay, spread by the jitter
/// ratio. A server `Retry-After` raises the delay, never above the cap.
pub fn compute_retry_delay(
    attempt: usize,
    settings: &RetrySettings,
    retry_after: Option<Duration>,
) -> Duration {
    let base = settings.base_delay.as_millis() as f64;
    let max_delay = settings.max_delay.as_millis() as f64;
    let mut delay = base * 2f64.powi(attempt.saturating_sub(1) as i32);
    if delay > max_delay {
        delay = max_delay;
    }
    if settings.jitter > 0.0 {
        let delta = delay * settings.jitter;
        delay = delay - delta + rand::random::<f64>() * delta * 2.0;
    }
    if let Some(retry_after) = retry_after {
        delay = delay.max(retry_after.as_millis() as f64);
    }
    Duration::from_millis(delay.clamp(0.0, max_delay) as u64)
}

/// A path value that would collapse or drop its URL segment.
fn path_value_problem(text: &str) -> Option<&'static str> {
    match text.trim() {
        "" => Some("must not be empty"),
        "." | ".." => Some("must not be a dot segment"),
        _ => None,
    }
}

fn parse_retry_after(response: &RawResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn invalid(spec: &ParamSpec, problem: &str) -> ToolError {
    ToolError::validation(&spec.name, vec![Violation::new(&spec.name, problem)])
}

fn encode_query(
    spec: &ParamSpec,
    value: &Value,
    pairs: &mut Vec<(String, String)>,
) -> Result<(), ToolError> {
    let key = spec.wire_name().to_string();
    match &spec.encoding {
        Encoding::Plain => pairs.push((key, scalar_text(value))),
        Encoding::Json => {
            let text = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            pairs.push((key, text));
        }
        Encoding::Csv => {
            let text = match value {
                Value::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(","),
                other => scalar_text(other),
            };
            pairs.push((key, text));
        }
        Encoding::BoolString => {
            let text = match value {
                Value::Bool(true) => "true".to_string(),
                Value::Bool(false) => "false".to_string(),
                other => scalar_text(other),
            };
            pairs.push((key, text));
        }
        Encoding::Filter { field, operator } => {
            let mut condition = Map::new();
            condition.insert(
                field.clone(),
                serde_json::json!({ "operator": operator, "values": [scalar_text(value)] }),
            );
            let filter = Value::Array(vec![Value::Object(condition)]);
            pairs.push((key, filter.to_string()));
        }
        Encoding::Expand => {
            let Value::Object(map) = value else {
                return Err(invalid(spec, "expected an object of query parameters"));
            };
            for (name, item) in map.iter() {
                pairs.push((name.clone(), scalar_text(item)));
            }
        }
        Encoding::Href { .. } | Encoding::HrefList { .. } | Encoding::Formattable { .. } => {
            return Err(invalid(spec, "body encoding used in a query parameter"));
        }
    }
    Ok(())
}

fn encode_body(spec: &ParamSpec, value: &Value) -> Result<Value, ToolError> {
    Ok(match &spec.encoding {
        Encoding::Href { template } => href(template, value),
        Encoding::HrefList { template } => {
            let Value::Array(items) = value else {
                return Err(invalid(spec, "expected a list of ids"));
            };
            Value::Array(items.iter().map(|item| href(template, item)).collect())
        }
        Encoding::Formattable { format } => {
            let mut out = Map::new();
            if let Some(format) = format {
                out.insert("format".to_string(), Value::String(format.clone()));
            }
            out.insert("raw".to_string(), Value::String(scalar_text(value)));
            Value::Object(out)
        }
        _ => value.clone(),
    })
}

fn href(template: &str, value: &Value) -> Value {
    serde_json::json!({ "href": template.replace("{value}", &scalar_text(value)) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_and_respects_the_cap() {
        let settings = RetrySettings {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter: 0.0,
        };
        assert_eq!(compute_retry_delay(1, &settings, None), Duration::from_millis(100));
        assert_eq!(compute_retry_delay(2, &settings, None), Duration::from_millis(200));
        assert_eq!(compute_retry_delay(4, &settings, None), Duration::from_millis(300));
        assert_eq!(
            compute_retry_delay(1, &settings, Some(Duration::from_secs(30))),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn collapsing_path_values_are_flagged() {
        assert_eq!(path_value_problem(".."), Some("must not be a dot segment"));
        assert_eq!(path_value_problem(" . "), Some("must not be a dot segment"));
        assert_eq!(path_value_problem(""), Some("must not be empty"));
        assert_eq!(path_value_problem("demo project"), None);
        assert_eq!(path_value_problem("..hidden"), None);
    }

    #[test]
    fn jitter_stays_within_the_ratio() {
        let settings = RetrySettings {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            jitter: 0.2,
        };
        for _ in 0..50 {
            let delay = compute_retry_delay(1, &settings, None).as_millis();
            assert!((800..=1200).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn query_encodings_render_wire_text() {
        let mut pairs = Vec::new();
        let mut csv = ParamSpec::new("select", ParamLocation::Query, crate::services::endpoint::ParamType::Any);
        csv.encoding = Encoding::Csv;
        encode_query(&csv, &serde_json::json!(["id", "subject"]), &mut pairs).expect("csv");

        let mut filter = ParamSpec::new(
            "storage_filter",
            ParamLocation::Query,
            crate::services::endpoint::ParamType::Integer,
        );
        filter.wire = Some("filters".to_string());
        filter.encoding = Encoding::Filter {
            field: "storage".to_string(),
            operator: "=".to_string(),
        };
        encode_query(&filter, &serde_json::json!(3), &mut pairs).expect("filter");

        assert_eq!(pairs[0], ("select".to_string(), "id,subject".to_string()));
        assert_eq!(pairs[1].0, "filters");
        assert_eq!(
            serde_json::from_str::<Value>(&pairs[1].1).expect("json"),
            serde_json::json!([{"storage": {"operator": "=", "values": ["3"]}}])
        );
    }

    #[test]
    fn body_encodings_build_hal_links_and_formattables() {
        let mut link = ParamSpec::new("status_id", ParamLocation::Body, crate::services::endpoint::ParamType::Integer);
        link.encoding = Encoding::Href {
            template: "/api/v3/statuses/{value}".to_string(),
        };
        assert_eq!(
            encode_body(&link, &serde_json::json!(7)).expect("href"),
            serde_json::json!({"href": "/api/v3/statuses/7"})
        );

        let mut text = ParamSpec::new("description", ParamLocation::Body, crate::services::endpoint::ParamType::String);
        text.encoding = Encoding::Formattable {
            format: Some("markdown".to_string()),
        };
        assert_eq!(
            encode_body(&text, &serde_json::json!("**hi**")).expect("raw"),
            serde_json::json!({"format": "markdown", "raw": "**hi**"})
        );
    }
}
