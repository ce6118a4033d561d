//! One backend operation end to end: attachment loading, exchange, decoding.

use crate::errors::ToolError;
use crate::services::endpoint::{EndpointDescriptor, ResponseShape};
use crate::services::exchange::{BoundParameters, HttpExchange};
use crate::services::transport::RawResponse;
use crate::services::uploads::AttachmentLoader;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct OperationRunner {
    exchange: Arc<HttpExchange>,
    loader: AttachmentLoader,
}

impl OperationRunner {
    pub fn new(exchange: Arc<HttpExchange>, loader: AttachmentLoader) -> Self {
        Self { exchange, loader }
    }

    pub async fn run(
        &self,
        descriptor: &EndpointDescriptor,
        params: &BoundParameters,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let attachment = match descriptor.attachment_param() {
            Some(spec) => {
                let path = params
                    .values
                    .get(&spec.name)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Some(self.loader.load(&spec.name, path).await?)
            }
            None => None,
        };
        let response = self
            .exchange
            .execute(descriptor, params, attachment.as_ref(), cancel)
            .await?;
        decode_response(descriptor, &response)
    }
}

/// Turns a successful response into the operation's result value.
pub fn decode_response(
    descriptor: &EndpointDescriptor,
    response: &RawResponse,
) -> Result<Value, ToolError> {
    if descriptor.response == ResponseShape::Empty {
        return Ok(serde_json::json!({ "status": response.status }));
    }
    match response.json() {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Ok(serde_json::json!({ "status": response.status })),
        Err(_) if descriptor.response == ResponseShape::Raw => Ok(serde_json::json!({
            "status": response.status,
            "content_type": response.header("content-type"),
            "text": String::from_utf8_lossy(&response.body),
        })),
        Err(err) => Err(ToolError::protocol(format!(
            "{} returned a body that is not JSON: {}",
            descriptor.key, err
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::endpoint::HttpMethod;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;

    fn descriptor(response: ResponseShape) -> EndpointDescriptor {
        EndpointDescriptor {
            key: "attachments.delete".to_string(),
            method: HttpMethod::Delete,
            path: "/api/v3/attachments/{id}".to_string(),
            summary: String::new(),
            params: Vec::new(),
            response,
            idempotent: None,
            body_template: None,
            require_any: Vec::new(),
            source: Default::default(),
            request_schema: None,
            responses: None,
        }
    }

    #[test]
    fn empty_responses_report_the_status() {
        let response = RawResponse::new(204, HeaderMap::new(), Bytes::new());
        let value = decode_response(&descriptor(ResponseShape::Empty), &response).expect("decoded");
        assert_eq!(value, serde_json::json!({"status": 204}));
    }

    #[test]
    fn raw_responses_keep_non_json_text() {
        let response = RawResponse::new(200, HeaderMap::new(), Bytes::from_static(b"plain text"));
        let value = decode_response(&descriptor(ResponseShape::Raw), &response).expect("decoded");
        assert_eq!(value["text"], "plain text");
        let err = decode_response(&descriptor(ResponseShape::Resource), &response).expect_err("not json");
        assert_eq!(err.kind, crate::errors::ToolErrorKind::Protocol);
    }
}
