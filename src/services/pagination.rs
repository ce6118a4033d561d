//! Offset pagination over HAL collections.

use crate::constants::pagination::{FIRST_OFFSET, OFFSET_PARAM};
use crate::errors::ToolError;
use crate::services::endpoint::{EndpointDescriptor, ResponseShape};
use crate::services::exchange::{BoundParameters, HttpExchange};
use crate::services::logger::Logger;
use futures::stream::{self, Stream};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub offset: u64,
}

impl PageCursor {
    pub fn first() -> Self {
        Self {
            offset: FIRST_OFFSET,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub offset: u64,
    pub next: Option<PageCursor>,
    pub total: Option<u64>,
}

impl Page {
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "items": self.items,
            "offset": self.offset,
            "next_offset": self.next.map(|c| c.offset),
            "total": self.total,
        })
    }
}

/// Result of a bounded walk used by `all: true` calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub items: Vec<Value>,
    pub pages: usize,
    pub truncated: bool,
    pub total: Option<u64>,
}

impl Collected {
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "items": self.items,
            "count": self.items.len(),
            "pages": self.pages,
            "total": self.total,
            "truncated": self.truncated,
        })
    }
}

#[derive(Clone)]
pub struct PaginationWalker {
    exchange: Arc<HttpExchange>,
    max_pages: usize,
    logger: Logger,
}

impl PaginationWalker {
    pub fn new(exchange: Arc<HttpExchange>, max_pages: usize, logger: &Logger) -> Self {
        Self {
            exchange,
            max_pages: max_pages.max(1),
            logger: logger.child("pagination"),
        }
    }

    /// Fetches exactly one page.
    pub async fn page(
        &self,
        descriptor: &EndpointDescriptor,
        params: &BoundParameters,
        cursor: PageCursor,
        cancel: &CancellationToken,
    ) -> Result<Page, ToolError> {
        if descriptor.response != ResponseShape::Collection {
            return Err(ToolError::internal(format!(
                "{} does not return a collection",
                descriptor.key
            )));
        }
        let mut bound = params.clone();
        if descriptor.is_paginated() {
            bound
                .values
                .insert(OFFSET_PARAM.to_string(), Value::from(cursor.offset));
        }
        let response = self.exchange.execute(descriptor, &bound, None, cancel).await?;
        let body = response
            .json()
            .map_err(|err| {
                self.anomaly(
                    descriptor,
                    ToolError::protocol(format!(
                        "{} returned a collection that is not JSON: {}",
                        descriptor.key, err
                    )),
                )
            })?
            .unwrap_or(Value::Null);
        parse_page(descriptor, &body, cursor.offset).map_err(|err| self.anomaly(descriptor, err))
    }

    /// Lazy item sequence starting at the first page. Calling again restarts.
    pub fn walk(
        &self,
        descriptor: Arc<EndpointDescriptor>,
        params: BoundParameters,
        cancel: CancellationToken,
    ) -> Walk {
        Walk {
            walker: self.clone(),
            descriptor,
            params,
            cancel,
            buffer: VecDeque::new(),
            cursor: Some(PageCursor::first()),
            pages_fetched: 0,
            total: None,
            truncated: false,
            failed: false,
        }
    }

    /// Drains a walk, stopping at `max_items` or the page budget.
    pub async fn collect(
        &self,
        descriptor: Arc<EndpointDescriptor>,
        params: BoundParameters,
        max_items: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Collected, ToolError> {
        let mut walk = self.walk(descriptor, params, cancel.clone());
        let mut items = Vec::new();
        let mut truncated = false;
        while let Some(item) = walk.next().await {
            items.push(item?);
            if max_items.is_some_and(|max| items.len() >= max) {
                truncated = walk.has_more();
                break;
            }
        }
        Ok(Collected {
            items,
            pages: walk.pages_fetched(),
            truncated: truncated || walk.truncated(),
            total: walk.total(),
        })
    }

    fn anomaly(&self, descriptor: &EndpointDescriptor, err: ToolError) -> ToolError {
        self.logger.warn(
            "backend anomaly",
            Some(&serde_json::json!({
                "operation": descriptor.key,
                "message": err.message,
            })),
        );
        err
    }
}

/// Consumer-driven walk state. Owned by one caller, never shared.
pub struct Walk {
    walker: PaginationWalker,
    descriptor: Arc<EndpointDescriptor>,
    params: BoundParameters,
    cancel: CancellationToken,
    buffer: VecDeque<Value>,
    cursor: Option<PageCursor>,
    pages_fetched: usize,
    total: Option<u64>,
    truncated: bool,
    failed: bool,
}

impl Walk {
    pub async fn next(&mut self) -> Option<Result<Value, ToolError>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.failed {
                return None;
            }
            let cursor = self.cursor?;
            if self.pages_fetched >= self.walker.max_pages {
                self.truncated = true;
                self.cursor = None;
                return None;
            }
            let page = match self
                .walker
                .page(&self.descriptor, &self.params, cursor, &self.cancel)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            };
            self.pages_fetched += 1;
            if page.total.is_some() {
                self.total = page.total;
            }
            self.cursor = if page.items.is_empty() { None } else { page.next };
            self.buffer.extend(page.items);
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// The page budget ran out while the backend still had pages.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn has_more(&self) -> bool {
        !self.buffer.is_empty() || self.cursor.is_some()
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Value, ToolError>> {
        stream::unfold(self, |mut walk| async move {
            let item = walk.next().await?;
            Some((item, walk))
        })
    }
}

/// Reads one HAL collection page fetched at `current`.
pub fn parse_page(
    descriptor: &EndpointDescriptor,
    body: &Value,
    current: u64,
) -> Result<Page, ToolError> {
    let items = body
        .pointer("/_embedded/elements")
        .and_then(|v| v.as_array())
        .cloned()
        .ok_or_else(|| {
            ToolError::protocol(format!(
                "{} returned a collection without _embedded.elements",
                descriptor.key
            ))
        })?;
    let total = body.get("total").and_then(|v| v.as_u64());

    let next = match body.pointer("/_links/nextByOffset/href") {
        None | Some(Value::Null) => None,
        Some(href) => {
            if !descriptor.is_paginated() {
                return Err(ToolError::protocol(format!(
                    "{} signalled another page but does not accept an offset",
                    descriptor.key
                )));
            }
            let offset = href
                .as_str()
                .and_then(next_offset)
                .ok_or_else(|| {
                    ToolError::protocol(format!(
                        "{} signalled another page without a usable offset ({})",
                        descriptor.key, href
                    ))
                    .with_details(serde_json::json!({ "href": href, "current_offset": current }))
                })?;
            if offset <= current {
                return Err(ToolError::protocol(format!(
                    "{} returned a next offset {} that does not advance past {}",
                    descriptor.key, offset, current
                ))
                .with_details(serde_json::json!({ "next_offset": offset, "current_offset": current })));
            }
            Some(PageCursor { offset })
        }
    };

    Ok(Page {
        items,
        offset: current,
        next,
        total,
    })
}

fn next_offset(href: &str) -> Option<u64> {
    let url = Url::parse(href)
        .or_else(|_| Url::parse("http://backend.invalid").and_then(|base| base.join(href)))
        .ok()?;
    let value = url
        .query_pairs()
        .find(|(key, _)| key == OFFSET_PARAM)
        .map(|(_, value)| value.into_owned())?;
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolErrorKind;
    use crate::services::endpoint::{HttpMethod, ParamLocation, ParamSpec, ParamType};

    fn collection(paginated: bool) -> EndpointDescriptor {
        let mut params = Vec::new();
        if paginated {
            params.push(ParamSpec::new("offset", ParamLocation::Query, ParamType::Integer));
            let mut size = ParamSpec::new("page_size", ParamLocation::Query, ParamType::Integer);
            size.wire = Some("pageSize".to_string());
            params.push(size);
        }
        EndpointDescriptor {
            key: "users.list".to_string(),
            method: HttpMethod::Get,
            path: "/api/v3/users".to_string(),
            summary: String::new(),
            params,
            response: ResponseShape::Collection,
            idempotent: None,
            body_template: None,
            require_any: Vec::new(),
            source: Default::default(),
            request_schema: None,
            responses: None,
        }
    }

    #[test]
    fn reads_items_total_and_next_offset() {
        let body = serde_json::json!({
            "_type": "Collection",
            "total": 5,
            "_embedded": {"elements": [{"id": 1}, {"id": 2}]},
            "_links": {"nextByOffset": {"href": "/api/v3/users?offset=2&pageSize=2"}}
        });
        let page = parse_page(&collection(true), &body, 1).expect("page");
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, Some(5));
        assert_eq!(page.next, Some(PageCursor { offset: 2 }));
    }

    #[test]
    fn last_page_has_no_cursor() {
        let body = serde_json::json!({"_embedded": {"elements": []}, "_links": {}});
        let page = parse_page(&collection(true), &body, 3).expect("page");
        assert!(page.next.is_none());
        assert!(page.items.is_empty());
    }

    #[test]
    fn non_advancing_cursor_is_a_protocol_violation() {
        let body = serde_json::json!({
            "_embedded": {"elements": [{"id": 1}]},
            "_links": {"nextByOffset": {"href": "/api/v3/users?offset=2"}}
        });
        let err = parse_page(&collection(true), &body, 2).expect_err("must fail");
        assert_eq!(err.kind, ToolErrorKind::Protocol);

        let body = serde_json::json!({
            "_embedded": {"elements": [{"id": 1}]},
            "_links": {"nextByOffset": {"href": "/api/v3/users?pageSize=2"}}
        });
        let err = parse_page(&collection(true), &body, 1).expect_err("must fail");
        assert_eq!(err.kind, ToolErrorKind::Protocol);
    }

    #[test]
    fn missing_elements_is_a_protocol_violation() {
        let body = serde_json::json!({"_type": "Collection", "total": 0});
        let err = parse_page(&collection(true), &body, 1).expect_err("must fail");
        assert_eq!(err.kind, ToolErrorKind::Protocol);
    }

    #[test]
    fn unpaginated_collection_must_not_signal_more() {
        let body = serde_json::json!({
            "_embedded": {"elements": [{"id": 1}]},
            "_links": {"nextByOffset": {"href": "/api/v3/groups?offset=2"}}
        });
        let err = parse_page(&collection(false), &body, 1).expect_err("must fail");
        assert_eq!(err.kind, ToolErrorKind::Protocol);
    }

    #[test]
    fn absolute_hrefs_are_understood() {
        assert_eq!(
            next_offset("https://op.example.com/api/v3/users?offset=4&pageSize=20"),
            Some(4)
        );
        assert_eq!(next_offset("/api/v3/users?offset=abc"), None);
    }
}
