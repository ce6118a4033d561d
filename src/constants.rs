pub mod server {
    pub const PROTOCOL_VERSION: &str = "2025-06-18";
    pub const SERVER_NAME: &str = "openproject-api-proxy";
    pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
    pub const USER_AGENT: &str = concat!("opproxy/", env!("CARGO_PKG_VERSION"));
}

pub mod network {
    pub const TIMEOUT_API_REQUEST_MS: u64 = 30_000;
    pub const ACCEPT: &str = "application/hal+json, application/json";
}

pub mod retry {
    pub const MAX_ATTEMPTS: usize = 3;
    pub const BASE_DELAY_MS: u64 = 250;
    pub const MAX_DELAY_MS: u64 = 5_000;
    pub const JITTER: f64 = 0.2;
}

pub mod pagination {
    pub const FIRST_OFFSET: u64 = 1;
    pub const PAGE_SIZE: u64 = 20;
    pub const MAX_PAGES: usize = 50;
    pub const OFFSET_PARAM: &str = "offset";
    pub const PAGE_SIZE_PARAM: &str = "page_size";
}

pub mod limits {
    pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
    pub const ERROR_BODY_PREVIEW_BYTES: usize = 4 * 1024;
    pub const LOG_META_MAX_STRING_BYTES: usize = 512;
    pub const SEARCH_DEFAULT_LIMIT: usize = 25;
    pub const SEARCH_MAX_LIMIT: usize = 200;
    pub const SUGGESTION_LIMIT: usize = 5;
}

pub mod schema {
    pub const DB_TABLE: &str = "api_endpoints";
    pub const API_PREFIX: &str = "/api/v3";
}

pub mod env {
    pub const HOST: &str = "OPENPROJECT_HOST";
    pub const API_KEY: &str = "OPENPROJECT_API_KEY";
    pub const SCHEMA_DB: &str = "OPPROXY_SCHEMA_DB";
    pub const TIMEOUT_MS: &str = "OPPROXY_TIMEOUT_MS";
    pub const RETRY_MAX_ATTEMPTS: &str = "OPPROXY_RETRY_MAX_ATTEMPTS";
    pub const RETRY_BASE_DELAY_MS: &str = "OPPROXY_RETRY_BASE_DELAY_MS";
    pub const RETRY_MAX_DELAY_MS: &str = "OPPROXY_RETRY_MAX_DELAY_MS";
    pub const RETRY_JITTER: &str = "OPPROXY_RETRY_JITTER";
    pub const IDEMPOTENT_OPERATIONS: &str = "OPPROXY_IDEMPOTENT_OPERATIONS";
    pub const PAGE_SIZE: &str = "OPPROXY_PAGE_SIZE";
    pub const MAX_PAGES: &str = "OPPROXY_MAX_PAGES";
    pub const MAX_UPLOAD_BYTES: &str = "OPPROXY_MAX_UPLOAD_BYTES";
    pub const INSECURE_TLS: &str = "OPPROXY_INSECURE_TLS";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
}

pub mod protocols {
    pub const ALLOWED_HTTP: &[&str] = &["http:", "https:"];
}
