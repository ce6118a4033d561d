use crate::constants::protocols::ALLOWED_HTTP;
use crate::errors::InitError;
use crate::services::config::Config;
use base64::Engine;
use reqwest::header::HeaderValue;
use std::fmt;
use url::Url;

/// Static backend credential. Validated once; never fails per request.
#[derive(Clone)]
pub struct CredentialProvider {
    base_url: Url,
    auth_header: HeaderValue,
    secret: String,
}

impl fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("base_url", &self.base_url.as_str())
            .field("auth_header", &"Basic [REDACTED]")
            .finish()
    }
}

impl CredentialProvider {
    pub fn from_config(config: &Config) -> Result<Self, InitError> {
        Self::new(&config.host, &config.api_key)
    }

    pub fn new(host: &str, api_key: &str) -> Result<Self, InitError> {
        let base_url = normalize_host(host)?;
        let encoded = encode_api_key(api_key)?;
        let mut auth_header = HeaderValue::from_str(&format!("Basic {}", encoded))
            .map_err(|_| InitError::InvalidApiKey("not a valid header value".to_string()))?;
        auth_header.set_sensitive(true);
        Ok(Self {
            base_url,
            auth_header,
            secret: encoded,
        })
    }

    pub fn auth_header(&self) -> &HeaderValue {
        &self.auth_header
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Literal secret material, for redaction of echoed bodies.
    pub fn secrets(&self) -> Vec<String> {
        vec![self.secret.clone()]
    }
}

fn normalize_host(raw: &str) -> Result<Url, InitError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(InitError::InvalidHost("host is empty".to_string()));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|err| InitError::InvalidHost(format!("{} ({})", trimmed, err)))?;
    let scheme = format!("{}:", url.scheme());
    if !ALLOWED_HTTP.contains(&scheme.as_str()) {
        return Err(InitError::InvalidHost(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(InitError::InvalidHost(format!("{} has no host", trimmed)));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(InitError::InvalidHost(
            "host must not carry a query or fragment".to_string(),
        ));
    }
    Ok(url)
}

/// Accepts the base64 `apikey:<token>` pair, optionally prefixed with
/// `Basic `, a plain `user:secret` pair, or a bare alphanumeric token.
fn encode_api_key(raw: &str) -> Result<String, InitError> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut key = raw.trim();
    if key
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("basic "))
    {
        key = key[6..].trim();
    }
    if key.is_empty() {
        return Err(InitError::InvalidApiKey("key is empty".to_string()));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(InitError::InvalidApiKey("key contains whitespace".to_string()));
    }
    if key.contains(':') {
        return Ok(engine.encode(key));
    }
    if let Ok(decoded) = engine.decode(key) {
        if let Ok(text) = String::from_utf8(decoded) {
            if text.contains(':') && !text.starts_with(':') {
                return Ok(key.to_string());
            }
        }
    }
    if key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Ok(engine.encode(format!("apikey:{}", key)));
    }
    Err(InitError::InvalidApiKey(
        "expected base64 'apikey:<token>', 'user:secret' or a bare token".to_string(),
    ))
}
