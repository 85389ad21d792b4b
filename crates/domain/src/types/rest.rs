//! REST request and response shapes exchanged with the transport port

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ratelimit::{RateLimitHeaders, RateLimitedBody};
use crate::constants::AUDIT_LOG_REASON_HEADER;
use crate::errors::{ConduitError, Result};

/// HTTP verbs used by the REST surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Uppercase verb as it appears on the wire
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a rate-limited route: endpoint template plus the optional
/// major parameter (channel, guild or webhook id)
///
/// Two keys with the same template but different majors are throttled
/// independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    template: Arc<str>,
    major: Option<Arc<str>>,
}

impl RouteKey {
    /// Key for a template without a major parameter
    pub fn new(template: impl AsRef<str>) -> Self {
        Self { template: Arc::from(template.as_ref()), major: None }
    }

    /// Key for a template scoped by a major parameter
    pub fn with_major(template: impl AsRef<str>, major: impl AsRef<str>) -> Self {
        Self { template: Arc::from(template.as_ref()), major: Some(Arc::from(major.as_ref())) }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn major(&self) -> Option<&str> {
        self.major.as_deref()
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.major {
            Some(major) => write!(f, "{} [{major}]", self.template),
            None => f.write_str(&self.template),
        }
    }
}

/// A fully described outbound REST call
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: HttpMethod,
    pub route: RouteKey,
    /// Concrete path relative to the API base, e.g. `/channels/42/messages`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl RestRequest {
    pub fn new(method: HttpMethod, route: RouteKey, path: impl Into<String>) -> Self {
        Self {
            method,
            route,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize a typed body
    ///
    /// # Errors
    /// Returns `ConduitError::InvalidRequest` if the body cannot be
    /// represented as JSON.
    pub fn json_body<B: Serialize + ?Sized>(self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|err| ConduitError::InvalidRequest(format!("request body: {err}")))?;
        Ok(self.json(value))
    }

    /// Attach an audit-log reason, percent-encoded as the service expects
    #[must_use]
    pub fn audit_log_reason(self, reason: &str) -> Self {
        let encoded: String = url::form_urlencoded::byte_serialize(reason.as_bytes()).collect();
        self.header(AUDIT_LOG_REASON_HEADER, encoded.replace('+', "%20"))
    }

    /// Set a header, replacing any existing value with the same
    /// case-insensitive name
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Value of a header by case-insensitive name
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Raw transport response with rate-limit metadata already extracted
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestResponse {
    pub status: u16,
    pub rate_limit: Option<RateLimitHeaders>,
    pub retry_after: Option<Duration>,
    pub body: Vec<u8>,
}

impl RestResponse {
    pub fn new(status: u16) -> Self {
        Self { status, ..Self::default() }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, headers: RateLimitHeaders) -> Self {
        self.rate_limit = Some(headers);
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub const fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    pub const fn is_server_error(&self) -> bool {
        self.status >= 500 && self.status < 600
    }

    /// Whether this 429 applies to every route rather than one bucket
    pub fn is_global_limit(&self) -> bool {
        self.rate_limit.as_ref().is_some_and(|headers| headers.global)
    }

    /// Fill in what a 429 body reports but its headers left out
    ///
    /// The `Retry-After` header wins when both are present; a body flagged
    /// `global` marks the limit global.
    #[must_use]
    pub fn merge_rate_limit_body(mut self) -> Self {
        if !self.is_rate_limited() {
            return self;
        }
        let Ok(body) = serde_json::from_slice::<RateLimitedBody>(&self.body) else {
            return self;
        };
        self.retry_after = self.retry_after.or(Some(body.retry_after));
        if body.global {
            self.rate_limit.get_or_insert_with(RateLimitHeaders::default).global = true;
        }
        self
    }
}

/// Successful pipeline outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission<T> {
    Value(T),
    NoContent,
}

impl<T> Submission<T> {
    /// The decoded value, if the response had a body
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::NoContent => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_keys_differ_by_major() {
        let a = RouteKey::with_major("POST /channels/{channel_id}/messages", "1");
        let b = RouteKey::with_major("POST /channels/{channel_id}/messages", "2");
        assert_ne!(a, b);
        assert_eq!(a.template(), b.template());
        assert_eq!(a.to_string(), "POST /channels/{channel_id}/messages [1]");
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut request =
            RestRequest::new(HttpMethod::Get, RouteKey::new("GET /gateway"), "/gateway")
                .header("authorization", "Bot old");
        request.set_header("Authorization", "Bot new");

        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header_value("AUTHORIZATION"), Some("Bot new"));
    }

    #[test]
    fn rate_limit_body_fills_missing_retry_after_and_global_flag() {
        let response = RestResponse::new(429)
            .with_body(r#"{"message":"You are being rate limited.","retry_after":1.5,"global":true}"#)
            .merge_rate_limit_body();

        assert_eq!(response.retry_after, Some(Duration::from_millis(1_500)));
        assert!(response.is_global_limit());
    }

    #[test]
    fn retry_after_header_wins_over_body() {
        let response = RestResponse::new(429)
            .with_retry_after(Duration::from_secs(2))
            .with_body(r#"{"retry_after":0.5,"global":false}"#)
            .merge_rate_limit_body();

        assert_eq!(response.retry_after, Some(Duration::from_secs(2)));
        assert!(!response.is_global_limit());
    }

    #[test]
    fn non_429_bodies_are_left_alone() {
        let response = RestResponse::new(200).with_body(r#"{"retry_after":3}"#).merge_rate_limit_body();
        assert_eq!(response.retry_after, None);
    }

    #[test]
    fn audit_log_reason_is_percent_encoded() {
        let request = RestRequest::new(
            HttpMethod::Delete,
            RouteKey::with_major("DELETE /channels/{channel_id}", "9"),
            "/channels/9",
        )
        .audit_log_reason("spam & abuse");

        assert_eq!(request.header_value("x-audit-log-reason"), Some("spam%20%26%20abuse"));
    }

    #[test]
    fn unserializable_body_is_invalid_request() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], "non-string key");

        let err = RestRequest::new(HttpMethod::Post, RouteKey::new("POST /x"), "/x")
            .json_body(&map)
            .expect_err("map keys must be strings");
        assert!(matches!(err, ConduitError::InvalidRequest(_)));
    }

    #[test]
    fn response_status_classes() {
        assert!(RestResponse::new(204).is_success());
        assert!(RestResponse::new(429).is_rate_limited());
        assert!(RestResponse::new(502).is_server_error());
        assert!(!RestResponse::new(404).is_server_error());
    }
}
