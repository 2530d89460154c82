use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, HeaderValue, InvalidHeaderValue, ACCEPT_ENCODING, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, USER_AGENT,
};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use super::headers::format_http_date;

/// User-Agent sent when the options do not name one.
pub const DEFAULT_USER_AGENT: &str = concat!("feedpipe/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of requests in flight per batch by default.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Redirects followed by default.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Credentials for HTTP basic authentication.
pub struct BasicAuth {
    pub username: String,
    pub password: SecretString,
}

impl Clone for BasicAuth {
    fn clone(&self) -> Self {
        Self {
            username: self.username.clone(),
            password: SecretString::from(self.password.expose_secret().to_owned()),
        }
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Options applied to every request of a fetch or update call.
///
/// Header-level options (`user_agent`, `if_modified_since`, `if_none_match`,
/// `compress`) become request headers. The rest are handed to the transport:
/// `timeout` bounds each request from send to last body byte, `basic_auth`
/// is attached per request, and `max_redirects`/`cookies` configure the
/// HTTP client the batch runs on.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub user_agent: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_none_match: Option<String>,
    /// Ask for `gzip, deflate` transfer compression
    pub compress: bool,
    pub timeout: Duration,
    pub max_redirects: usize,
    /// Keep a cookie store across the redirects and requests of a client
    pub cookies: bool,
    pub basic_auth: Option<BasicAuth>,
    pub max_concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: None,
            if_modified_since: None,
            if_none_match: None,
            compress: false,
            timeout: DEFAULT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            cookies: false,
            basic_auth: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl FetchOptions {
    /// Same options, with conditional headers taken from a previous fetch
    /// wherever these options leave them unset.
    pub fn conditional_on(
        &self,
        etag: Option<&str>,
        last_modified: Option<DateTime<Utc>>,
    ) -> FetchOptions {
        let mut options = self.clone();
        if options.if_none_match.is_none() {
            options.if_none_match = etag.map(str::to_string);
        }
        if options.if_modified_since.is_none() {
            options.if_modified_since = last_modified;
        }
        options
    }
}

/// Builds the request headers for one request.
///
/// `User-Agent` is always present; conditional and compression headers only
/// when the corresponding option is set.
pub fn request_headers(options: &FetchOptions) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    let agent = options.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    headers.insert(USER_AGENT, HeaderValue::from_str(agent)?);

    if let Some(since) = options.if_modified_since {
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_str(&format_http_date(since))?,
        );
    }
    if let Some(etag) = &options.if_none_match {
        headers.insert(IF_NONE_MATCH, HeaderValue::from_str(etag)?);
    }
    if options.compress {
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn header<'a>(headers: &'a HeaderMap, name: reqwest::header::HeaderName) -> Option<&'a str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn test_default_options_only_send_user_agent() {
        let headers = request_headers(&FetchOptions::default()).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(header(&headers, USER_AGENT), Some(DEFAULT_USER_AGENT));
    }

    #[test]
    fn test_all_header_options() {
        let options = FetchOptions {
            user_agent: Some("custom/1.0".into()),
            if_modified_since: Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap()),
            if_none_match: Some("\"abc123\"".into()),
            compress: true,
            ..Default::default()
        };
        let headers = request_headers(&options).unwrap();

        assert_eq!(header(&headers, USER_AGENT), Some("custom/1.0"));
        assert_eq!(
            header(&headers, IF_MODIFIED_SINCE),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
        assert_eq!(header(&headers, IF_NONE_MATCH), Some("\"abc123\""));
        assert_eq!(header(&headers, ACCEPT_ENCODING), Some("gzip, deflate"));
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let options = FetchOptions {
            if_none_match: Some("bad\nvalue".into()),
            ..Default::default()
        };
        assert!(request_headers(&options).is_err());
    }

    #[test]
    fn test_conditional_on_fills_only_unset_values() {
        let stamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let options = FetchOptions::default().conditional_on(Some("\"v1\""), Some(stamp));
        assert_eq!(options.if_none_match.as_deref(), Some("\"v1\""));
        assert_eq!(options.if_modified_since, Some(stamp));

        let explicit = FetchOptions {
            if_none_match: Some("\"mine\"".into()),
            ..Default::default()
        };
        let options = explicit.conditional_on(Some("\"v1\""), None);
        assert_eq!(options.if_none_match.as_deref(), Some("\"mine\""));
        assert_eq!(options.if_modified_since, None);
    }

    #[test]
    fn test_basic_auth_debug_masks_password() {
        let auth = BasicAuth {
            username: "reader".into(),
            password: SecretString::from("hunter2".to_string()),
        };
        let debug = format!("{:?}", auth);
        assert!(debug.contains("reader"));
        assert!(!debug.contains("hunter2"));
    }
}
