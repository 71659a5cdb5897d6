//! Response head, body, and the values handlers return.

use crate::error::WebError;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum_extra::extract::cookie::Cookie;
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::io;
use time::OffsetDateTime;

pub const HTML_UTF8: &str = "text/html; charset=utf-8";
pub const JSON: &str = "application/json";
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Status and headers, mutable by interceptors and handlers while the request runs.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
}

impl Default for ResponseHead {
    fn default() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(HTML_UTF8));
        ResponseHead {
            status: StatusCode::OK,
            headers,
        }
    }
}

impl ResponseHead {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Replace a header. Values that are not valid header text are rejected.
    pub fn set_header(&mut self, name: HeaderName, value: &str) -> Result<(), WebError> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| WebError::Internal(format!("invalid value for header {}", name)))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    pub fn set_content_type(&mut self, value: &'static str) {
        self.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(value));
    }

    /// Append a `Set-Cookie` header. The value is percent-encoded.
    pub fn set_cookie(&mut self, name: &str, value: &str, options: &CookieOptions) -> Result<(), WebError> {
        let cookie = options.render(name, value, Utc::now());
        let value = HeaderValue::from_str(&cookie)
            .map_err(|_| WebError::Internal(format!("invalid cookie {}", name)))?;
        self.headers.append(header::SET_COOKIE, value);
        Ok(())
    }

    /// Expire a cookie on the client.
    pub fn delete_cookie(&mut self, name: &str) -> Result<(), WebError> {
        let options = CookieOptions {
            max_age: Some(0),
            expires: DateTime::from_timestamp(0, 0),
            ..CookieOptions::default()
        };
        self.set_cookie(name, "deleted", &options)
    }
}

/// Attributes of a `Set-Cookie` header.
#[derive(Clone, Debug)]
pub struct CookieOptions {
    /// Seconds; also emitted as `Expires` when `expires` is unset.
    pub max_age: Option<i64>,
    pub expires: Option<DateTime<Utc>>,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        CookieOptions {
            max_age: None,
            expires: None,
            path: "/".into(),
            domain: None,
            secure: false,
            http_only: true,
        }
    }
}

impl CookieOptions {
    fn render(&self, name: &str, value: &str, now: DateTime<Utc>) -> String {
        let mut cookie = Cookie::build((name.to_string(), value.to_string()))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only);
        if let Some(domain) = &self.domain {
            cookie = cookie.domain(domain.clone());
        }
        if let Some(secs) = self.max_age {
            cookie = cookie.max_age(time::Duration::seconds(secs));
        }
        let expires = self
            .expires
            .or_else(|| self.max_age.map(|secs| now + Duration::seconds(secs)))
            .and_then(|at| OffsetDateTime::from_unix_timestamp(at.timestamp()).ok());
        if let Some(at) = expires {
            cookie = cookie.expires(at);
        }
        cookie.build().encoded().to_string()
    }
}

/// Lazy sequence of body chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

pub enum Body {
    Empty,
    Full(Bytes),
    Stream(ByteStream),
}

impl Body {
    /// Drain the body into one buffer.
    pub async fn collect(self) -> io::Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(b) => Ok(b),
            Body::Stream(mut s) => {
                let mut buf = Vec::new();
                while let Some(chunk) = s.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Full(b) => write!(f, "Full({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Serialized result of one request.
#[derive(Debug)]
pub struct Response {
    pub head: ResponseHead,
    pub body: Body,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.head.status()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }
}

/// What a handler hands back to the dispatcher.
pub enum Reply {
    /// Rendered by the template engine.
    Template { name: String, model: Value },
    /// Encoded as `application/json`.
    Json(Value),
    /// Sent as-is with the current content type.
    Bytes(Bytes),
    Stream(ByteStream),
    Empty,
}

impl Reply {
    pub fn template(name: impl Into<String>, model: Value) -> Self {
        Reply::Template {
            name: name.into(),
            model,
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, WebError> {
        serde_json::to_value(value)
            .map(Reply::Json)
            .map_err(|e| WebError::Internal(format!("encode reply: {}", e)))
    }

    pub fn text(body: impl Into<String>) -> Self {
        Reply::Bytes(Bytes::from(body.into()))
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Template { name, .. } => write!(f, "Template({})", name),
            Reply::Json(v) => write!(f, "Json({})", v),
            Reply::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Reply::Stream(_) => f.write_str("Stream"),
            Reply::Empty => f.write_str("Empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures_util::stream;

    #[test]
    fn default_head_is_html() {
        let head = ResponseHead::default();
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(head.content_type(), Some(HTML_UTF8));
    }

    fn attributes(rendered: &str) -> Vec<String> {
        let mut parts: Vec<String> = rendered.split("; ").map(str::to_string).collect();
        parts.sort();
        parts
    }

    #[test]
    fn cookie_attributes() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let options = CookieOptions {
            max_age: Some(86400),
            domain: Some("example.com".into()),
            secure: true,
            ..CookieOptions::default()
        };
        let rendered = options.render("awesession", "u1 x", now);
        assert!(rendered.starts_with("awesession=u1%20x; "), "{}", rendered);
        assert_eq!(
            attributes(&rendered),
            vec![
                "Domain=example.com",
                "Expires=Sat, 02 Mar 2024 12:00:00 GMT",
                "HttpOnly",
                "Max-Age=86400",
                "Path=/",
                "Secure",
                "awesession=u1%20x",
            ]
        );
    }

    #[test]
    fn cookies_accumulate_and_delete_expires() {
        let mut head = ResponseHead::default();
        head.set_cookie("a", "1", &CookieOptions::default()).unwrap();
        head.delete_cookie("b").unwrap();
        let cookies: Vec<_> = head
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(attributes(&cookies[0]), vec!["HttpOnly", "Path=/", "a=1"]);
        assert_eq!(
            attributes(&cookies[1]),
            vec![
                "Expires=Thu, 01 Jan 1970 00:00:00 GMT",
                "HttpOnly",
                "Max-Age=0",
                "Path=/",
                "b=deleted",
            ]
        );
    }

    #[tokio::test]
    async fn stream_body_collects_in_order() {
        let chunks = vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let body = Body::Stream(stream::iter(chunks).boxed());
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"abcd"));
    }
}
