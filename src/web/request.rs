//! Inbound request as seen by interceptors and handlers.

use crate::error::{ApiError, WebError};
use axum::body::Bytes;
use axum::extract::Query;
use axum::http::{header, HeaderMap, Method, Uri};
use axum_extra::extract::cookie::Cookie;
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    body: Bytes,
    params: Vec<(String, String)>,
}

impl Request {
    /// Build from transport parts. The path is percent-decoded; malformed
    /// query strings yield an empty query map.
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> Self {
        let path = percent_decode_str(uri.path()).decode_utf8_lossy().into_owned();
        let query = Query::<HashMap<String, String>>::try_from_uri(uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        let cookies = parse_cookies(&headers);
        Request {
            method,
            path,
            query,
            headers,
            cookies,
            body,
            params: Vec::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Decoded path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Captured path variable by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Captured path variables in pattern order.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params;
    }

    /// Decode the body as JSON. An empty or malformed body is an invalid `body` value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, WebError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            tracing::debug!(error = %e, "request body is not valid json");
            WebError::Api(ApiError::invalid_value("body").with_message(e.to_string()))
        })
    }

    /// Decode the body as a JSON object; an empty body is an empty object.
    pub fn json_object(&self) -> Result<Map<String, Value>, WebError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        self.json()
    }

    fn form_pairs(&self) -> Result<Vec<(String, String)>, WebError> {
        serde_urlencoded::from_bytes(&self.body).map_err(|e| {
            tracing::debug!(error = %e, "request body is not valid form data");
            WebError::Api(ApiError::invalid_value("body").with_message(e.to_string()))
        })
    }

    /// Decode an `application/x-www-form-urlencoded` body.
    pub fn form<T: DeserializeOwned>(&self) -> Result<T, WebError> {
        serde_urlencoded::from_bytes(&self.body).map_err(|e| {
            tracing::debug!(error = %e, "request body is not valid form data");
            WebError::Api(ApiError::invalid_value("body").with_message(e.to_string()))
        })
    }

    /// Every value submitted for `key`, in body order.
    pub fn form_values(&self, key: &str) -> Result<Vec<String>, WebError> {
        Ok(self
            .form_pairs()?
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect())
    }

    /// Form body as an object: a key sent once maps to a string, a repeated
    /// key to an array of strings.
    pub fn form_object(&self) -> Result<Map<String, Value>, WebError> {
        let mut map = Map::new();
        for (k, v) in self.form_pairs()? {
            match map.get_mut(&k) {
                Some(Value::Array(items)) => items.push(Value::String(v)),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(v)]);
                }
                None => {
                    map.insert(k, Value::String(v));
                }
            }
        }
        Ok(map)
    }

    /// Body fields for validation: form-encoded bodies by content type, JSON otherwise.
    pub fn input(&self) -> Result<Map<String, Value>, WebError> {
        let is_form = self
            .header(header::CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            self.form_object()
        } else {
            self.json_object()
        }
    }
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse_encoded)
        .filter_map(Result::ok)
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect()
}
