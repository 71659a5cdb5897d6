//! Request body validation from per-field rules.

use crate::error::{ApiError, RouteError};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Same shape the blog sign-up form has always accepted.
const EMAIL_PATTERN: &str = r"^[a-z0-9._-]+@[a-z0-9_-]+(\.[a-z0-9_-]+){1,4}$";

fn is_email(s: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(s))
}

/// Constraints on one body field. Strings are trimmed before length checks.
#[derive(Clone, Debug, Default)]
pub struct ValidationRule {
    required: bool,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
    email: bool,
    allowed: Option<Vec<Value>>,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

impl ValidationRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Present, not null and, for strings, not blank.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Result<Self, RouteError> {
        let re = Regex::new(pattern).map_err(|e| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.pattern = Some(re);
        Ok(self)
    }

    pub fn email(mut self) -> Self {
        self.email = true;
        self
    }

    pub fn allowed(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(values.into_iter().collect());
        self
    }

    pub fn minimum(mut self, n: f64) -> Self {
        self.minimum = Some(n);
        self
    }

    pub fn maximum(mut self, n: f64) -> Self {
        self.maximum = Some(n);
        self
    }

    fn check(&self, v: &Value) -> bool {
        if let Some(s) = v.as_str() {
            let s = s.trim();
            let len = s.chars().count();
            if self.min_length.is_some_and(|min| len < min) || self.max_length.is_some_and(|max| len > max) {
                return false;
            }
            if self.pattern.as_ref().is_some_and(|re| !re.is_match(s)) {
                return false;
            }
            if self.email && !is_email(s) {
                return false;
            }
        } else if self.email || self.pattern.is_some() {
            return false;
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|a| value_eq(v, a)) {
                return false;
            }
        }
        // form bodies carry numbers as text
        let number = v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()));
        if let Some(n) = number {
            if self.minimum.is_some_and(|min| n < min) || self.maximum.is_some_and(|max| n > max) {
                return false;
            }
        }
        true
    }
}

/// Ordered field rules; the first failing field is reported.
#[derive(Clone, Debug, Default)]
pub struct RequestValidator {
    rules: Vec<(String, ValidationRule)>,
}

impl RequestValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rule: ValidationRule) -> Self {
        self.rules.push((name.into(), rule));
        self
    }

    /// Validate a full body: required fields must be present and non-blank.
    pub fn validate(&self, body: &Map<String, Value>) -> Result<(), ApiError> {
        for (name, rule) in &self.rules {
            let v = body.get(name).filter(|v| !v.is_null());
            match v {
                None if rule.required => return Err(ApiError::invalid_value(name)),
                None => {}
                Some(v) => {
                    if rule.required && is_blank(v) {
                        return Err(ApiError::invalid_value(name));
                    }
                    if !rule.check(v) {
                        return Err(ApiError::invalid_value(name));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body; missing required fields are not reported.
    pub fn validate_partial(&self, body: &Map<String, Value>) -> Result<(), ApiError> {
        for (name, rule) in &self.rules {
            let Some(v) = body.get(name).filter(|v| !v.is_null()) else {
                continue;
            };
            if (rule.required && is_blank(v)) || !rule.check(v) {
                return Err(ApiError::invalid_value(name));
            }
        }
        Ok(())
    }
}

fn is_blank(v: &Value) -> bool {
    v.as_str().is_some_and(|s| s.trim().is_empty())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}
