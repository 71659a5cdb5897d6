//! Typed errors and their mapping onto responses.

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Invalid table description, raised while a mapping is built or a statement generated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("primary key not defined for table {table}")]
    NoPrimaryKey { table: String },
    #[error("table {table} defines more than one primary key ({first}, {second})")]
    DuplicatePrimaryKey {
        table: String,
        first: String,
        second: String,
    },
    #[error("table {table} declares field {field} twice")]
    DuplicateField { table: String, field: String },
    #[error("no value for field {field} of table {table}")]
    MissingValue { table: String, field: String },
    #[error("table {table} has no updatable field")]
    NoUpdatableFields { table: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("no open database connection")]
    NoConnection,
    #[error("expected exactly one column, found {found}")]
    MultiColumn { found: usize },
    #[error("aggregate query returned no row")]
    EmptyResult,
    #[error("entity of table {table} has no primary key value")]
    MissingPrimaryKey { table: String },
    #[error("database: {0}")]
    Driver(#[from] sqlx::Error),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("row codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl DbError {
    /// Stable name reported to clients in place of the error details.
    pub fn kind(&self) -> &'static str {
        match self {
            DbError::NoConnection => "ConnectionError",
            DbError::MultiColumn { .. } => "MultiColumnError",
            DbError::EmptyResult => "EmptyResultError",
            DbError::MissingPrimaryKey { .. } => "MissingPrimaryKeyError",
            DbError::Driver(_) => "DatabaseError",
            DbError::Mapping(_) => "MappingError",
            DbError::Codec(_) => "CodecError",
        }
    }
}

/// Application-declared failure, serialized as `{"error", "data", "message"}`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{error}: {data}")]
pub struct ApiError {
    pub error: String,
    pub data: String,
    pub message: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, data: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError {
            error: error.into(),
            data: data.into(),
            message: message.into(),
        }
    }

    pub fn invalid_value(field: impl Into<String>) -> Self {
        ApiError::new("value:invalid", field, "")
    }

    pub fn not_found(field: impl Into<String>) -> Self {
        ApiError::new("value:notfound", field, "")
    }

    pub fn permission(message: impl Into<String>) -> Self {
        ApiError::new("permission:forbidden", "permission", message)
    }

    pub fn conflict(field: impl Into<String>) -> Self {
        ApiError::new("value:conflict", field, "")
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Status used when the error escapes a non-API route.
    pub fn status(&self) -> StatusCode {
        match self.error.as_str() {
            "value:invalid" => StatusCode::BAD_REQUEST,
            "value:notfound" => StatusCode::NOT_FOUND,
            "permission:forbidden" => StatusCode::FORBIDDEN,
            "value:conflict" => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Error, Debug)]
#[error("template {name}: {reason}")]
pub struct TemplateError {
    pub name: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum WebError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("http status {0}")]
    Status(StatusCode),
    #[error("redirect {status} to {location}")]
    Redirect { status: StatusCode, location: String },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("internal: {0}")]
    Internal(String),
}

impl WebError {
    pub fn bad_request() -> Self {
        WebError::Status(StatusCode::BAD_REQUEST)
    }

    pub fn unauthorized() -> Self {
        WebError::Status(StatusCode::UNAUTHORIZED)
    }

    pub fn forbidden() -> Self {
        WebError::Status(StatusCode::FORBIDDEN)
    }

    pub fn not_found() -> Self {
        WebError::Status(StatusCode::NOT_FOUND)
    }

    pub fn conflict() -> Self {
        WebError::Status(StatusCode::CONFLICT)
    }

    pub fn internal_error() -> Self {
        WebError::Status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// 301 Moved Permanently.
    pub fn redirect(location: impl Into<String>) -> Self {
        WebError::Redirect {
            status: StatusCode::MOVED_PERMANENTLY,
            location: location.into(),
        }
    }

    /// 302 Found.
    pub fn found(location: impl Into<String>) -> Self {
        WebError::Redirect {
            status: StatusCode::FOUND,
            location: location.into(),
        }
    }

    /// 303 See Other.
    pub fn see_other(location: impl Into<String>) -> Self {
        WebError::Redirect {
            status: StatusCode::SEE_OTHER,
            location: location.into(),
        }
    }

    /// True for redirects and plain status signals, which are control flow rather than failures.
    pub fn is_signal(&self) -> bool {
        matches!(self, WebError::Status(_) | WebError::Redirect { .. })
    }

    /// Kind name exposed in the internal-error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            WebError::Api(_) => "ApiError",
            WebError::Status(_) => "HttpError",
            WebError::Redirect { .. } => "RedirectError",
            WebError::Db(e) => e.kind(),
            WebError::Template(_) => "TemplateError",
            WebError::Internal(_) => "InternalError",
        }
    }
}

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("method {0} is not routable (expected GET or POST)")]
    UnsupportedMethod(String),
    #[error("invalid route pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid interceptor pattern {0} (expected \"/prefix\" or \"*suffix\")")]
    InvalidInterceptorPattern(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load: {0}")]
    Load(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn envelope_serializes_three_fields() {
        let e = ApiError::invalid_value("email").with_message("bad address");
        assert_eq!(
            serde_json::to_value(&e).unwrap(),
            serde_json::json!({"error": "value:invalid", "data": "email", "message": "bad address"})
        );
        assert_eq!(ApiError::conflict("name").error, "value:conflict");
    }

    #[test]
    fn api_error_status_on_plain_routes() {
        assert_eq!(ApiError::invalid_value("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::permission("no").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::new("custom", "x", "").status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn signals_and_kinds() {
        assert!(WebError::not_found().is_signal());
        assert!(WebError::found("/signin").is_signal());
        assert!(!WebError::from(ApiError::not_found("blog")).is_signal());
        assert_eq!(WebError::from(DbError::MultiColumn { found: 2 }).kind(), "MultiColumnError");
        assert_eq!(WebError::Internal("boom".into()).kind(), "InternalError");
    }
}
