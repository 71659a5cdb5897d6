//! Trestle: a small web substrate with a router, path-guarded interceptors and
//! per-request database contexts with nested transactions over PostgreSQL.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod page;
pub mod service;
pub mod sql;
pub mod web;

pub use config::{load as load_settings, DbSettings, ServerSettings, Settings};
pub use db::{postgres, DbContext, Engine};
pub use error::{ApiError, ConfigError, DbError, MappingError, RouteError, TemplateError, WebError};
pub use model::{next_id, FieldSpec, Model, TableMapping};
pub use page::Page;
pub use service::{Repository, RequestValidator, ValidationRule};
pub use web::{handler_fn, into_router, App, AppBuilder, Interceptor, Next, Reply, Request, RequestContext};
