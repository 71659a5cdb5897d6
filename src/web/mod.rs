//! Request dispatch: router, interceptor chain, dispatcher lifecycle and the axum transport.

mod app;
mod handler;
mod interceptor;
mod request;
mod response;
mod router;
mod static_files;
mod template;
mod transport;

pub use app::{App, AppBuilder};
pub use handler::{handler_fn, Handler, HandlerFn, HandlerResult, RequestContext};
pub use interceptor::{Interceptor, Next, PathGuard};
pub use request::Request;
pub use response::{Body, ByteStream, CookieOptions, Reply, Response, ResponseHead, HTML_UTF8, JSON, TEXT_PLAIN};
pub use router::{RouteKind, Router};
pub use static_files::{content_type_for, file_chunks, StaticFiles, CHUNK_SIZE};
pub use template::TemplateEngine;
pub use transport::into_router;
