//! Request-scoped context and the handler seam.

use crate::db::DbContext;
use crate::error::WebError;
use crate::web::{Reply, Request, ResponseHead};
use async_trait::async_trait;
use axum::http::Extensions;
use futures_util::future::BoxFuture;

/// Everything one request owns: the inbound request, the response head being
/// built, its database context and values passed between interceptors and handlers.
pub struct RequestContext {
    pub request: Request,
    pub response: ResponseHead,
    pub db: DbContext,
    extensions: Extensions,
}

impl RequestContext {
    pub fn new(request: Request, db: DbContext) -> Self {
        RequestContext {
            request,
            response: ResponseHead::default(),
            db,
            extensions: Extensions::new(),
        }
    }

    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }
}

pub type HandlerResult = Result<Reply, WebError>;

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult;
}

/// Adapts a function returning a boxed future into a [`Handler`]:
/// `handler_fn(|cx| Box::pin(list_blogs(cx)))`.
pub struct HandlerFn<F>(F);

pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
        (self.0)(cx).await
    }
}
