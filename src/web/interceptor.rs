//! Path-guarded middleware composed around the router.

use crate::error::RouteError;
use crate::web::router::Router;
use crate::web::{HandlerResult, RequestContext};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use regex::Regex;
use std::sync::Arc;

/// Middleware unit. Call `next.run(cx)` to continue, or return without it to short-circuit.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(&self, cx: &mut RequestContext, next: Next<'_>) -> HandlerResult;
}

/// Which request paths an interceptor applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathGuard {
    Prefix(String),
    Suffix(String),
}

impl PathGuard {
    /// `"/manage/"` or `"/manage/*"` guard by prefix, `"*.json"` by suffix.
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let invalid = || RouteError::InvalidInterceptorPattern(pattern.to_string());
        let starts_with = Regex::new(r"^([^*?]+)\*?$").map_err(|_| invalid())?;
        let ends_with = Regex::new(r"^\*([^*?]+)$").map_err(|_| invalid())?;
        if let Some(m) = starts_with.captures(pattern).and_then(|c| c.get(1)) {
            return Ok(PathGuard::Prefix(m.as_str().to_string()));
        }
        if let Some(m) = ends_with.captures(pattern).and_then(|c| c.get(1)) {
            return Ok(PathGuard::Suffix(m.as_str().to_string()));
        }
        Err(invalid())
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathGuard::Prefix(p) => path.starts_with(p.as_str()),
            PathGuard::Suffix(s) => path.ends_with(s.as_str()),
        }
    }
}

pub(crate) struct Guarded {
    pub(crate) guard: PathGuard,
    pub(crate) interceptor: Arc<dyn Interceptor>,
}

/// Remainder of the chain after the current interceptor.
pub struct Next<'c> {
    chain: &'c [Guarded],
    router: &'c Router,
}

impl<'c> Next<'c> {
    pub(crate) fn new(chain: &'c [Guarded], router: &'c Router) -> Self {
        Next { chain, router }
    }

    /// Run the remaining interceptors, then the router. Interceptors whose
    /// guard does not match the path are passed through.
    pub fn run<'a>(self, cx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult>
    where
        'c: 'a,
    {
        Box::pin(async move {
            let mut chain = self.chain;
            while let Some((first, rest)) = chain.split_first() {
                if first.guard.matches(cx.request.path()) {
                    let next = Next::new(rest, self.router);
                    return first.interceptor.intercept(cx, next).await;
                }
                chain = rest;
            }
            self.router.dispatch(cx).await
        })
    }
}
