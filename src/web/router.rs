//! GET/POST route tables: exact-match paths first, then `:name` patterns in
//! registration order.

use crate::error::{RouteError, WebError};
use crate::web::{Handler, HandlerResult, Reply, RequestContext};
use axum::http::Method;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// How a handler's result is turned into a reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteKind {
    /// Reply passed through unchanged.
    Route,
    /// Handler returns a JSON object, rendered with this template.
    View(String),
    /// Handler returns JSON; errors become `{"error", "data", "message"}` envelopes.
    Api,
}

pub(crate) struct Endpoint {
    pattern: String,
    kind: RouteKind,
    handler: Arc<dyn Handler>,
}

impl Endpoint {
    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    async fn invoke(&self, cx: &mut RequestContext) -> HandlerResult {
        let result = self.handler.call(cx).await;
        match &self.kind {
            RouteKind::Route => result,
            RouteKind::View(template) => match result? {
                Reply::Json(model) if model.is_object() => Ok(Reply::template(template.clone(), model)),
                reply @ Reply::Template { .. } => Ok(reply),
                other => Err(WebError::Internal(format!(
                    "view {} expects an object model, got {:?}",
                    self.pattern, other
                ))),
            },
            RouteKind::Api => match result {
                Ok(reply) => Ok(reply),
                Err(e) if e.is_signal() => Err(e),
                Err(WebError::Api(e)) => {
                    tracing::debug!(route = %self.pattern, error = %e.error, data = %e.data, "api error");
                    Reply::json(&e)
                }
                Err(e) => {
                    tracing::error!(route = %self.pattern, kind = e.kind(), error = %e, "api handler failed");
                    Ok(Reply::Json(json!({"error": "internalerror", "data": e.kind(), "message": ""})))
                }
            },
        }
    }
}

struct DynamicRoute {
    matcher: Regex,
    names: Vec<String>,
    endpoint: Endpoint,
}

impl DynamicRoute {
    fn captures(&self, path: &str) -> Option<Vec<(String, String)>> {
        let caps = self.matcher.captures(path)?;
        Some(
            self.names
                .iter()
                .map(|name| {
                    let v = caps.name(name).map_or("", |m| m.as_str());
                    (name.clone(), v.to_string())
                })
                .collect(),
        )
    }
}

#[derive(Default)]
struct MethodTable {
    exact: HashMap<String, Endpoint>,
    dynamic: Vec<DynamicRoute>,
}

fn variable_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":([a-zA-Z_]\w*)").ok()).as_ref()
}

fn invalid(pattern: &str, reason: impl ToString) -> RouteError {
    RouteError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

/// Compile `/blog/:id/comments` into `^/blog/(?P<id>[^/]+)/comments$`.
/// Returns `None` for patterns without variables.
fn compile(pattern: &str) -> Result<Option<(Regex, Vec<String>)>, RouteError> {
    let vars = variable_regex().ok_or_else(|| invalid(pattern, "variable matcher unavailable"))?;
    let mut source = String::from("^");
    let mut names = Vec::new();
    let mut last = 0;
    for cap in vars.captures_iter(pattern) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        source.push_str(&regex::escape(&pattern[last..whole.start()]));
        source.push_str(&format!("(?P<{}>[^/]+)", name.as_str()));
        names.push(name.as_str().to_string());
        last = whole.end();
    }
    if names.is_empty() {
        return Ok(None);
    }
    source.push_str(&regex::escape(&pattern[last..]));
    source.push('$');
    let matcher = Regex::new(&source).map_err(|e| invalid(pattern, e))?;
    Ok(Some((matcher, names)))
}

/// Resolved endpoint plus captured path variables in pattern order.
pub(crate) struct Resolved<'r> {
    pub(crate) endpoint: &'r Endpoint,
    pub(crate) params: Vec<(String, String)>,
}

#[derive(Default)]
pub struct Router {
    get: MethodTable,
    post: MethodTable,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    fn table_mut(&mut self, method: &Method) -> Result<&mut MethodTable, RouteError> {
        match *method {
            Method::GET => Ok(&mut self.get),
            Method::POST => Ok(&mut self.post),
            _ => Err(RouteError::UnsupportedMethod(method.to_string())),
        }
    }

    fn table(&self, method: &Method) -> Option<&MethodTable> {
        match *method {
            Method::GET => Some(&self.get),
            Method::POST => Some(&self.post),
            _ => None,
        }
    }

    pub fn add(
        &mut self,
        method: &Method,
        pattern: &str,
        kind: RouteKind,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RouteError> {
        if !pattern.starts_with('/') {
            return Err(invalid(pattern, "must start with '/'"));
        }
        let endpoint = Endpoint {
            pattern: pattern.to_string(),
            kind,
            handler,
        };
        let compiled = compile(pattern)?;
        let table = self.table_mut(method)?;
        match compiled {
            None => {
                tracing::info!(%method, pattern, "add static route");
                table.exact.insert(pattern.to_string(), endpoint);
            }
            Some((matcher, names)) => {
                tracing::info!(%method, pattern, "add dynamic route");
                table.dynamic.push(DynamicRoute {
                    matcher,
                    names,
                    endpoint,
                });
            }
        }
        Ok(())
    }

    /// Route every GET path under `prefix` to `handler`, with the remainder
    /// (which may contain `/`) captured as `name`. Checked after all other dynamic routes.
    pub(crate) fn add_tail(&mut self, prefix: &str, name: &str, handler: Arc<dyn Handler>) -> Result<(), RouteError> {
        let source = format!("^{}(?P<{}>.+)$", regex::escape(prefix), name);
        let matcher = Regex::new(&source).map_err(|e| invalid(prefix, e))?;
        tracing::info!(prefix, "add prefix route");
        self.get.dynamic.push(DynamicRoute {
            matcher,
            names: vec![name.to_string()],
            endpoint: Endpoint {
                pattern: format!("{}*", prefix),
                kind: RouteKind::Route,
                handler,
            },
        });
        Ok(())
    }

    /// Methods other than GET and POST are a bad request; unmatched paths are not found.
    pub(crate) fn resolve(&self, method: &Method, path: &str) -> Result<Resolved<'_>, WebError> {
        let table = self.table(method).ok_or_else(WebError::bad_request)?;
        if let Some(endpoint) = table.exact.get(path) {
            return Ok(Resolved {
                endpoint,
                params: Vec::new(),
            });
        }
        table
            .dynamic
            .iter()
            .find_map(|route| {
                route.captures(path).map(|params| Resolved {
                    endpoint: &route.endpoint,
                    params,
                })
            })
            .ok_or_else(WebError::not_found)
    }

    /// Innermost link of the interceptor chain.
    pub(crate) async fn dispatch(&self, cx: &mut RequestContext) -> HandlerResult {
        let resolved = self.resolve(cx.request.method(), cx.request.path())?;
        tracing::debug!(route = resolved.endpoint.pattern(), params = ?resolved.params, "route matched");
        cx.request.set_params(resolved.params);
        resolved.endpoint.invoke(cx).await
    }
}
