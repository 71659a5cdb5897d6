//! Registration at startup, then per-request dispatch:
//! setup, interceptor chain and router, serialization, teardown.

use crate::db::{DbContext, Engine};
use crate::error::{RouteError, WebError};
use crate::web::interceptor::{Guarded, Next, PathGuard};
use crate::web::response::{JSON, TEXT_PLAIN};
use crate::web::router::{RouteKind, Router};
use crate::web::static_files::StaticFiles;
use crate::web::{Body, Handler, HandlerResult, Interceptor, Reply, Request, RequestContext, Response, ResponseHead, TemplateEngine};
use axum::body::Bytes;
use axum::http::{header, HeaderValue, Method, StatusCode};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const INTERNAL_ERROR_PAGE: &str = "<html><body><h1>500 Internal Server Error</h1></body></html>";

/// Collects routes and interceptors. `build` seals them into an [`App`].
pub struct AppBuilder {
    engine: Engine,
    router: Router,
    interceptors: Vec<Guarded>,
    templates: Option<Arc<dyn TemplateEngine>>,
    static_root: Option<PathBuf>,
}

impl AppBuilder {
    pub fn new(engine: Engine) -> Self {
        AppBuilder {
            engine,
            router: Router::new(),
            interceptors: Vec::new(),
            templates: None,
            static_root: None,
        }
    }

    /// Plain route: the handler's reply is sent as is.
    pub fn route(self, method: Method, pattern: &str, handler: impl Handler) -> Result<Self, RouteError> {
        self.add(method, pattern, RouteKind::Route, handler)
    }

    /// The handler returns a JSON object rendered with `template`.
    pub fn view(self, method: Method, pattern: &str, template: &str, handler: impl Handler) -> Result<Self, RouteError> {
        self.add(method, pattern, RouteKind::View(template.to_string()), handler)
    }

    /// JSON API: errors are reported in the `{"error", "data", "message"}` envelope.
    pub fn api(self, method: Method, pattern: &str, handler: impl Handler) -> Result<Self, RouteError> {
        self.add(method, pattern, RouteKind::Api, handler)
    }

    fn add(mut self, method: Method, pattern: &str, kind: RouteKind, handler: impl Handler) -> Result<Self, RouteError> {
        self.router.add(&method, pattern, kind, Arc::new(handler))?;
        Ok(self)
    }

    /// Interceptors run in registration order; the first one is outermost.
    pub fn interceptor(mut self, pattern: &str, interceptor: impl Interceptor) -> Result<Self, RouteError> {
        let guard = PathGuard::parse(pattern)?;
        tracing::info!(pattern, guard = ?guard, "add interceptor");
        self.interceptors.push(Guarded {
            guard,
            interceptor: Arc::new(interceptor),
        });
        Ok(self)
    }

    pub fn templates(mut self, engine: impl TemplateEngine) -> Self {
        self.templates = Some(Arc::new(engine));
        self
    }

    /// Serve `GET /static/...` from `root`, after every other route.
    pub fn static_files(mut self, root: impl Into<PathBuf>) -> Self {
        self.static_root = Some(root.into());
        self
    }

    pub fn build(mut self) -> Result<App, RouteError> {
        if let Some(root) = self.static_root.take() {
            tracing::info!(root = %root.display(), "serving static files");
            self.router.add_tail("/static/", "path", Arc::new(StaticFiles::new(root)))?;
        }
        Ok(App {
            inner: Arc::new(AppInner {
                engine: self.engine,
                router: self.router,
                interceptors: self.interceptors,
                templates: self.templates,
            }),
        })
    }
}

struct AppInner {
    engine: Engine,
    router: Router,
    interceptors: Vec<Guarded>,
    templates: Option<Arc<dyn TemplateEngine>>,
}

/// Sealed dispatcher; cheap to clone into every connection task.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    pub fn builder(engine: Engine) -> AppBuilder {
        AppBuilder::new(engine)
    }

    /// Run one request to completion. Never fails: every error becomes a response.
    pub async fn handle(&self, request: Request) -> Response {
        let started = Instant::now();
        let method = request.method().clone();
        let path = request.path().to_string();

        let mut cx = RequestContext::new(request, DbContext::new(self.inner.engine.clone()));

        let next = Next::new(&self.inner.interceptors, &self.inner.router);
        let result = match AssertUnwindSafe(next.run(&mut cx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(WebError::Internal(format!("handler panicked: {}", panic_message(&*panic)))),
        };

        let head = std::mem::take(&mut cx.response);
        let response = self.serialize(head, result);

        if cx.db.is_active() {
            tracing::warn!(%method, %path, "database context left open by handler, cleaning up");
            cx.db.cleanup().await;
        }
        tracing::debug!(
            %method,
            %path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request done"
        );
        response
    }

    fn serialize(&self, mut head: ResponseHead, result: HandlerResult) -> Response {
        let body = match result {
            Ok(Reply::Template { name, model }) => {
                let Some(templates) = &self.inner.templates else {
                    tracing::error!(template = %name, "no template engine configured");
                    return internal_error();
                };
                match templates.render(&name, &model) {
                    Ok(bytes) => Body::Full(Bytes::from(bytes)),
                    Err(e) => {
                        tracing::error!(error = %e, "template render failed");
                        return internal_error();
                    }
                }
            }
            Ok(Reply::Json(value)) => match serde_json::to_vec(&value) {
                Ok(bytes) => {
                    head.set_content_type(JSON);
                    Body::Full(Bytes::from(bytes))
                }
                Err(e) => {
                    tracing::error!(error = %e, "json encode failed");
                    return internal_error();
                }
            },
            Ok(Reply::Bytes(bytes)) => Body::Full(bytes),
            Ok(Reply::Stream(stream)) => Body::Stream(stream),
            Ok(Reply::Empty) => Body::Empty,
            Err(WebError::Redirect { status, location }) => match HeaderValue::from_str(&location) {
                Ok(value) => {
                    head.set_status(status);
                    head.headers_mut().insert(header::LOCATION, value);
                    head.headers_mut().remove(header::CONTENT_TYPE);
                    Body::Empty
                }
                Err(_) => {
                    tracing::error!(%location, "redirect location is not a valid header value");
                    return internal_error();
                }
            },
            Err(WebError::Status(status)) => status_page(&mut head, status),
            Err(WebError::Api(e)) => {
                tracing::debug!(error = %e.error, data = %e.data, "api error outside an api route");
                status_page(&mut head, e.status())
            }
            Err(e) => {
                tracing::error!(kind = e.kind(), error = %e, "request failed");
                return internal_error();
            }
        };
        Response { head, body }
    }
}

fn status_page(head: &mut ResponseHead, status: StatusCode) -> Body {
    head.set_status(status);
    head.set_content_type(TEXT_PLAIN);
    let text = match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    };
    Body::Full(Bytes::from(text))
}

/// Fresh head: headers set before the failure are dropped.
fn internal_error() -> Response {
    let mut head = ResponseHead::default();
    head.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    Response {
        head,
        body: Body::Full(Bytes::from_static(INTERNAL_ERROR_PAGE.as_bytes())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeConnector;
    use crate::error::{ApiError, TemplateError};
    use crate::service::{RequestValidator, ValidationRule};
    use crate::web::handler_fn;
    use async_trait::async_trait;
    use axum::http::{HeaderMap, Uri};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn request(method: Method, uri: &str, body: &str) -> Request {
        let uri: Uri = uri.parse().unwrap();
        Request::new(method, &uri, HeaderMap::new(), Bytes::from(body.to_string()))
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.body.collect().await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Records `enter <name>` / `leave <name>` around `next`.
    struct Trace {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for Trace {
        async fn intercept(&self, cx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
            self.log.lock().unwrap().push(format!("enter {}", self.name));
            let result = next.run(cx).await;
            self.log.lock().unwrap().push(format!("leave {}", self.name));
            result
        }
    }

    fn traced_app(log: &Arc<Mutex<Vec<String>>>) -> App {
        let route_log = log.clone();
        App::builder(FakeConnector::new().engine())
            .interceptor("/manage/", Trace { name: "A", log: log.clone() })
            .unwrap()
            .interceptor("/", Trace { name: "B", log: log.clone() })
            .unwrap()
            .route(
                Method::GET,
                "/manage/:name",
                handler_fn(move |_cx| {
                    let log = route_log.clone();
                    Box::pin(async move {
                        log.lock().unwrap().push("route".into());
                        Ok(Reply::text("ok"))
                    })
                }),
            )
            .unwrap()
            .route(Method::GET, "/other", handler_fn(|_cx| Box::pin(async { Ok(Reply::text("other")) })))
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn first_registered_interceptor_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let app = traced_app(&log);
        let response = app.handle(request(Method::GET, "/manage/x", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), vec!["enter A", "enter B", "route", "leave B", "leave A"]);
    }

    #[tokio::test]
    async fn unmatched_interceptor_passes_through() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let app = traced_app(&log);
        let response = app.handle(request(Method::GET, "/other", "")).await;
        assert_eq!(body_text(response).await, "other");
        assert_eq!(*log.lock().unwrap(), vec!["enter B", "leave B"]);
    }

    struct RequireUser;

    #[async_trait]
    impl Interceptor for RequireUser {
        async fn intercept(&self, cx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
            match cx.request.header("x-user").map(str::to_string) {
                Some(user) => {
                    cx.insert(user);
                    next.run(cx).await
                }
                None => Err(WebError::found("/signin")),
            }
        }
    }

    #[tokio::test]
    async fn interceptor_can_redirect_or_hand_values_to_handlers() {
        let app = App::builder(FakeConnector::new().engine())
            .interceptor("/manage/*", RequireUser)
            .unwrap()
            .route(
                Method::GET,
                "/manage/me",
                handler_fn(|cx| {
                    Box::pin(async move {
                        let user = cx.get::<String>().cloned().unwrap_or_default();
                        Ok(Reply::text(user))
                    })
                }),
            )
            .unwrap()
            .build()
            .unwrap();

        let response = app.handle(request(Method::GET, "/manage/me", "")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.header("location"), Some("/signin"));
        assert!(matches!(response.body, Body::Empty));

        let uri: Uri = "/manage/me".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-user", HeaderValue::from_static("ann"));
        let response = app.handle(Request::new(Method::GET, &uri, headers, Bytes::new())).await;
        assert_eq!(body_text(response).await, "ann");
    }

    #[tokio::test]
    async fn routing_signals_become_status_pages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let app = traced_app(&log);
        let response = app.handle(request(Method::GET, "/missing", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.header("content-type"), Some(TEXT_PLAIN));
        assert_eq!(body_text(response).await, "404 Not Found");
        let response = app.handle(request(Method::DELETE, "/other", "")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    fn blog_rules() -> RequestValidator {
        RequestValidator::new()
            .field("name", ValidationRule::new().required())
            .field("summary", ValidationRule::new().required())
            .field("content", ValidationRule::new().required())
    }

    fn blog_api(fake: &FakeConnector) -> App {
        App::builder(fake.engine())
            .api(
                Method::POST,
                "/api/blogs",
                handler_fn(|cx| {
                    Box::pin(async move {
                        let body = cx.request.json_object()?;
                        blog_rules().validate(&body)?;
                        let tx = cx.db.begin();
                        let result = cx
                            .db
                            .update("INSERT INTO blogs (name) VALUES (?)", &[body["name"].clone()])
                            .await
                            .map_err(WebError::from);
                        cx.db.finish(tx, result).await?;
                        Ok(Reply::Json(Value::Object(body)))
                    })
                }),
            )
            .unwrap()
            .api(
                Method::GET,
                "/api/fail",
                handler_fn(|cx| {
                    Box::pin(async move {
                        let n = cx.db.select_int("SELECT a, b FROM t", &[]).await?;
                        Ok(Reply::Json(json!(n)))
                    })
                }),
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn invalid_post_returns_envelope_without_writing() {
        let fake = FakeConnector::new();
        let app = blog_api(&fake);
        let response = app
            .handle(request(Method::POST, "/api/blogs", r#"{"name": "Rust", "summary": " ", "content": "c"}"#))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.header("content-type"), Some(JSON));
        assert_eq!(
            body_text(response).await,
            r#"{"error":"value:invalid","data":"summary","message":""}"#
        );
        assert!(fake.statements().is_empty());
        assert!(fake.events().is_empty());
    }

    #[tokio::test]
    async fn valid_post_commits_once() {
        let fake = FakeConnector::new();
        let app = blog_api(&fake);
        let response = app
            .handle(request(Method::POST, "/api/blogs", r#"{"name": "Rust", "summary": "s", "content": "c"}"#))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            fake.events(),
            vec![
                "open c1",
                "execute INSERT INTO blogs (name) VALUES (?) [\"Rust\"]",
                "commit",
                "close c1"
            ]
        );
    }

    #[tokio::test]
    async fn internal_failures_hide_details_in_api_envelope() {
        let fake = FakeConnector::new();
        fake.push_rows(vec![json!({"a": 1, "b": 2})]);
        let app = blog_api(&fake);
        let response = app.handle(request(Method::GET, "/api/fail", "")).await;
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({"error": "internalerror", "data": "MultiColumnError", "message": ""}));
    }

    #[tokio::test]
    async fn views_render_object_models() {
        let templates = |name: &str, model: &Value| -> Result<Vec<u8>, TemplateError> {
            Ok(format!("{}:{}", name, model["title"].as_str().unwrap_or("")).into_bytes())
        };
        let app = App::builder(FakeConnector::new().engine())
            .templates(templates)
            .view(
                Method::GET,
                "/",
                "blogs.html",
                handler_fn(|_cx| Box::pin(async { Ok(Reply::Json(json!({"title": "Home"}))) })),
            )
            .unwrap()
            .view(
                Method::GET,
                "/broken",
                "x.html",
                handler_fn(|_cx| Box::pin(async { Ok(Reply::Json(json!([1, 2]))) })),
            )
            .unwrap()
            .build()
            .unwrap();
        let response = app.handle(request(Method::GET, "/", "")).await;
        assert_eq!(response.header("content-type"), Some("text/html; charset=utf-8"));
        assert_eq!(body_text(response).await, "blogs.html:Home");
        let response = app.handle(request(Method::GET, "/broken", "")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn api_errors_on_plain_routes_map_to_status() {
        let app = App::builder(FakeConnector::new().engine())
            .route(
                Method::GET,
                "/blog/:id",
                handler_fn(|cx| {
                    Box::pin(async move {
                        let id = cx.request.param("id").unwrap_or_default().to_string();
                        Err(ApiError::not_found(id).into())
                    })
                }),
            )
            .unwrap()
            .build()
            .unwrap();
        let response = app.handle(request(Method::GET, "/blog/b1", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    async fn explode(_cx: &mut RequestContext) -> HandlerResult {
        panic!("boom")
    }

    #[tokio::test]
    async fn panics_become_500_and_leaked_connections_are_closed() {
        let fake = FakeConnector::new();
        let app = App::builder(fake.engine())
            .route(
                Method::GET,
                "/leak",
                handler_fn(|cx| {
                    Box::pin(async move {
                        let _scope = cx.db.connect();
                        cx.db.update("DELETE FROM t", &[]).await?;
                        Ok(Reply::Empty)
                    })
                }),
            )
            .unwrap()
            .route(
                Method::GET,
                "/panic",
                handler_fn(|cx| Box::pin(explode(cx))),
            )
            .unwrap()
            .build()
            .unwrap();

        let response = app.handle(request(Method::GET, "/panic", "")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, INTERNAL_ERROR_PAGE);

        let response = app.handle(request(Method::GET, "/leak", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fake.events().last().map(String::as_str), Some("close c1"));
    }

    #[tokio::test]
    async fn static_files_stream_from_document_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        let app = App::builder(FakeConnector::new().engine())
            .static_files(dir.path())
            .build()
            .unwrap();
        let response = app.handle(request(Method::GET, "/static/css/site.css", "")).await;
        assert_eq!(response.header("content-type"), Some("text/css"));
        assert!(matches!(response.body, Body::Stream(_)));
        assert_eq!(body_text(response).await, "body{}");
        let response = app.handle(request(Method::GET, "/static/../secret", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = app.handle(request(Method::GET, "/static/none.css", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
