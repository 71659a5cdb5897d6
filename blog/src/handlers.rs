//! Routes of the blog application.

use crate::auth::{password_digest, Sessions, SESSION_COOKIE, SESSION_MAX_AGE};
use crate::models::{Blog, Comment, User};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use trestle::db::DbContext;
use trestle::web::{CookieOptions, Handler, HandlerResult, Interceptor, Next};
use trestle::{
    ApiError, DbError, MappingError, Page, Reply, Repository, RequestContext, RequestValidator, ValidationRule,
    WebError,
};

/// Repositories and session keys shared by every handler.
pub struct Repos {
    pub users: Repository<User>,
    pub blogs: Repository<Blog>,
    pub comments: Repository<Comment>,
    pub sessions: Sessions,
}

impl Repos {
    pub fn new(sessions: Sessions) -> Result<Arc<Self>, MappingError> {
        Ok(Arc::new(Repos {
            users: Repository::new()?,
            blogs: Repository::new()?,
            comments: Repository::new()?,
            sessions,
        }))
    }

    /// Create missing tables in one transaction.
    pub async fn create_tables(&self, db: &mut DbContext) -> Result<(), DbError> {
        let tx = db.begin();
        let result = async {
            self.users.create_table(db).await?;
            self.blogs.create_table(db).await?;
            self.comments.create_table(db).await
        }
        .await;
        db.finish(tx, result).await
    }

    async fn blog_page(&self, db: &mut DbContext, index: u64) -> Result<(Page, Vec<Blog>), DbError> {
        let total = self.blogs.count_all(db).await?;
        let page = Page::new(u64::try_from(total).unwrap_or(0), index, trestle::page::DEFAULT_PAGE_SIZE);
        let blogs = self.blogs.find_page(db, &page, "ORDER BY created_at DESC", &[]).await?;
        Ok((page, blogs))
    }

    /// Sign `user` in: set the session cookie on the response.
    fn start_session(&self, cx: &mut RequestContext, user: &User) -> Result<(), WebError> {
        let value = self.sessions.issue(user, now());
        let options = CookieOptions {
            max_age: Some(SESSION_MAX_AGE),
            ..CookieOptions::default()
        };
        cx.response.set_cookie(SESSION_COOKIE, &value, &options)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn page_index(cx: &RequestContext) -> u64 {
    Page::index_from(cx.request.query("page"))
}

fn text(body: &Map<String, Value>, key: &str) -> String {
    body.get(key).and_then(Value::as_str).unwrap_or_default().trim().to_string()
}

fn masked(mut user: User) -> User {
    user.password = "******".into();
    user
}

/// A page of the latest blogs as a view model (`GET /`, `GET /manage/blogs`).
pub struct Index(pub Arc<Repos>);

#[async_trait]
impl Handler for Index {
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
        let index = page_index(cx);
        let (page, blogs) = self.0.blog_page(&mut cx.db, index).await?;
        let user = cx.get::<User>().cloned().map(masked);
        Ok(Reply::Json(json!({ "page": page, "blogs": blogs, "user": user })))
    }
}

/// `GET /api/users`: newest first, passwords masked.
pub struct ListUsers(pub Arc<Repos>);

#[async_trait]
impl Handler for ListUsers {
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
        let users = self.0.users.find_by(&mut cx.db, "ORDER BY created_at DESC", &[]).await?;
        let users: Vec<User> = users.into_iter().map(masked).collect();
        Reply::json(&json!({ "users": users }))
    }
}

/// `POST /api/users`: register and sign in.
pub struct RegisterUser(pub Arc<Repos>);

fn register_rules() -> RequestValidator {
    RequestValidator::new()
        .field("name", ValidationRule::new().required().max_length(50))
        .field("email", ValidationRule::new().required().email())
        .field("password", ValidationRule::new().required().min_length(6))
}

#[async_trait]
impl Handler for RegisterUser {
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
        let body = cx.request.input()?;
        register_rules().validate(&body)?;
        let email = text(&body, "email").to_lowercase();
        let mut user = User {
            id: None,
            password: password_digest(&email, &text(&body, "password")),
            email,
            admin: false,
            name: text(&body, "name"),
            image: String::new(),
            created_at: None,
        };
        let tx = cx.db.begin();
        let result = async {
            let taken = self
                .0
                .users
                .count_by(&mut cx.db, "WHERE email = ?", &[Value::from(user.email.clone())])
                .await?;
            if taken > 0 {
                return Err(WebError::from(ApiError::conflict("email").with_message("email is already in use")));
            }
            self.0.users.insert(&mut cx.db, &mut user).await?;
            Ok::<(), WebError>(())
        }
        .await;
        cx.db.finish(tx, result).await?;
        tracing::info!(user_id = user.id.as_deref().unwrap_or(""), "user registered");
        self.0.start_session(cx, &user)?;
        Reply::json(&masked(user))
    }
}

/// `POST /api/authenticate`: check email and password, then sign in.
pub struct Authenticate(pub Arc<Repos>);

#[async_trait]
impl Handler for Authenticate {
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
        let body = cx.request.input()?;
        RequestValidator::new()
            .field("email", ValidationRule::new().required().email())
            .field("password", ValidationRule::new().required())
            .validate(&body)?;
        let email = text(&body, "email").to_lowercase();
        let failed = || ApiError::new("auth:failed", "email", "invalid email or password");
        let user = self
            .0
            .users
            .find_first(&mut cx.db, "WHERE email = ?", &[Value::from(email.clone())])
            .await?
            .ok_or_else(failed)?;
        if user.password != password_digest(&email, &text(&body, "password")) {
            tracing::info!(user_id = user.id.as_deref().unwrap_or(""), "authentication failed");
            return Err(failed().into());
        }
        self.0.start_session(cx, &user)?;
        Reply::json(&masked(user))
    }
}

/// `GET /signout`: drop the session and go home.
pub struct Signout;

#[async_trait]
impl Handler for Signout {
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
        cx.response.delete_cookie(SESSION_COOKIE)?;
        Err(WebError::found("/"))
    }
}

/// `GET /api/blogs?page=N`.
pub struct ListBlogs(pub Arc<Repos>);

#[async_trait]
impl Handler for ListBlogs {
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
        let index = page_index(cx);
        let (page, blogs) = self.0.blog_page(&mut cx.db, index).await?;
        Reply::json(&json!({ "page": page, "blogs": blogs }))
    }
}

/// `GET /api/blogs/:id`: the blog and its comments.
pub struct GetBlog(pub Arc<Repos>);

#[async_trait]
impl Handler for GetBlog {
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
        let id = cx.request.param("id").unwrap_or_default().to_string();
        let blog = self
            .0
            .blogs
            .get(&mut cx.db, id.clone())
            .await?
            .ok_or_else(|| ApiError::not_found("blog"))?;
        let comments = self
            .0
            .comments
            .find_by(&mut cx.db, "WHERE blog_id = ? ORDER BY created_at DESC", &[Value::from(id)])
            .await?;
        Reply::json(&json!({ "blog": blog, "comments": comments }))
    }
}

fn blog_rules() -> RequestValidator {
    RequestValidator::new()
        .field("name", ValidationRule::new().required().max_length(50))
        .field("summary", ValidationRule::new().required().max_length(200))
        .field("content", ValidationRule::new().required())
}

/// `POST /api/blogs`: validated, written by a signed-in admin.
pub struct CreateBlog(pub Arc<Repos>);

#[async_trait]
impl Handler for CreateBlog {
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
        let body = cx.request.input()?;
        blog_rules().validate(&body)?;
        let user = cx
            .get::<User>()
            .cloned()
            .ok_or_else(|| ApiError::permission("sign in first"))?;
        if !user.admin {
            return Err(ApiError::permission("only admins can write blogs").into());
        }
        let mut blog = Blog {
            id: None,
            user_id: user.id.clone().unwrap_or_default(),
            user_name: user.name.clone(),
            user_image: user.image.clone(),
            name: text(&body, "name"),
            summary: text(&body, "summary"),
            content: text(&body, "content"),
            created_at: None,
        };
        self.0.blogs.insert(&mut cx.db, &mut blog).await?;
        tracing::info!(blog_id = blog.id.as_deref().unwrap_or(""), author = user.id.as_deref().unwrap_or(""), "blog created");
        Reply::json(&blog)
    }
}

/// `GET /signin`.
pub struct Signin;

#[async_trait]
impl Handler for Signin {
    async fn call(&self, _cx: &mut RequestContext) -> HandlerResult {
        Ok(Reply::Json(json!({ "title": "Sign in" })))
    }
}

/// Attaches the user named by a valid session cookie to the request.
pub struct LoadUser(pub Arc<Repos>);

#[async_trait]
impl Interceptor for LoadUser {
    async fn intercept(&self, cx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        let cookie = cx.request.cookie(SESSION_COOKIE).map(str::to_string);
        if let Some(claim) = cookie.as_deref().and_then(|v| self.0.sessions.claim(v, now())) {
            match self.0.users.get(&mut cx.db, claim.user_id).await? {
                Some(user) if self.0.sessions.verify(&claim, &user) => {
                    tracing::debug!(user_id = claim.user_id, "session user loaded");
                    cx.insert(user);
                }
                _ => tracing::info!(user_id = claim.user_id, "rejected session cookie"),
            }
        }
        next.run(cx).await
    }
}

/// Guards `/manage/`: requires a signed-in user, otherwise redirects to `/signin`.
pub struct RequireUser;

#[async_trait]
impl Interceptor for RequireUser {
    async fn intercept(&self, cx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        if cx.get::<User>().is_none() {
            tracing::debug!(path = cx.request.path(), "no user, redirecting to signin");
            return Err(WebError::found("/signin"));
        }
        next.run(cx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
    use pretty_assertions::assert_eq;
    use trestle::db::{Connector, Engine, RawConnection, Row};
    use trestle::sql::Placeholder;
    use trestle::{App, Request};

    /// Answers every `users` query with one stored user, every count with -1,
    /// and accepts all writes.
    struct OneUser(Row);

    #[async_trait]
    impl Connector for OneUser {
        async fn connect(&self) -> Result<Box<dyn RawConnection>, DbError> {
            Ok(Box::new(OneUserConnection(self.0.clone())))
        }
    }

    struct OneUserConnection(Row);

    #[async_trait]
    impl RawConnection for OneUserConnection {
        fn id(&self) -> &str {
            "test"
        }

        fn placeholder(&self) -> Placeholder {
            Placeholder::Question
        }

        async fn fetch(&mut self, sql: &str, _args: &[Value]) -> Result<Vec<Row>, DbError> {
            if sql.starts_with("SELECT count(") {
                return Ok(vec![json!({"count": -1}).as_object().cloned().unwrap_or_default()]);
            }
            Ok(if sql.contains("\"users\"") { vec![self.0.clone()] } else { Vec::new() })
        }

        async fn execute(&mut self, _sql: &str, _args: &[Value]) -> Result<u64, DbError> {
            Ok(1)
        }

        async fn commit(&mut self) -> Result<(), DbError> {
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), DbError> {
            Ok(())
        }

        async fn close(self: Box<Self>) -> Result<(), DbError> {
            Ok(())
        }
    }

    fn admin() -> User {
        User {
            id: Some("0017600000000001abc000".into()),
            email: "ann@example.com".into(),
            password: password_digest("ann@example.com", "secret"),
            admin: true,
            name: "Ann".into(),
            image: String::new(),
            created_at: Some(1.0),
        }
    }

    struct WhoAmI;

    #[async_trait]
    impl Handler for WhoAmI {
        async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
            let name = cx.get::<User>().map(|u| u.name.clone()).unwrap_or_default();
            Ok(Reply::text(name))
        }
    }

    fn app() -> (App, Arc<Repos>) {
        let row = match serde_json::to_value(admin()) {
            Ok(Value::Object(row)) => row,
            other => panic!("user is not an object: {:?}", other),
        };
        let engine = Engine::new(Arc::new(OneUser(row)));
        let repos = Repos::new(Sessions::new("test-secret").unwrap()).unwrap();
        let app = App::builder(engine)
            .interceptor("/", LoadUser(repos.clone()))
            .unwrap()
            .interceptor("/manage/", RequireUser)
            .unwrap()
            .route(Method::GET, "/manage/whoami", WhoAmI)
            .unwrap()
            .api(Method::POST, "/api/blogs", CreateBlog(repos.clone()))
            .unwrap()
            .route(Method::GET, "/index", Index(repos.clone()))
            .unwrap()
            .build()
            .unwrap();
        (app, repos)
    }

    fn request(method: Method, uri: &str, headers: &[(header::HeaderName, String)], body: &str) -> Request {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        let uri: Uri = uri.parse().unwrap();
        Request::new(method, &uri, map, Bytes::from(body.to_string()))
    }

    fn session_cookie(repos: &Repos) -> (header::HeaderName, String) {
        let value = repos.sessions.issue(&admin(), now());
        (header::COOKIE, format!("{}={}", SESSION_COOKIE, value))
    }

    #[tokio::test]
    async fn manage_requires_a_signed_session_not_a_header() {
        let (app, repos) = app();
        let user_header = header::HeaderName::from_static("x-user");

        let res = app
            .handle(request(Method::GET, "/manage/whoami", &[(user_header, "0017600000000001abc000".into())], ""))
            .await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.header("location"), Some("/signin"));

        let forged = format!(
            "{}=0017600000000001abc000-{}-{}",
            SESSION_COOKIE,
            now() + SESSION_MAX_AGE,
            "00".repeat(32)
        );
        let res = app
            .handle(request(Method::GET, "/manage/whoami", &[(header::COOKIE, forged)], ""))
            .await;
        assert_eq!(res.status(), StatusCode::FOUND);

        let res = app
            .handle(request(Method::GET, "/manage/whoami", &[session_cookie(&repos)], ""))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body.collect().await.unwrap(), Bytes::from_static(b"Ann"));
    }

    #[tokio::test]
    async fn creating_a_blog_needs_a_session() {
        let (app, repos) = app();
        let body = r#"{"name": "Hello", "summary": "first", "content": "text"}"#;

        let res = app.handle(request(Method::POST, "/api/blogs", &[], body)).await;
        let envelope: Value = serde_json::from_slice(&res.body.collect().await.unwrap()).unwrap();
        assert_eq!(envelope["error"], json!("permission:forbidden"));

        let res = app
            .handle(request(Method::POST, "/api/blogs", &[session_cookie(&repos)], body))
            .await;
        let blog: Value = serde_json::from_slice(&res.body.collect().await.unwrap()).unwrap();
        assert_eq!(blog["user_name"], json!("Ann"));
        assert_eq!(blog["name"], json!("Hello"));
    }

    #[tokio::test]
    async fn index_survives_a_bogus_count_and_masks_the_user() {
        let (app, repos) = app();
        let res = app.handle(request(Method::GET, "/index", &[session_cookie(&repos)], "")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let model: Value = serde_json::from_slice(&res.body.collect().await.unwrap()).unwrap();
        assert_eq!(model["page"]["item_count"], json!(0));
        assert_eq!(model["blogs"], json!([]));
        assert_eq!(model["user"]["password"], json!("******"));
    }
}
