//! Blog application served by trestle.
//!
//! Run from repo root: `cargo run -p trestle-blog`
//! Settings come from `TRESTLE_CONFIG` (JSON) and `DATABASE_*` / `SERVER_*` env vars;
//! templates are read from `<document_root>/templates` (e.g. `DOCUMENT_ROOT=blog`).
//! Session cookies are signed with `BLOG_SESSION_SECRET`.

mod auth;
mod handlers;
mod models;
mod templates;

use auth::Sessions;
use axum::http::Method;
use handlers::{
    Authenticate, CreateBlog, GetBlog, Index, ListBlogs, ListUsers, LoadUser, RegisterUser, Repos, RequireUser, Signin,
    Signout,
};
use std::path::Path;
use templates::FileTemplates;
use tokio::net::TcpListener;
use trestle::{postgres, App, DbContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = trestle::load_settings()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trestle=info,trestle_blog=info")),
        )
        .init();

    let secret = std::env::var("BLOG_SESSION_SECRET").map_err(|_| "BLOG_SESSION_SECRET is not set")?;
    let sessions = Sessions::new(&secret).map_err(|e| e.to_string())?;

    let engine = postgres::engine(&settings.db);
    let repos = Repos::new(sessions)?;
    let mut db = DbContext::new(engine.clone());
    repos.create_tables(&mut db).await?;

    let root = Path::new(&settings.server.document_root);
    let mut builder = App::builder(engine)
        .templates(FileTemplates::new(root.join("templates")))
        .interceptor("/", LoadUser(repos.clone()))?
        .interceptor("/manage/", RequireUser)?
        .view(Method::GET, "/", "blogs.html", Index(repos.clone()))?
        .view(Method::GET, "/signin", "signin.html", Signin)?
        .route(Method::GET, "/signout", Signout)?
        .view(Method::GET, "/manage/blogs", "manage_blogs.html", Index(repos.clone()))?
        .api(Method::GET, "/api/users", ListUsers(repos.clone()))?
        .api(Method::POST, "/api/users", RegisterUser(repos.clone()))?
        .api(Method::POST, "/api/authenticate", Authenticate(repos.clone()))?
        .api(Method::GET, "/api/blogs", ListBlogs(repos.clone()))?
        .api(Method::POST, "/api/blogs", CreateBlog(repos.clone()))?
        .api(Method::GET, "/api/blogs/:id", GetBlog(repos))?;
    if settings.server.serve_static {
        builder = builder.static_files(root.join("static"));
    }
    let app = builder.build()?;

    let listener = TcpListener::bind((settings.server.host.as_str(), settings.server.port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!("blog listening on http://{}", addr);
    axum::serve(listener, trestle::into_router(app, settings.server.max_body_bytes)).await?;
    Ok(())
}
