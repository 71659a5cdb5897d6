//! Files under the document root, streamed in fixed-size chunks.

use crate::error::WebError;
use crate::web::{ByteStream, Handler, HandlerResult, Reply, RequestContext};
use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::stream::{self, StreamExt};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;

pub const CHUNK_SIZE: usize = 8192;

/// Lazy, finite stream of `chunk`-sized reads; ends at EOF or after the first error.
pub fn file_chunks(file: tokio::fs::File, chunk: usize) -> ByteStream {
    stream::unfold(Some(file), move |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; chunk];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Serves the `path` capture relative to `root`.
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StaticFiles { root: root.into() }
    }

    /// Join only plain components; `..`, roots and prefixes are rejected.
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(path)
    }
}

#[async_trait]
impl Handler for StaticFiles {
    async fn call(&self, cx: &mut RequestContext) -> HandlerResult {
        let relative = cx.request.param("path").unwrap_or_default();
        let Some(path) = self.resolve(relative) else {
            tracing::warn!(path = relative, "rejected static path");
            return Err(WebError::not_found());
        };
        let is_file = tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            return Err(WebError::not_found());
        }
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| WebError::Internal(format!("open {}: {}", path.display(), e)))?;
        cx.response.set_content_type(content_type_for(&path));
        Ok(Reply::Stream(file_chunks(file, CHUNK_SIZE)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn chunks_are_fixed_size_until_eof() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![7u8; 20_000]).unwrap();
        let file = tokio::fs::File::open(tmp.path()).await.unwrap();
        let sizes: Vec<usize> = file_chunks(file, CHUNK_SIZE)
            .map(|chunk| chunk.unwrap().len())
            .collect()
            .await;
        assert_eq!(sizes, vec![8192, 8192, 3616]);
    }

    #[test]
    fn traversal_is_rejected() {
        let files = StaticFiles::new("/srv/www");
        assert_eq!(files.resolve("css/a.css"), Some(PathBuf::from("/srv/www/css/a.css")));
        assert_eq!(files.resolve("../etc/passwd"), None);
        assert_eq!(files.resolve("css/../../x"), None);
        assert_eq!(files.resolve("/etc/passwd"), None);
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for(Path::new("a/site.CSS")), "text/css");
        assert_eq!(content_type_for(Path::new("logo.png")), "image/png");
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
    }
}
