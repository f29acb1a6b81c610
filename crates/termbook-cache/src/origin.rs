use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use termbook_core::traits::ResourceFetcher;
use termbook_core::types::{Headers, Method, ResourceRequest, ResourceResponse};
use termbook_core::{Error, Result};

/// Serves a release directory as if it were the network origin.
///
/// `./` and the empty path map to `index.html`; anything escaping the root
/// is a 404.
pub struct DirOrigin {
    root: PathBuf,
}

impl DirOrigin {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, url: &str) -> Option<PathBuf> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let path = path.trim_start_matches("./").trim_start_matches('/');
        let path = if path.is_empty() { "index.html" } else { path };
        let rel = Path::new(path);
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(rel))
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ResourceFetcher for DirOrigin {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse> {
        if !self.root.is_dir() {
            return Err(Error::CacheFetch {
                url: request.url.clone(),
                reason: format!("origin {} unreachable", self.root.display()),
            });
        }
        if !matches!(request.method, Method::Get | Method::Head) {
            return Ok(ResourceResponse::with_status(405));
        }
        let Some(path) = self.resolve(&request.url).filter(|p| !p.is_dir()) else {
            return Ok(ResourceResponse::with_status(404));
        };
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(ResourceResponse::with_status(404));
            }
            Err(e) => return Err(Error::CacheFetch { url: request.url.clone(), reason: e.to_string() }),
        };
        let mut headers = Headers::new();
        headers.insert("content-type".into(), content_type(&path).into());
        headers.insert("content-length".into(), body.len().to_string());
        let body = if request.method == Method::Head { Vec::new() } else { body };
        Ok(ResourceResponse { status: 200, headers, body })
    }
}
