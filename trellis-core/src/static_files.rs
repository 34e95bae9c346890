//! Documentation UI files served under `/swagger/`

use crate::logging::debug;
use crate::{Error, HttpResponse};
use std::path::{Component, Path, PathBuf};
use trellis_openapi::{SwaggerConfig, swagger_ui_html};

/// URL prefix of the documentation UI
pub const SWAGGER_PREFIX: &str = "/swagger/";

/// URL of the API document the UI loads
pub const OPENAPI_PATH: &str = "/openapi.json";

const INDEX_FILE: &str = "index.html";

/// Serves files from a directory, falling back to a generated Swagger UI
/// page when the directory has no `index.html`
#[derive(Debug, Clone)]
pub struct SwaggerFiles {
    root: PathBuf,
    title: String,
}

impl SwaggerFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            title: "API Documentation".to_string(),
        }
    }

    /// Title of the generated page
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serve the file addressed by a request path starting with `/swagger/`
    pub async fn serve(&self, request_path: &str) -> Result<HttpResponse, Error> {
        let not_found = || Error::NotFound(format!("File not found: {}", request_path));

        let relative = request_path
            .strip_prefix(SWAGGER_PREFIX)
            .ok_or_else(not_found)?;
        let relative = Self::sanitize(relative).ok_or_else(|| {
            debug!(path = %request_path, "Rejected documentation path");
            not_found()
        })?;

        let wants_index =
            relative.as_os_str().is_empty() || relative.as_path() == Path::new(INDEX_FILE);

        let mut path = self.root.join(&relative);
        if relative.as_os_str().is_empty()
            || tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir())
        {
            path.push(INDEX_FILE);
        }

        match tokio::fs::read(&path).await {
            Ok(content) => {
                self.ensure_inside_root(&path)?;
                Ok(HttpResponse::ok()
                    .with_header("Content-Type", content_type(&path))
                    .with_body(content))
            }
            Err(_) if wants_index => Ok(self.generated_index()),
            Err(_) => Err(not_found()),
        }
    }

    /// Normal components only; `..`, roots and prefixes are refused
    fn sanitize(relative: &str) -> Option<PathBuf> {
        let mut clean = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(clean)
    }

    /// Symlinks must not lead out of the root
    fn ensure_inside_root(&self, path: &Path) -> Result<(), Error> {
        let (Ok(root), Ok(file)) = (self.root.canonicalize(), path.canonicalize()) else {
            return Err(Error::NotFound(format!("File not found: {}", path.display())));
        };
        if file.starts_with(&root) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("File not found: {}", path.display())))
        }
    }

    fn generated_index(&self) -> HttpResponse {
        let html = swagger_ui_html(&SwaggerConfig::new(OPENAPI_PATH).with_title(self.title.clone()));
        HttpResponse::ok()
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(html.into_bytes())
    }
}

/// Content type from the file extension
pub fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") | Some("map") => "application/json",
        Some("yaml") | Some("yml") => "application/x-yaml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
