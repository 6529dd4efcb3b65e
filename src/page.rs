//! Retrieval of `?page=` documents and engine templates.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;

use crate::utils::has_percent_escapes;
use crate::ShareError;

/// Something that can hand back the text behind a location.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<String, ShareError>;
}

fn fetch_failure(location: &str, reason: impl ToString) -> ShareError {
    ShareError::FetchFailure {
        location: location.to_string(),
        reason: reason.to_string(),
    }
}

/// Whether `location` names an HTTP(S) resource.
pub fn is_remote(location: &str) -> bool {
    let lower = location.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// The `page` query value as a location. Transport may or may not have
/// decoded it already, so it is percent-decoded once only when it still
/// carries escapes.
pub fn decode_page_param(raw: &str) -> String {
    if !has_percent_escapes(raw) {
        return raw.to_string();
    }
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            tracing::debug!(error = %e, "page parameter is not valid percent-encoding, using it as-is");
            raw.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

pub struct HttpPageSource {
    client: Client,
}

impl HttpPageSource {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpPageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, location: &str) -> Result<String, ShareError> {
        tracing::debug!(%location, "fetching page");
        let resp = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| fetch_failure(location, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(fetch_failure(location, format!("HTTP {status}")));
        }
        resp.text().await.map_err(|e| fetch_failure(location, e))
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Reads local files. Relative locations resolve against `base` when set.
#[derive(Debug, Clone, Default)]
pub struct FsPageSource {
    base: Option<PathBuf>,
}

impl FsPageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location.strip_prefix("file://").unwrap_or(location));
        match &self.base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl PageSource for FsPageSource {
    async fn fetch(&self, location: &str) -> Result<String, ShareError> {
        let path = self.resolve(location);
        tracing::debug!(path = %path.display(), "reading page");
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| fetch_failure(location, e))
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// HTTP(S) locations go over the network, everything else to the filesystem.
#[derive(Default)]
pub struct AnyPageSource {
    http: HttpPageSource,
    fs: FsPageSource,
}

impl AnyPageSource {
    pub fn new(fs: FsPageSource) -> Self {
        Self {
            http: HttpPageSource::new(),
            fs,
        }
    }
}

#[async_trait]
impl PageSource for AnyPageSource {
    async fn fetch(&self, location: &str) -> Result<String, ShareError> {
        if is_remote(location) {
            self.http.fetch(location).await
        } else {
            self.fs.fetch(location).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_detection() {
        assert!(is_remote("https://example.com/p.html"));
        assert!(is_remote("HTTP://example.com"));
        assert!(!is_remote("./previews/page.html"));
        assert!(!is_remote("file:///tmp/page.html"));
    }

    #[test]
    fn page_param_decoded_once() {
        assert_eq!(
            decode_page_param("https%3A%2F%2Fexample.com%2Fa%2520b.html"),
            "https://example.com/a%20b.html"
        );
        assert_eq!(decode_page_param("plain/path.html"), "plain/path.html");
    }

    #[tokio::test]
    async fn fs_source_reads_relative_to_base() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("page.html"), "<template>hi</template>").unwrap();

        let source = FsPageSource::with_base(tmp.path());
        assert_eq!(source.fetch("page.html").await.unwrap(), "<template>hi</template>");

        let absolute = tmp.path().join("page.html");
        let url = format!("file://{}", absolute.display());
        assert_eq!(FsPageSource::new().fetch(&url).await.unwrap(), "<template>hi</template>");
    }

    #[tokio::test]
    async fn missing_file_is_fetch_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let err = FsPageSource::with_base(tmp.path())
            .fetch("nope.html")
            .await
            .unwrap_err();
        match err {
            ShareError::FetchFailure { location, .. } => assert_eq!(location, "nope.html"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn any_source_routes_local_paths_to_fs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.html"), "A").unwrap();
        let source = AnyPageSource::new(FsPageSource::with_base(tmp.path()));
        assert_eq!(source.fetch("a.html").await.unwrap(), "A");
    }
}
