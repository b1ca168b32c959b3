//! Fetcher capability: locator -> raw bytes.
//!
//! The cache invokes the fetcher once per uncoalesced miss. Timeouts and
//! transport policy belong to the fetcher, not to the cache.

use std::path::{Component, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::cache::locator::Locator;
use crate::config::FetchConfig;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported locator: {0}")]
    Unsupported(Locator),

    #[error("Locator escapes the file root: {0}")]
    OutsideRoot(Locator),

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Asynchronous source of raw asset bytes.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, locator: &Locator) -> Result<Bytes, FetchError>;
}

/// Reads locators that are local paths or `file://` URLs.
///
/// Without a root any readable path is served. With a root, locators must be
/// relative paths below it; absolute paths and `..` are rejected.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    root: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve only files below `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_for(&self, locator: &Locator) -> Result<PathBuf, FetchError> {
        let raw = locator.as_str();
        if raw.contains("://") && !raw.starts_with("file://") {
            return Err(FetchError::Unsupported(locator.clone()));
        }
        let path = PathBuf::from(raw.strip_prefix("file://").unwrap_or(raw));
        let Some(root) = &self.root else {
            return Ok(path);
        };

        let contained = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(FetchError::OutsideRoot(locator.clone()));
        }
        Ok(root.join(path))
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, locator: &Locator) -> Result<Bytes, FetchError> {
        let path = self.path_for(locator)?;
        let data = fs::read(&path).await?;
        debug!(path = %path.display(), size = data.len(), "Read asset file");
        Ok(Bytes::from(data))
    }
}

/// Fetches `http://` and `https://` locators with reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client with the configured timeout and user agent.
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &Locator) -> Result<Bytes, FetchError> {
        let raw = locator.as_str();
        if !(raw.starts_with("http://") || raw.starts_with("https://")) {
            return Err(FetchError::Unsupported(locator.clone()));
        }

        let response = self.client.get(raw).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        debug!(locator = %locator, size = body.len(), "Downloaded asset");
        Ok(body)
    }
}

/// Routes `http(s)://` locators to [`HttpFetcher`] and everything else to a
/// [`FileFetcher`], if one is configured. This is what the binary uses.
#[derive(Debug, Clone)]
pub struct SchemeFetcher {
    http: HttpFetcher,
    file: Option<FileFetcher>,
}

impl SchemeFetcher {
    /// HTTP plus, when `fetch.file_root` is set, files below that root.
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpFetcher::new(config)?,
            file: config.file_root.as_ref().map(FileFetcher::with_root),
        })
    }

    /// HTTP plus the given file fetcher.
    pub fn with_file_fetcher(config: &FetchConfig, file: FileFetcher) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpFetcher::new(config)?,
            file: Some(file),
        })
    }
}

#[async_trait]
impl Fetcher for SchemeFetcher {
    async fn fetch(&self, locator: &Locator) -> Result<Bytes, FetchError> {
        let raw = locator.as_str();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return self.http.fetch(locator).await;
        }
        match &self.file {
            Some(file) => file.fetch(locator).await,
            None => Err(FetchError::Unsupported(locator.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_fetcher_reads_paths_and_file_urls() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("thumb.bin");
        std::fs::write(&path, b"pixels").unwrap();

        let fetcher = FileFetcher::new();
        let plain = fetcher
            .fetch(&Locator::new(path.to_string_lossy()))
            .await
            .unwrap();
        assert_eq!(&plain[..], b"pixels");

        let url = Locator::new(format!("file://{}", path.display()));
        assert_eq!(&fetcher.fetch(&url).await.unwrap()[..], b"pixels");
    }

    #[tokio::test]
    async fn test_file_fetcher_relative_to_root() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.bin"), b"a").unwrap();

        let fetcher = FileFetcher::with_root(tmp.path());
        assert_eq!(&fetcher.fetch(&Locator::new("a.bin")).await.unwrap()[..], b"a");
        assert!(matches!(
            fetcher.fetch(&Locator::new("missing.bin")).await,
            Err(FetchError::IoError(_))
        ));
    }

    #[tokio::test]
    async fn test_rooted_file_fetcher_stays_below_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("public");
        std::fs::create_dir_all(root.join("thumbs")).unwrap();
        std::fs::write(root.join("thumbs/a.bin"), b"a").unwrap();
        std::fs::write(tmp.path().join("secret.txt"), b"secret").unwrap();

        let fetcher = FileFetcher::with_root(&root);
        assert_eq!(
            &fetcher.fetch(&Locator::new("thumbs/a.bin")).await.unwrap()[..],
            b"a"
        );

        let secret = tmp.path().join("secret.txt");
        for raw in [
            "../secret.txt".to_string(),
            "thumbs/../../secret.txt".to_string(),
            secret.display().to_string(),
            format!("file://{}", secret.display()),
        ] {
            assert!(
                matches!(
                    fetcher.fetch(&Locator::new(&raw)).await,
                    Err(FetchError::OutsideRoot(_))
                ),
                "{raw} was served"
            );
        }
    }

    #[tokio::test]
    async fn test_scheme_fetcher_without_file_root_refuses_paths() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.bin");
        std::fs::write(&path, b"a").unwrap();

        let fetcher = SchemeFetcher::new(&FetchConfig::default()).unwrap();
        assert!(matches!(
            fetcher.fetch(&Locator::new(path.to_string_lossy())).await,
            Err(FetchError::Unsupported(_))
        ));

        let config = FetchConfig {
            file_root: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let rooted = SchemeFetcher::new(&config).unwrap();
        assert_eq!(&rooted.fetch(&Locator::new("a.bin")).await.unwrap()[..], b"a");
    }

    #[tokio::test]
    async fn test_file_fetcher_rejects_other_schemes() {
        let fetcher = FileFetcher::new();
        assert!(matches!(
            fetcher.fetch(&Locator::new("https://example.com/a.png")).await,
            Err(FetchError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_file_locators() {
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        assert!(matches!(
            fetcher.fetch(&Locator::new("/tmp/a.png")).await,
            Err(FetchError::Unsupported(_))
        ));
    }
}
