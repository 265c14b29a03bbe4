//! Remote byte sources with host fallback
//!
//! A fetch walks the configured hosts in priority order. A transport error,
//! timeout or unexpected status on one host moves on to the next with no
//! backoff. When every host has failed the result is `Ok(None)`, never
//! partial data. Cancellation is checked before each host attempt and raced
//! against the attempt itself.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cancel::CancellationToken;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};

/// Byte-range fetch capability over a prioritized host list
///
/// `path` is relative to the host root, as produced by
/// [`StorageLayout::relative_path`](crate::layout::StorageLayout::relative_path).
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Size of the object, from a HEAD request
    async fn content_length(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<u64>>;

    /// The whole object
    async fn fetch(&self, path: &str, cancel: &CancellationToken) -> StorageResult<Option<Bytes>>;

    /// Bytes `[offset, offset + length)` of the object
    async fn fetch_range(
        &self,
        path: &str,
        offset: u64,
        length: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<Bytes>>;
}

/// Why one host attempt did not produce data
#[derive(Debug)]
enum AttemptError {
    Transport(reqwest::Error),
    Status(StatusCode),
    ShortBody { expected: u64, actual: u64 },
    MissingLength,
    Timeout,
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Status(status) => write!(f, "unexpected status {status}"),
            Self::ShortBody { expected, actual } => {
                write!(f, "expected {expected} bytes, received {actual}")
            }
            Self::MissingLength => write!(f, "no content length"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e)
    }
}

/// HTTP CDN client
#[derive(Debug, Clone)]
pub struct CdnClient {
    client: reqwest::Client,
    hosts: Vec<Url>,
    request_timeout: Duration,
}

impl CdnClient {
    /// Build a client for the hosts in `config`
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        // Several crates in one process may race to install the provider
        let _ = rustls::crypto::ring::default_provider().install_default();

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("tactkit-storage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        let hosts = config
            .hosts
            .iter()
            .map(|host| host_url(&config.scheme, host))
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(Self {
            client,
            hosts,
            request_timeout: config.request_timeout,
        })
    }

    /// Base URLs in priority order
    pub fn hosts(&self) -> &[Url] {
        &self.hosts
    }

    /// Run `attempt` against each host until one succeeds
    async fn with_fallback<T, F, Fut>(
        &self,
        path: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> StorageResult<Option<T>>
    where
        F: FnMut(Url) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        for host in &self.hosts {
            cancel.check()?;

            let url = host
                .join(path.trim_start_matches('/'))
                .map_err(|e| StorageError::InvalidArgument(format!("{path}: {e}")))?;

            let result = tokio::select! {
                () = cancel.cancelled() => return Err(StorageError::Cancelled),
                result = tokio::time::timeout(self.request_timeout, attempt(url.clone())) => {
                    result.unwrap_or(Err(AttemptError::Timeout))
                }
            };

            match result {
                Ok(value) => {
                    debug!(%url, "fetched from host");
                    return Ok(Some(value));
                }
                Err(e) => warn!(%url, error = %e, "host failed, trying next"),
            }
        }

        debug!(path, hosts = self.hosts.len(), "all hosts failed");
        Ok(None)
    }
}

#[async_trait]
impl RemoteSource for CdnClient {
    async fn content_length(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<u64>> {
        self.with_fallback(path, cancel, |url| async move {
            let response = self.client.head(url).send().await?;
            if !response.status().is_success() {
                return Err(AttemptError::Status(response.status()));
            }
            // HEAD responses carry no body so read the header directly
            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .ok_or(AttemptError::MissingLength)
        })
        .await
    }

    async fn fetch(&self, path: &str, cancel: &CancellationToken) -> StorageResult<Option<Bytes>> {
        self.with_fallback(path, cancel, |url| async move {
            let response = self.client.get(url).send().await?;
            if response.status() != StatusCode::OK {
                return Err(AttemptError::Status(response.status()));
            }
            Ok(response.bytes().await?)
        })
        .await
    }

    async fn fetch_range(
        &self,
        path: &str,
        offset: u64,
        length: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<Bytes>> {
        if length == 0 {
            return Ok(Some(Bytes::new()));
        }
        let range = format!("bytes={}-{}", offset, offset + length - 1);

        self.with_fallback(path, cancel, |url| {
            let range = range.clone();
            async move {
                let response = self.client.get(url).header(RANGE, range).send().await?;
                if response.status() != StatusCode::PARTIAL_CONTENT {
                    return Err(AttemptError::Status(response.status()));
                }

                let data = response.bytes().await?;
                if data.len() as u64 != length {
                    return Err(AttemptError::ShortBody {
                        expected: length,
                        actual: data.len() as u64,
                    });
                }
                Ok(data)
            }
        })
        .await
    }
}

fn host_url(scheme: &str, host: &str) -> StorageResult<Url> {
    let host = host.trim().trim_end_matches('/');
    let base = if host.contains("://") {
        format!("{host}/")
    } else {
        format!("{scheme}://{host}/")
    };
    Url::parse(&base).map_err(|e| StorageError::Config(format!("invalid host {host:?}: {e}")))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_host_url() {
        let url = host_url("http", "cdn.example:8080").unwrap();
        assert_eq!(url.as_str(), "http://cdn.example:8080/");
        assert_eq!(
            url.join("tpr/wow/data/00/17/x").unwrap().as_str(),
            "http://cdn.example:8080/tpr/wow/data/00/17/x"
        );

        let explicit = host_url("http", "https://secure.example/").unwrap();
        assert_eq!(explicit.scheme(), "https");
    }

    #[test]
    fn test_invalid_host() {
        assert!(host_url("http", "bad host name").is_err());
    }

    #[tokio::test]
    async fn test_no_hosts_is_not_found() {
        let client = CdnClient::new(&StorageConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        assert!(client.fetch("tpr/wow/x", &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_host() {
        let config = StorageConfig::default().with_hosts(["127.0.0.1:1"]);
        let client = CdnClient::new(&config).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            client.fetch("tpr/wow/x", &cancel).await,
            Err(StorageError::Cancelled)
        ));
    }
}
