//! Remote asset fetching
//!
//! Downloads a resource to a local path, streaming the body to disk rather
//! than buffering it. Redirects are followed manually so the hop count can be
//! bounded and reported; on any failure after the destination file was
//! created, the partial file is removed before the error propagates.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::{SwfPatchError, SwfPatchResult};

/// Maximum redirect hops before giving up
pub const MAX_REDIRECTS: u32 = 5;

/// Default download timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Browser-like UA; some CDNs refuse requests without one
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Retrieval of a remote resource to a local file
///
/// Trait seam so the deployment orchestrator can be exercised without a
/// network (see `deploy.rs` tests).
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path, timeout: Duration) -> SwfPatchResult<()>;
}

/// HTTP/HTTPS fetcher backed by `reqwest`
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> SwfPatchResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SwfPatchError::Network {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Resolve the redirect chain and return the final successful response
    async fn get_following_redirects(
        &self,
        url: &str,
        timeout: Duration,
    ) -> SwfPatchResult<reqwest::Response> {
        let mut current = Url::parse(url).map_err(|e| SwfPatchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(current.clone())
                .header(reqwest::header::ACCEPT, "*/*")
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| map_request_error(url, e))?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| SwfPatchError::Http {
                        url: url.to_string(),
                        status: status.as_u16(),
                    })?;
                current = current
                    .join(location)
                    .map_err(|e| SwfPatchError::InvalidUrl {
                        url: location.to_string(),
                        message: e.to_string(),
                    })?;
                tracing::debug!(target_url = %current, "following redirect");
                continue;
            }
            if status.as_u16() >= 400 {
                return Err(SwfPatchError::Http {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            return Ok(response);
        }

        Err(SwfPatchError::TooManyRedirects {
            url: url.to_string(),
            limit: MAX_REDIRECTS,
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path, timeout: Duration) -> SwfPatchResult<()> {
        tracing::info!(%url, dest = %dest.display(), "downloading");
        let response = self.get_following_redirects(url, timeout).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        match stream_to_file(url, response, &mut file).await {
            Ok(bytes) => {
                tracing::debug!(%url, bytes, "download complete");
                Ok(())
            }
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                Err(e)
            }
        }
    }
}

async fn stream_to_file(
    url: &str,
    response: reqwest::Response,
    file: &mut tokio::fs::File,
) -> SwfPatchResult<u64> {
    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| map_request_error(url, e))?;
        file.write_all(&bytes).await?;
        written += bytes.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

fn map_request_error(url: &str, e: reqwest::Error) -> SwfPatchError {
    if e.is_timeout() {
        SwfPatchError::Timeout {
            url: url.to_string(),
        }
    } else {
        SwfPatchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}
