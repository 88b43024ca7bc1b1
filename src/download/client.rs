//! Streaming HTTP fetcher.
//!
//! Downloads a remote file into working storage in bounded-memory chunks,
//! enforcing a byte-size limit and an overall time budget. Size violations
//! are detected as early as possible: from the advertised Content-Length
//! before any payload bytes move, and otherwise mid-stream the moment the
//! running count crosses the limit.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use url::Url;

use super::artifact::TransientArtifact;
use super::error::FetchError;
use super::filename;

const USER_AGENT: &str = concat!("fileferry/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-fetch enforcement limits.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    /// Maximum allowed file size in bytes.
    pub size_limit: u64,
    /// Wall-clock budget for the entire fetch.
    pub time_budget: Duration,
}

/// HTTP client for fetching remote files into working storage.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Creates a fetcher with the shared HTTP client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    /// Fetches `url` into a temporary file under `workdir`.
    ///
    /// The returned artifact owns the temporary file and removes it on drop.
    /// No retries are attempted; a failed fetch surfaces to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the URL is invalid, the file exceeds
    /// `limits.size_limit`, the transfer outlives `limits.time_budget`, or
    /// a network or storage failure occurs.
    #[instrument(skip(self, limits, workdir))]
    pub async fn fetch(
        &self,
        url: &str,
        limits: &FetchLimits,
        workdir: &Path,
    ) -> Result<TransientArtifact, FetchError> {
        let parsed = validate_url(url)?;

        tokio::time::timeout(limits.time_budget, self.fetch_inner(url, &parsed, limits, workdir))
            .await
            .map_err(|_| FetchError::timeout(url))?
    }

    async fn fetch_inner(
        &self,
        url: &str,
        parsed: &Url,
        limits: &FetchLimits,
        workdir: &Path,
    ) -> Result<TransientArtifact, FetchError> {
        // Tolerant HEAD probe. Many servers reject or mishandle HEAD, so
        // failures here are ignored and the GET proceeds regardless.
        let mut declared_size: Option<u64> = None;
        let mut probe_filename: Option<String> = None;
        if let Ok(resp) = self.client.head(parsed.clone()).send().await {
            if resp.status().is_success() {
                // HEAD responses carry no body, so read the advertised
                // length straight from the header.
                declared_size = header_content_length(&resp);
                probe_filename = header_filename(&resp);
            }
        }

        if let Some(size) = declared_size {
            if size > limits.size_limit {
                debug!(size, limit = limits.size_limit, "rejected by declared length");
                return Err(FetchError::size_exceeded(url, limits.size_limit, size, true));
            }
        }

        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| classify_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url, status.as_u16()));
        }

        let display_name = header_filename(&response)
            .or(probe_filename)
            .or_else(|| filename::filename_from_url(parsed))
            .unwrap_or_else(|| filename::fallback_filename(url));
        let display_name = filename::sanitize_filename(&display_name);
        let path = filename::resolve_unique_path(workdir, &display_name);

        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| FetchError::storage(&path, e))?;
        // Owns the temp file from here on; any early return below cleans it up.
        let mut artifact = TransientArtifact::new(path.clone(), display_name);
        let mut writer = tokio::io::BufWriter::new(file);

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify_request_error(url, e))?;
            received += chunk.len() as u64;
            if received > limits.size_limit {
                warn!(received, limit = limits.size_limit, "aborting oversized transfer");
                return Err(FetchError::size_exceeded(
                    url,
                    limits.size_limit,
                    received,
                    false,
                ));
            }
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| FetchError::storage(&path, e))?;
        }

        writer
            .flush()
            .await
            .map_err(|e| FetchError::storage(&path, e))?;

        artifact.set_size(received);
        debug!(size = received, path = %path.display(), "fetch complete");
        Ok(artifact)
    }
}

/// Validates that `url` parses and uses http or https with a host.
fn validate_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url.trim()).map_err(|_| FetchError::invalid_url(url))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(FetchError::invalid_url(url));
    }
    Ok(parsed)
}

fn header_content_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn header_filename(response: &reqwest::Response) -> Option<String> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    filename::parse_content_disposition(header)
}

fn classify_request_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::timeout(url)
    } else {
        FetchError::network(url, e)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn limits(size_limit: u64) -> FetchLimits {
        FetchLimits {
            size_limit,
            time_budget: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_validate_url_rejects_bad_schemes() {
        assert!(validate_url("https://example.com/a").is_ok());
        assert!(validate_url("http://example.com/a").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com/a"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_url("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_url("file:///etc/passwd"),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_streams_to_workdir() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 1024]))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/data.bin"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new().unwrap();
        let artifact = fetcher
            .fetch(
                &format!("{}/data.bin", server.uri()),
                &limits(10_000),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(artifact.size(), 1024);
        assert_eq!(artifact.filename(), "data.bin");
        assert_eq!(std::fs::read(artifact.path()).unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn test_fetch_rejects_declared_oversize_before_get() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/big.bin"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "5000"))
            .mount(&server)
            .await;
        // No GET mock: reaching GET would return 404, not SizeExceeded.

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new().unwrap();
        let err = fetcher
            .fetch(&format!("{}/big.bin", server.uri()), &limits(100), dir.path())
            .await
            .unwrap_err();

        match err {
            FetchError::SizeExceeded {
                declared, size, ..
            } => {
                assert!(declared);
                assert_eq!(size, 5000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_aborts_oversized_stream_and_cleans_up() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/liar.bin"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/liar.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 2048]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new().unwrap();
        let err = fetcher
            .fetch(
                &format!("{}/liar.bin", server.uri()),
                &limits(1024),
                dir.path(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::SizeExceeded {
                declared: false,
                ..
            }
        ));
        // The partial file must not linger in working storage.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_surfaces_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new().unwrap();
        let err = fetcher
            .fetch(&format!("{}/missing", server.uri()), &limits(100), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 64])
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new().unwrap();
        let err = fetcher
            .fetch(
                &format!("{}/slow", server.uri()),
                &FetchLimits {
                    size_limit: 10_000,
                    time_budget: Duration::from_millis(200),
                },
                dir.path(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Timeout { .. }));
        assert_eq!(
            std::fs::read_dir(dir.path()).unwrap().count(),
            0,
            "no transient files may survive a timed-out fetch"
        );
    }

    #[tokio::test]
    async fn test_fetch_uses_content_disposition_name() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/d"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/d"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", r#"attachment; filename="report.pdf""#)
                    .set_body_bytes(b"pdf".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new().unwrap();
        let artifact = fetcher
            .fetch(&format!("{}/d", server.uri()), &limits(100), dir.path())
            .await
            .unwrap();

        assert_eq!(artifact.filename(), "report.pdf");
    }
}
