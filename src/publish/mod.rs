pub mod generic;
pub mod registry;
pub mod release;
pub mod status;

pub use generic::{GenericRepositoryUploader, RepoFlavor};
pub use registry::RegistryUploader;
pub use release::ReleaseAssetUploader;
pub use status::{StatusOutcome, classify_status};

use crate::util::digest;
use reqwest::{Client, RequestBuilder, header::HeaderMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

/// Checksum header attached to every uploaded body.
pub const CHECKSUM_HEADER: &str = "X-Checksum-Sha256";

/// Outcome of one `upload()` call. Ordinary HTTP failures come back through
/// this type, never as an error, so batch callers can continue with their
/// remaining artifacts.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub success: bool,
    pub message: String,
}

impl UploadResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Credential attached to one upload target.
#[derive(Debug, Clone)]
pub enum Credential {
    Basic { username: String, password: String },
    Bearer(String),
    Anonymous,
}

impl Credential {
    pub(crate) fn apply(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Basic { username, password } => req.basic_auth(username, Some(password)),
            Self::Bearer(token) => req.bearer_auth(token),
            Self::Anonymous => req,
        }
    }
}

/// One local file staged for publication. Loaded fresh per upload attempt so
/// the digest always reflects the file's current bytes.
#[derive(Debug)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub sha256: String,
}

impl Artifact {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let sha256 = digest::sha256_hex(&bytes);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            bytes,
            sha256,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// The artifact upload contract shared by all backends.
///
/// Implementations are stateless across calls beyond their immutable
/// connection parameters and retry policy, so concurrent `upload()` calls —
/// including duplicates of the same file — are independent and safe.
pub trait Uploader: Send + Sync {
    fn name(&self) -> &str;

    fn upload<'a>(
        &'a self,
        file: &'a Path,
    ) -> Pin<Box<dyn Future<Output = UploadResult> + Send + 'a>>;
}

/// Shared HTTP client for all publish backends: explicit timeouts and pool
/// tuning, identical construction everywhere.
pub fn build_publish_client() -> Client {
    Client::builder()
        .user_agent(concat!("pipewright/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Fast-failure result for a missing local file; no I/O is attempted.
pub(crate) fn missing_file_result(file: &Path) -> UploadResult {
    UploadResult::failed(format!("file does not exist: {}", file.display()))
}

/// Honors a `Retry-After` header (seconds form) on a rate-limited response by
/// sleeping before the retry coordinator schedules the next attempt.
pub(crate) async fn honor_retry_after(headers: &HeaderMap) {
    let Some(secs) = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    else {
        return;
    };
    // Bound what a hostile server can make us wait.
    let secs = secs.min(60);
    tracing::info!(secs, "rate limited; honoring Retry-After");
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

/// Strips a trailing slash so URL assembly never doubles separators.
pub(crate) fn trim_base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, RETRY_AFTER};

    #[test]
    fn missing_file_result_embeds_the_path() {
        let result = missing_file_result(Path::new("/tmp/nope.tar.gz"));
        assert!(!result.success);
        assert!(result.message.contains("/tmp/nope.tar.gz"));
    }

    #[test]
    fn trim_base_strips_trailing_slashes_only() {
        assert_eq!(trim_base("https://nexus.example.com/"), "https://nexus.example.com");
        assert_eq!(trim_base("https://nexus.example.com"), "https://nexus.example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("86400"));
        let start = tokio::time::Instant::now();
        honor_retry_after(&headers).await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn absent_or_malformed_retry_after_is_ignored() {
        let headers = HeaderMap::new();
        honor_retry_after(&headers).await;

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015"));
        honor_retry_after(&headers).await;
    }

    #[tokio::test]
    async fn artifact_load_digests_current_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.jar");
        tokio::fs::write(&path, b"v1").await.unwrap();
        let first = Artifact::load(&path).await.unwrap();

        tokio::fs::write(&path, b"v2 with more bytes").await.unwrap();
        let second = Artifact::load(&path).await.unwrap();

        assert_ne!(first.sha256, second.sha256);
        assert_eq!(second.size(), 18);
        assert_eq!(second.file_name, "lib.jar");
    }
}
