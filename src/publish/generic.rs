use super::{
    Artifact, CHECKSUM_HEADER, Credential, StatusOutcome, UploadResult, Uploader,
    build_publish_client, classify_status, honor_retry_after, missing_file_result, trim_base,
};
use crate::retry::{RetryPolicy, retry};
use reqwest::Client;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// URL shape of a generic artifact repository. Nexus and Artifactory share
/// the upload algorithm; only the path layout differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoFlavor {
    Nexus,
    Artifactory,
}

impl RepoFlavor {
    fn artifact_url(self, base_url: &str, repository: &str, file_name: &str) -> String {
        let base = trim_base(base_url);
        match self {
            Self::Nexus => format!("{base}/repository/{repository}/{file_name}"),
            Self::Artifactory => format!("{base}/{repository}/{file_name}"),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Nexus => "nexus",
            Self::Artifactory => "artifactory",
        }
    }
}

/// Single-PUT uploader with checksum header and HEAD-based size
/// verification.
pub struct GenericRepositoryUploader {
    client: Client,
    flavor: RepoFlavor,
    base_url: String,
    repository: String,
    credential: Credential,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl GenericRepositoryUploader {
    pub fn new(
        flavor: RepoFlavor,
        base_url: impl Into<String>,
        repository: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            client: build_publish_client(),
            flavor,
            base_url: base_url.into(),
            repository: repository.into(),
            credential,
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn attempt(&self, file: &Path, url: &str) -> anyhow::Result<UploadResult> {
        let artifact = Artifact::load(file).await?;
        tracing::debug!(
            url,
            size = artifact.size(),
            sha256 = artifact.sha256.as_str(),
            "uploading artifact"
        );

        let response = self
            .credential
            .apply(self.client.put(url))
            .header(CHECKSUM_HEADER, &artifact.sha256)
            .body(artifact.bytes.clone())
            .send()
            .await?;

        let code = response.status().as_u16();
        match classify_status(code) {
            StatusOutcome::Success => self.verify_size(url, &artifact).await,
            StatusOutcome::TransientRetry => {
                honor_retry_after(response.headers()).await;
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("transient status {code}: {body}")
            }
            StatusOutcome::TerminalFailure => {
                let body = response.text().await.unwrap_or_default();
                Ok(UploadResult::failed(format!(
                    "upload rejected with status {code}: {body}"
                )))
            }
        }
    }

    /// The PUT succeeding is not enough: a remote that reports a different
    /// size has silently truncated the artifact, and that must not pass as
    /// success.
    async fn verify_size(&self, url: &str, artifact: &Artifact) -> anyhow::Result<UploadResult> {
        let head = self.credential.apply(self.client.head(url)).send().await?;

        let remote_len = head
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if let Some(remote) = remote_len
            && remote != artifact.size()
        {
            return Ok(UploadResult::failed(format!(
                "size mismatch after upload of {}: remote reports {remote} bytes, local file is {} bytes",
                artifact.file_name,
                artifact.size()
            )));
        }

        Ok(UploadResult::ok(format!(
            "uploaded {} ({} bytes, sha256:{})",
            artifact.file_name,
            artifact.size(),
            artifact.sha256
        )))
    }
}

impl Uploader for GenericRepositoryUploader {
    fn name(&self) -> &str {
        self.flavor.name()
    }

    fn upload<'a>(
        &'a self,
        file: &'a Path,
    ) -> Pin<Box<dyn Future<Output = UploadResult> + Send + 'a>> {
        Box::pin(async move {
            if !file.exists() {
                return missing_file_result(file);
            }
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "artifact".to_string());
            let url = self
                .flavor
                .artifact_url(&self.base_url, &self.repository, &file_name);

            match retry(self.policy, &self.cancel, || self.attempt(file, &url)).await {
                Ok(result) => result,
                Err(e) => UploadResult::failed(format!(
                    "{} upload failed after {} attempts: {e:#}",
                    self.name(),
                    self.policy.attempts
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nexus_url_shape() {
        assert_eq!(
            RepoFlavor::Nexus.artifact_url("https://nexus.example.com/", "releases", "app.jar"),
            "https://nexus.example.com/repository/releases/app.jar"
        );
    }

    #[test]
    fn artifactory_url_shape() {
        assert_eq!(
            RepoFlavor::Artifactory.artifact_url("https://repo.example.com", "libs-release", "app.jar"),
            "https://repo.example.com/libs-release/app.jar"
        );
    }

    #[tokio::test]
    async fn missing_file_fails_fast_without_io() {
        let uploader = GenericRepositoryUploader::new(
            RepoFlavor::Nexus,
            "https://nexus.invalid",
            "releases",
            Credential::Anonymous,
        );
        let result = uploader.upload(Path::new("/nonexistent/app.jar")).await;
        assert!(!result.success);
        assert!(result.message.contains("does not exist"));
    }
}
