use super::{
    Artifact, CHECKSUM_HEADER, Credential, StatusOutcome, UploadResult, Uploader,
    build_publish_client, classify_status, honor_retry_after, missing_file_result, trim_base,
};
use crate::retry::{RetryPolicy, retry};
use reqwest::Client;
use serde_json::{Value, json};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// GitHub-Releases-style uploader: create (or find) a release for a tag,
/// resolve its upload endpoint, POST the asset.
/// Failure of the release-resolution chain, split so terminal rejections
/// abort immediately while transient ones bubble into the retry coordinator.
enum ResolveError {
    Terminal(String),
    Transient(anyhow::Error),
}

impl From<reqwest::Error> for ResolveError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transient(e.into())
    }
}

pub struct ReleaseAssetUploader {
    client: Client,
    api_url: String,
    owner: String,
    repo: String,
    token: String,
    tag: String,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ReleaseAssetUploader {
    pub fn new(
        api_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
        tag: Option<String>,
    ) -> Self {
        Self {
            client: build_publish_client(),
            api_url: api_url.into(),
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
            tag: tag.unwrap_or_else(generated_tag),
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

    fn releases_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases",
            trim_base(&self.api_url),
            self.owner,
            self.repo
        )
    }

    fn credential(&self) -> Credential {
        Credential::Bearer(self.token.clone())
    }

    /// Create-or-find chain: attempt to create the release; if that fails
    /// (typically because the tag already has one), look it up by tag; if
    /// that also fails, list releases and take the first. Deliberately
    /// degraded but non-fatal.
    ///
    /// When the whole chain fails on terminal statuses (a bad token turns
    /// every step into a 4xx), the failure is terminal too: re-issuing the
    /// same rejected requests would burn the retry budget for nothing.
    async fn resolve_upload_url(&self) -> Result<String, ResolveError> {
        let cred = self.credential();
        let mut transient_seen = false;

        let create = cred
            .apply(self.client.post(self.releases_url()))
            .json(&json!({ "tag_name": self.tag, "name": self.tag }))
            .send()
            .await?;
        let create_status = create.status().as_u16();
        if create.status().is_success() {
            let body: Value = create.json().await?;
            return extract_upload_url(&body);
        }
        transient_seen |= classify_status(create_status) == StatusOutcome::TransientRetry;
        tracing::debug!(
            status = create_status,
            tag = self.tag.as_str(),
            "release create failed, looking up existing release by tag"
        );

        let by_tag = cred
            .apply(
                self.client
                    .get(format!("{}/tags/{}", self.releases_url(), self.tag)),
            )
            .send()
            .await?;
        let by_tag_status = by_tag.status().as_u16();
        if by_tag.status().is_success() {
            let body: Value = by_tag.json().await?;
            return extract_upload_url(&body);
        }
        transient_seen |= classify_status(by_tag_status) == StatusOutcome::TransientRetry;
        tracing::debug!(
            status = by_tag_status,
            tag = self.tag.as_str(),
            "tag lookup failed, falling back to first listed release"
        );

        let list = cred.apply(self.client.get(self.releases_url())).send().await?;
        let list_status = list.status().as_u16();
        if list.status().is_success() {
            let body: Value = list.json().await?;
            if let Some(first) = body.as_array().and_then(|releases| releases.first()) {
                return extract_upload_url(first);
            }
        } else {
            transient_seen |= classify_status(list_status) == StatusOutcome::TransientRetry;
        }

        let message = format!(
            "could not resolve a release for tag {} on {}/{} (create {create_status}, tag lookup {by_tag_status}, list {list_status})",
            self.tag, self.owner, self.repo
        );
        if transient_seen {
            Err(ResolveError::Transient(anyhow::anyhow!(message)))
        } else {
            Err(ResolveError::Terminal(message))
        }
    }

    async fn attempt(&self, file: &Path) -> anyhow::Result<UploadResult> {
        let artifact = Artifact::load(file).await?;
        let upload_url = match self.resolve_upload_url().await {
            Ok(url) => url,
            Err(ResolveError::Terminal(message)) => return Ok(UploadResult::failed(message)),
            Err(ResolveError::Transient(e)) => return Err(e),
        };
        let endpoint = upload_endpoint(&upload_url, &artifact.file_name);
        tracing::debug!(endpoint = endpoint.as_str(), "posting release asset");

        let response = self
            .credential()
            .apply(self.client.post(&endpoint))
            .header(CHECKSUM_HEADER, &artifact.sha256)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(artifact.bytes.clone())
            .send()
            .await?;

        let code = response.status().as_u16();
        match classify_status(code) {
            StatusOutcome::Success => Ok(UploadResult::ok(format!(
                "published {} as release asset for tag {} ({} bytes, sha256:{})",
                artifact.file_name,
                self.tag,
                artifact.size(),
                artifact.sha256
            ))),
            StatusOutcome::TransientRetry => {
                honor_retry_after(response.headers()).await;
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("transient status {code}: {body}")
            }
            StatusOutcome::TerminalFailure => {
                let body = response.text().await.unwrap_or_default();
                Ok(UploadResult::failed(format!(
                    "asset upload rejected with status {code}: {body}"
                )))
            }
        }
    }
}

impl Uploader for ReleaseAssetUploader {
    fn name(&self) -> &str {
        "release"
    }

    fn upload<'a>(
        &'a self,
        file: &'a Path,
    ) -> Pin<Box<dyn Future<Output = UploadResult> + Send + 'a>> {
        Box::pin(async move {
            if !file.exists() {
                return missing_file_result(file);
            }
            match retry(self.policy, &self.cancel, || self.attempt(file)).await {
                Ok(result) => result,
                Err(e) => UploadResult::failed(format!(
                    "release upload failed after {} attempts: {e:#}",
                    self.policy.attempts
                )),
            }
        })
    }
}

fn generated_tag() -> String {
    chrono::Utc::now().format("build-%Y%m%d%H%M%S").to_string()
}

fn extract_upload_url(release: &Value) -> Result<String, ResolveError> {
    release
        .get("upload_url")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| ResolveError::Terminal("release response carries no upload_url".to_string()))
}

/// The API returns a templated endpoint like
/// `https://uploads.example.com/.../assets{?name,label}`; strip the template
/// placeholder and pass the asset name explicitly.
fn upload_endpoint(upload_url: &str, file_name: &str) -> String {
    let trimmed = upload_url.split('{').next().unwrap_or(upload_url);
    format!("{trimmed}?name={file_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_template_placeholder() {
        assert_eq!(
            upload_endpoint(
                "https://uploads.example.com/repos/o/r/releases/1/assets{?name,label}",
                "app.tar.gz"
            ),
            "https://uploads.example.com/repos/o/r/releases/1/assets?name=app.tar.gz"
        );
    }

    #[test]
    fn endpoint_without_template_gets_name_appended() {
        assert_eq!(
            upload_endpoint("https://uploads.example.com/assets", "app.jar"),
            "https://uploads.example.com/assets?name=app.jar"
        );
    }

    #[test]
    fn upload_url_extraction() {
        let body = json!({ "upload_url": "https://u.example.com/a{?name,label}" });
        let url = extract_upload_url(&body).unwrap_or_else(|_| panic!("upload_url must extract"));
        assert_eq!(url, "https://u.example.com/a{?name,label}");
        assert!(extract_upload_url(&json!({})).is_err());
    }

    #[test]
    fn generated_tag_is_timestamped() {
        let tag = generated_tag();
        assert!(tag.starts_with("build-"));
        assert_eq!(tag.len(), "build-20260829120000".len());
    }

    #[tokio::test]
    async fn missing_file_fails_fast() {
        let uploader = ReleaseAssetUploader::new(
            "https://api.invalid",
            "owner",
            "repo",
            "tok",
            Some("v1".into()),
        );
        let result = uploader.upload(Path::new("/nonexistent/a.tgz")).await;
        assert!(!result.success);
        assert!(result.message.contains("does not exist"));
    }
}
