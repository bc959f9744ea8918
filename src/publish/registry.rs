use super::{
    Artifact, Credential, StatusOutcome, UploadResult, Uploader, build_publish_client,
    classify_status, honor_retry_after, missing_file_result, trim_base,
};
use crate::retry::{RetryPolicy, retry};
use crate::util::digest;
use reqwest::{Client, Response};
use serde_json::{Value, json};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Media type of the published manifest (schema version 2).
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Container-registry V2 push: chunked blob upload sessions for the layer
/// and a synthesized single-layer image config, then a schema-2 manifest
/// referencing both, then best-effort tag verification.
///
/// Blob sessions are not resumable across attempts, so any step's failure
/// aborts the whole sequence and the retry coordinator restarts the upload
/// from session init.
pub struct RegistryUploader {
    client: Client,
    base_url: String,
    repository: String,
    credential: Credential,
    tag: String,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

/// One in-progress chunked upload. Valid only between session init and
/// commit; discarded after commit or on error.
struct BlobUploadSession {
    location: Url,
}

/// Per-step failure split: transient errors bubble into the retry
/// coordinator, terminal ones abort immediately with a reportable message.
enum StepError {
    Terminal(String),
    Transient(anyhow::Error),
}

impl From<reqwest::Error> for StepError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transient(e.into())
    }
}

type StepResult<T> = Result<T, StepError>;

impl RegistryUploader {
    pub fn new(
        base_url: impl Into<String>,
        repository: impl Into<String>,
        credential: Credential,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            client: build_publish_client(),
            base_url: base_url.into(),
            repository: repository.into(),
            credential,
            tag: tag.into(),
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

    fn v2_url(&self, suffix: &str) -> String {
        format!(
            "{}/v2/{}/{suffix}",
            trim_base(&self.base_url),
            self.repository
        )
    }

    async fn attempt(&self, file: &Path) -> anyhow::Result<UploadResult> {
        let artifact = Artifact::load(file).await?;
        match self.push_all(&artifact).await {
            Ok(message) => Ok(UploadResult::ok(message)),
            Err(StepError::Terminal(message)) => Ok(UploadResult::failed(message)),
            Err(StepError::Transient(e)) => Err(e),
        }
    }

    /// The full push sequence: layer blob, synthesized config blob, manifest,
    /// tag verification.
    async fn push_all(&self, artifact: &Artifact) -> StepResult<String> {
        let layer_digest = artifact.sha256.clone();
        let layer_size = artifact.size();
        self.push_blob(artifact.bytes.clone(), &layer_digest, "layer")
            .await?;

        let config = image_config(&layer_digest);
        let config_digest = digest::sha256_hex(&config);
        let config_size = config.len() as u64;
        self.push_blob(config, &config_digest, "config").await?;

        let manifest = manifest_document(&config_digest, config_size, &layer_digest, layer_size);
        let manifest_url = self.v2_url(&format!("manifests/{}", self.tag));
        tracing::info!(
            url = manifest_url.as_str(),
            layer = layer_digest.as_str(),
            config = config_digest.as_str(),
            "publishing manifest"
        );
        let response = self
            .credential
            .apply(self.client.put(&manifest_url))
            .header(reqwest::header::CONTENT_TYPE, MANIFEST_MEDIA_TYPE)
            .body(manifest)
            .send()
            .await?;
        check_step(response, "manifest publish").await?;

        // The manifest PUT is the authoritative success signal; tag-list
        // visibility is best effort because registries may not expose the
        // tag immediately.
        let target = format!("{}:{}", self.repository, self.tag);
        if self.tag_visible().await {
            Ok(format!(
                "pushed {target} (layer sha256:{layer_digest}); tag confirmed in registry tag list"
            ))
        } else {
            Ok(format!(
                "pushed {target} (layer sha256:{layer_digest}); tag list verification inconclusive"
            ))
        }
    }

    /// Init → patch → commit for one content-addressed blob.
    async fn push_blob(&self, bytes: Vec<u8>, digest_hex: &str, what: &str) -> StepResult<()> {
        let session = self.start_session(what).await?;
        tracing::debug!(
            what,
            session = session.location.as_str(),
            size = bytes.len(),
            "blob session open"
        );

        let response = self
            .credential
            .apply(self.client.patch(session.location.clone()))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        let response = check_step(response, &format!("{what} blob chunk upload"))
            .await?;
        // The registry may rotate the session URL on every chunk.
        let commit_base = match location_header(&response) {
            Some(location) => self.normalize_location(&location)?,
            None => session.location,
        };

        let mut commit_url = commit_base;
        commit_url
            .query_pairs_mut()
            .append_pair("digest", &format!("sha256:{digest_hex}"));
        let response = self
            .credential
            .apply(self.client.put(commit_url))
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await?;
        check_step(response, &format!("{what} blob commit"))
            .await?;
        tracing::debug!(what, digest = digest_hex, "blob committed");
        Ok(())
    }

    async fn start_session(&self, what: &str) -> StepResult<BlobUploadSession> {
        let response = self
            .credential
            .apply(self.client.post(self.v2_url("blobs/uploads/")))
            .send()
            .await?;
        let response = check_step(response, &format!("{what} blob session init"))
            .await?;
        let location = location_header(&response).ok_or_else(|| {
            StepError::Terminal(format!(
                "{what} blob session init returned no Location header"
            ))
        })?;
        Ok(BlobUploadSession {
            location: self.normalize_location(&location)?,
        })
    }

    /// Registries return `Location` either absolute or repository-relative;
    /// relative ones are resolved against the base URL.
    fn normalize_location(&self, location: &str) -> StepResult<Url> {
        let base = Url::parse(trim_base(&self.base_url))
            .map_err(|e| StepError::Terminal(format!("registry base URL is invalid: {e}")))?;
        base.join(location)
            .map_err(|e| StepError::Terminal(format!("registry Location {location} is invalid: {e}")))
    }

    async fn tag_visible(&self) -> bool {
        let response = match self
            .credential
            .apply(self.client.get(self.v2_url("tags/list")))
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            _ => return false,
        };
        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(_) => return false,
        };
        body.get("tags")
            .and_then(Value::as_array)
            .is_some_and(|tags| tags.iter().any(|t| t.as_str() == Some(self.tag.as_str())))
    }
}

impl Uploader for RegistryUploader {
    fn name(&self) -> &str {
        "registry"
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
                    "registry upload failed after {} attempts: {e:#}",
                    self.policy.attempts
                )),
            }
        })
    }
}

/// Classifies one response; consumes it for its error body on failure.
async fn check_step(response: Response, step: &str) -> StepResult<Response> {
    let code = response.status().as_u16();
    match classify_status(code) {
        StatusOutcome::Success => Ok(response),
        StatusOutcome::TransientRetry => {
            honor_retry_after(response.headers()).await;
            let body = response.text().await.unwrap_or_default();
            Err(StepError::Transient(anyhow::anyhow!(
                "{step}: transient status {code}: {body}"
            )))
        }
        StatusOutcome::TerminalFailure => {
            let body = response.text().await.unwrap_or_default();
            Err(StepError::Terminal(format!(
                "{step} failed with status {code}: {body}"
            )))
        }
    }
}

fn location_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Minimal single-layer image config. The layer digest goes into
/// `rootfs.diff_ids`; the config's own digest and size are computed from
/// exactly these bytes.
fn image_config(layer_digest: &str) -> Vec<u8> {
    json!({
        "created": chrono::Utc::now().to_rfc3339(),
        "architecture": "amd64",
        "os": "linux",
        "config": {
            "Entrypoint": ["/bin/sh"]
        },
        "rootfs": {
            "type": "layers",
            "diff_ids": [format!("sha256:{layer_digest}")]
        }
    })
    .to_string()
    .into_bytes()
}

/// Schema-2 manifest referencing the config blob and the single layer,
/// digests taken from the bytes actually committed.
fn manifest_document(
    config_digest: &str,
    config_size: u64,
    layer_digest: &str,
    layer_size: u64,
) -> Vec<u8> {
    json!({
        "schemaVersion": 2,
        "mediaType": MANIFEST_MEDIA_TYPE,
        "config": {
            "mediaType": CONFIG_MEDIA_TYPE,
            "digest": format!("sha256:{config_digest}"),
            "size": config_size
        },
        "layers": [{
            "mediaType": LAYER_MEDIA_TYPE,
            "digest": format!("sha256:{layer_digest}"),
            "size": layer_size
        }]
    })
    .to_string()
    .into_bytes()
}
