use crate::error::FetchError;
use crate::source::validator;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

/// Default wall-clock budget for one shallow clone.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;

/// Obtains a shallow copy of a validated remote repository into an ephemeral
/// directory by invoking the system git client as a subprocess.
///
/// Every failure path deletes the ephemeral directory (clearing read-only
/// attributes first — git marks pack files read-only). On success the caller
/// owns the directory and is responsible for calling [`cleanup`] eventually.
pub struct Fetcher {
    timeout: Duration,
    vcs_binary: String,
}

impl Fetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            vcs_binary: "git".to_string(),
        }
    }

    /// Points the fetcher at a different VCS binary. Test hook.
    pub fn with_vcs_binary(mut self, binary: impl Into<String>) -> Self {
        self.vcs_binary = binary.into();
        self
    }

    /// Shallow-clones `url` into a fresh temp directory and returns its path.
    ///
    /// Re-validates the URL before any I/O; a caller that skipped validation
    /// is not trusted. The URL is passed as a single argv element, never
    /// interpolated into a shell string.
    pub async fn fetch(&self, url: &str) -> Result<PathBuf, FetchError> {
        validator::ensure_allowed(url).await?;

        let dir = std::env::temp_dir().join(format!("pipewright-fetch-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(url, dir = %dir.display(), "starting shallow clone");

        let mut cmd = Command::new(&self.vcs_binary);
        cmd.arg("clone")
            .arg("--depth")
            .arg("1")
            .arg(url)
            .arg(".")
            .current_dir(&dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a timeout kill reaches git's helper processes,
        // not just the direct child.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                cleanup(&dir).await.ok();
                return Err(FetchError::Spawn(e.to_string()));
            }
        };
        let child_pid = child.id();

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if output.status.success() {
                    tracing::info!(dir = %dir.display(), "clone complete");
                    Ok(dir)
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    let code = output.status.code().unwrap_or(-1);
                    tracing::warn!(url, code, "clone failed");
                    cleanup(&dir).await.ok();
                    Err(FetchError::CloneFailed { code, stderr })
                }
            }
            Ok(Err(e)) => {
                cleanup(&dir).await.ok();
                Err(FetchError::Io(e))
            }
            Err(_) => {
                // Dropping the timed-out future killed the direct child
                // (kill_on_drop); sweep the rest of its process group.
                kill_process_group(child_pid).await;
                tracing::warn!(url, secs = self.timeout.as_secs(), "clone timed out");
                cleanup(&dir).await.ok();
                Err(FetchError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Deletes a fetched directory, clearing read-only attributes first.
///
/// Exposed separately because on success the fetcher hands directory
/// ownership to the caller.
pub async fn cleanup(path: &Path) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if !path.exists() {
            return Ok(());
        }
        clear_readonly(&path)?;
        std::fs::remove_dir_all(&path)
    })
    .await
    .map_err(std::io::Error::other)?
}

fn clear_readonly(path: &Path) -> std::io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;
    let mut perms = metadata.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)?;
    }
    if metadata.is_dir() {
        for entry in std::fs::read_dir(path)? {
            clear_readonly(&entry?.path())?;
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    // The clone child was started in its own process group (pgid == pid).
    let _ = Command::new("kill")
        .arg("-KILL")
        .arg(format!("-{pid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

#[cfg(not(unix))]
async fn kill_process_group(_pid: Option<u32>) {}
