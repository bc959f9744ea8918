use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `pipewright`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains. Uploaders intentionally do not
/// appear here: ordinary HTTP failures come back as a structured
/// `UploadResult`, never as an error, so batch callers can keep going.
#[derive(Debug, Error)]
pub enum PipewrightError {
    // ── Source validation ───────────────────────────────────────────────
    #[error("validate: {0}")]
    Validate(#[from] ValidateError),

    // ── Repository fetch ────────────────────────────────────────────────
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),

    // ── Config ──────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Source validation errors ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("could not determine host")]
    NoHost,

    #[error("host {host} is disallowed: {reason}")]
    Disallowed { host: String, reason: String },

    #[error("DNS resolution failed for {host}: {message}")]
    Resolution { host: String, message: String },
}

// ─── Repository fetch errors ────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("source rejected: {0}")]
    Rejected(#[from] ValidateError),

    #[error("failed to start version-control client: {0}")]
    Spawn(String),

    #[error("clone failed (exit {code}): {stderr}")]
    CloneFailed { code: i32, stderr: String },

    #[error("clone timed out after {secs}s and was killed")]
    Timeout { secs: u64 },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Config errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config {path}: {message}")]
    Load { path: String, message: String },

    #[error("missing publish target: {0}")]
    MissingTarget(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, PipewrightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_no_host_displays_reason() {
        let err = PipewrightError::Validate(ValidateError::NoHost);
        assert!(err.to_string().contains("could not determine host"));
    }

    #[test]
    fn fetch_timeout_displays_duration() {
        let err = PipewrightError::Fetch(FetchError::Timeout { secs: 120 });
        assert!(err.to_string().contains("120s"));
    }

    #[test]
    fn fetch_clone_failure_surfaces_stderr() {
        let err = FetchError::CloneFailed {
            code: 128,
            stderr: "fatal: repository not found".into(),
        };
        assert!(err.to_string().contains("repository not found"));
        assert!(err.to_string().contains("128"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let err: PipewrightError = anyhow_err.into();
        assert!(err.to_string().contains("something went wrong"));
    }

    #[test]
    fn validate_error_converts_to_fetch_error() {
        let err: FetchError = ValidateError::NoHost.into();
        assert!(err.to_string().contains("source rejected"));
    }
}
