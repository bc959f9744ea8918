use crate::cli::{Cli, Commands, PublishBackend};
use crate::config::{Config, RegistryTarget, ReleaseTarget, RepositoryTarget};
use crate::error::ConfigError;
use crate::publish::{
    Credential, GenericRepositoryUploader, RegistryUploader, ReleaseAssetUploader, RepoFlavor,
    UploadResult, Uploader,
};
use crate::retry::RetryPolicy;
use crate::sandbox::{NetworkMode, SandboxRunner, SandboxSpec};
use crate::source::{Fetcher, cleanup, validate};
use crate::util::digest::sha256_hex_file;
use anyhow::{Result, bail};
use std::path::Path;
use std::time::Duration;

/// Routes one parsed CLI invocation to the matching subsystem.
///
/// The surrounding generator layer consumes the same library entry points;
/// this binary surface exists for operators and for the generated pipeline
/// files themselves.
pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Validate { url } => run_validate(&url).await,
        Commands::Fetch { url, keep } => run_fetch(&config, &url, keep).await,
        Commands::Exec {
            dir,
            image,
            timeout,
            allow_network,
            commands,
        } => run_exec(&config, &dir, image, timeout, allow_network, commands).await,
        Commands::Publish { backend, file, tag } => {
            run_publish(&config, backend, &file, tag).await
        }
    }
}

async fn run_validate(url: &str) -> Result<()> {
    let verdict = validate(url).await;
    if verdict.allowed {
        println!("allowed: {url}");
        Ok(())
    } else {
        let reason = verdict.reason.unwrap_or_else(|| "rejected".to_string());
        bail!("rejected: {reason}")
    }
}

async fn run_fetch(config: &Config, url: &str, keep: bool) -> Result<()> {
    let fetcher = Fetcher::with_timeout(Duration::from_secs(config.fetch.timeout_secs));
    let dir = fetcher.fetch(url).await?;
    println!("{}", dir.display());
    if !keep {
        cleanup(&dir).await?;
    }
    Ok(())
}

async fn run_exec(
    config: &Config,
    dir: &Path,
    image: Option<String>,
    timeout: Option<u64>,
    allow_network: bool,
    commands: Vec<String>,
) -> Result<()> {
    let spec = SandboxSpec {
        cpus: config.sandbox.cpus,
        memory: config.sandbox.memory.clone(),
        pids_limit: config.sandbox.pids_limit,
        network: if allow_network {
            NetworkMode::Bridged
        } else {
            NetworkMode::Isolated
        },
    };
    let image = image.unwrap_or_else(|| config.sandbox.image.clone());
    let timeout = Duration::from_secs(timeout.unwrap_or(config.sandbox.timeout_secs));

    let outcome = SandboxRunner::new()
        .run(dir, &commands, &image, timeout, &spec)
        .await;

    print!("{}", outcome.stdout);
    eprint!("{}", outcome.stderr);
    if outcome.exit_code != 0 {
        bail!("sandboxed run exited with code {}", outcome.exit_code);
    }
    Ok(())
}

async fn run_publish(
    config: &Config,
    backend: PublishBackend,
    file: &Path,
    tag: Option<String>,
) -> Result<()> {
    let policy = RetryPolicy::new(
        config.retry.attempts,
        Duration::from_secs_f64(config.retry.base_delay_secs),
    );

    if let Ok(sha256) = sha256_hex_file(file).await {
        tracing::info!(
            file = %file.display(),
            sha256 = sha256.as_str(),
            backend = ?backend,
            "publishing artifact"
        );
    }

    let result = match backend {
        PublishBackend::Nexus => {
            let target = require(config.publish.nexus.as_ref(), "publish.nexus")?;
            generic_uploader(RepoFlavor::Nexus, target, policy)
                .upload(file)
                .await
        }
        PublishBackend::Artifactory => {
            let target = require(config.publish.artifactory.as_ref(), "publish.artifactory")?;
            generic_uploader(RepoFlavor::Artifactory, target, policy)
                .upload(file)
                .await
        }
        PublishBackend::Release => {
            let target = require(config.publish.release.as_ref(), "publish.release")?;
            release_uploader(target, tag, policy).upload(file).await
        }
        PublishBackend::Registry => {
            let target = require(config.publish.registry.as_ref(), "publish.registry")?;
            registry_uploader(target, tag, policy).upload(file).await
        }
    };

    report(&result)
}

fn require<'a, T>(target: Option<&'a T>, table: &str) -> Result<&'a T> {
    target.ok_or_else(|| ConfigError::MissingTarget(table.to_string()).into())
}

fn generic_uploader(
    flavor: RepoFlavor,
    target: &RepositoryTarget,
    policy: RetryPolicy,
) -> GenericRepositoryUploader {
    GenericRepositoryUploader::new(
        flavor,
        target.base_url.clone(),
        target.repository.clone(),
        basic_credential(target.username.as_deref(), target.password.as_deref()),
    )
    .with_policy(policy)
}

fn release_uploader(
    target: &ReleaseTarget,
    tag: Option<String>,
    policy: RetryPolicy,
) -> ReleaseAssetUploader {
    ReleaseAssetUploader::new(
        target.api_url.clone(),
        target.owner.clone(),
        target.repo.clone(),
        target.token.clone(),
        tag.or_else(|| target.tag.clone()),
    )
    .with_policy(policy)
}

fn registry_uploader(
    target: &RegistryTarget,
    tag: Option<String>,
    policy: RetryPolicy,
) -> RegistryUploader {
    let credential = match (&target.token, &target.username) {
        (Some(token), _) => Credential::Bearer(token.clone()),
        (None, Some(_)) => {
            basic_credential(target.username.as_deref(), target.password.as_deref())
        }
        (None, None) => Credential::Anonymous,
    };
    RegistryUploader::new(
        target.base_url.clone(),
        target.repository.clone(),
        credential,
        tag.unwrap_or_else(|| target.tag.clone()),
    )
    .with_policy(policy)
}

fn basic_credential(username: Option<&str>, password: Option<&str>) -> Credential {
    match username {
        Some(username) => Credential::Basic {
            username: username.to_string(),
            password: password.unwrap_or_default().to_string(),
        },
        None => Credential::Anonymous,
    }
}

fn report(result: &UploadResult) -> Result<()> {
    if result.success {
        println!("{}", result.message);
        Ok(())
    } else {
        bail!("{}", result.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_backend_table_is_a_config_error() {
        let err = require::<RepositoryTarget>(None, "publish.nexus").expect_err("must fail");
        assert!(err.to_string().contains("publish.nexus"));
    }

    #[test]
    fn credential_selection_prefers_token_over_basic() {
        let target = RegistryTarget {
            base_url: "https://r.example.com".into(),
            repository: "team/app".into(),
            token: Some("tok".into()),
            username: Some("ci".into()),
            password: Some("pw".into()),
            tag: "latest".into(),
        };
        let uploader = registry_uploader(&target, None, RetryPolicy::default());
        assert_eq!(uploader.name(), "registry");
    }

    #[test]
    fn anonymous_when_no_username() {
        assert!(matches!(
            basic_credential(None, Some("pw")),
            Credential::Anonymous
        ));
        assert!(matches!(
            basic_credential(Some("u"), None),
            Credential::Basic { .. }
        ));
    }

    #[tokio::test]
    async fn failed_upload_result_becomes_an_error() {
        let failure = UploadResult::failed("upload rejected with status 401: unauthorized");
        let err = report(&failure).expect_err("must fail");
        assert!(err.to_string().contains("401"));
    }
}
