use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use uuid::Uuid;

/// Exit code reserved for "sandbox runtime unavailable". Distinct from any
/// command's own failure so callers can fall back to unsandboxed execution.
pub const RUNTIME_UNAVAILABLE_EXIT: i32 = -2;

/// Exit code for a run that exceeded its wall-clock budget.
pub const TIMEOUT_EXIT: i32 = -1;

/// In-sandbox mount point for the caller's working directory.
const WORK_MOUNT: &str = "/work";

/// How long the availability probe may take before the runtime is considered
/// unreachable.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for the kill/reap/drain sequence after a timeout. The runtime
/// itself may be the wedged component, so teardown cannot wait on it
/// open-endedly.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Network mode for one sandboxed run. Isolated (no egress) unless the
/// caller explicitly relaxes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Isolated,
    Bridged,
}

/// Resource envelope for one execution. Callers override per call.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub cpus: f64,
    pub memory: String,
    pub pids_limit: u32,
    pub network: NetworkMode,
}

impl Default for SandboxSpec {
    fn default() -> Self {
        Self {
            cpus: 1.0,
            memory: "512m".to_string(),
            pids_limit: 256,
            network: NetworkMode::Isolated,
        }
    }
}

/// Result of one sandboxed run.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionOutcome {
    fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            exit_code: RUNTIME_UNAVAILABLE_EXIT,
            stdout: String::new(),
            stderr: detail.into(),
        }
    }
}

/// Runs untrusted build commands inside a resource-bounded container.
pub struct SandboxRunner {
    runtime_bin: String,
}

impl SandboxRunner {
    pub fn new() -> Self {
        Self::with_runtime("docker")
    }

    pub fn with_runtime(runtime_bin: impl Into<String>) -> Self {
        Self {
            runtime_bin: runtime_bin.into(),
        }
    }

    /// Lightweight probe: is the container runtime reachable at all?
    pub async fn runtime_available(&self) -> bool {
        let probe = Command::new(&self.runtime_bin)
            .arg("version")
            .arg("--format")
            .arg("{{.Server.Version}}")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, probe).await,
            Ok(Ok(status)) if status.success()
        )
    }

    /// Executes `commands` inside an isolated container with `working_dir`
    /// mounted read-write at `/work`.
    ///
    /// Commands are joined with a logical AND so the first failure stops the
    /// sequence, and are defanged before inclusion in the single in-container
    /// shell invocation since they originate from heuristic analysis of an
    /// untrusted repository. On timeout the container is force-killed and the
    /// outcome carries exit code [`TIMEOUT_EXIT`] plus whatever output was
    /// captured. If the runtime is unreachable, returns
    /// [`RUNTIME_UNAVAILABLE_EXIT`] immediately.
    pub async fn run(
        &self,
        working_dir: &Path,
        commands: &[String],
        image: &str,
        timeout: Duration,
        spec: &SandboxSpec,
    ) -> ExecutionOutcome {
        if !self.runtime_available().await {
            tracing::warn!(runtime = self.runtime_bin.as_str(), "sandbox runtime unavailable");
            return ExecutionOutcome::unavailable("sandbox runtime unavailable");
        }

        let name = format!("pipewright-run-{}", Uuid::new_v4());
        let args = build_run_args(&name, working_dir, commands, image, spec);
        tracing::info!(
            image,
            container = name.as_str(),
            commands = commands.len(),
            "starting sandboxed run"
        );

        let mut cmd = Command::new(&self.runtime_bin);
        cmd.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionOutcome::unavailable(format!(
                    "failed to start sandbox runtime: {e}"
                ));
            }
        };

        // Drain both streams concurrently so a chatty build cannot fill a
        // pipe buffer and stall the container.
        let stdout_task = read_stream(child.stdout.take());
        let stderr_task = read_stream(child.stderr.take());

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                ExecutionOutcome {
                    exit_code: status.code().unwrap_or(TIMEOUT_EXIT),
                    stdout,
                    stderr,
                }
            }
            Ok(Err(e)) => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(KILL_GRACE, self.force_kill(&name)).await;
                ExecutionOutcome::unavailable(format!("sandbox wait failed: {e}"))
            }
            Err(_) => {
                // Kill the direct child first; the runtime-level kill below
                // may itself stall, so the whole teardown runs under a grace
                // budget rather than extending the run past its deadline.
                let _ = child.start_kill();
                let _ = tokio::time::timeout(KILL_GRACE, async {
                    self.force_kill(&name).await;
                    let _ = child.wait().await;
                })
                .await;
                let (stdout, mut stderr) = tokio::join!(
                    drain_with_grace(stdout_task),
                    drain_with_grace(stderr_task)
                );
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str(&format!(
                    "[execution timed out after {}s; sandbox was killed]",
                    timeout.as_secs()
                ));
                tracing::warn!(container = name.as_str(), "sandboxed run timed out");
                ExecutionOutcome {
                    exit_code: TIMEOUT_EXIT,
                    stdout,
                    stderr,
                }
            }
        }
    }

    /// Force-terminates the container; kills the whole in-container process
    /// tree, unlike signalling our direct child.
    async fn force_kill(&self, name: &str) {
        let _ = Command::new(&self.runtime_bin)
            .arg("kill")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
    }
}

/// Collects whatever a stream task has read, abandoning it once the grace
/// budget runs out. A grandchild of the killed container process can keep
/// the pipe open indefinitely.
async fn drain_with_grace(mut handle: tokio::task::JoinHandle<String>) -> String {
    match tokio::time::timeout(KILL_GRACE, &mut handle).await {
        Ok(Ok(out)) => out,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

fn read_stream<R>(stream: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut stream) = stream else {
            return String::new();
        };
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Defangs a command for inclusion in the in-container `sh -c` string:
/// quotes and `$` are escaped so heuristic-derived commands cannot break out
/// of the invocation or expand sandbox-side variables.
fn defang(command: &str) -> String {
    command.replace('"', "\\\"").replace('$', "\\$")
}

fn build_run_args(
    name: &str,
    working_dir: &Path,
    commands: &[String],
    image: &str,
    spec: &SandboxSpec,
) -> Vec<String> {
    let joined = commands
        .iter()
        .map(|c| defang(c))
        .collect::<Vec<_>>()
        .join(" && ");

    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
        format!("--cpus={}", spec.cpus),
        format!("--memory={}", spec.memory),
        format!("--pids-limit={}", spec.pids_limit),
    ];
    if spec.network == NetworkMode::Isolated {
        args.push("--network=none".to_string());
    }
    args.extend([
        "-v".to_string(),
        format!("{}:{WORK_MOUNT}:rw", working_dir.display()),
        "-w".to_string(),
        WORK_MOUNT.to_string(),
        image.to_string(),
        "/bin/sh".to_string(),
        "-c".to_string(),
        joined,
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args_for(commands: &[&str], spec: &SandboxSpec) -> Vec<String> {
        build_run_args(
            "test-container",
            &PathBuf::from("/tmp/build"),
            &commands.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "alpine:3",
            spec,
        )
    }

    #[test]
    fn defang_escapes_quotes_and_dollars() {
        assert_eq!(defang(r#"echo "hi""#), r#"echo \"hi\""#);
        assert_eq!(defang("echo $(whoami)"), "echo \\$(whoami)");
        assert_eq!(defang("make -j2"), "make -j2");
    }

    #[test]
    fn commands_join_with_logical_and() {
        let args = args_for(&["npm ci", "npm test"], &SandboxSpec::default());
        assert_eq!(args.last().unwrap(), "npm ci && npm test");
    }

    #[test]
    fn default_spec_isolates_network_and_bounds_resources() {
        let args = args_for(&["true"], &SandboxSpec::default());
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--cpus=1".to_string()));
        assert!(args.contains(&"--memory=512m".to_string()));
        assert!(args.contains(&"--pids-limit=256".to_string()));
        assert!(args.contains(&"--rm".to_string()));
    }

    #[test]
    fn bridged_network_drops_the_isolation_flag() {
        let spec = SandboxSpec {
            network: NetworkMode::Bridged,
            ..SandboxSpec::default()
        };
        let args = args_for(&["true"], &spec);
        assert!(!args.iter().any(|a| a.starts_with("--network")));
    }

    #[test]
    fn working_dir_mounts_read_write_at_work() {
        let args = args_for(&["true"], &SandboxSpec::default());
        assert!(args.contains(&"/tmp/build:/work:rw".to_string()));
        let w = args.iter().position(|a| a == "-w").unwrap();
        assert_eq!(args[w + 1], "/work");
    }

    #[test]
    fn image_precedes_the_shell_invocation() {
        let args = args_for(&["true"], &SandboxSpec::default());
        let image = args.iter().position(|a| a == "alpine:3").unwrap();
        assert_eq!(args[image + 1], "/bin/sh");
        assert_eq!(args[image + 2], "-c");
    }

    #[tokio::test]
    async fn unavailable_runtime_returns_sentinel_exit_code() {
        let runner = SandboxRunner::with_runtime("/nonexistent/pipewright-no-runtime");
        let outcome = runner
            .run(
                &PathBuf::from("/tmp"),
                &["true".to_string()],
                "alpine:3",
                Duration::from_secs(5),
                &SandboxSpec::default(),
            )
            .await;
        assert_eq!(outcome.exit_code, RUNTIME_UNAVAILABLE_EXIT);
        assert!(outcome.stderr.contains("unavailable"));
    }

    #[tokio::test]
    async fn probe_fails_for_missing_binary() {
        let runner = SandboxRunner::with_runtime("/nonexistent/pipewright-no-runtime");
        assert!(!runner.runtime_available().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timed_out_run_returns_sentinel_within_a_bounded_window() {
        use std::os::unix::fs::PermissionsExt;

        // Fake runtime: answers the probe, then stalls on both the run and
        // the subsequent kill, as a wedged daemon would.
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("stall-runtime");
        std::fs::write(
            &bin,
            "#!/bin/sh\ncase \"$1\" in\nversion) echo 27.0 ;;\nkill) sleep 60 ;;\n*) exec sleep 60 ;;\nesac\n",
        )
        .unwrap();
        let mut perms = std::fs::metadata(&bin).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&bin, perms).unwrap();

        let runner = SandboxRunner::with_runtime(bin.to_string_lossy().into_owned());
        let started = std::time::Instant::now();
        let outcome = runner
            .run(
                &PathBuf::from("/tmp"),
                &["true".to_string()],
                "alpine:3",
                Duration::from_secs(2),
                &SandboxSpec::default(),
            )
            .await;
        let elapsed = started.elapsed();

        assert_eq!(outcome.exit_code, TIMEOUT_EXIT);
        assert!(outcome.stderr.contains("timed out after 2s"));
        assert!(
            elapsed < Duration::from_secs(30),
            "teardown must stay near the deadline, took {elapsed:?}"
        );
    }
}
