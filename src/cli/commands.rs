use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// `pipewright` — secure fetch, sandboxed build, and artifact publication
/// core for CI/CD pipeline generation.
#[derive(Parser, Debug)]
#[command(name = "pipewright")]
#[command(version = "0.1.0")]
#[command(about = "Fetch untrusted repositories safely, build them in a sandbox, publish the artifacts.", long_about = None)]
pub struct Cli {
    /// Path to a pipewright.toml (defaults to ./pipewright.toml if present)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check whether a repository URL is safe to fetch (SSRF validation)
    Validate {
        /// Repository URL (https://…, scp-style user@host:path, …)
        url: String,
    },

    /// Shallow-clone a validated repository into an ephemeral directory
    Fetch {
        /// Repository URL
        url: String,

        /// Keep the cloned directory instead of deleting it on exit
        #[arg(long)]
        keep: bool,
    },

    /// Run build commands inside the network-isolated sandbox
    Exec {
        /// Directory mounted read-write at /work inside the sandbox
        #[arg(long)]
        dir: PathBuf,

        /// Container image (defaults to the configured sandbox image)
        #[arg(long)]
        image: Option<String>,

        /// Wall-clock timeout in seconds (defaults to the configured value)
        #[arg(long)]
        timeout: Option<u64>,

        /// Allow network egress (default: fully isolated)
        #[arg(long)]
        allow_network: bool,

        /// Commands to run, joined with a logical AND
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Publish one artifact file to a configured backend
    Publish {
        /// Which configured backend to publish to
        #[arg(value_enum)]
        backend: PublishBackend,

        /// Local artifact file
        file: PathBuf,

        /// Tag override (release and registry backends)
        #[arg(long)]
        tag: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishBackend {
    Nexus,
    Artifactory,
    Release,
    Registry,
}
