pub mod schema;

pub use schema::{
    Config, FetchConfig, PublishConfig, RegistryTarget, ReleaseTarget, RepositoryTarget,
    RetryConfig, SandboxConfig,
};
