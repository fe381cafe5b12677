//! Assetship Adapters: real implementations of the pipeline's service traits
//!
//! - [`GithubClient`]: GitHub Actions run status, artifact listing and
//!   artifact download (`CiProvider`)
//! - [`RepositoryDispatchNotifier`]: `repository_dispatch` events to a
//!   downstream repository (`DeploymentNotifier`)
//! - [`DockerCli`]: pull, ephemeral containers, build, push and digest
//!   inspection through the `docker` binary (`ImageRegistry`)
//! - [`DeployHook`]: deploy-hook style trigger endpoint (`DeploymentNotifier`)

pub mod archive;
pub mod deploy_hook;
pub mod docker;
pub mod github;
mod http;

pub use archive::{extract_zip, DEFAULT_MAX_ENTRY_BYTES};
pub use deploy_hook::{DeployHook, DeployHookConfig};
pub use docker::{DockerCli, DockerConfig};
pub use github::{GithubClient, GithubConfig, RepositoryDispatchNotifier};

/// User agent sent on every HTTP request.
pub(crate) const USER_AGENT: &str = concat!("assetship/", env!("CARGO_PKG_VERSION"));
