//! Core library for the Ferry deployment tool.
//!
//! Ferry ships a JavaScript bundle onto remote hosts over SSH and keeps it
//! running as a transient systemd unit. Hosts on a private subnet are
//! reached through a proxy, with the target key relayed for the duration of
//! each operation. Deployments and key pairs are modelled as resources with
//! `create`, `update`, and `delete` transitions over a persisted state.

pub mod deployment;
pub mod keypair;
pub mod relay;
pub mod remote;
pub mod resource;
pub mod retry;
pub mod state_store;
pub mod test_support;
pub mod topology;

pub use deployment::{
    ArtifactStore, Bundle, Deployment, DeploymentBudgets, DeploymentConfig,
    DeploymentConfigLoadError, DeploymentError, DeploymentRequest, DeploymentState,
    LocalArtifactStore,
};
pub use keypair::{
    KeyPairConfig, KeyPairConfigLoadError, KeyPairError, KeyPairState, KeyRegistry, LocalKeyPair,
    RegisteredKeyPair,
};
pub use relay::{CredentialRelay, relayed_key_path};
pub use remote::{
    CommandOutput, CommandRunner, ProcessCommandRunner, ProxyTarget, RemoteConfig,
    RemoteConfigLoadError, RemoteError, RemoteExecutor, Route,
};
pub use resource::{Resource, ResourceFuture};
pub use retry::{BackoffSchedule, retry_for};
pub use state_store::{StateFile, StateStoreError};
pub use topology::Host;
