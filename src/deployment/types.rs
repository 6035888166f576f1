//! Deployment records, requests, bundles, and artifact resolution.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use super::DeploymentError;
use crate::relay::RELAY_COPY_BUDGET;
use crate::remote::ProxyTarget;

/// Opaque reference to a build artifact.
///
/// The destination is a storage handle; its final path component doubles as
/// the payload fingerprint, so two bundles with the same file name are
/// treated as the same build.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Bundle {
    destination: String,
}

impl Bundle {
    /// Wraps a storage handle.
    #[must_use]
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    /// Returns the storage handle.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Returns the final path component of the handle.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::InvalidBundle`] when the handle has no
    /// file name, for example an empty string or a bare `/`.
    pub fn fingerprint(&self) -> Result<String, DeploymentError> {
        Utf8Path::new(&self.destination)
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| DeploymentError::InvalidBundle {
                destination: self.destination.clone(),
            })
    }
}

/// Desired deployment: which bundle runs on which host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentRequest {
    /// Artifact to run.
    pub bundle: Bundle,
    /// Address used to reach the target (private when proxied).
    pub address: String,
    /// Local private key accepted by the target.
    pub key_path: Utf8PathBuf,
    /// Proxy for hosts without a direct route.
    pub proxy: Option<ProxyTarget>,
}

impl DeploymentRequest {
    /// Builds a request for a directly reachable host.
    #[must_use]
    pub fn new(
        bundle: Bundle,
        address: impl Into<String>,
        key_path: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            bundle,
            address: address.into(),
            key_path: key_path.into(),
            proxy: None,
        }
    }

    /// Routes the request through `proxy`.
    #[must_use]
    pub fn via(mut self, proxy: ProxyTarget) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// Persisted record of a running deployment.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeploymentState {
    /// Address the payload was deployed to.
    pub address: String,
    /// Local private key accepted by the target.
    pub key_path: Utf8PathBuf,
    /// Fingerprint of the deployed bundle.
    pub payload_fingerprint: String,
    /// Proxy used to reach the target, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyTarget>,
}

/// Retry budgets for each remote step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeploymentBudgets {
    /// Copying the payload to the target.
    pub payload_copy: Duration,
    /// Waiting for the runtime to answer.
    pub liveness: Duration,
    /// Staging the payload on the proxy.
    pub proxy_copy: Duration,
    /// Copying the runtime from the proxy to the target.
    pub runtime_copy: Duration,
    /// Placing the relayed key on the proxy.
    pub key_relay: Duration,
}

impl Default for DeploymentBudgets {
    fn default() -> Self {
        Self {
            payload_copy: Duration::from_secs(30),
            liveness: Duration::from_secs(15),
            proxy_copy: Duration::from_secs(60),
            runtime_copy: Duration::from_secs(30),
            key_relay: RELAY_COPY_BUDGET,
        }
    }
}

/// Resolves bundle handles to files on the orchestrating machine.
pub trait ArtifactStore {
    /// Returns the local path of the artifact named by `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Artifact`] when the artifact is unavailable.
    fn resolve(&self, destination: &str) -> Result<Utf8PathBuf, DeploymentError>;
}

/// Artifact store backed by a local directory.
///
/// Relative handles are resolved against the root; absolute handles are
/// used as-is.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalArtifactStore {
    root: Utf8PathBuf,
}

impl LocalArtifactStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn resolve(&self, destination: &str) -> Result<Utf8PathBuf, DeploymentError> {
        let path = self.root.join(destination);
        if path.is_file() {
            Ok(path)
        } else {
            Err(DeploymentError::Artifact {
                destination: destination.to_owned(),
                message: format!("{path} is not a readable file"),
            })
        }
    }
}
