//! Per-deployment-class settings: unit name and fixed remote paths.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use shell_escape::unix::escape;
use thiserror::Error;

use super::DeploymentError;

/// Default teardown bound, in seconds.
pub const DEFAULT_TEARDOWN_TIMEOUT_SECS: u64 = 15;

/// Deployment settings loaded via `ortho-config`.
///
/// Each deployment class (one logical service) has its own unit name and
/// remote paths; redeployments of the same class reuse them.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FERRY_DEPLOY",
    discovery(
        app_name = "ferry",
        env_var = "FERRY_CONFIG_PATH",
        config_file_name = "ferry.toml",
        dotfile_name = ".ferry.toml",
        project_file_name = "ferry.toml"
    )
)]
pub struct DeploymentConfig {
    /// Name of the transient systemd unit running the payload.
    #[ortho_config(default = "ferry".to_owned())]
    pub unit_name: String,
    /// Path of the payload on the target host.
    #[ortho_config(default = "/home/ubuntu/entry.js".to_owned())]
    pub payload_path: String,
    /// Staging path of the payload on the proxy.
    #[ortho_config(default = "/home/ubuntu/proxy-entry.js".to_owned())]
    pub proxy_payload_path: String,
    /// Runtime used to launch the payload on directly reachable hosts.
    #[ortho_config(default = "node".to_owned())]
    pub runtime_bin: String,
    /// Command that proves the runtime is installed.
    #[ortho_config(default = "node -v".to_owned())]
    pub liveness_command: String,
    /// Runtime binary on the proxy, copied to hosts without internet access.
    #[ortho_config(default = "/usr/bin/node".to_owned())]
    pub runtime_source_path: String,
    /// Destination of the copied runtime on the target host.
    #[ortho_config(default = "/home/ubuntu/node".to_owned())]
    pub relayed_runtime_path: String,
    /// Directory on the proxy that temporarily holds relayed keys.
    #[ortho_config(default = "/home/ubuntu/.ssh".to_owned())]
    pub relay_key_dir: String,
    /// Upper bound on teardown, in seconds.
    #[ortho_config(default = DEFAULT_TEARDOWN_TIMEOUT_SECS)]
    pub teardown_timeout_secs: u64,
}

/// Errors raised when loading the deployment configuration.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DeploymentConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("deployment configuration parsing failed: {0}")]
    Parse(String),
}

impl DeploymentConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::InvalidConfig`] when a field is blank.
    pub fn validate(&self) -> Result<(), DeploymentError> {
        for (value, field) in [
            (&self.unit_name, "unit_name"),
            (&self.payload_path, "payload_path"),
            (&self.proxy_payload_path, "proxy_payload_path"),
            (&self.runtime_bin, "runtime_bin"),
            (&self.liveness_command, "liveness_command"),
            (&self.runtime_source_path, "runtime_source_path"),
            (&self.relayed_runtime_path, "relayed_runtime_path"),
            (&self.relay_key_dir, "relay_key_dir"),
        ] {
            if value.trim().is_empty() {
                return Err(DeploymentError::InvalidConfig {
                    field: field.to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentConfigLoadError::Parse`] when merging sources
    /// fails.
    pub fn load_without_cli_args() -> Result<Self, DeploymentConfigLoadError> {
        Self::load_from_iter([OsString::from("ferry")])
            .map_err(|err| DeploymentConfigLoadError::Parse(err.to_string()))
    }

    /// Teardown bound as a [`Duration`].
    #[must_use]
    pub const fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }

    /// Starts the payload under the process supervisor using `runtime`.
    #[must_use]
    pub fn start_command(&self, runtime: &str) -> String {
        format!(
            "sudo systemd-run --unit={} {} {}",
            escape(self.unit_name.as_str().into()),
            escape(runtime.into()),
            escape(self.payload_path.as_str().into())
        )
    }

    /// Stops the unit and clears its failed state, never failing.
    #[must_use]
    pub fn stop_command(&self) -> String {
        let unit = escape(self.unit_name.as_str().into());
        format!(
            "(sudo systemctl stop {unit}.service && sudo systemctl reset-failed {unit}.service) || true"
        )
    }

    /// Reports the unit status without paging.
    #[must_use]
    pub fn status_command(&self) -> String {
        format!(
            "systemctl status {}.service --no-pager",
            escape(self.unit_name.as_str().into())
        )
    }
}
