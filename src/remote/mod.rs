//! Remote command execution and file transfer over SSH.
//!
//! Every operation shells out to the system `ssh` or `scp` client with the
//! same connection options: host key checking disabled, known hosts sent to
//! `/dev/null`, a short connect timeout, and an explicit identity file. A
//! [`Route`] decides whether the client runs locally or on a proxy host.

use std::ffi::OsString;

use camino::Utf8Path;
use tracing::debug;

mod config;
mod error;
mod route;
mod types;

pub use config::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_SSH_USER, RemoteConfig, RemoteConfigLoadError,
};
pub use error::RemoteError;
pub use route::{ProxyTarget, Route};
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerFuture};

/// Runs commands and copies files on remote hosts.
#[derive(Clone, Debug)]
pub struct RemoteExecutor<R: CommandRunner> {
    config: RemoteConfig,
    runner: R,
}

impl RemoteExecutor<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: RemoteConfig) -> Result<Self, RemoteError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> RemoteExecutor<R> {
    /// Creates a new executor using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: RemoteConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Returns the runner used to spawn local processes.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs `command` on `host` and returns its standard output.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::CommandFailure`] when `ssh` exits non-zero or
    /// is killed by a signal, and [`RemoteError::Spawn`] when it cannot be
    /// started.
    ///
    /// # Security
    ///
    /// `command` is handed to the remote shell verbatim; callers must escape
    /// any untrusted input.
    pub async fn run_command(
        &self,
        key_path: &Utf8Path,
        host: &str,
        command: &str,
        route: &Route,
    ) -> Result<String, RemoteError> {
        let args = self.ssh_args(key_path, host, command);
        self.spawn(&self.config.ssh_bin, args, route).await
    }

    /// Copies `from` to `to` on `host` and returns the client's output.
    ///
    /// When `route` is indirected, `from` is a path on the proxy.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::CommandFailure`] when `scp` exits non-zero or
    /// is killed by a signal, and [`RemoteError::Spawn`] when it cannot be
    /// started.
    pub async fn copy_file(
        &self,
        key_path: &Utf8Path,
        host: &str,
        from: &str,
        to: &str,
        route: &Route,
    ) -> Result<String, RemoteError> {
        let args = self.scp_args(key_path, host, from, to);
        self.spawn(&self.config.scp_bin, args, route).await
    }

    async fn spawn(
        &self,
        program: &str,
        args: Vec<String>,
        route: &Route,
    ) -> Result<String, RemoteError> {
        match route {
            Route::Direct => self.spawn_local(program, args).await,
            Route::ViaProxy { key_path, host } => {
                let remote_command = route::render_remote_command(program, &args);
                debug!(proxy = %host, command = %remote_command, "indirecting through proxy");
                let proxy_args = self.ssh_args(key_path, host, &remote_command);
                self.spawn_local(&self.config.ssh_bin, proxy_args).await
            }
        }
    }

    async fn spawn_local(&self, program: &str, args: Vec<String>) -> Result<String, RemoteError> {
        let os_args: Vec<OsString> = args.into_iter().map(OsString::from).collect();
        self.runner
            .run(program, &os_args)
            .await?
            .into_stdout(program)
    }

    fn ssh_args(&self, key_path: &Utf8Path, host: &str, command: &str) -> Vec<String> {
        let mut args = self.connection_options(key_path);
        args.push(self.config.login(host));
        args.push(command.to_owned());
        args
    }

    fn scp_args(&self, key_path: &Utf8Path, host: &str, from: &str, to: &str) -> Vec<String> {
        let mut args = self.connection_options(key_path);
        args.push(from.to_owned());
        args.push(format!("{}:{to}", self.config.login(host)));
        args
    }

    fn connection_options(&self, key_path: &Utf8Path) -> Vec<String> {
        vec![
            String::from("-o"),
            String::from("StrictHostKeyChecking=no"),
            String::from("-o"),
            format!("UserKnownHostsFile={}", self.config.known_hosts_file),
            String::from("-o"),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            String::from("-i"),
            key_path.to_string(),
        ]
    }
}
