//! Deployment lifecycle for a JavaScript payload on a remote host.
//!
//! A deployment copies a bundle onto a host, waits until the runtime
//! answers, then starts the payload as a transient systemd unit. Hosts on a
//! private subnet are reached through a proxy where the payload is staged
//! first. The target key is relayed for the duration of the operation and
//! the runtime binary is copied along, since such hosts cannot install one.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::relay::CredentialRelay;
use crate::remote::{CommandRunner, ProxyTarget, RemoteError, RemoteExecutor, Route};
use crate::resource::{Resource, ResourceFuture};
use crate::retry::retry_for;

mod config;
mod error;
mod types;

pub use config::{DEFAULT_TEARDOWN_TIMEOUT_SECS, DeploymentConfig, DeploymentConfigLoadError};
pub use error::DeploymentError;
pub use types::{
    ArtifactStore, Bundle, DeploymentBudgets, DeploymentRequest, DeploymentState,
    LocalArtifactStore,
};

/// Deploys payload bundles to remote hosts.
#[derive(Debug)]
pub struct Deployment<R: CommandRunner, A> {
    config: DeploymentConfig,
    executor: RemoteExecutor<R>,
    artifacts: A,
    budgets: DeploymentBudgets,
}

impl<R: CommandRunner, A: ArtifactStore> Deployment<R, A> {
    /// Creates a deployment driver.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::InvalidConfig`] when configuration
    /// validation fails.
    pub fn new(
        config: DeploymentConfig,
        executor: RemoteExecutor<R>,
        artifacts: A,
    ) -> Result<Self, DeploymentError> {
        config.validate()?;
        Ok(Self {
            config,
            executor,
            artifacts,
            budgets: DeploymentBudgets::default(),
        })
    }

    /// Overrides the retry budgets for each remote step.
    #[must_use]
    pub const fn with_budgets(mut self, budgets: DeploymentBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Returns the deployment configuration.
    #[must_use]
    pub const fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Returns the remote executor.
    #[must_use]
    pub const fn executor(&self) -> &RemoteExecutor<R> {
        &self.executor
    }

    /// Copies the bundle to the target and starts it.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::InvalidBundle`] or
    /// [`DeploymentError::Artifact`] when the bundle cannot be used, and
    /// [`DeploymentError::Remote`] with the last failure once a step's retry
    /// budget is exhausted or the unit fails to start.
    pub async fn deploy(
        &self,
        request: &DeploymentRequest,
    ) -> Result<DeploymentState, DeploymentError> {
        let fingerprint = request.bundle.fingerprint()?;
        let local_payload = self.artifacts.resolve(request.bundle.destination())?;
        info!(
            address = %request.address,
            fingerprint = %fingerprint,
            route = %Route::for_proxy(request.proxy.as_ref()),
            "deploying payload"
        );

        match &request.proxy {
            None => {
                self.deploy_direct(&local_payload, &request.address, &request.key_path)
                    .await?;
            }
            Some(proxy) => {
                self.deploy_via_proxy(&local_payload, &request.address, &request.key_path, proxy)
                    .await?;
            }
        }

        info!(address = %request.address, unit = %self.config.unit_name, "payload started");
        Ok(DeploymentState {
            address: request.address.clone(),
            key_path: request.key_path.clone(),
            payload_fingerprint: fingerprint,
            proxy: request.proxy.clone(),
        })
    }

    /// Returns the supervisor's status report for the unit.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Remote`] when the status query fails,
    /// including when the unit is not running.
    pub async fn status(&self, state: &DeploymentState) -> Result<String, DeploymentError> {
        let command = self.config.status_command();
        Ok(self.run_on_host(state, &command).await?)
    }

    async fn deploy_direct(
        &self,
        local_payload: &Utf8Path,
        address: &str,
        key_path: &Utf8Path,
    ) -> Result<(), RemoteError> {
        retry_for(self.budgets.payload_copy, || {
            self.executor.copy_file(
                key_path,
                address,
                local_payload.as_str(),
                &self.config.payload_path,
                &Route::Direct,
            )
        })
        .await?;
        let version = retry_for(self.budgets.liveness, || {
            self.executor.run_command(
                key_path,
                address,
                &self.config.liveness_command,
                &Route::Direct,
            )
        })
        .await?;
        debug!(address, runtime = %version.trim(), "runtime is live");

        let start = self.config.start_command(&self.config.runtime_bin);
        self.executor
            .run_command(key_path, address, &start, &Route::Direct)
            .await?;
        Ok(())
    }

    async fn deploy_via_proxy(
        &self,
        local_payload: &Utf8Path,
        address: &str,
        key_path: &Utf8Path,
        proxy: &ProxyTarget,
    ) -> Result<(), RemoteError> {
        retry_for(self.budgets.proxy_copy, || {
            self.executor.copy_file(
                &proxy.key_path,
                &proxy.address,
                local_payload.as_str(),
                &self.config.proxy_payload_path,
                &Route::Direct,
            )
        })
        .await?;
        debug!(proxy = %proxy.address, "payload staged on proxy");

        let route = Route::through(proxy);
        self.relay()
            .run(key_path, proxy, |relayed_key| async move {
                self.finish_on_interior(address, &relayed_key, &route).await
            })
            .await
    }

    async fn finish_on_interior(
        &self,
        address: &str,
        relayed_key: &Utf8Path,
        route: &Route,
    ) -> Result<(), RemoteError> {
        retry_for(self.budgets.payload_copy, || {
            self.executor.copy_file(
                relayed_key,
                address,
                &self.config.proxy_payload_path,
                &self.config.payload_path,
                route,
            )
        })
        .await?;
        retry_for(self.budgets.runtime_copy, || {
            self.executor.copy_file(
                relayed_key,
                address,
                &self.config.runtime_source_path,
                &self.config.relayed_runtime_path,
                route,
            )
        })
        .await?;

        let start = self.config.start_command(&self.config.relayed_runtime_path);
        self.executor
            .run_command(relayed_key, address, &start, route)
            .await?;
        Ok(())
    }

    async fn run_on_host(
        &self,
        state: &DeploymentState,
        command: &str,
    ) -> Result<String, RemoteError> {
        match &state.proxy {
            None => {
                self.executor
                    .run_command(&state.key_path, &state.address, command, &Route::Direct)
                    .await
            }
            Some(proxy) => {
                let route = Route::through(proxy);
                self.relay()
                    .run(&state.key_path, proxy, |relayed_key| async move {
                        self.executor
                            .run_command(&relayed_key, &state.address, command, &route)
                            .await
                    })
                    .await
            }
        }
    }

    fn relay(&self) -> CredentialRelay<'_, R> {
        CredentialRelay::new(&self.executor, Utf8Path::new(&self.config.relay_key_dir))
            .with_copy_budget(self.budgets.key_relay)
    }
}

impl<R, A> Deployment<R, A>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
    A: ArtifactStore,
{
    /// Moves an existing deployment towards `request`.
    ///
    /// Nothing runs when the address and fingerprint are unchanged. When the
    /// fingerprint changed on the same address the old unit is stopped first,
    /// and when the address changed the old host is left alone.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Deployment::deploy`]; stopping the old
    /// unit never fails.
    pub async fn redeploy(
        &self,
        state: &DeploymentState,
        request: &DeploymentRequest,
    ) -> Result<DeploymentState, DeploymentError> {
        let fingerprint = request.bundle.fingerprint()?;
        let same_address = state.address == request.address;
        if same_address && fingerprint == state.payload_fingerprint {
            debug!(address = %state.address, fingerprint = %fingerprint, "deployment unchanged");
            return Ok(state.clone());
        }

        if same_address {
            info!(
                address = %state.address,
                previous = %state.payload_fingerprint,
                next = %fingerprint,
                "payload changed; stopping previous unit"
            );
            self.teardown(state).await;
        }
        self.deploy(request).await
    }

    /// Stops the unit, waiting at most the configured teardown timeout.
    ///
    /// Failures and timeouts are logged and otherwise ignored so callers can
    /// always retire the record. A proxied stop runs as a detached task that
    /// gives up on the stop command at the same deadline and still removes
    /// the relayed key, even after this call has returned.
    pub async fn teardown(&self, state: &DeploymentState) {
        let command = self.config.stop_command();
        let bound = self.config.teardown_timeout();
        let deadline = Instant::now() + bound;

        let finished = match &state.proxy {
            None => {
                let stop = async {
                    if let Err(err) = self.run_on_host(state, &command).await {
                        warn!(address = %state.address, error = %err, "failed to stop unit");
                    }
                };
                timeout_at(deadline, stop).await.is_ok()
            }
            Some(proxy) => {
                let session = RelayedStop {
                    executor: self.executor.clone(),
                    key_dir: Utf8PathBuf::from(self.config.relay_key_dir.clone()),
                    key_budget: self.budgets.key_relay,
                    state: state.clone(),
                    proxy: proxy.clone(),
                    command,
                    deadline,
                };
                match timeout_at(deadline, tokio::spawn(session.run())).await {
                    Ok(Ok(())) => true,
                    Ok(Err(err)) => {
                        warn!(address = %state.address, error = %err, "relayed stop task failed");
                        true
                    }
                    Err(_) => false,
                }
            }
        };

        if finished {
            debug!(address = %state.address, unit = %self.config.unit_name, "teardown finished");
        } else {
            warn!(
                address = %state.address,
                timeout_secs = bound.as_secs(),
                "teardown timed out; no longer waiting for the host"
            );
        }
    }
}

impl<R, A> Resource for Deployment<R, A>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
    A: ArtifactStore + Sync,
{
    type Params = DeploymentRequest;
    type State = DeploymentState;
    type Error = DeploymentError;

    fn create<'a>(
        &'a self,
        params: &'a DeploymentRequest,
    ) -> ResourceFuture<'a, DeploymentState, DeploymentError> {
        Box::pin(self.deploy(params))
    }

    fn update<'a>(
        &'a self,
        state: &'a DeploymentState,
        params: &'a DeploymentRequest,
    ) -> ResourceFuture<'a, DeploymentState, DeploymentError> {
        Box::pin(self.redeploy(state, params))
    }

    fn delete<'a>(&'a self, state: &'a DeploymentState) -> ResourceFuture<'a, (), DeploymentError> {
        Box::pin(async move {
            self.teardown(state).await;
            Ok(())
        })
    }
}

/// Stop command for a proxied host, owned so it can outlive the caller.
#[derive(Debug)]
struct RelayedStop<R: CommandRunner> {
    executor: RemoteExecutor<R>,
    key_dir: Utf8PathBuf,
    key_budget: Duration,
    state: DeploymentState,
    proxy: ProxyTarget,
    command: String,
    deadline: Instant,
}

impl<R: CommandRunner + Sync> RelayedStop<R> {
    async fn run(self) {
        let route = Route::through(&self.proxy);
        let relay =
            CredentialRelay::new(&self.executor, &self.key_dir).with_copy_budget(self.key_budget);
        let session = &self;
        let outcome = relay
            .run(&self.state.key_path, &self.proxy, |relayed_key| async move {
                session.stop_before_deadline(&relayed_key, &route).await
            })
            .await;
        if let Err(err) = outcome {
            warn!(address = %self.state.address, error = %err, "failed to stop unit");
        }
    }

    /// Gives up on the stop command at the deadline so the relay can still
    /// remove its key.
    async fn stop_before_deadline(
        &self,
        relayed_key: &Utf8Path,
        route: &Route,
    ) -> Result<(), RemoteError> {
        let stop = self
            .executor
            .run_command(relayed_key, &self.state.address, &self.command, route);
        if let Ok(result) = timeout_at(self.deadline, stop).await {
            return result.map(|_| ());
        }
        warn!(
            address = %self.state.address,
            proxy = %self.proxy.address,
            "stop command timed out; removing relayed key"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests;
