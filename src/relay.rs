//! Ephemeral credential relay.
//!
//! Hosts on the private subnet are reachable only from the bastion. Rather
//! than relying on SSH jump hosts or agent forwarding, the relay copies the
//! interior host's private key onto the proxy for the duration of one
//! operation and removes it afterwards on every exit path.

use std::future::Future;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use tracing::{debug, warn};

use crate::remote::{CommandRunner, ProxyTarget, RemoteError, RemoteExecutor, Route};
use crate::retry::retry_for;

/// Budget for copying the key onto the proxy.
pub const RELAY_COPY_BUDGET: Duration = Duration::from_secs(15);

const FALLBACK_KEY_NAME: &str = "relayed_key";

/// Returns where the relayed copy of `target_key` lives on the proxy.
#[must_use]
pub fn relayed_key_path(key_dir: &Utf8Path, target_key: &Utf8Path) -> Utf8PathBuf {
    key_dir.join(target_key.file_name().unwrap_or(FALLBACK_KEY_NAME))
}

/// Places private keys on a proxy for the lifetime of a single operation.
#[derive(Debug)]
pub struct CredentialRelay<'a, R: CommandRunner> {
    executor: &'a RemoteExecutor<R>,
    key_dir: &'a Utf8Path,
    copy_budget: Duration,
}

impl<'a, R: CommandRunner> CredentialRelay<'a, R> {
    /// Creates a relay that stores keys under `key_dir` on the proxy.
    #[must_use]
    pub const fn new(executor: &'a RemoteExecutor<R>, key_dir: &'a Utf8Path) -> Self {
        Self {
            executor,
            key_dir,
            copy_budget: RELAY_COPY_BUDGET,
        }
    }

    /// Overrides the retry budget used for the key copy.
    #[must_use]
    pub const fn with_copy_budget(mut self, budget: Duration) -> Self {
        self.copy_budget = budget;
        self
    }

    /// Copies `target_key` onto `proxy`, runs `body` with the remote path of
    /// the copy, then removes the copy.
    ///
    /// Removal runs exactly once whether `body` succeeds or fails. When
    /// `body` fails its error wins and a removal failure is only logged; when
    /// `body` succeeds a removal failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the key copy failure once the copy budget is exhausted, the
    /// error produced by `body`, or the removal failure.
    pub async fn run<T, F, Fut>(
        &self,
        target_key: &Utf8Path,
        proxy: &ProxyTarget,
        body: F,
    ) -> Result<T, RemoteError>
    where
        F: FnOnce(Utf8PathBuf) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let remote_key = relayed_key_path(self.key_dir, target_key);
        retry_for(self.copy_budget, || {
            self.executor.copy_file(
                &proxy.key_path,
                &proxy.address,
                target_key.as_str(),
                remote_key.as_str(),
                &Route::Direct,
            )
        })
        .await?;
        debug!(proxy = %proxy.address, key = %remote_key, "relayed key onto proxy");

        let outcome = body(remote_key.clone()).await;
        let cleanup = self.remove(proxy, &remote_key).await;

        match (outcome, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup_err)) => {
                warn!(
                    proxy = %proxy.address,
                    key = %remote_key,
                    error = %cleanup_err,
                    "failed to remove relayed key"
                );
                Err(err)
            }
        }
    }

    async fn remove(&self, proxy: &ProxyTarget, remote_key: &Utf8Path) -> Result<(), RemoteError> {
        let command = format!("rm -f {}", escape(remote_key.as_str().into()));
        self.executor
            .run_command(&proxy.key_path, &proxy.address, &command, &Route::Direct)
            .await
            .map(|_| ())
    }
}
