//! Registration of local public keys with a cloud provider.

use tracing::{info, warn};

use super::{KeyPairError, KeyPairState, LocalKeyPair};
use crate::remote::CommandRunner;
use crate::resource::{Resource, ResourceFuture};

/// Provider-side key registry.
///
/// Implemented by the cloud collaborator; `register` returns the name the
/// provider assigned to the key.
pub trait KeyRegistry {
    /// Registers `public_key` under a name derived from `id`.
    fn register<'a>(
        &'a self,
        id: &'a str,
        public_key: &'a str,
    ) -> ResourceFuture<'a, String, KeyPairError>;

    /// Removes a previously registered key.
    fn deregister<'a>(&'a self, provider_name: &'a str) -> ResourceFuture<'a, (), KeyPairError>;
}

/// Local key pair whose public half is registered with a provider.
#[derive(Debug)]
pub struct RegisteredKeyPair<R: CommandRunner, G> {
    local: LocalKeyPair<R>,
    registry: G,
}

impl<R: CommandRunner, G: KeyRegistry> RegisteredKeyPair<R, G> {
    /// Pairs a local generator with a provider registry.
    #[must_use]
    pub const fn new(local: LocalKeyPair<R>, registry: G) -> Self {
        Self { local, registry }
    }

    /// Returns the registry.
    #[must_use]
    pub const fn registry(&self) -> &G {
        &self.registry
    }

    /// Generates a key pair and registers its public half.
    ///
    /// Local files are removed again when registration fails.
    ///
    /// # Errors
    ///
    /// Returns generation, read, or registration failures.
    pub async fn register(&self) -> Result<KeyPairState, KeyPairError> {
        let state = self.local.generate().await?;
        match self.register_existing(&state).await {
            Ok(provider_name) => Ok(KeyPairState {
                provider_name: Some(provider_name),
                ..state
            }),
            Err(err) => {
                if let Err(cleanup) = self.local.remove(&state) {
                    warn!(id = %state.id, error = %cleanup, "failed to remove unregistered key pair");
                }
                Err(err)
            }
        }
    }

    async fn register_existing(&self, state: &KeyPairState) -> Result<String, KeyPairError> {
        let public_key = self.local.public_key(state)?;
        let provider_name = self.registry.register(&state.id, public_key.trim()).await?;
        info!(id = %state.id, provider_name = %provider_name, "registered public key");
        Ok(provider_name)
    }

    /// Deregisters the key and removes the local files.
    ///
    /// # Errors
    ///
    /// Returns deregistration or file removal failures.
    pub async fn unregister(&self, state: &KeyPairState) -> Result<(), KeyPairError> {
        if let Some(provider_name) = &state.provider_name {
            self.registry.deregister(provider_name).await?;
        }
        self.local.remove(state)
    }
}

impl<R, G> Resource for RegisteredKeyPair<R, G>
where
    R: CommandRunner + Sync,
    G: KeyRegistry + Sync,
{
    type Params = ();
    type State = KeyPairState;
    type Error = KeyPairError;

    fn create<'a>(&'a self, _params: &'a ()) -> ResourceFuture<'a, KeyPairState, KeyPairError> {
        Box::pin(self.register())
    }

    fn update<'a>(
        &'a self,
        state: &'a KeyPairState,
        _params: &'a (),
    ) -> ResourceFuture<'a, KeyPairState, KeyPairError> {
        Box::pin(async move { Ok(state.clone()) })
    }

    fn delete<'a>(&'a self, state: &'a KeyPairState) -> ResourceFuture<'a, (), KeyPairError> {
        Box::pin(self.unregister(state))
    }
}
