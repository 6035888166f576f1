//! Local SSH key pairs owned by a single logical resource.
//!
//! A pair is generated once with `ssh-keygen` under a per-instance identifier
//! inside an owner-only directory. It is removed when the owning resource is
//! destroyed. The public half is read from disk each time it is needed.

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::Permissions;
use cap_std::fs_utf8::Dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::remote::{CommandRunner, ProcessCommandRunner, RemoteError};
use crate::resource::{Resource, ResourceFuture};

mod config;
mod registry;

pub use config::{DEFAULT_KEY_BITS, KeyPairConfig, KeyPairConfigLoadError};
pub use registry::{KeyRegistry, RegisteredKeyPair};

/// Errors raised while managing key pairs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum KeyPairError {
    /// Raised when configuration is missing required values.
    #[error(
        "invalid {field}: set FERRY_KEYS_{env_suffix} or add {field} to ferry.toml",
        env_suffix = field.to_uppercase()
    )]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when `ssh-keygen` fails or cannot be spawned.
    #[error("key generation failed: {0}")]
    Keygen(#[from] RemoteError),
    /// Raised when the provider rejects a registration request.
    #[error("key registration failed: {message}")]
    Registration {
        /// Provider-supplied failure description.
        message: String,
    },
}

/// Persisted record of a generated key pair.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeyPairState {
    /// Per-instance identifier, also the private key's file name.
    pub id: String,
    /// Path of the private key.
    pub private_key_path: Utf8PathBuf,
    /// Path of the public key.
    pub public_key_path: Utf8PathBuf,
    /// Name assigned by the provider once registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
}

/// Generates and removes key pairs on the orchestrating machine.
#[derive(Clone, Debug)]
pub struct LocalKeyPair<R: CommandRunner> {
    config: KeyPairConfig,
    runner: R,
}

impl LocalKeyPair<ProcessCommandRunner> {
    /// Convenience constructor that spawns the real `ssh-keygen`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: KeyPairConfig) -> Result<Self, KeyPairError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> LocalKeyPair<R> {
    /// Creates a generator.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::InvalidConfig`] when validation fails.
    pub fn new(config: KeyPairConfig, runner: R) -> Result<Self, KeyPairError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns the key-pair configuration.
    #[must_use]
    pub const fn config(&self) -> &KeyPairConfig {
        &self.config
    }

    /// Generates a fresh pair without a passphrase.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::Io`] when the key directory cannot be
    /// prepared and [`KeyPairError::Keygen`] when `ssh-keygen` fails.
    pub async fn generate(&self) -> Result<KeyPairState, KeyPairError> {
        let keys_dir = self.config.keys_dir();
        ensure_private_dir(keys_dir)?;

        let id = Uuid::new_v4().to_string();
        let private_key_path = keys_dir.join(&id);
        let public_key_path = keys_dir.join(format!("{id}.pub"));
        let bits = self.config.key_bits.to_string();
        let comment = format!("ferry-{id}");
        let args: Vec<OsString> = [
            "-t",
            "rsa",
            "-b",
            bits.as_str(),
            "-q",
            "-N",
            "",
            "-C",
            comment.as_str(),
            "-f",
            private_key_path.as_str(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        self.runner
            .run(&self.config.keygen_bin, &args)
            .await?
            .into_stdout(&self.config.keygen_bin)?;
        info!(id = %id, path = %private_key_path, "generated key pair");

        Ok(KeyPairState {
            id,
            private_key_path,
            public_key_path,
            provider_name: None,
        })
    }

    /// Reads the public half of `state`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::Io`] when the file cannot be read.
    pub fn public_key(&self, state: &KeyPairState) -> Result<String, KeyPairError> {
        let (dir, file_name) = open_parent(&state.public_key_path)?;
        dir.read_to_string(file_name).map_err(|err| KeyPairError::Io {
            path: state.public_key_path.clone(),
            message: err.to_string(),
        })
    }

    /// Removes both halves of `state`, treating absent files as removed.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::Io`] for failures other than absence.
    pub fn remove(&self, state: &KeyPairState) -> Result<(), KeyPairError> {
        for path in [&state.private_key_path, &state.public_key_path] {
            remove_if_present(path)?;
        }
        debug!(id = %state.id, "removed key pair");
        Ok(())
    }
}

impl<R> Resource for LocalKeyPair<R>
where
    R: CommandRunner + Sync,
{
    type Params = ();
    type State = KeyPairState;
    type Error = KeyPairError;

    fn create<'a>(&'a self, _params: &'a ()) -> ResourceFuture<'a, KeyPairState, KeyPairError> {
        Box::pin(self.generate())
    }

    fn update<'a>(
        &'a self,
        state: &'a KeyPairState,
        _params: &'a (),
    ) -> ResourceFuture<'a, KeyPairState, KeyPairError> {
        Box::pin(async move { Ok(state.clone()) })
    }

    fn delete<'a>(&'a self, state: &'a KeyPairState) -> ResourceFuture<'a, (), KeyPairError> {
        Box::pin(async move { self.remove(state) })
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> KeyPairError {
    KeyPairError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn ensure_private_dir(path: &Utf8Path) -> Result<(), KeyPairError> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| io_error(path, &err))?;
    restrict_to_owner(path)
}

#[cfg(unix)]
fn restrict_to_owner(path: &Utf8Path) -> Result<(), KeyPairError> {
    use std::os::unix::fs::PermissionsExt;

    let (parent, name) = open_parent(path)?;
    let owner_only = Permissions::from_std(std::fs::Permissions::from_mode(0o700));
    parent
        .set_permissions(name, owner_only)
        .map_err(|err| io_error(path, &err))
}

#[cfg(not(unix))]
const fn restrict_to_owner(_path: &Utf8Path) -> Result<(), KeyPairError> {
    Ok(())
}

fn open_parent(path: &Utf8Path) -> Result<(Dir, &str), KeyPairError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| KeyPairError::Io {
        path: path.to_path_buf(),
        message: String::from("path is missing a filename"),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| io_error(parent, &err))?;
    Ok((dir, file_name))
}

fn remove_if_present(path: &Utf8Path) -> Result<(), KeyPairError> {
    let (dir, file_name) = match open_parent(path) {
        Ok(opened) => opened,
        Err(KeyPairError::Io { .. }) if path.parent().is_some_and(|parent| !parent.exists()) => {
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    match dir.remove_file(file_name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error(path, &err)),
    }
}
