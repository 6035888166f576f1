//! Local key generation settings.

use std::ffi::OsString;

use camino::Utf8Path;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use super::KeyPairError;

/// Default modulus size for generated keys.
pub const DEFAULT_KEY_BITS: u32 = 4096;

/// Key-pair settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FERRY_KEYS",
    discovery(
        app_name = "ferry",
        env_var = "FERRY_CONFIG_PATH",
        config_file_name = "ferry.toml",
        dotfile_name = ".ferry.toml",
        project_file_name = "ferry.toml"
    )
)]
pub struct KeyPairConfig {
    /// Directory holding generated key pairs.
    #[ortho_config(default = "out/keys".to_owned())]
    pub keys_dir: String,
    /// Path to the `ssh-keygen` executable.
    #[ortho_config(default = "ssh-keygen".to_owned())]
    pub keygen_bin: String,
    /// RSA modulus size.
    #[ortho_config(default = DEFAULT_KEY_BITS)]
    pub key_bits: u32,
}

/// Errors raised when loading the key-pair configuration.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum KeyPairConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("key-pair configuration parsing failed: {0}")]
    Parse(String),
}

impl KeyPairConfig {
    /// Ensures paths are present and the key size is usable.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), KeyPairError> {
        for (value, field) in [
            (&self.keys_dir, "keys_dir"),
            (&self.keygen_bin, "keygen_bin"),
        ] {
            if value.trim().is_empty() {
                return Err(KeyPairError::InvalidConfig {
                    field: field.to_owned(),
                });
            }
        }
        if self.key_bits < 2048 {
            return Err(KeyPairError::InvalidConfig {
                field: String::from("key_bits"),
            });
        }
        Ok(())
    }

    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, KeyPairConfigLoadError> {
        Self::load_from_iter([OsString::from("ferry")])
            .map_err(|err| KeyPairConfigLoadError::Parse(err.to_string()))
    }

    /// Returns the key directory as a path.
    #[must_use]
    pub fn keys_dir(&self) -> &Utf8Path {
        Utf8Path::new(&self.keys_dir)
    }
}
