//! JSON persistence of resource state between invocations.
//!
//! A missing state file means the resource does not exist yet.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised while reading or writing state files.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum StateStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a state file holds malformed JSON.
    #[error("failed to parse state in {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// A single JSON state file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateFile {
    path: Utf8PathBuf,
}

impl StateFile {
    /// Points at `path`; nothing is read until [`StateFile::load`].
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads the stored state, or `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Io`] when the file cannot be read and
    /// [`StateStoreError::Parse`] when its contents are not valid state.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, StateStoreError> {
        let Some(dir) = self.open_parent(false)? else {
            return Ok(None);
        };
        let contents = match dir.read_to_string(self.file_name()?) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(&err)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| StateStoreError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            })
    }

    /// Writes `state`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Io`] when serialisation or the write fails.
    pub fn save<T: Serialize>(&self, state: &T) -> Result<(), StateStoreError> {
        let mut rendered = serde_json::to_string_pretty(state).map_err(|err| StateStoreError::Io {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        rendered.push('\n');
        let Some(dir) = self.open_parent(true)? else {
            return Err(StateStoreError::Io {
                path: self.path.clone(),
                message: String::from("parent directory is missing"),
            });
        };
        dir.write(self.file_name()?, rendered)
            .map_err(|err| self.io_error(&err))
    }

    /// Deletes the file; an absent file counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Io`] for failures other than absence.
    pub fn clear(&self) -> Result<(), StateStoreError> {
        let Some(dir) = self.open_parent(false)? else {
            return Ok(());
        };
        match dir.remove_file(self.file_name()?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(&err)),
        }
    }

    fn parent(&self) -> &Utf8Path {
        match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        }
    }

    fn file_name(&self) -> Result<&str, StateStoreError> {
        self.path.file_name().ok_or_else(|| StateStoreError::Io {
            path: self.path.clone(),
            message: String::from("state path is missing a filename"),
        })
    }

    fn open_parent(&self, create: bool) -> Result<Option<Dir>, StateStoreError> {
        let parent = self.parent();
        if create {
            Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| {
                StateStoreError::Io {
                    path: parent.to_path_buf(),
                    message: err.to_string(),
                }
            })?;
        }
        match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => Ok(Some(dir)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StateStoreError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    fn io_error(&self, err: &io::Error) -> StateStoreError {
        StateStoreError::Io {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}
