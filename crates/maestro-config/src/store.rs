//! Credential store abstraction and its YAML file implementation.
//!
//! # Design
//! - One file per context (`config-<context>.yaml`) under a per-user directory.
//! - Writes land in a sibling temporary file first and are renamed into place,
//!   so a reader never observes a partially written record.
//! - Credential files are created owner-only (`0600`) on Unix.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::error::{ConfigError, ConfigResult};
use crate::model::Credential;
use crate::validate::validate_context;

/// Directory name created under the home directory.
pub const CONFIG_DIR_NAME: &str = ".maestro";

/// Read/write access to per-context credentials.
pub trait CredentialStore: Send + Sync {
    /// Load the credential stored for `context`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CredentialMissing`] when nothing is stored yet.
    fn load(&self, context: &str) -> ConfigResult<Credential>;

    /// Replace the credential stored for `context`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    fn save(&self, context: &str, credential: &Credential) -> ConfigResult<()>;
}

/// YAML-backed credential store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    /// Store rooted at an explicit directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `~/.maestro`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HomeDirUnavailable`] if no home directory exists.
    pub fn from_home() -> ConfigResult<Self> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeDirUnavailable)?;
        Ok(Self::new(home.join(CONFIG_DIR_NAME)))
    }

    /// Directory holding the credential files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path used for `context`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidContext`] for unusable context names.
    pub fn path_for(&self, context: &str) -> ConfigResult<PathBuf> {
        validate_context(context)?;
        Ok(self.root.join(format!("config-{context}.yaml")))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, context: &str) -> ConfigResult<Credential> {
        let path = self.path_for(context)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ConfigError::CredentialMissing {
                    context: context.to_string(),
                    path,
                });
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    operation: "read",
                    path,
                    source,
                });
            }
        };

        serde_yaml::from_slice(&bytes).map_err(|source| ConfigError::Decode { path, source })
    }

    fn save(&self, context: &str, credential: &Credential) -> ConfigResult<()> {
        let path = self.path_for(context)?;
        let encoded = serde_yaml::to_string(credential).map_err(|source| ConfigError::Encode {
            context: context.to_string(),
            source,
        })?;

        fs::create_dir_all(&self.root).map_err(|source| ConfigError::Io {
            operation: "create_dir_all",
            path: self.root.clone(),
            source,
        })?;

        let staging = self
            .root
            .join(format!(".config-{context}.yaml.{}", Uuid::new_v4().simple()));
        if let Err(source) = write_private(&staging, encoded.as_bytes()) {
            let _ = fs::remove_file(&staging);
            return Err(ConfigError::Io {
                operation: "write",
                path: staging,
                source,
            });
        }
        if let Err(source) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(ConfigError::Io {
                operation: "rename",
                path,
                source,
            });
        }

        debug!(context, path = %path.display(), "credential stored");
        Ok(())
    }
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
