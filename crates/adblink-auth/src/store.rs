use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};
use crate::keypair::AdbKeyPair;

const PRIVATE_KEY_FILE: &str = "adb_private_key.pem";
const PUBLIC_KEY_FILE: &str = "adb_public_key.pem";

/// On-disk home of the host's key pair: two files in application-private
/// storage, regenerated if absent or corrupt.
pub struct KeyStore {
    private_path: PathBuf,
    public_path: PathBuf,
}

impl KeyStore {
    /// Store the pair at two explicit paths.
    pub fn new(private_path: impl Into<PathBuf>, public_path: impl Into<PathBuf>) -> Self {
        Self {
            private_path: private_path.into(),
            public_path: public_path.into(),
        }
    }

    /// Store the pair under a directory using the default file names.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join(PRIVATE_KEY_FILE), dir.join(PUBLIC_KEY_FILE))
    }

    /// Load the persisted pair, or generate and persist a fresh one.
    ///
    /// A corrupt persisted key is deleted and replaced. Fails only when
    /// neither load nor generate-and-persist succeeds, which is fatal for
    /// the connection attempt.
    pub fn load_or_generate(&self) -> Result<AdbKeyPair> {
        match self.load()? {
            Some(pair) => {
                debug!(path = %self.private_path.display(), "loaded persisted key pair");
                Ok(pair)
            }
            None => {
                info!("generating new adb key pair");
                let pair = AdbKeyPair::generate()?;
                self.persist(&pair)?;
                Ok(pair)
            }
        }
    }

    /// Load the persisted pair if present and parsable.
    ///
    /// Returns `Ok(None)` when no key exists yet. A present-but-unparsable
    /// key is removed so a later generate can take its place.
    pub fn load(&self) -> Result<Option<AdbKeyPair>> {
        let pem = match std::fs::read_to_string(&self.private_path) {
            Ok(pem) => pem,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AuthError::Persist {
                    path: self.private_path.clone(),
                    source: err,
                })
            }
        };

        match AdbKeyPair::from_pkcs1_pem(&pem) {
            Ok(pair) => Ok(Some(pair)),
            Err(err) => {
                warn!(path = %self.private_path.display(), error = %err,
                      "persisted key is corrupt, discarding");
                self.remove()?;
                Ok(None)
            }
        }
    }

    /// Write both halves of the pair.
    pub fn persist(&self, pair: &AdbKeyPair) -> Result<()> {
        if let Some(parent) = self.private_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AuthError::Persist {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let private_pem = pair.private_key_pem()?;
        write_file(&self.private_path, private_pem.as_bytes())?;
        restrict_permissions(&self.private_path)?;

        let public_pem = pair.public_key_pem()?;
        write_file(&self.public_path, public_pem.as_bytes())?;

        debug!(path = %self.private_path.display(), "persisted key pair");
        Ok(())
    }

    /// Delete both key files. Missing files are not an error.
    pub fn remove(&self) -> Result<()> {
        for path in [&self.private_path, &self.public_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(AuthError::Persist {
                        path: path.clone(),
                        source: err,
                    })
                }
            }
        }
        Ok(())
    }

    /// Path of the private key file.
    pub fn private_path(&self) -> &Path {
        &self.private_path
    }

    /// Path of the public key file.
    pub fn public_path(&self) -> &Path {
        &self.public_path
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|source| AuthError::Persist {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
        AuthError::Persist {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
