//! On-disk storage for packaged game versions.
//!
//! Layout under the games root:
//!
//! ```text
//! games/<game_id>/<version>/game_package.zip   # the raw archive
//! games/<game_id>/<version>/...                # extracted tree
//! games/<game_id>/current -> <version>         # symlink on POSIX, copy elsewhere
//! ```
//!
//! Extraction is "smart": archives are unpacked to scratch space first, then
//! the nearest directory containing `game_server.py` is flattened into the
//! version directory, so archives nested one or more levels deep still
//! install correctly.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// File the supervisor launches; also the extraction sentinel.
pub const SERVER_SENTINEL: &str = "game_server.py";

/// Name of the stored archive inside every version directory.
pub const PACKAGE_FILENAME: &str = "game_package.zip";

/// Name of the per-game pointer to the installed current version.
pub const CURRENT_LINK: &str = "current";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Paths and operations over the artifact tree. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    games_dir: PathBuf,
    temp_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(games_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            games_dir: games_dir.into(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Create the root directories if missing.
    pub fn ensure_layout(&self) -> io::Result<()> {
        fs::create_dir_all(&self.games_dir)?;
        fs::create_dir_all(&self.temp_dir)?;
        Ok(())
    }

    pub fn version_dir(&self, game_id: i64, version: &str) -> PathBuf {
        self.games_dir.join(game_id.to_string()).join(version)
    }

    pub fn package_path(&self, game_id: i64, version: &str) -> PathBuf {
        self.version_dir(game_id, version).join(PACKAGE_FILENAME)
    }

    pub fn current_dir(&self, game_id: i64) -> PathBuf {
        self.games_dir.join(game_id.to_string()).join(CURRENT_LINK)
    }

    /// Directory the supervisor runs a game server from: a specific version
    /// when given, otherwise the `current` pointer.
    pub fn launch_dir(&self, game_id: i64, version: Option<&str>) -> PathBuf {
        match version {
            Some(v) => self.version_dir(game_id, v),
            None => self.current_dir(game_id),
        }
    }

    /// Scratch path for one client's in-flight upload sink.
    pub fn temp_sink_path(&self, client_id: &str, filename: &str) -> PathBuf {
        self.temp_dir.join(client_id).join(filename)
    }

    /// Remove a client's scratch directory, partial sinks included.
    pub fn remove_temp_dir(&self, client_id: &str) {
        let dir = self.temp_dir.join(client_id);
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove temp dir");
            }
        }
    }

    /// Verify a staged archive and install it as `<game_id>/<version>`:
    /// move the zip into place, smart-extract next to it, and re-point the
    /// `current` link. On integrity failure the staged file is deleted.
    ///
    /// Blocking; callers on the async runtime should wrap this in
    /// `spawn_blocking`.
    pub fn install_package(
        &self,
        game_id: i64,
        version: &str,
        staged: &Path,
        expected_size: u64,
        expected_checksum: &str,
    ) -> Result<PathBuf, ArtifactError> {
        if let Err(e) = self.verify_archive(staged, expected_size, expected_checksum) {
            let _ = fs::remove_file(staged);
            return Err(e);
        }
        self.install_verified(game_id, version, staged)
    }

    /// Install a staged archive whose integrity the caller has already
    /// verified with [`ArtifactStore::verify_archive`].
    pub fn install_verified(
        &self,
        game_id: i64,
        version: &str,
        staged: &Path,
    ) -> Result<PathBuf, ArtifactError> {
        let version_dir = self.version_dir(game_id, version);
        fs::create_dir_all(&version_dir)?;

        let package = version_dir.join(PACKAGE_FILENAME);
        move_path(staged, &package)?;

        self.extract_smart(&package, &version_dir, game_id, version)?;
        self.set_current(game_id, version)?;

        Ok(package)
    }

    /// Check a staged archive against its declared size and SHA-256. Leaves
    /// the file in place either way.
    pub fn verify_archive(
        &self,
        path: &Path,
        expected_size: u64,
        expected_checksum: &str,
    ) -> Result<(), ArtifactError> {
        let actual_size = fs::metadata(path)?.len();
        if actual_size != expected_size {
            return Err(ArtifactError::SizeMismatch {
                expected: expected_size,
                actual: actual_size,
            });
        }

        let actual = checksum_file(path)?;
        if !actual.eq_ignore_ascii_case(expected_checksum) {
            return Err(ArtifactError::ChecksumMismatch {
                expected: expected_checksum.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Extract `archive` into `target`, flattening from the sentinel
    /// directory when the payload is nested.
    fn extract_smart(
        &self,
        archive: &Path,
        target: &Path,
        game_id: i64,
        version: &str,
    ) -> Result<(), ArtifactError> {
        let scratch = self.temp_dir.join(format!("extract-{game_id}-{version}"));
        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }
        fs::create_dir_all(&scratch)?;

        let result = (|| -> Result<(), ArtifactError> {
            let file = fs::File::open(archive)?;
            let mut zip = zip::ZipArchive::new(file)?;
            zip.extract(&scratch)?;

            let source = match find_sentinel_dir(&scratch, SERVER_SENTINEL) {
                Some(dir) => {
                    tracing::debug!(
                        game_id,
                        version,
                        source = %dir.strip_prefix(&scratch).unwrap_or(&dir).display(),
                        "Found game files"
                    );
                    dir
                }
                None => {
                    tracing::warn!(game_id, version, "Sentinel not found, extracting all files");
                    scratch.clone()
                }
            };

            for entry in fs::read_dir(&source)? {
                let entry = entry?;
                let dest = target.join(entry.file_name());
                if dest == *archive {
                    continue;
                }
                move_path(&entry.path(), &dest)?;
            }
            Ok(())
        })();

        let _ = fs::remove_dir_all(&scratch);
        result
    }

    /// Re-point `<game_id>/current` at `version`.
    fn set_current(&self, game_id: i64, version: &str) -> Result<(), ArtifactError> {
        let link = self.current_dir(game_id);
        remove_existing(&link)?;

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(version, &link)?;
        }
        #[cfg(not(unix))]
        {
            copy_tree(&self.version_dir(game_id, version), &link)?;
        }
        Ok(())
    }
}

/// SHA-256 hex digest of a file, streamed in transfer-sized chunks.
pub fn checksum_file(path: &Path) -> Result<String, ArtifactError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Depth-first search for the nearest directory containing `sentinel`.
fn find_sentinel_dir(dir: &Path, sentinel: &str) -> Option<PathBuf> {
    if dir.join(sentinel).is_file() {
        return Some(dir.to_path_buf());
    }
    for entry in fs::read_dir(dir).ok()? {
        let entry = entry.ok()?;
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_sentinel_dir(&path, sentinel) {
                return Some(found);
            }
        }
    }
    None
}

/// Move a file or directory, replacing any existing destination. Falls back
/// to copy-and-delete when a rename crosses filesystems.
fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    remove_existing(to)?;
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            if from.is_dir() {
                copy_tree(from, to)?;
                fs::remove_dir_all(from)
            } else {
                fs::copy(from, to)?;
                fs::remove_file(from)
            }
        }
    }
}

fn remove_existing(path: &Path) -> io::Result<()> {
    // symlink_metadata so a dangling `current` link is still removed
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            if meta.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
