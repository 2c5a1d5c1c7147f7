//! Source path to destination path mapping
//!
//! A destination path is the source path's position relative to the source
//! root, re-rooted under the destination root, with the ciphertext suffix
//! appended to the file name.

use crate::error::{ErrorCategory, ErrorKind, MirrorError, Result};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// One unit of work: a source file and where its ciphertext goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub source_path: PathBuf,
    pub relative_path: PathBuf,
    pub destination_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathMapper {
    source_root: PathBuf,
    destination_root: PathBuf,
    suffix: OsString,
}

impl PathMapper {
    pub fn new(
        source_root: impl Into<PathBuf>,
        destination_root: impl Into<PathBuf>,
        suffix: impl Into<OsString>,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            suffix: suffix.into(),
        }
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    /// Computes the task for a file found below the source root.
    pub fn map(&self, source_path: &Path) -> Result<FileTask> {
        let relative = match source_path.strip_prefix(&self.source_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                let name = source_path.file_name().ok_or_else(|| {
                    escape_error(source_path, "path has no file name")
                })?;
                warn!(
                    path = %source_path.display(),
                    root = %self.source_root.display(),
                    "path is not below the source root; mapping by file name only"
                );
                PathBuf::from(name)
            }
        };
        self.map_relative(source_path, &relative)
    }

    /// Computes the task for an explicit relative path.
    ///
    /// `.` components are dropped; `..`, root and prefix components are
    /// rejected so the result always stays below the destination root.
    pub fn map_relative(&self, source_path: &Path, relative: &Path) -> Result<FileTask> {
        let relative_path = normalize_relative(relative)?;
        let file_name = relative_path
            .file_name()
            .ok_or_else(|| escape_error(relative, "path has no file name"))?;

        let mut dest_name = file_name.to_os_string();
        dest_name.push(&self.suffix);

        let mut destination_path = self.destination_root.clone();
        if let Some(parent) = relative_path.parent() {
            destination_path.push(parent);
        }
        destination_path.push(dest_name);

        Ok(FileTask {
            source_path: source_path.to_path_buf(),
            relative_path,
            destination_path,
        })
    }
}

fn normalize_relative(relative: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(escape_error(relative, "parent directory segment"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(escape_error(relative, "absolute path"));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(escape_error(relative, "empty relative path"));
    }
    Ok(out)
}

fn escape_error(path: &Path, why: &str) -> MirrorError {
    MirrorError::with_kind(
        ErrorCategory::User,
        ErrorKind::PathEscape,
        format!(
            "refusing to map {} outside the destination root: {}",
            path.display(),
            why
        ),
    )
}

/// Creates the parent directory chain of `destination`.
///
/// Concurrent creation of the same directories is fine; an ancestor that
/// exists as something other than a directory is reported as a collision.
pub fn ensure_parent(destination: &Path) -> Result<()> {
    let Some(parent) = destination.parent() else {
        return Ok(());
    };
    match fs::create_dir_all(parent) {
        Ok(()) => Ok(()),
        Err(e) if blocked_by_non_directory(parent) => Err(MirrorError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Collision,
            format!(
                "cannot create {}: a path component exists and is not a directory",
                parent.display()
            ),
            e,
        )),
        Err(e) => Err(MirrorError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::WriteFailure,
            format!("failed to create directory {}", parent.display()),
            e,
        )),
    }
}

fn blocked_by_non_directory(dir: &Path) -> bool {
    dir.ancestors().any(|ancestor| {
        fs::metadata(ancestor)
            .map(|meta| !meta.is_dir())
            .unwrap_or(false)
    })
}

/// Tracks which destination paths are in use during one run.
///
/// Keys are case-folded so two sources that would land on the same file of a
/// case-insensitive destination filesystem are caught on any platform.
#[derive(Debug, Default)]
pub struct ClaimRegistry {
    claims: Mutex<HashMap<Vec<u8>, PathBuf>>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `task`'s destination for its relative path.
    ///
    /// Claiming again for the same relative path succeeds.
    pub fn claim(&self, task: &FileTask) -> Result<()> {
        let key = claim_key(&task.destination_path);
        let mut claims = self.claims.lock().map_err(|_| {
            MirrorError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "claim registry lock poisoned",
            )
        })?;
        match claims.get(&key) {
            Some(owner) if owner != &task.relative_path => Err(MirrorError::with_kind(
                ErrorCategory::User,
                ErrorKind::Collision,
                format!(
                    "{} maps to {}, already claimed by {}",
                    task.relative_path.display(),
                    task.destination_path.display(),
                    owner.display()
                ),
            )),
            Some(_) => Ok(()),
            None => {
                claims.insert(key, task.relative_path.clone());
                Ok(())
            }
        }
    }
}

/// Case-folds the UTF-8 runs of `path` and keeps every other byte as is, so
/// distinct non-UTF-8 names never share a key.
fn claim_key(path: &Path) -> Vec<u8> {
    let mut key = Vec::new();
    for chunk in path.as_os_str().as_encoded_bytes().utf8_chunks() {
        key.extend_from_slice(chunk.valid().to_lowercase().as_bytes());
        key.extend_from_slice(chunk.invalid());
    }
    key
}
