//! Run configuration

use crate::error::{ErrorCategory, ErrorKind, MirrorError, Result};
use crate::file_ops::TEMP_SUFFIX;
use crate::secretcrypt::SECRETBOX_BACKEND;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_SUFFIX: &str = ".enc";

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Appended to every file name in the destination tree.
    pub suffix: String,
    /// Worker threads; 1 runs on the calling thread, 0 uses every CPU.
    pub jobs: usize,
    pub cipher: String,
}

impl MirrorConfig {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            suffix: DEFAULT_SUFFIX.to_string(),
            jobs: 1,
            cipher: SECRETBOX_BACKEND.to_string(),
        }
    }

    /// Checks the roots and options without creating anything, and resolves
    /// both roots to absolute paths.
    pub fn validate(&self) -> Result<ValidatedConfig> {
        if self.suffix.is_empty() {
            return Err(usage("ciphertext suffix must not be empty"));
        }
        if self.suffix.contains(['/', '\\']) || self.suffix == "." || self.suffix == ".." {
            return Err(usage(format!(
                "ciphertext suffix {:?} must not contain path separators",
                self.suffix
            )));
        }
        // Output names ending like an in-flight tempfile would be removed by
        // the next run's stale temp sweep.
        if self.suffix.ends_with(TEMP_SUFFIX) || TEMP_SUFFIX.ends_with(self.suffix.as_str()) {
            return Err(usage(format!(
                "ciphertext suffix {:?} clashes with the tempfile suffix {:?}",
                self.suffix, TEMP_SUFFIX
            )));
        }

        let source = fs::canonicalize(&self.source).map_err(|e| {
            MirrorError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::SourceInvalid,
                format!("source directory {} is not accessible", self.source.display()),
                e,
            )
        })?;
        if !source.is_dir() {
            return Err(MirrorError::with_kind(
                ErrorCategory::User,
                ErrorKind::SourceInvalid,
                format!("source {} is not a directory", self.source.display()),
            ));
        }
        fs::read_dir(&source).map_err(|e| {
            MirrorError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::SourceInvalid,
                format!("source directory {} cannot be listed", self.source.display()),
                e,
            )
        })?;

        let destination = absolute_lexical(&self.destination)?;
        match fs::metadata(&destination) {
            Ok(meta) if !meta.is_dir() => {
                return Err(MirrorError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::DestinationUnavailable,
                    format!(
                        "destination {} exists and is not a directory",
                        self.destination.display()
                    ),
                ));
            }
            _ => {}
        }
        let destination = resolve_existing_prefix(&destination);
        if destination == source {
            return Err(MirrorError::with_kind(
                ErrorCategory::User,
                ErrorKind::SourceInvalid,
                "source and destination must be different directories",
            ));
        }

        let jobs = match self.jobs {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };

        Ok(ValidatedConfig {
            source,
            destination,
            suffix: self.suffix.clone(),
            jobs,
            cipher: self.cipher.clone(),
        })
    }
}

/// A configuration whose source root is known to be a readable directory.
///
/// Nothing has been created yet; see [`ValidatedConfig::prepare_destination`].
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub suffix: String,
    pub jobs: usize,
    pub cipher: String,
}

impl ValidatedConfig {
    /// Creates the destination root and all missing ancestors.
    pub fn prepare_destination(&self) -> Result<()> {
        fs::create_dir_all(&self.destination).map_err(|e| {
            MirrorError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::DestinationUnavailable,
                format!(
                    "failed to create destination directory {}",
                    self.destination.display()
                ),
                e,
            )
        })?;
        info!(destination = %self.destination.display(), "destination ready");
        Ok(())
    }

    /// The destination root if it sits below the source root, so the walk
    /// can leave it out.
    pub fn nested_destination(&self) -> Option<PathBuf> {
        self.destination
            .starts_with(&self.source)
            .then(|| self.destination.clone())
    }
}

fn usage(msg: impl Into<String>) -> MirrorError {
    MirrorError::with_kind(ErrorCategory::User, ErrorKind::Usage, msg)
}

fn absolute_lexical(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| {
        MirrorError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::DestinationUnavailable,
            format!("cannot resolve destination {}", path.display()),
            e,
        )
    })
}

/// Canonicalizes the longest existing ancestor of `path` and re-appends the
/// rest, so a not-yet-created destination compares correctly with the
/// canonical source root.
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        match fs::canonicalize(current) {
            Ok(mut resolved) => {
                for part in missing.iter().rev() {
                    resolved.push(part);
                }
                return resolved;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let (Some(parent), Some(name)) = (current.parent(), current.file_name()) else {
                    return path.to_path_buf();
                };
                missing.push(name.to_os_string());
                current = parent;
            }
            Err(_) => return path.to_path_buf(),
        }
    }
}
