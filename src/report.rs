//! Per-file outcomes and the run summary

use crate::error::{ErrorKind, MirrorError};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    ReadError,
    WriteError,
    CipherError,
    PermissionError,
    Collision,
    PathEscape,
    DirectoryAccess,
}

impl FailureReason {
    /// Classifies an error raised while processing one file.
    pub fn from_error(err: &MirrorError) -> Self {
        match err.kind {
            Some(ErrorKind::ReadFailure) => Self::ReadError,
            Some(ErrorKind::PermissionFailure) => Self::PermissionError,
            Some(ErrorKind::ScryptFailure | ErrorKind::SecretboxFailure) => Self::CipherError,
            Some(ErrorKind::Collision) => Self::Collision,
            Some(ErrorKind::PathEscape) => Self::PathEscape,
            Some(ErrorKind::DirectoryAccess) => Self::DirectoryAccess,
            _ => Self::WriteError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadError => "read error",
            Self::WriteError => "write error",
            Self::CipherError => "cipher error",
            Self::PermissionError => "permission error",
            Self::Collision => "collision",
            Self::PathEscape => "path escape",
            Self::DirectoryAccess => "directory access error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl From<&MirrorError> for FileFailure {
    fn from(err: &MirrorError) -> Self {
        Self {
            reason: FailureReason::from_error(err),
            message: err.chain_message(),
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Encrypted,
    /// The destination already existed; nothing was read or written.
    Skipped,
    Failed(FileFailure),
}

impl Outcome {
    pub fn failed(reason: FailureReason, message: impl Into<String>) -> Self {
        Self::Failed(FileFailure {
            reason,
            message: message.into(),
        })
    }
}

/// One failed entry in a [`RunSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub relative_path: PathBuf,
    pub failure: FileFailure,
}

/// Accumulates outcomes for one run. Only the aggregating thread writes to it.
#[derive(Debug)]
pub struct RunReport {
    destination_root: PathBuf,
    encrypted: usize,
    skipped: usize,
    failures: Vec<FailureRecord>,
}

impl RunReport {
    pub fn new(destination_root: impl Into<PathBuf>) -> Self {
        Self {
            destination_root: destination_root.into(),
            encrypted: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, relative_path: &Path, outcome: Outcome) {
        match outcome {
            Outcome::Encrypted => self.encrypted += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed(failure) => self.failures.push(FailureRecord {
                relative_path: relative_path.to_path_buf(),
                failure,
            }),
        }
    }

    pub fn summary(mut self) -> RunSummary {
        self.failures
            .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        RunSummary {
            destination_root: self.destination_root,
            encrypted: self.encrypted,
            skipped: self.skipped,
            failures: self.failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub destination_root: PathBuf,
    pub encrypted: usize,
    pub skipped: usize,
    /// Sorted by relative path.
    pub failures: Vec<FailureRecord>,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.encrypted + self.skipped + self.failed()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "destination: {}", self.destination_root.display())?;
        write!(
            f,
            "encrypted: {}, skipped: {}, failed: {}",
            self.encrypted,
            self.skipped,
            self.failed()
        )?;
        for record in &self.failures {
            write!(
                f,
                "\n  {}: {}: {}",
                record.relative_path.display(),
                record.failure.reason,
                record.failure.message
            )?;
        }
        Ok(())
    }
}
