//! Mirrors a source tree into an encrypted destination tree

use crate::config::ValidatedConfig;
use crate::error::{ErrorCategory, ErrorKind, MirrorError, Result};
use crate::file_ops::{FileEncryptor, TEMP_PREFIX, TEMP_SUFFIX};
use crate::passphrase::Secret;
use crate::path_map::{ClaimRegistry, PathMapper};
use crate::report::{FailureReason, FileFailure, Outcome, RunReport, RunSummary};
use crate::secretcrypt::AuthenticatedCipher;
use crate::walker::{self, WalkItem};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Length of the random part tempfile puts between prefix and suffix.
const TEMP_RANDOM_LEN: usize = 6;

/// Called once per file as soon as its outcome is known. With more than one
/// job it is called from worker threads.
pub trait Observer: Sync {
    fn on_outcome(&self, relative_path: &Path, outcome: &Outcome);
}

impl<F> Observer for F
where
    F: Fn(&Path, &Outcome) + Sync,
{
    fn on_outcome(&self, relative_path: &Path, outcome: &Outcome) {
        self(relative_path, outcome)
    }
}

pub struct Mirror<'a> {
    config: &'a ValidatedConfig,
    cipher: &'a dyn AuthenticatedCipher,
}

impl<'a> Mirror<'a> {
    pub fn new(config: &'a ValidatedConfig, cipher: &'a dyn AuthenticatedCipher) -> Self {
        Self { config, cipher }
    }

    /// Encrypts every regular file below the source root.
    ///
    /// Per-file problems end up in the summary; an `Err` means the run could
    /// not be carried out at all.
    pub fn run(&self, secret: &Secret, observer: &dyn Observer) -> Result<RunSummary> {
        let config = self.config;
        info!(
            source = %config.source.display(),
            destination = %config.destination.display(),
            jobs = config.jobs,
            cipher = self.cipher.name(),
            "mirror starting"
        );

        sweep_stale_temps(&config.destination);

        let mapper = PathMapper::new(&config.source, &config.destination, &config.suffix);
        let claims = ClaimRegistry::new();
        let encryptor = FileEncryptor::new(self.cipher, &claims);
        let items = walker::walk(&config.source, config.nested_destination());

        let handle = |item: WalkItem| {
            let (relative_path, outcome) = self.handle(&mapper, &encryptor, secret, item);
            observer.on_outcome(&relative_path, &outcome);
            (relative_path, outcome)
        };

        let mut report = RunReport::new(&config.destination);
        if config.jobs <= 1 {
            for item in items {
                let (relative_path, outcome) = handle(item);
                report.record(&relative_path, outcome);
            }
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.jobs)
                .thread_name(|i| format!("saltymirror-{}", i))
                .build()
                .map_err(|e| {
                    MirrorError::with_kind_and_source(
                        ErrorCategory::Internal,
                        ErrorKind::InternalInvariant,
                        "failed to start worker pool",
                        e,
                    )
                })?;
            let results: Vec<(PathBuf, Outcome)> =
                pool.install(|| items.par_bridge().map(handle).collect());
            for (relative_path, outcome) in results {
                report.record(&relative_path, outcome);
            }
        }

        let summary = report.summary();
        info!(
            encrypted = summary.encrypted,
            skipped = summary.skipped,
            failed = summary.failed(),
            "mirror finished"
        );
        Ok(summary)
    }

    fn handle(
        &self,
        mapper: &PathMapper,
        encryptor: &FileEncryptor<'_>,
        secret: &Secret,
        item: WalkItem,
    ) -> (PathBuf, Outcome) {
        match item {
            WalkItem::File(path) => match mapper.map(&path) {
                Ok(task) => {
                    let outcome = encryptor.process(&task, secret);
                    (task.relative_path, outcome)
                }
                Err(err) => (
                    self.relative_to_source(&path),
                    Outcome::Failed(FileFailure::from(&err)),
                ),
            },
            WalkItem::Unreadable { path, message } => (
                self.relative_to_source(&path),
                Outcome::failed(FailureReason::DirectoryAccess, message),
            ),
        }
    }

    fn relative_to_source(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.config.source) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
            Ok(rel) => rel.to_path_buf(),
            Err(_) => path.to_path_buf(),
        }
    }
}

/// Runs a mirror and wipes the secret afterwards, whatever the result.
pub fn execute(
    config: &ValidatedConfig,
    cipher: &dyn AuthenticatedCipher,
    mut secret: Secret,
    observer: &dyn Observer,
) -> Result<RunSummary> {
    let result = config
        .prepare_destination()
        .and_then(|()| Mirror::new(config, cipher).run(&secret, observer));
    secret.clear();
    result
}

/// Removes output files a previous, interrupted run left half-written.
///
/// Returns how many were removed.
pub fn sweep_stale_temps(destination: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(destination)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_temp_name(&e.file_name().to_string_lossy()))
    {
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), "cannot remove stale tempfile: {e}"),
        }
    }
    if removed > 0 {
        info!(removed, "removed stale tempfiles from an interrupted run");
    }
    removed
}

fn is_temp_name(name: &str) -> bool {
    name.len() == TEMP_PREFIX.len() + TEMP_RANDOM_LEN + TEMP_SUFFIX.len()
        && name.starts_with(TEMP_PREFIX)
        && name.ends_with(TEMP_SUFFIX)
}
