//! Per-file encryption
//!
//! [`encrypt_file`] seals one source file into its destination, publishing the
//! result with an atomic no-clobber rename so the destination name only ever
//! holds a complete container. [`FileEncryptor`] wraps it with the skip and
//! collision policy and turns every error into an [`Outcome`].

use crate::error::{ErrorCategory, ErrorKind, MirrorError, Result};
use crate::passphrase::Secret;
use crate::path_map::{self, ClaimRegistry, FileTask};
use crate::report::{FileFailure, Outcome};
use crate::secretcrypt::AuthenticatedCipher;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

/// Prefix of in-flight output files in the destination tree.
pub const TEMP_PREFIX: &str = ".saltymirror-";
/// Suffix of in-flight output files in the destination tree.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Encrypt `source` into `destination`.
///
/// The ciphertext is written to a temporary file next to `destination`,
/// flushed, fsynced and restricted to mode 0o600 (on Unix) before being
/// renamed into place. The rename fails rather than replace an existing
/// file. On any error the temporary file is removed and `destination` is
/// left untouched.
pub fn encrypt_file(
    cipher: &dyn AuthenticatedCipher,
    secret: &Secret,
    source: &Path,
    destination: &Path,
) -> Result<()> {
    let plaintext = fs::read(source).map_err(|e| {
        MirrorError::with_kind_and_source(
            read_category(&e),
            ErrorKind::ReadFailure,
            format!("failed to read from {}", source.display()),
            e,
        )
    })?;
    let sealed = cipher
        .seal(secret, &plaintext)
        .map_err(|e| e.with_context("encryption failed"))?;

    let dest_dir = destination.parent().ok_or_else(|| {
        MirrorError::with_kind(
            ErrorCategory::User,
            ErrorKind::WriteFailure,
            format!("{} has no parent directory", destination.display()),
        )
    })?;
    let mut temp_file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dest_dir)
        .map_err(|e| write_error(format!("failed to create tempfile in {}", dest_dir.display()), e))?;

    temp_file
        .write_all(&sealed)
        .map_err(|e| write_error("failed to write to tempfile", e))?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file
        .flush()
        .map_err(|e| write_error("failed to flush tempfile", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| write_error("failed to sync file prior to rename", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp_file
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| {
                MirrorError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::PermissionFailure,
                    "failed to set tempfile permissions",
                    e,
                )
            })?;
    }

    temp_file.persist_noclobber(destination).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            MirrorError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Collision,
                format!("{} appeared while it was being written", destination.display()),
                e.error,
            )
        } else {
            write_error(
                format!("failed to rename to target file {}", destination.display()),
                e.error,
            )
        }
    })?;
    Ok(())
}

fn read_category(err: &io::Error) -> ErrorCategory {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ErrorCategory::User,
        _ => ErrorCategory::Internal,
    }
}

fn write_error(msg: impl Into<String>, err: io::Error) -> MirrorError {
    MirrorError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::WriteFailure, msg, err)
}

/// Runs one [`FileTask`] to an [`Outcome`].
pub struct FileEncryptor<'a> {
    cipher: &'a dyn AuthenticatedCipher,
    claims: &'a ClaimRegistry,
}

impl<'a> FileEncryptor<'a> {
    pub fn new(cipher: &'a dyn AuthenticatedCipher, claims: &'a ClaimRegistry) -> Self {
        Self { cipher, claims }
    }

    /// Never panics on a per-file problem; every error becomes `Failed`.
    pub fn process(&self, task: &FileTask, secret: &Secret) -> Outcome {
        match self.try_process(task, secret) {
            Ok(outcome) => {
                debug!(path = %task.relative_path.display(), ?outcome, "processed");
                outcome
            }
            Err(err) => {
                debug!(
                    path = %task.relative_path.display(),
                    "failed: {}",
                    err.chain_message()
                );
                Outcome::Failed(FileFailure::from(&err))
            }
        }
    }

    fn try_process(&self, task: &FileTask, secret: &Secret) -> Result<Outcome> {
        self.claims.claim(task)?;

        match fs::symlink_metadata(&task.destination_path) {
            Ok(meta) if meta.is_file() => return Ok(Outcome::Skipped),
            Ok(_) => {
                return Err(MirrorError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::Collision,
                    format!(
                        "{} exists and is not a regular file",
                        task.destination_path.display()
                    ),
                ));
            }
            // NotADirectory: an ancestor is a file; ensure_parent reports it
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) => {}
            Err(e) => {
                return Err(write_error(
                    format!("failed to inspect {}", task.destination_path.display()),
                    e,
                ));
            }
        }

        path_map::ensure_parent(&task.destination_path)?;
        encrypt_file(
            self.cipher,
            secret,
            &task.source_path,
            &task.destination_path,
        )?;
        Ok(Outcome::Encrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::path_map::PathMapper;
    use crate::report::FailureReason;
    use crate::secretcrypt::{MIN_LOG_N, ScryptParams, SecretboxCipher};
    use tempfile::TempDir;
    use zeroize::Zeroizing;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    fn fast_cipher() -> SecretboxCipher {
        SecretboxCipher::new(ScryptParams::new(MIN_LOG_N, 8, 1).unwrap())
    }

    fn secret() -> Secret {
        Secret::new(Zeroizing::new(b"test password".to_vec()))
    }

    struct FailingCipher;

    impl AuthenticatedCipher for FailingCipher {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn seal(&self, _secret: &Secret, _plaintext: &[u8]) -> Result<Vec<u8>> {
            Err(MirrorError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::SecretboxFailure,
                "simulated failure",
            ))
        }
    }

    fn leftover_temps(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(TEMP_PREFIX)
            })
            .count()
    }

    #[test]
    fn test_encrypt_file_writes_container() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        fs::write(&plain_path, b"Hello, saltymirror!").unwrap();

        encrypt_file(&fast_cipher(), &secret(), &plain_path, &crypt_path).unwrap();

        let sealed = fs::read(&crypt_path).unwrap();
        let envelope = Envelope::parse(&sealed).unwrap();
        assert_eq!(envelope.sealed.len(), b"Hello, saltymirror!".len() + 16);
        assert_eq!(fs::read(&plain_path).unwrap(), b"Hello, saltymirror!");
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_file_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        fs::write(&plain_path, b"test").unwrap();

        encrypt_file(&fast_cipher(), &secret(), &plain_path, &crypt_path).unwrap();

        let permissions = fs::metadata(&crypt_path).unwrap().permissions();
        assert_eq!(permissions.mode() & 0o777, 0o600);
    }

    #[test]
    fn test_cipher_failure_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        fs::write(&plain_path, b"test").unwrap();

        let err = encrypt_file(&FailingCipher, &secret(), &plain_path, &crypt_path).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::SecretboxFailure));
        assert!(!crypt_path.exists());
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[test]
    fn test_existing_destination_never_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.enc");
        fs::write(&plain_path, b"test").unwrap();
        fs::write(&crypt_path, b"earlier output").unwrap();

        let err = encrypt_file(&fast_cipher(), &secret(), &plain_path, &crypt_path).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Collision));
        assert_eq!(fs::read(&crypt_path).unwrap(), b"earlier output");
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[test]
    fn test_process_encrypts_then_skips() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/b.txt"), b"b").unwrap();

        let mapper = PathMapper::new(src.path(), dst.path(), ".enc");
        let task = mapper.map(&src.path().join("sub/b.txt")).unwrap();
        let cipher = fast_cipher();
        let claims = ClaimRegistry::new();
        let encryptor = FileEncryptor::new(&cipher, &claims);

        assert_eq!(encryptor.process(&task, &secret()), Outcome::Encrypted);
        assert!(dst.path().join("sub/b.txt.enc").is_file());

        let before = fs::read(&task.destination_path).unwrap();
        assert_eq!(encryptor.process(&task, &secret()), Outcome::Skipped);
        assert_eq!(fs::read(&task.destination_path).unwrap(), before);
    }

    #[test]
    fn test_skip_does_not_open_source() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(dst.path().join("gone.txt.enc"), b"x").unwrap();

        // The source does not exist; a skip must not notice.
        let mapper = PathMapper::new(src.path(), dst.path(), ".enc");
        let task = mapper.map(&src.path().join("gone.txt")).unwrap();
        let cipher = fast_cipher();
        let claims = ClaimRegistry::new();

        let outcome = FileEncryptor::new(&cipher, &claims).process(&task, &secret());
        assert_eq!(outcome, Outcome::Skipped);
    }

    #[test]
    fn test_directory_at_destination_is_collision() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("foo"), b"f").unwrap();
        fs::create_dir(dst.path().join("foo.enc")).unwrap();

        let mapper = PathMapper::new(src.path(), dst.path(), ".enc");
        let task = mapper.map(&src.path().join("foo")).unwrap();
        let cipher = fast_cipher();
        let claims = ClaimRegistry::new();

        match FileEncryptor::new(&cipher, &claims).process(&task, &secret()) {
            Outcome::Failed(failure) => assert_eq!(failure.reason, FailureReason::Collision),
            other => panic!("expected collision, got {:?}", other),
        }
    }

    #[test]
    fn test_file_in_place_of_directory_is_collision() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir(src.path().join("foo.enc")).unwrap();
        fs::write(src.path().join("foo.enc/inner"), b"i").unwrap();
        fs::write(dst.path().join("foo.enc"), b"output of a file named foo").unwrap();

        let mapper = PathMapper::new(src.path(), dst.path(), ".enc");
        let task = mapper.map(&src.path().join("foo.enc/inner")).unwrap();
        let cipher = fast_cipher();
        let claims = ClaimRegistry::new();

        match FileEncryptor::new(&cipher, &claims).process(&task, &secret()) {
            Outcome::Failed(failure) => assert_eq!(failure.reason, FailureReason::Collision),
            other => panic!("expected collision, got {:?}", other),
        }
        assert_eq!(
            fs::read(dst.path().join("foo.enc")).unwrap(),
            b"output of a file named foo"
        );
    }

    #[test]
    fn test_missing_source_is_read_error() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();

        let mapper = PathMapper::new(src.path(), dst.path(), ".enc");
        let task = mapper.map(&src.path().join("missing.txt")).unwrap();
        let cipher = fast_cipher();
        let claims = ClaimRegistry::new();

        match FileEncryptor::new(&cipher, &claims).process(&task, &secret()) {
            Outcome::Failed(failure) => assert_eq!(failure.reason, FailureReason::ReadError),
            other => panic!("expected read error, got {:?}", other),
        }
        assert!(!task.destination_path.exists());
    }

    #[test]
    fn test_cipher_failure_is_cipher_error() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), b"a").unwrap();

        let mapper = PathMapper::new(src.path(), dst.path(), ".enc");
        let task = mapper.map(&src.path().join("a.txt")).unwrap();
        let claims = ClaimRegistry::new();

        match FileEncryptor::new(&FailingCipher, &claims).process(&task, &secret()) {
            Outcome::Failed(failure) => {
                assert_eq!(failure.reason, FailureReason::CipherError);
                assert!(failure.message.contains("simulated failure"));
            }
            other => panic!("expected cipher error, got {:?}", other),
        }
        assert!(!task.destination_path.exists());
    }
}
