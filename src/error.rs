use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The user provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid combination of arguments or option values.
    Usage,
    /// The requested cipher backend is not available in this build.
    BackendUnavailable,
    /// Source root is missing, not a directory, or otherwise unusable.
    SourceInvalid,
    /// Destination root could not be created or is not a directory.
    DestinationUnavailable,
    /// The passphrase and its confirmation differ.
    PassphraseMismatch,
    /// An empty passphrase was supplied.
    PassphraseEmpty,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// A directory below the source root could not be listed.
    DirectoryAccess,
    /// Reading a source file failed.
    ReadFailure,
    /// Writing or publishing a destination file failed.
    WriteFailure,
    /// Restricting permissions on a destination file failed.
    PermissionFailure,
    /// Low-level scrypt key derivation failed.
    ScryptFailure,
    /// NaCl secretbox (XSalsa20Poly1305) failed to seal data.
    SecretboxFailure,
    /// Two sources map onto the same destination, or the destination name is
    /// occupied by something that is not a previous output file.
    Collision,
    /// A relative path would resolve outside of the destination root.
    PathEscape,
    /// An encrypted container does not have the expected layout.
    EnvelopeInvalid,
    /// Unexpected state reached within saltymirror logic.
    InternalInvariant,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct MirrorError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl MirrorError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    /// Message of this error followed by the messages of its source chain.
    pub fn chain_message(&self) -> String {
        let mut out = self.msg.clone();
        let mut next = StdError::source(self);
        while let Some(err) = next {
            out.push_str(": ");
            out.push_str(&err.to_string());
            next = err.source();
        }
        out
    }
}

/// Process exit status of a run.
///
/// Codes other than `Success` and `CompletedWithFailures` mean the run never
/// started touching the destination tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    CompletedWithFailures = 1,
    Usage = 2,
    InvalidSource = 3,
    BadPassphrase = 4,
    NoBackend = 5,
    DestinationUnavailable = 6,
    Internal = 70,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Maps an error that prevented the run from starting onto its exit status.
pub fn exit_status_for(err: &MirrorError) -> ExitStatus {
    match err.kind {
        Some(ErrorKind::Usage) => ExitStatus::Usage,
        Some(ErrorKind::SourceInvalid) => ExitStatus::InvalidSource,
        Some(
            ErrorKind::PassphraseMismatch
            | ErrorKind::PassphraseEmpty
            | ErrorKind::PassphraseUnavailable,
        ) => ExitStatus::BadPassphrase,
        Some(ErrorKind::BackendUnavailable) => ExitStatus::NoBackend,
        Some(ErrorKind::DestinationUnavailable) => ExitStatus::DestinationUnavailable,
        _ => ExitStatus::Internal,
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MirrorError>;
