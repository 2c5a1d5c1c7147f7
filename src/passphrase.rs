//! Passphrase reading and the in-memory secret it produces

use crate::error::{ErrorCategory, ErrorKind, MirrorError, Result};
use std::fmt;
use std::io::{self, IsTerminal, Read, Write};
use zeroize::{Zeroize, Zeroizing};

/// The run's passphrase.
///
/// Owned by the run and shared read-only by reference with every worker. The
/// bytes are wiped when the value is dropped, and [`Secret::clear`] wipes them
/// earlier once the last file has been sealed.
pub struct Secret {
    bytes: Zeroizing<Vec<u8>>,
}

impl Secret {
    pub fn new(bytes: Zeroizing<Vec<u8>>) -> Self {
        Self { bytes }
    }

    pub fn expose_secret(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Overwrites the passphrase with zeroes and releases it.
    pub fn clear(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Trait for reading passphrases from various sources
pub trait PassphraseReader {
    /// Read a passphrase as arbitrary bytes (not necessarily UTF-8)
    ///
    /// Returns the passphrase wrapped in `Zeroizing` to ensure it is securely
    /// wiped from memory when dropped.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>>;
}

/// Reads a passphrase and rejects empty values.
pub fn read_secret(reader: &mut dyn PassphraseReader) -> Result<Secret> {
    let passphrase = reader.read_passphrase()?;
    if passphrase.is_empty() {
        return Err(MirrorError::with_kind(
            ErrorCategory::User,
            ErrorKind::PassphraseEmpty,
            "empty passphrase is not allowed",
        ));
    }
    Ok(Secret::new(passphrase))
}

/// Returns a fixed passphrase (for testing)
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<Vec<u8>>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: Vec<u8>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new((*self.passphrase).clone()))
    }
}

/// Reads passphrase from any io::Read source
pub struct ReaderPassphraseReader {
    reader: Box<dyn Read>,
}

impl ReaderPassphraseReader {
    pub fn new(reader: Box<dyn Read>) -> Self {
        Self { reader }
    }
}

impl PassphraseReader for ReaderPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let mut data = Zeroizing::new(Vec::new());
        self.reader.read_to_end(&mut data).map_err(|e| {
            MirrorError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("error reading passphrase: {}", e),
                e,
            )
        })?;
        Ok(data)
    }
}

/// Reads passphrase from terminal with no echo, asking twice
pub struct TerminalPassphraseReader;

impl TerminalPassphraseReader {
    pub fn new() -> Self {
        Self
    }

    fn prompt(&self, text: &str) -> Result<Zeroizing<Vec<u8>>> {
        io::stderr().write_all(text.as_bytes()).map_err(|e| {
            MirrorError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failed to write prompt: {}", e),
                e,
            )
        })?;
        io::stderr().flush().map_err(|e| {
            MirrorError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failed to flush prompt: {}", e),
                e,
            )
        })?;

        // rpassword hands back a String; move its buffer straight into Zeroizing
        let passphrase = rpassword::read_password().map_err(|e| {
            MirrorError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failure reading passphrase: {}", e),
                e,
            )
        })?;
        Ok(Zeroizing::new(passphrase.into_bytes()))
    }
}

impl Default for TerminalPassphraseReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    /// Read passphrase from terminal, then read it again for confirmation.
    ///
    /// Note: Terminal input is limited to UTF-8 due to rpassword library constraints.
    /// For non-UTF-8 passphrases, use --passphrase-stdin instead.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        if !io::stdin().is_terminal() {
            return Err(MirrorError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read passphrase from terminal - stdin is not a terminal",
            ));
        }

        let first = self.prompt("Passphrase (saltymirror): ")?;
        let second = self.prompt("Confirm passphrase: ")?;
        confirm(first, &second)
    }
}

fn confirm(first: Zeroizing<Vec<u8>>, second: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if first.as_slice() != second {
        return Err(MirrorError::with_kind(
            ErrorCategory::User,
            ErrorKind::PassphraseMismatch,
            "passphrases do not match",
        ));
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_reader() {
        let mut reader = ConstantPassphraseReader::new(b"test123".to_vec());
        assert_eq!(&*reader.read_passphrase().unwrap(), b"test123");
        assert_eq!(&*reader.read_passphrase().unwrap(), b"test123");
    }

    /// Tests the terminal reader. This is ignored by default and must be run
    /// explicitly and with human input:
    ///
    /// cargo test test_terminal_reader_interactive -- --ignored --nocapture
    #[test]
    #[ignore]
    fn test_terminal_reader_interactive() {
        let mut reader = TerminalPassphraseReader::new();
        println!("\nPlease enter the same test passphrase twice:");
        let passphrase = reader.read_passphrase().unwrap();
        assert!(!passphrase.is_empty(), "Expected non-empty passphrase");
    }

    #[test]
    fn test_reader_passphrase_reader() {
        let data = b"mypassword";
        let mut reader = ReaderPassphraseReader::new(Box::new(&data[..]));
        assert_eq!(&*reader.read_passphrase().unwrap(), b"mypassword");
    }

    /// Verifies that ReaderPassphraseReader accepts arbitrary byte sequences,
    /// not just valid UTF-8.
    #[test]
    fn test_reader_passphrase_reader_non_utf8() {
        let data: &[u8] = &[0xff, 0xfe, 0x00, 0x01];
        let mut reader = ReaderPassphraseReader::new(Box::new(data));
        assert_eq!(&*reader.read_passphrase().unwrap(), data);
    }

    #[test]
    fn test_read_secret_rejects_empty() {
        let mut reader = ReaderPassphraseReader::new(Box::new(&b""[..]));
        let err = read_secret(&mut reader).expect_err("expected empty passphrase error");
        assert_eq!(err.kind, Some(ErrorKind::PassphraseEmpty));
    }

    #[test]
    fn test_confirm_mismatch() {
        let err = confirm(Zeroizing::new(b"one".to_vec()), b"two").unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::PassphraseMismatch));

        let ok = confirm(Zeroizing::new(b"same".to_vec()), b"same").unwrap();
        assert_eq!(&*ok, b"same");
    }

    #[test]
    fn test_secret_clear() {
        let mut reader = ConstantPassphraseReader::new(b"hunter2".to_vec());
        let mut secret = read_secret(&mut reader).unwrap();
        assert_eq!(secret.expose_secret(), b"hunter2");

        secret.clear();
        assert!(secret.is_empty());
        assert_eq!(secret.expose_secret(), b"");
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new(Zeroizing::new(b"hunter2".to_vec()));
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("hunter2"));
    }
}
