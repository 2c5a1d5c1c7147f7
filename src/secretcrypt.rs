//! Authenticated encryption using scrypt + XSalsa20Poly1305
//!
//! Each call derives a fresh key from the passphrase with scrypt and a
//! random salt, then seals the plaintext with NaCl secretbox under a random
//! nonce. The salt, nonce and scrypt parameters are written into the
//! [`Envelope`](crate::envelope::Envelope) header.

use crate::envelope::{Envelope, NONCE_LEN, SALT_LEN};
use crate::error::{ErrorCategory, ErrorKind, MirrorError, Result};
use crate::passphrase::Secret;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Length of derived key in bytes
const KEY_LEN: usize = 32;

/// Smallest scrypt cost accepted from library callers.
pub const MIN_LOG_N: u8 = 10;

/// Name under which [`SecretboxCipher`] is selectable.
pub const SECRETBOX_BACKEND: &str = "xsalsa20poly1305";

/// An authenticated-encryption capability the mirror pipeline depends on.
pub trait AuthenticatedCipher: Send + Sync {
    /// Backend name, as accepted by [`backend_by_name`].
    fn name(&self) -> &'static str;

    /// Seal `plaintext` under a key derived from `secret`, returning a
    /// self-describing container.
    fn seal(&self, secret: &Secret, plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// Selects a cipher backend by name, as the composition root does.
pub fn backend_by_name(name: &str) -> Option<Box<dyn AuthenticatedCipher>> {
    match name {
        SECRETBOX_BACKEND => Some(Box::new(SecretboxCipher::default())),
        _ => None,
    }
}

/// scrypt cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl ScryptParams {
    pub fn new(log_n: u8, r: u32, p: u32) -> Result<Self> {
        if log_n < MIN_LOG_N {
            return Err(MirrorError::with_kind(
                ErrorCategory::User,
                ErrorKind::Usage,
                format!("scrypt log_n must be at least {}", MIN_LOG_N),
            ));
        }
        Ok(Self { log_n, r, p })
    }
}

impl Default for ScryptParams {
    /// N = 32768, r = 8, p = 1; roughly 100ms per derivation on commodity
    /// hardware.
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

/// NaCl secretbox with a per-file scrypt-derived key.
#[derive(Debug, Clone, Default)]
pub struct SecretboxCipher {
    params: ScryptParams,
}

impl SecretboxCipher {
    pub fn new(params: ScryptParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> ScryptParams {
        self.params
    }

    /// Seal with a caller-provided salt and nonce.
    ///
    /// This function is ONLY for testing purposes to generate deterministic output.
    /// NEVER use this in production - always use `seal()` which generates random salt/nonce.
    pub fn seal_deterministic(
        &self,
        passphrase: &[u8],
        plaintext: &[u8],
        salt: &[u8; SALT_LEN],
        nonce: &[u8; NONCE_LEN],
    ) -> Result<Vec<u8>> {
        let key = derive_key(passphrase, salt, self.params)?;
        let cipher = secretbox_for(&key)?;
        let sealed = cipher
            .encrypt(&Nonce::from(*nonce), plaintext)
            .map_err(|e| {
                MirrorError::with_kind(
                    ErrorCategory::Internal,
                    ErrorKind::SecretboxFailure,
                    format!("encryption failed: {}", e),
                )
            })?;

        Ok(Envelope {
            log_n: self.params.log_n,
            r: self.params.r,
            p: self.params.p,
            salt: *salt,
            nonce: *nonce,
            sealed: &sealed,
        }
        .to_bytes())
    }
}

impl AuthenticatedCipher for SecretboxCipher {
    fn name(&self) -> &'static str {
        SECRETBOX_BACKEND
    }

    fn seal(&self, secret: &Secret, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        self.seal_deterministic(secret.expose_secret(), plaintext, &salt, &nonce)
    }
}

/// Derive a 32-byte key from a passphrase and salt using scrypt
fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    params: ScryptParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let scrypt_params =
        scrypt::Params::new(params.log_n, params.r, params.p, KEY_LEN).map_err(|e| {
            MirrorError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::ScryptFailure,
                "failed to create scrypt params",
                e,
            )
        })?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt::scrypt(passphrase, salt, &scrypt_params, key.as_mut_slice()).map_err(|e| {
        MirrorError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::ScryptFailure,
            "scrypt key derivation failed",
            e,
        )
    })?;

    Ok(key)
}

fn secretbox_for(key: &[u8; KEY_LEN]) -> Result<XSalsa20Poly1305> {
    XSalsa20Poly1305::new_from_slice(key).map_err(|e| {
        MirrorError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::SecretboxFailure,
            format!("failed to initialize secretbox: {}", e),
        )
    })
}
