//! Self-describing container for a sealed file
//!
//! Everything needed to re-derive the key and open the box, except the
//! passphrase, travels in the header. All integers are big-endian.
//!
//! - magic: 7 bytes, `SMIRROR`
//! - version: 1 byte
//! - scrypt log_n: 1 byte
//! - scrypt r: 4 bytes
//! - scrypt p: 4 bytes
//! - salt: 16 bytes
//! - nonce: 24 bytes
//! - length: 8 bytes (unsigned)
//! - sealed box: variable length (includes 16-byte Poly1305 MAC)

use crate::error::{ErrorCategory, ErrorKind, MirrorError, Result};

pub const MAGIC: &[u8; 7] = b"SMIRROR";
pub const VERSION: u8 = 1;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 24;
pub const HEADER_LEN: usize = MAGIC.len() + 1 + 1 + 4 + 4 + SALT_LEN + NONCE_LEN + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub sealed: &'a [u8],
}

impl<'a> Envelope<'a> {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.sealed.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(self.log_n);
        out.extend_from_slice(&self.r.to_be_bytes());
        out.extend_from_slice(&self.p.to_be_bytes());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&(self.sealed.len() as u64).to_be_bytes());
        out.extend_from_slice(self.sealed);
        out
    }

    /// Validates the container layout without touching the sealed box.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor { data, pos: 0 };

        if cursor.take(MAGIC.len(), "magic")? != MAGIC {
            return Err(invalid("input unrecognized as saltymirror data"));
        }
        let version = cursor.take(1, "version")?[0];
        if version != VERSION {
            return Err(invalid(format!("unsupported container version {}", version)));
        }
        let log_n = cursor.take(1, "scrypt parameters")?[0];
        let r = u32::from_be_bytes(cursor.array("scrypt parameters")?);
        let p = u32::from_be_bytes(cursor.array("scrypt parameters")?);
        let salt = cursor.array("salt")?;
        let nonce = cursor.array("nonce")?;
        let sealed_len = u64::from_be_bytes(cursor.array("length")?);

        let remaining = (data.len() - cursor.pos) as u64;
        if sealed_len > remaining {
            return Err(invalid(
                "truncated or corrupt input; claimed length greater than available input",
            ));
        }
        if sealed_len < remaining {
            return Err(invalid("invalid input: unexpected data after sealed box"));
        }
        let sealed = &data[cursor.pos..];

        Ok(Self {
            log_n,
            r,
            p,
            salt,
            nonce,
            sealed,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.data.len() < self.pos + n {
            return Err(invalid(format!(
                "input likely truncated while reading {}",
                what
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let slice = self.take(N, what)?;
        slice.try_into().map_err(|_| {
            MirrorError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                format!("slice length mismatch while reading {}", what),
            )
        })
    }
}

fn invalid(msg: impl Into<String>) -> MirrorError {
    MirrorError::with_kind(ErrorCategory::User, ErrorKind::EnvelopeInvalid, msg)
}
