//! Password digest files: loading, parsing and PBKDF2 verification.
//!
//! A digest file holds a single line `PBKDF2$sha256$<iterations>$<base64 salt>$<base64 hash>`.

use crate::error::RejectReason;
use crate::options::SaltEncoding;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use migauth_core::secret::Secret;
use nix::unistd::{AccessFlags, access};
use ring::pbkdf2;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::num::NonZeroU32;
use std::path::Path;
use thiserror::Error;

/// Name of the digest file inside the per-service directory of a home.
pub const PASSWORD_FILENAME: &str = "authorized_passwords";
/// Marker every digest line starts with.
pub const DIGEST_PREFIX: &str = "PBKDF2$";
/// The only supported PBKDF2 hash.
pub const SUPPORTED_ALGORITHM: &str = "sha256";
/// Shortest accepted derived hash in bytes.
pub const MIN_HASH_LENGTH: usize = 16;
/// Longest accepted derived hash in bytes.
pub const MAX_HASH_LENGTH: usize = 32;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Why a digest file could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No such file.
    #[error("digest file does not exist")]
    Missing,
    /// The file exists but is empty.
    #[error("digest file is empty")]
    Empty,
    /// The file is not readable for us.
    #[error("digest file is not readable")]
    Unreadable(#[source] io::Error),
    /// The file exceeds the size cap.
    #[error("digest file exceeds {max} bytes")]
    TooLarge {
        /// The cap that was exceeded.
        max: usize,
    },
}

impl LoadError {
    /// True if this means password login is simply not set up for the account.
    pub fn means_disabled(&self) -> bool {
        matches!(self, LoadError::Missing | LoadError::Empty)
    }
}

impl From<&LoadError> for RejectReason {
    fn from(err: &LoadError) -> Self {
        match err {
            LoadError::TooLarge { .. } => RejectReason::DigestFileMalformed,
            _ => RejectReason::DigestFileMissing,
        }
    }
}

/// Why a digest line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The content is not text.
    #[error("digest is not valid UTF-8")]
    NotText,
    /// The `PBKDF2$` marker is missing.
    #[error("digest does not start with PBKDF2$")]
    BadPrefix,
    /// Not exactly four fields after the marker.
    #[error("expected 4 digest fields, found {0}")]
    FieldCount(usize),
    /// A hash other than the supported one.
    #[error("unsupported digest algorithm")]
    UnsupportedAlgorithm,
    /// The iteration count is not a positive decimal number.
    #[error("bad iteration count")]
    BadIterations,
    /// The salt is empty or not base64.
    #[error("bad salt encoding")]
    BadSalt,
    /// The hash is not base64.
    #[error("bad hash encoding")]
    BadHash,
    /// The decoded hash length is out of range.
    #[error("hash length {0} out of range")]
    HashLength(usize),
}

impl From<ParseError> for RejectReason {
    fn from(_: ParseError) -> Self {
        RejectReason::DigestFileMalformed
    }
}

/// A parsed digest line.
#[derive(Clone, PartialEq, Eq)]
pub struct DigestRecord {
    iterations: NonZeroU32,
    salt_text: String,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

impl DigestRecord {
    /// Derives a new record for `secret`.
    pub fn derive(secret: &Secret, salt: &[u8], iterations: NonZeroU32, hash_len: usize) -> Result<Self, ParseError> {
        if !(MIN_HASH_LENGTH..=MAX_HASH_LENGTH).contains(&hash_len) {
            return Err(ParseError::HashLength(hash_len));
        }
        if salt.is_empty() {
            return Err(ParseError::BadSalt);
        }
        Ok(DigestRecord {
            iterations,
            salt_text: STANDARD.encode(salt),
            salt: salt.to_vec(),
            hash: derive(secret, salt, iterations, hash_len),
        })
    }

    /// Parses digest file content. A single trailing line break is tolerated.
    pub fn parse(content: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(content).map_err(|_| ParseError::NotText)?;
        let text = text.strip_suffix('\n').unwrap_or(text);
        let text = text.strip_suffix('\r').unwrap_or(text);
        let body = text.strip_prefix(DIGEST_PREFIX).ok_or(ParseError::BadPrefix)?;
        let fields: Vec<&str> = body.split('$').collect();
        let &[algorithm, iterations, salt_text, hash_text] = fields.as_slice() else {
            return Err(ParseError::FieldCount(fields.len()));
        };
        if algorithm != SUPPORTED_ALGORITHM {
            return Err(ParseError::UnsupportedAlgorithm);
        }
        // Integer parsing would also accept a leading '+'.
        if iterations.is_empty() || !iterations.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::BadIterations);
        }
        let iterations = iterations
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(ParseError::BadIterations)?;
        if salt_text.is_empty() {
            return Err(ParseError::BadSalt);
        }
        let salt = STANDARD.decode(salt_text).map_err(|_| ParseError::BadSalt)?;
        let hash = STANDARD.decode(hash_text).map_err(|_| ParseError::BadHash)?;
        if !(MIN_HASH_LENGTH..=MAX_HASH_LENGTH).contains(&hash.len()) {
            return Err(ParseError::HashLength(hash.len()));
        }
        Ok(DigestRecord {
            iterations,
            salt_text: salt_text.to_string(),
            salt,
            hash,
        })
    }

    /// The PBKDF2 iteration count.
    pub fn iterations(&self) -> NonZeroU32 {
        self.iterations
    }

    /// The decoded salt.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// The decoded derived hash.
    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    /// Checks `secret` against the record in constant time.
    pub fn verify(&self, secret: &Secret, encoding: SaltEncoding) -> bool {
        let salt = match encoding {
            SaltEncoding::Decoded => self.salt.as_slice(),
            SaltEncoding::AsStored => self.salt_text.as_bytes(),
        };
        pbkdf2::verify(PBKDF2_ALG, self.iterations, salt, secret.as_bytes(), &self.hash).is_ok()
    }
}

impl fmt::Display for DigestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}${}${}${}",
            DIGEST_PREFIX,
            SUPPORTED_ALGORITHM,
            self.iterations,
            self.salt_text,
            STANDARD.encode(&self.hash)
        )
    }
}

impl fmt::Debug for DigestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestRecord")
            .field("iterations", &self.iterations)
            .field("salt_len", &self.salt.len())
            .field("hash_len", &self.hash.len())
            .finish()
    }
}

/// PBKDF2-HMAC-SHA256 of `secret`, `len` bytes long.
pub fn derive(secret: &Secret, salt: &[u8], iterations: NonZeroU32, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    pbkdf2::derive(PBKDF2_ALG, iterations, salt, secret.as_bytes(), &mut out);
    out
}

/// Reads a digest file of at most `max_size` bytes.
pub fn load(path: &Path, max_size: usize) -> Result<Vec<u8>, LoadError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(LoadError::Missing),
        Err(err) => return Err(LoadError::Unreadable(err)),
    };
    access(path, AccessFlags::R_OK).map_err(|errno| LoadError::Unreadable(io::Error::from(errno)))?;
    let mut content = Vec::with_capacity(max_size.min(4096));
    // One byte more than allowed tells us whether the file is too large.
    let limit = u64::try_from(max_size).unwrap_or(u64::MAX).saturating_add(1);
    file.take(limit).read_to_end(&mut content).map_err(LoadError::Unreadable)?;
    if content.len() > max_size {
        return Err(LoadError::TooLarge { max: max_size });
    }
    if content.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(content)
}
