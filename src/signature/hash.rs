//! Keyed-hash algorithm table.
//!
//! Each supported [`HashAlgorithm`] maps to a pure `(secret, bytes) -> bytes`
//! function and an output encoding. Adding an algorithm means adding a row.

use crate::error::{SasError, SasResult};
use crate::policy::HashAlgorithm;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::digest::Digest;
use hmac::digest::core_api::BlockSizeUser;
use hmac::{Mac, SimpleHmac};
use md5::Md5;
use sha3::{Sha3_256, Sha3_384, Sha3_512};

/// Keyed hash over `(secret, bytes)`.
pub type HashFn = fn(&[u8], &[u8]) -> SasResult<Vec<u8>>;

/// How the raw hash bytes are rendered into a signature string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEncoding {
    /// Lower-case hexadecimal
    LowerHex,
    /// Standard base64 with padding
    Base64,
}

impl OutputEncoding {
    fn encode(self, bytes: &[u8]) -> String {
        match self {
            Self::LowerHex => bytes.iter().map(|b| format!("{b:02x}")).collect(),
            Self::Base64 => STANDARD.encode(bytes),
        }
    }
}

struct HashEntry {
    algorithm: HashAlgorithm,
    hash: HashFn,
    encoding: OutputEncoding,
}

static HASH_TABLE: &[HashEntry] = &[
    HashEntry {
        algorithm: HashAlgorithm::Md5,
        hash: md5_with_secret,
        encoding: OutputEncoding::LowerHex,
    },
    HashEntry {
        algorithm: HashAlgorithm::Sha1,
        hash: hmac_sha1,
        encoding: OutputEncoding::Base64,
    },
    HashEntry {
        algorithm: HashAlgorithm::Sha256,
        hash: hmac_sha256,
        encoding: OutputEncoding::Base64,
    },
    HashEntry {
        algorithm: HashAlgorithm::Sha384,
        hash: hmac_sha384,
        encoding: OutputEncoding::Base64,
    },
    HashEntry {
        algorithm: HashAlgorithm::Sha512,
        hash: hmac_sha512,
        encoding: OutputEncoding::Base64,
    },
    HashEntry {
        algorithm: HashAlgorithm::Sha3_256,
        hash: sha3_hmac::<Sha3_256>,
        encoding: OutputEncoding::Base64,
    },
    HashEntry {
        algorithm: HashAlgorithm::Sha3_384,
        hash: sha3_hmac::<Sha3_384>,
        encoding: OutputEncoding::Base64,
    },
    HashEntry {
        algorithm: HashAlgorithm::Sha3_512,
        hash: sha3_hmac::<Sha3_512>,
        encoding: OutputEncoding::Base64,
    },
];

fn lookup(algorithm: HashAlgorithm) -> SasResult<&'static HashEntry> {
    HASH_TABLE
        .iter()
        .find(|entry| entry.algorithm == algorithm)
        .ok_or_else(|| SasError::UnsupportedHashAlgorithm(algorithm.to_string()))
}

/// True if `algorithm` can produce signatures.
#[must_use]
pub fn is_supported(algorithm: HashAlgorithm) -> bool {
    lookup(algorithm).is_ok()
}

/// Output encoding used for `algorithm`.
///
/// # Errors
///
/// Returns [`SasError::UnsupportedHashAlgorithm`] for algorithms without a
/// table entry.
pub fn output_encoding(algorithm: HashAlgorithm) -> SasResult<OutputEncoding> {
    lookup(algorithm).map(|entry| entry.encoding)
}

/// Hash `data` keyed by `secret` and encode the result.
///
/// # Errors
///
/// Returns [`SasError::UnsupportedHashAlgorithm`] for [`HashAlgorithm::None`].
pub fn hash_and_encode(algorithm: HashAlgorithm, secret: &[u8], data: &[u8]) -> SasResult<String> {
    let entry = lookup(algorithm)?;
    let bytes = (entry.hash)(secret, data)?;
    Ok(entry.encoding.encode(&bytes))
}

// MD5 is not keyed: the secret is appended after a newline.
fn md5_with_secret(secret: &[u8], data: &[u8]) -> SasResult<Vec<u8>> {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.update(b"\n");
    hasher.update(secret);
    Ok(hasher.finalize().to_vec())
}

fn ring_hmac(algorithm: ring::hmac::Algorithm, secret: &[u8], data: &[u8]) -> Vec<u8> {
    let key = ring::hmac::Key::new(algorithm, secret);
    ring::hmac::sign(&key, data).as_ref().to_vec()
}

fn hmac_sha1(secret: &[u8], data: &[u8]) -> SasResult<Vec<u8>> {
    Ok(ring_hmac(ring::hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret, data))
}

fn hmac_sha256(secret: &[u8], data: &[u8]) -> SasResult<Vec<u8>> {
    Ok(ring_hmac(ring::hmac::HMAC_SHA256, secret, data))
}

fn hmac_sha384(secret: &[u8], data: &[u8]) -> SasResult<Vec<u8>> {
    Ok(ring_hmac(ring::hmac::HMAC_SHA384, secret, data))
}

fn hmac_sha512(secret: &[u8], data: &[u8]) -> SasResult<Vec<u8>> {
    Ok(ring_hmac(ring::hmac::HMAC_SHA512, secret, data))
}

fn sha3_hmac<D>(secret: &[u8], data: &[u8]) -> SasResult<Vec<u8>>
where
    D: Digest + BlockSizeUser,
{
    let mut mac = <SimpleHmac<D> as Mac>::new_from_slice(secret)
        .map_err(|e| SasError::invalid_argument(format!("HMAC key rejected: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
