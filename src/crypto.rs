use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use sha2::{Sha256, Sha384};

use crate::{Error, ErrorKind, Result};

pub const HASH_SIZE: usize = 16;

/// Hash functions used by the RFC 8009 (AES-SHA2) string-to-key functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sha2Hash {
    Sha256,
    Sha384,
}

pub fn compute_md4(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut context = Md4::new();
    let mut result = [0x00; HASH_SIZE];
    context.update(data);
    result.clone_from_slice(&context.finalize());

    result
}

/// HMAC over the concatenation of `parts`.
pub fn compute_hmac_sha2(hash: Sha2Hash, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    match hash {
        Sha2Hash::Sha256 => hmac_parts::<Hmac<Sha256>>(key, parts),
        Sha2Hash::Sha384 => hmac_parts::<Hmac<Sha384>>(key, parts),
    }
}

/// PBKDF2 (RFC 8018) with HMAC-SHA2 as the pseudo-random function.
pub fn pbkdf2_hmac_sha2(
    hash: Sha2Hash,
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    key_len: usize,
) -> Result<Vec<u8>> {
    if iterations == 0 {
        return Err(Error::new(ErrorKind::InvalidParameter, "PBKDF2 iteration count is zero"));
    }

    let mut key = vec![0; key_len];
    match hash {
        Sha2Hash::Sha256 => pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key),
        Sha2Hash::Sha384 => pbkdf2::pbkdf2_hmac::<Sha384>(password, salt, iterations, &mut key),
    }

    Ok(key)
}

fn new_mac<M: Mac + KeyInit>(key: &[u8]) -> Result<M> {
    <M as Mac>::new_from_slice(key)
        .map_err(|e| Error::new(ErrorKind::InternalError, format!("failed to compute hmac: {}", e)))
}

fn hmac_parts<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    let mut mac = new_mac::<M>(key)?;
    for part in parts {
        mac.update(part);
    }

    Ok(mac.finalize().into_bytes().to_vec())
}
