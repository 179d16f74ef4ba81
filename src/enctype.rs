use std::fmt;

use picky_krb::crypto::CipherSuite;

use crate::crypto::{compute_hmac_sha2, compute_md4, pbkdf2_hmac_sha2, Sha2Hash};
use crate::{Error, ErrorKind, Result, Secret};

/// [RFC 8009: Key Derivation Function](https://www.rfc-editor.org/rfc/rfc8009#section-4).
const AES_SHA2_ITERATIONS: u32 = 32768;
const KERBEROS_LABEL: &[u8] = b"kerberos";

/// Encryption types the keytab deriver and the salt probe understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionType {
    Aes256CtsHmacSha196,
    Aes128CtsHmacSha196,
    Aes256CtsHmacSha384192,
    Aes128CtsHmacSha256128,
    Rc4Hmac,
}

impl EncryptionType {
    /// Preference order used in AS-REQ etype lists.
    pub const ALL: [EncryptionType; 5] = [
        EncryptionType::Aes256CtsHmacSha196,
        EncryptionType::Aes128CtsHmacSha196,
        EncryptionType::Aes256CtsHmacSha384192,
        EncryptionType::Aes128CtsHmacSha256128,
        EncryptionType::Rc4Hmac,
    ];

    pub fn id(self) -> u8 {
        match self {
            EncryptionType::Aes256CtsHmacSha196 => 18,
            EncryptionType::Aes128CtsHmacSha196 => 17,
            EncryptionType::Aes256CtsHmacSha384192 => 20,
            EncryptionType::Aes128CtsHmacSha256128 => 19,
            EncryptionType::Rc4Hmac => 23,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|etype| i64::from(etype.id()) == id)
    }

    /// Decodes a DER INTEGER content octets (big-endian two's complement).
    pub fn from_der_integer(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > 8 {
            return None;
        }

        let negative = bytes[0] & 0x80 != 0;
        let initial: i64 = if negative { -1 } else { 0 };
        let id = bytes.iter().fold(initial, |acc, byte| (acc << 8) | i64::from(*byte));

        Self::from_id(id)
    }

    /// Name as used by MIT krb5 (`default_tkt_enctypes`, `klist -e`).
    pub fn name(self) -> &'static str {
        match self {
            EncryptionType::Aes256CtsHmacSha196 => "aes256-cts-hmac-sha1-96",
            EncryptionType::Aes128CtsHmacSha196 => "aes128-cts-hmac-sha1-96",
            EncryptionType::Aes256CtsHmacSha384192 => "aes256-cts-hmac-sha384-192",
            EncryptionType::Aes128CtsHmacSha256128 => "aes128-cts-hmac-sha256-128",
            EncryptionType::Rc4Hmac => "arcfour-hmac",
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            EncryptionType::Aes256CtsHmacSha196 | EncryptionType::Aes256CtsHmacSha384192 => 32,
            EncryptionType::Aes128CtsHmacSha196 | EncryptionType::Aes128CtsHmacSha256128 | EncryptionType::Rc4Hmac => {
                16
            }
        }
    }

    /// Salt the KDC assumes when it does not advertise one.
    ///
    /// AES: realm followed by the principal name components. RC4 does not use a salt.
    pub fn default_salt(self, realm: &str, components: &[String]) -> String {
        match self {
            EncryptionType::Rc4Hmac => String::new(),
            _ => {
                let mut salt = String::from(realm);
                components.iter().for_each(|component| salt.push_str(component));

                salt
            }
        }
    }

    /// Password-based string-to-key.
    pub fn derive_key(self, password: &[u8], salt: &[u8]) -> Result<Secret<Vec<u8>>> {
        let key = match self {
            EncryptionType::Aes256CtsHmacSha196 => CipherSuite::Aes256CtsHmacSha196
                .cipher()
                .generate_key_from_password(password, salt)?,
            EncryptionType::Aes128CtsHmacSha196 => CipherSuite::Aes128CtsHmacSha196
                .cipher()
                .generate_key_from_password(password, salt)?,
            EncryptionType::Aes256CtsHmacSha384192 => aes_sha2_string_to_key(self, Sha2Hash::Sha384, password, salt)?,
            EncryptionType::Aes128CtsHmacSha256128 => aes_sha2_string_to_key(self, Sha2Hash::Sha256, password, salt)?,
            EncryptionType::Rc4Hmac => {
                let utf16 = String::from_utf8(password.to_vec())?
                    .encode_utf16()
                    .flat_map(|unit| unit.to_le_bytes())
                    .collect::<Vec<u8>>();

                compute_md4(&utf16).to_vec()
            }
        };

        if key.len() != self.key_len() {
            return Err(Error::new(
                ErrorKind::InternalError,
                format!("{} key has invalid length {}", self.name(), key.len()),
            ));
        }

        Ok(Secret::new(key))
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u16> for EncryptionType {
    type Error = Error;

    fn try_from(id: u16) -> Result<Self> {
        Self::from_id(i64::from(id)).ok_or_else(|| {
            Error::new(
                ErrorKind::UnsupportedFunction,
                format!("unsupported encryption type: {}", id),
            )
        })
    }
}

/// [RFC 8009 section 4](https://www.rfc-editor.org/rfc/rfc8009#section-4):
///
/// ```not_rust
/// saltp = enctype-name | 0x00 | salt
/// tkey = random-to-key(PBKDF2-HMAC-SHA2(passphrase, saltp, iter_count, keylength))
/// base-key = KDF-HMAC-SHA2(tkey, "kerberos", keylength)
/// ```
fn aes_sha2_string_to_key(etype: EncryptionType, hash: Sha2Hash, password: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
    let key_len = etype.key_len();

    let mut saltp = etype.name().as_bytes().to_vec();
    saltp.push(0);
    saltp.extend_from_slice(salt);

    let tkey = pbkdf2_hmac_sha2(hash, password, &saltp, AES_SHA2_ITERATIONS, key_len)?;

    let key_bits = u32::try_from(key_len * 8)
        .map_err(|e| Error::new(ErrorKind::InternalError, format!("invalid key length: {:?}", e)))?;
    let mut key = compute_hmac_sha2(
        hash,
        &tkey,
        &[&1u32.to_be_bytes(), KERBEROS_LABEL, &[0], &key_bits.to_be_bytes()],
    )?;
    key.truncate(key_len);

    Ok(key)
}
