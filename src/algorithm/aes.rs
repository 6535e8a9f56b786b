use std::sync::Arc;

use aes_gcm::{Aes256Gcm, KeyInit, Nonce, aead::Aead};
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{AlgorithmProps, EncryptAlgorithm, required_prop};
use crate::{
    error::{EncryptError, Result},
    value::SqlValue,
};

pub const TYPE: &str = "AES";
pub const KEY_PROPERTY: &str = "aes-key-value";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Deterministic AES-256-GCM.
///
/// The nonce is an HMAC of the plaintext (synthetic IV), so equal plaintexts
/// always produce equal ciphertexts under the same key. Output is
/// `base64(nonce || ciphertext || tag)`.
pub struct AesEncryptAlgorithm {
    cipher: Aes256Gcm,
    nonce_key: Zeroizing<[u8; 32]>,
}

impl AesEncryptAlgorithm {
    pub fn new(key_value: &str) -> Result<Self> {
        let enc_key = derive_key(b"sqlenc:aes:enc", key_value);
        let nonce_key = derive_key(b"sqlenc:aes:nonce", key_value);
        let cipher = Aes256Gcm::new_from_slice(&enc_key[..])
            .map_err(|e| EncryptError::algorithm(TYPE, e))?;
        Ok(Self { cipher, nonce_key })
    }

    pub(crate) fn create(props: &AlgorithmProps) -> Result<Arc<dyn EncryptAlgorithm>> {
        let key_value = required_prop(TYPE, props, KEY_PROPERTY)?;
        Ok(Arc::new(Self::new(key_value)?))
    }

    fn synthetic_nonce(&self, plaintext: &[u8]) -> Result<[u8; NONCE_LEN]> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.nonce_key[..])
            .map_err(|e| EncryptError::algorithm(TYPE, e))?;
        mac.update(plaintext);
        let tag = mac.finalize().into_bytes();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&tag[..NONCE_LEN]);
        Ok(nonce)
    }
}

fn derive_key(domain: &[u8], key_value: &str) -> Zeroizing<[u8; 32]> {
    let digest = Sha256::new()
        .chain_update(domain)
        .chain_update(key_value.as_bytes())
        .finalize();
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest);
    key
}

impl EncryptAlgorithm for AesEncryptAlgorithm {
    fn algorithm_type(&self) -> &str {
        TYPE
    }

    fn encrypt(&self, plain: &SqlValue) -> Result<SqlValue> {
        let Some(plaintext) = plain.plaintext() else {
            return Ok(SqlValue::Null);
        };
        let nonce_bytes = self.synthetic_nonce(plaintext.as_bytes())?;
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| EncryptError::algorithm(TYPE, format!("encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(SqlValue::Text(STANDARD.encode(out)))
    }

    fn decrypt(&self, cipher: &SqlValue) -> Result<SqlValue> {
        let encoded = match cipher {
            SqlValue::Null => return Ok(SqlValue::Null),
            SqlValue::Text(s) => s,
            other => {
                return Err(EncryptError::algorithm(
                    TYPE,
                    format!("cipher value must be text, got {other}"),
                ));
            }
        };
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| EncryptError::algorithm(TYPE, e))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(EncryptError::algorithm(TYPE, "cipher value too short"));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| EncryptError::algorithm(TYPE, format!("decrypt failed: {e}")))?;
        String::from_utf8(plaintext)
            .map(SqlValue::Text)
            .map_err(|e| EncryptError::algorithm(TYPE, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let aes = AesEncryptAlgorithm::new("123456abc").unwrap();
        let cipher = aes.encrypt(&SqlValue::from("secret")).unwrap();
        assert_ne!(cipher, SqlValue::from("secret"));
        assert_eq!(aes.decrypt(&cipher).unwrap(), SqlValue::from("secret"));
    }

    #[test]
    fn test_encrypt_is_deterministic() {
        let aes = AesEncryptAlgorithm::new("123456abc").unwrap();
        let a = aes.encrypt(&SqlValue::from("secret")).unwrap();
        let b = aes.encrypt(&SqlValue::from("secret")).unwrap();
        assert_eq!(a, b);
        let c = aes.encrypt(&SqlValue::from("other")).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_different_keys_differ() {
        let a = AesEncryptAlgorithm::new("k1").unwrap();
        let b = AesEncryptAlgorithm::new("k2").unwrap();
        let plain = SqlValue::from("secret");
        assert_ne!(a.encrypt(&plain).unwrap(), b.encrypt(&plain).unwrap());
    }

    #[test]
    fn test_integer_encrypts_as_text() {
        let aes = AesEncryptAlgorithm::new("k").unwrap();
        let cipher = aes.encrypt(&SqlValue::Integer(42)).unwrap();
        assert_eq!(aes.decrypt(&cipher).unwrap(), SqlValue::from("42"));
    }

    #[test]
    fn test_null_passes_through() {
        let aes = AesEncryptAlgorithm::new("k").unwrap();
        assert_eq!(aes.encrypt(&SqlValue::Null).unwrap(), SqlValue::Null);
        assert_eq!(aes.decrypt(&SqlValue::Null).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_tampered_cipher_fails() {
        let aes = AesEncryptAlgorithm::new("k").unwrap();
        let SqlValue::Text(cipher) = aes.encrypt(&SqlValue::from("secret")).unwrap() else {
            panic!("expected text cipher");
        };
        let mut raw = STANDARD.decode(cipher).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = SqlValue::Text(STANDARD.encode(raw));
        assert!(aes.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_short_cipher_rejected() {
        let aes = AesEncryptAlgorithm::new("k").unwrap();
        let err = aes.decrypt(&SqlValue::Text(STANDARD.encode([0u8; 4]))).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }
}
