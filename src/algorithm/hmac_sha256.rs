use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{AlgorithmProps, EncryptAlgorithm, required_prop};
use crate::{
    error::{EncryptError, Result},
    value::SqlValue,
};

pub const TYPE: &str = "HMAC-SHA256";
pub const KEY_PROPERTY: &str = "hmac-key-value";

/// Keyed one-way digest for assisted-query columns.
pub struct HmacSha256Algorithm {
    key: Zeroizing<Vec<u8>>,
}

impl HmacSha256Algorithm {
    pub fn new(key_value: &str) -> Self {
        Self {
            key: Zeroizing::new(key_value.as_bytes().to_vec()),
        }
    }

    pub(crate) fn create(props: &AlgorithmProps) -> Result<Arc<dyn EncryptAlgorithm>> {
        let key_value = required_prop(TYPE, props, KEY_PROPERTY)?;
        Ok(Arc::new(Self::new(key_value)))
    }
}

impl EncryptAlgorithm for HmacSha256Algorithm {
    fn algorithm_type(&self) -> &str {
        TYPE
    }

    fn encrypt(&self, plain: &SqlValue) -> Result<SqlValue> {
        let Some(plaintext) = plain.plaintext() else {
            return Ok(SqlValue::Null);
        };
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.key)
            .map_err(|e| EncryptError::algorithm(TYPE, e))?;
        mac.update(plaintext.as_bytes());
        Ok(SqlValue::Text(STANDARD.encode(mac.finalize().into_bytes())))
    }

    fn decrypt(&self, _cipher: &SqlValue) -> Result<SqlValue> {
        Err(EncryptError::DecryptUnsupported(TYPE.to_string()))
    }
}
