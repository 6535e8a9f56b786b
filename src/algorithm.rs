pub mod aes;
pub mod hmac_sha256;

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;

use crate::{
    error::{EncryptError, Result},
    value::SqlValue,
};

/// Algorithm properties as written in the rule configuration.
pub type AlgorithmProps = HashMap<String, String>;

type AlgorithmFactory = fn(&AlgorithmProps) -> Result<Arc<dyn EncryptAlgorithm>>;

/// A column encryptor. Implementations must be deterministic for a given
/// key so that equality predicates keep matching stored values.
pub trait EncryptAlgorithm: Send + Sync {
    fn algorithm_type(&self) -> &str;

    /// Encrypt a plaintext value. NULL encrypts to NULL.
    fn encrypt(&self, plain: &SqlValue) -> Result<SqlValue>;

    /// Decrypt a value previously produced by [`EncryptAlgorithm::encrypt`].
    fn decrypt(&self, cipher: &SqlValue) -> Result<SqlValue>;
}

static BUILTIN_ALGORITHMS: Lazy<HashMap<&'static str, AlgorithmFactory>> = Lazy::new(|| {
    let mut factories: HashMap<&'static str, AlgorithmFactory> = HashMap::new();
    factories.insert(aes::TYPE, aes::AesEncryptAlgorithm::create);
    factories.insert(hmac_sha256::TYPE, hmac_sha256::HmacSha256Algorithm::create);
    factories
});

/// Instantiate a built-in algorithm by its configured type name.
pub fn create_algorithm(
    algorithm_type: &str,
    props: &AlgorithmProps,
) -> Result<Arc<dyn EncryptAlgorithm>> {
    let factory = BUILTIN_ALGORITHMS
        .get(algorithm_type.to_ascii_uppercase().as_str())
        .ok_or_else(|| EncryptError::UnknownAlgorithm(algorithm_type.to_string()))?;
    factory(props)
}

pub fn builtin_algorithm_types() -> Vec<&'static str> {
    let mut types: Vec<_> = BUILTIN_ALGORITHMS.keys().copied().collect();
    types.sort_unstable();
    types
}

fn required_prop<'a>(algorithm: &str, props: &'a AlgorithmProps, key: &str) -> Result<&'a str> {
    props
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EncryptError::MissingAlgorithmProperty {
            algorithm: algorithm.to_string(),
            property: key.to_string(),
        })
}
