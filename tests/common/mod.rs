use std::{path::Path, sync::Arc};

use sqlenc::{
    EncryptAlgorithm, EncryptError, EncryptRule, EncryptRuleConfig, InMemorySchema, Result,
    SqlValue,
};

/// Readable stand-in for a real cipher: `enc:value`.
pub struct PrefixAlgorithm {
    prefix: &'static str,
}

impl PrefixAlgorithm {
    pub fn new(prefix: &'static str) -> Arc<Self> {
        Arc::new(Self { prefix })
    }
}

impl EncryptAlgorithm for PrefixAlgorithm {
    fn algorithm_type(&self) -> &str {
        "PREFIX"
    }

    fn encrypt(&self, plain: &SqlValue) -> Result<SqlValue> {
        Ok(match plain.plaintext() {
            Some(p) => SqlValue::Text(format!("{}:{p}", self.prefix)),
            None => SqlValue::Null,
        })
    }

    fn decrypt(&self, cipher: &SqlValue) -> Result<SqlValue> {
        match cipher {
            SqlValue::Text(s) => s
                .strip_prefix(&format!("{}:", self.prefix))
                .map(|p| SqlValue::Text(p.to_string()))
                .ok_or_else(|| EncryptError::Algorithm {
                    algorithm: "PREFIX".into(),
                    message: format!("not a cipher: {s}"),
                }),
            other => Ok(other.clone()),
        }
    }
}

pub fn config() -> EncryptRuleConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/rule.json");
    EncryptRuleConfig::from_path(&path).expect("could not load tests/rule.json")
}

/// The test rule with its encryptors swapped for prefix algorithms.
#[allow(dead_code)]
pub fn prefix_rule() -> EncryptRule {
    EncryptRule::builder(config())
        .algorithm("aes", PrefixAlgorithm::new("enc"))
        .algorithm("digest", PrefixAlgorithm::new("assist"))
        .build()
        .expect("could not build rule")
}

pub fn schema() -> Arc<InMemorySchema> {
    Arc::new(
        InMemorySchema::default()
            .with_table("t_user", ["id", "pwd", "email", "phone"])
            .with_table("t_order", ["order_id", "user_id", "amount"]),
    )
}
