use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{algorithm::AlgorithmProps, error::Result};

/// Serialized form of an encrypt rule.
///
/// ```json
/// {
///   "encryptors": { "aes": { "type": "AES", "props": { "aes-key-value": "123456abc" } } },
///   "tables": { "t_user": { "columns": { "pwd": {
///       "cipherColumn": "pwd_cipher",
///       "assistedQueryColumn": "pwd_assisted",
///       "encryptorName": "aes",
///       "assistedQueryEncryptorName": "digest" } } } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptRuleConfig {
    #[serde(default)]
    pub encryptors: BTreeMap<String, AlgorithmConfig>,
    #[serde(default)]
    pub tables: BTreeMap<String, EncryptTableConfig>,
    #[serde(default = "default_query_with_cipher_column")]
    pub query_with_cipher_column: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    #[serde(rename = "type")]
    pub algorithm_type: String,
    #[serde(default)]
    pub props: AlgorithmProps,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptTableConfig {
    #[serde(default)]
    pub columns: BTreeMap<String, EncryptColumnConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptColumnConfig {
    pub cipher_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assisted_query_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain_column: Option<String>,
    pub encryptor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assisted_query_encryptor_name: Option<String>,
}

fn default_query_with_cipher_column() -> bool {
    true
}

impl Default for EncryptRuleConfig {
    fn default() -> Self {
        Self {
            encryptors: BTreeMap::new(),
            tables: BTreeMap::new(),
            query_with_cipher_column: default_query_with_cipher_column(),
        }
    }
}

impl EncryptRuleConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Database flavour of the SQL being rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseType {
    #[default]
    MySql,
    PostgreSql,
    Oracle,
    SqlServer,
}

impl DatabaseType {
    pub fn quote_character(self) -> char {
        match self {
            DatabaseType::MySql => '`',
            DatabaseType::SqlServer => '[',
            DatabaseType::PostgreSql | DatabaseType::Oracle => '"',
        }
    }
}

/// Per-engine rewrite switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteOptions {
    pub database_type: DatabaseType,
    /// Read and compare through cipher columns. When false, plain columns
    /// are used wherever they exist.
    pub query_with_cipher_column: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            database_type: DatabaseType::MySql,
            query_with_cipher_column: true,
        }
    }
}
