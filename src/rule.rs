pub mod column;
pub mod table;

use std::{collections::HashMap, fmt, sync::Arc};

use log::debug;
use parking_lot::RwLock;

pub use column::{ColumnRole, EncryptColumn};
pub use table::EncryptTable;

use crate::{
    algorithm::{EncryptAlgorithm, create_algorithm},
    config::EncryptRuleConfig,
    error::{EncryptError, Result},
    value::SqlValue,
};

/// Immutable encrypt rule: encrypted tables plus the encryptors they reference.
///
/// Every lookup returns `None` when there is no mapping; callers treat that as
/// "not encrypted, leave it alone".
pub struct EncryptRule {
    tables: HashMap<String, EncryptTable>,
    encryptors: HashMap<String, Arc<dyn EncryptAlgorithm>>,
    query_with_cipher_column: bool,
}

impl EncryptRule {
    pub fn new(config: EncryptRuleConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: EncryptRuleConfig) -> EncryptRuleBuilder {
        EncryptRuleBuilder {
            config,
            custom: HashMap::new(),
        }
    }

    /// A rule with no encrypted tables.
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
            encryptors: HashMap::new(),
            query_with_cipher_column: true,
        }
    }

    pub fn query_with_cipher_column(&self) -> bool {
        self.query_with_cipher_column
    }

    pub fn find_encrypt_table(&self, table: &str) -> Option<&EncryptTable> {
        self.tables.get(&table.to_ascii_lowercase())
    }

    pub fn find_encrypt_column(&self, table: &str, column: &str) -> Option<&EncryptColumn> {
        self.find_encrypt_table(table)?.find_encrypt_column(column)
    }

    pub fn find_encryptor(&self, table: &str, column: &str) -> Option<&dyn EncryptAlgorithm> {
        let column = self.find_encrypt_column(table, column)?;
        self.encryptors.get(column.encryptor_name()).map(Arc::as_ref)
    }

    pub fn find_assisted_query_encryptor(
        &self,
        table: &str,
        column: &str,
    ) -> Option<&dyn EncryptAlgorithm> {
        let name = self
            .find_encrypt_column(table, column)?
            .assisted_query_encryptor_name()?;
        self.encryptors.get(name).map(Arc::as_ref)
    }

    pub fn cipher_column(&self, table: &str, column: &str) -> Option<&str> {
        self.find_encrypt_column(table, column)
            .map(EncryptColumn::cipher_column)
    }

    pub fn find_assisted_query_column(&self, table: &str, column: &str) -> Option<&str> {
        self.find_encrypt_column(table, column)?.assisted_query_column()
    }

    pub fn find_plain_column(&self, table: &str, column: &str) -> Option<&str> {
        self.find_encrypt_column(table, column)?.plain_column()
    }

    /// Logic column name to cipher column name for every encrypted column of `table`.
    pub fn logic_and_cipher_columns(&self, table: &str) -> HashMap<String, String> {
        self.find_encrypt_table(table)
            .map(|t| {
                t.columns()
                    .map(|c| (c.logic_column().to_string(), c.cipher_column().to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Encrypt values bound for the cipher column. `None` when the column is not encrypted.
    pub fn encrypt_values(
        &self,
        table: &str,
        column: &str,
        values: &[SqlValue],
    ) -> Result<Option<Vec<SqlValue>>> {
        match self.find_encryptor(table, column) {
            Some(encryptor) => encrypt_all(encryptor, values).map(Some),
            None => Ok(None),
        }
    }

    /// Encrypt values bound for the assisted-query column. `None` when the column has none.
    pub fn encrypt_assisted_query_values(
        &self,
        table: &str,
        column: &str,
        values: &[SqlValue],
    ) -> Result<Option<Vec<SqlValue>>> {
        match self.find_assisted_query_encryptor(table, column) {
            Some(encryptor) => encrypt_all(encryptor, values).map(Some),
            None => Ok(None),
        }
    }

    pub fn encrypt_value(
        &self,
        table: &str,
        column: &str,
        value: &SqlValue,
    ) -> Result<Option<SqlValue>> {
        self.find_encryptor(table, column)
            .map(|e| e.encrypt(value))
            .transpose()
    }

    pub fn encrypt_assisted_query_value(
        &self,
        table: &str,
        column: &str,
        value: &SqlValue,
    ) -> Result<Option<SqlValue>> {
        self.find_assisted_query_encryptor(table, column)
            .map(|e| e.encrypt(value))
            .transpose()
    }

    /// Decrypt a value read from the cipher column. `None` when the column
    /// is not encrypted.
    pub fn decrypt_value(
        &self,
        table: &str,
        column: &str,
        value: &SqlValue,
    ) -> Result<Option<SqlValue>> {
        self.find_encryptor(table, column)
            .map(|e| e.decrypt(value))
            .transpose()
    }

    /// Table names as configured.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tables.values().map(EncryptTable::name).collect();
        names.sort_unstable();
        names
    }
}

fn encrypt_all(encryptor: &dyn EncryptAlgorithm, values: &[SqlValue]) -> Result<Vec<SqlValue>> {
    values.iter().map(|v| encryptor.encrypt(v)).collect()
}

impl fmt::Debug for EncryptRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut encryptors: Vec<_> = self
            .encryptors
            .iter()
            .map(|(name, alg)| (name.as_str(), alg.algorithm_type()))
            .collect();
        encryptors.sort_unstable();
        f.debug_struct("EncryptRule")
            .field("tables", &self.tables)
            .field("encryptors", &encryptors)
            .field("query_with_cipher_column", &self.query_with_cipher_column)
            .finish()
    }
}

/// Builds an [`EncryptRule`] from configuration, optionally with encryptors
/// supplied in code instead of the built-in registry.
pub struct EncryptRuleBuilder {
    config: EncryptRuleConfig,
    custom: HashMap<String, Arc<dyn EncryptAlgorithm>>,
}

impl EncryptRuleBuilder {
    /// Register an encryptor under `name`, overriding any configured one.
    pub fn algorithm(
        mut self,
        name: impl Into<String>,
        algorithm: Arc<dyn EncryptAlgorithm>,
    ) -> Self {
        self.custom.insert(name.into(), algorithm);
        self
    }

    pub fn build(self) -> Result<EncryptRule> {
        let EncryptRuleConfig {
            encryptors: configured,
            tables: table_configs,
            query_with_cipher_column,
        } = self.config;

        let mut encryptors = self.custom;
        for (name, alg) in configured {
            if encryptors.contains_key(&name) {
                continue;
            }
            let algorithm = create_algorithm(&alg.algorithm_type, &alg.props)?;
            encryptors.insert(name, algorithm);
        }

        let mut tables = HashMap::new();
        for (table_name, table_config) in table_configs {
            let columns = table_config
                .columns
                .into_iter()
                .map(|(logic, c)| EncryptColumn::from_config(logic, c));
            let table = EncryptTable::new(table_name, columns)?;

            for column in table.columns() {
                let references = std::iter::once(column.encryptor_name())
                    .chain(column.assisted_query_encryptor_name());
                for reference in references {
                    if !encryptors.contains_key(reference) {
                        return Err(EncryptError::InvalidConfig(format!(
                            "{}.{}: encryptor `{reference}` is not defined",
                            table.name(),
                            column.logic_column()
                        )));
                    }
                }
            }

            if tables.insert(table.name().to_ascii_lowercase(), table).is_some() {
                return Err(EncryptError::InvalidConfig(
                    "table declared twice with different case".into(),
                ));
            }
        }

        debug!(
            "encrypt rule loaded: {} tables, {} encryptors",
            tables.len(),
            encryptors.len()
        );
        Ok(EncryptRule {
            tables,
            encryptors,
            query_with_cipher_column,
        })
    }
}

/// Holds the current rule snapshot. Readers clone the `Arc` and keep using it
/// for the whole statement even if the rule is replaced meanwhile.
pub struct RuleHolder {
    current: RwLock<Arc<EncryptRule>>,
}

impl RuleHolder {
    pub fn new(rule: EncryptRule) -> Self {
        Self {
            current: RwLock::new(Arc::new(rule)),
        }
    }

    pub fn snapshot(&self) -> Arc<EncryptRule> {
        self.current.read().clone()
    }

    /// Swap in a new rule, returning the previous one.
    pub fn replace(&self, rule: EncryptRule) -> Arc<EncryptRule> {
        let mut guard = self.current.write();
        std::mem::replace(&mut *guard, Arc::new(rule))
    }
}
