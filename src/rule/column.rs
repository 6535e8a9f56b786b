use crate::{
    config::EncryptColumnConfig,
    error::{EncryptError, Result},
};

/// The part a physical column plays for its logic column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    /// An unencrypted column, passed through under its own name.
    Logic,
    Cipher,
    AssistedQuery,
    Plain,
}

/// Physical mapping of one logic column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptColumn {
    logic_column: String,
    cipher_column: String,
    assisted_query_column: Option<String>,
    plain_column: Option<String>,
    encryptor_name: String,
    assisted_query_encryptor_name: Option<String>,
}

impl EncryptColumn {
    pub fn new(
        logic_column: impl Into<String>,
        cipher_column: impl Into<String>,
        encryptor_name: impl Into<String>,
    ) -> Self {
        Self {
            logic_column: logic_column.into(),
            cipher_column: cipher_column.into(),
            assisted_query_column: None,
            plain_column: None,
            encryptor_name: encryptor_name.into(),
            assisted_query_encryptor_name: None,
        }
    }

    pub(crate) fn from_config(logic_column: String, config: EncryptColumnConfig) -> Self {
        Self {
            logic_column,
            cipher_column: config.cipher_column,
            assisted_query_column: config.assisted_query_column,
            plain_column: config.plain_column,
            encryptor_name: config.encryptor_name,
            assisted_query_encryptor_name: config.assisted_query_encryptor_name,
        }
    }

    pub fn with_assisted_query(
        mut self,
        column: impl Into<String>,
        encryptor_name: impl Into<String>,
    ) -> Self {
        self.assisted_query_column = Some(column.into());
        self.assisted_query_encryptor_name = Some(encryptor_name.into());
        self
    }

    pub fn with_plain(mut self, column: impl Into<String>) -> Self {
        self.plain_column = Some(column.into());
        self
    }

    pub fn logic_column(&self) -> &str {
        &self.logic_column
    }

    pub fn cipher_column(&self) -> &str {
        &self.cipher_column
    }

    pub fn assisted_query_column(&self) -> Option<&str> {
        self.assisted_query_column.as_deref()
    }

    pub fn plain_column(&self) -> Option<&str> {
        self.plain_column.as_deref()
    }

    pub fn encryptor_name(&self) -> &str {
        &self.encryptor_name
    }

    pub fn assisted_query_encryptor_name(&self) -> Option<&str> {
        self.assisted_query_encryptor_name.as_deref()
    }

    /// Physical columns in storage order: cipher, assisted query, plain.
    pub fn physical_columns(&self) -> Vec<(ColumnRole, &str)> {
        let mut result = vec![(ColumnRole::Cipher, self.cipher_column.as_str())];
        if let Some(assisted) = &self.assisted_query_column {
            result.push((ColumnRole::AssistedQuery, assisted.as_str()));
        }
        if let Some(plain) = &self.plain_column {
            result.push((ColumnRole::Plain, plain.as_str()));
        }
        result
    }

    pub fn physical_column(&self, role: ColumnRole) -> Option<&str> {
        match role {
            ColumnRole::Logic => Some(&self.logic_column),
            ColumnRole::Cipher => Some(&self.cipher_column),
            ColumnRole::AssistedQuery => self.assisted_query_column(),
            ColumnRole::Plain => self.plain_column(),
        }
    }

    /// Whether `other` derives the same set of physical roles.
    pub fn has_same_shape(&self, other: &EncryptColumn) -> bool {
        self.assisted_query_column.is_some() == other.assisted_query_column.is_some()
            && self.plain_column.is_some() == other.plain_column.is_some()
    }

    /// Same shape and the same encryptors, so stored values can move from
    /// one column's physical columns to the other's unchanged.
    pub fn has_same_encryption(&self, other: &EncryptColumn) -> bool {
        self.has_same_shape(other)
            && self.encryptor_name == other.encryptor_name
            && self.assisted_query_encryptor_name == other.assisted_query_encryptor_name
    }

    pub(crate) fn validate(&self, table: &str) -> Result<()> {
        let invalid = |msg: String| {
            Err(EncryptError::InvalidConfig(format!("{table}.{}: {msg}", self.logic_column)))
        };

        if self.cipher_column.is_empty() {
            return invalid("cipher column is required".into());
        }
        if self.encryptor_name.is_empty() {
            return invalid("encryptor is required".into());
        }
        if self.assisted_query_column.is_some() != self.assisted_query_encryptor_name.is_some() {
            return invalid("assisted query column and assisted query encryptor go together".into());
        }

        let mut names = vec![self.logic_column.as_str(), self.cipher_column.as_str()];
        names.extend(self.assisted_query_column.as_deref());
        names.extend(self.plain_column.as_deref());
        for (i, a) in names.iter().enumerate() {
            if let Some(b) = names[i + 1..].iter().find(|b| b.eq_ignore_ascii_case(a)) {
                return invalid(format!("column name `{b}` is used twice"));
            }
        }
        Ok(())
    }
}
