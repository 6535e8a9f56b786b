use std::collections::HashMap;

use super::column::EncryptColumn;
use crate::error::{EncryptError, Result};

/// Encrypted columns of one table, keyed by lower-cased logic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptTable {
    name: String,
    columns: HashMap<String, EncryptColumn>,
}

impl EncryptTable {
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = EncryptColumn>,
    ) -> Result<Self> {
        let name = name.into();
        let mut by_logic = HashMap::new();
        for column in columns {
            column.validate(&name)?;
            let key = column.logic_column().to_ascii_lowercase();
            if by_logic.insert(key, column).is_some() {
                return Err(EncryptError::InvalidConfig(format!(
                    "{name}: logic column declared twice"
                )));
            }
        }

        let table = Self {
            name,
            columns: by_logic,
        };
        table.check_cross_column_names()?;
        Ok(table)
    }

    // A physical column of one mapping must not shadow a logic or physical
    // column of another.
    fn check_cross_column_names(&self) -> Result<()> {
        let mut seen: HashMap<String, &str> = HashMap::new();
        for column in self.columns.values() {
            let logic = column.logic_column();
            let physical = column.physical_columns().into_iter().map(|(_, n)| n);
            let names = std::iter::once(logic).chain(physical);
            for name in names {
                if let Some(owner) = seen.insert(name.to_ascii_lowercase(), logic) {
                    return Err(EncryptError::InvalidConfig(format!(
                        "{}: column `{name}` is mapped by both `{owner}` and `{logic}`",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find_encrypt_column(&self, logic_column: &str) -> Option<&EncryptColumn> {
        self.columns.get(&logic_column.to_ascii_lowercase())
    }

    pub fn is_encrypt_column(&self, logic_column: &str) -> bool {
        self.find_encrypt_column(logic_column).is_some()
    }

    pub fn is_cipher_column(&self, name: &str) -> bool {
        self.logic_column_of_cipher(name).is_some()
    }

    pub fn logic_column_of_cipher(&self, cipher_column: &str) -> Option<&str> {
        self.columns
            .values()
            .find(|c| c.cipher_column().eq_ignore_ascii_case(cipher_column))
            .map(EncryptColumn::logic_column)
    }

    /// Logic column names, sorted.
    pub fn logic_columns(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.columns.values().map(EncryptColumn::logic_column).collect();
        names.sort_unstable();
        names
    }

    pub fn columns(&self) -> impl Iterator<Item = &EncryptColumn> {
        self.columns.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t_user() -> EncryptTable {
        EncryptTable::new(
            "t_user",
            [
                EncryptColumn::new("pwd", "pwd_cipher", "aes")
                    .with_assisted_query("pwd_assisted", "digest"),
                EncryptColumn::new("email", "email_cipher", "aes"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = t_user();
        assert_eq!(table.find_encrypt_column("PWD").unwrap().cipher_column(), "pwd_cipher");
        assert!(table.is_encrypt_column("Email"));
        assert!(!table.is_encrypt_column("id"));
    }

    #[test]
    fn test_cipher_reverse_lookup() {
        let table = t_user();
        assert_eq!(table.logic_column_of_cipher("PWD_CIPHER"), Some("pwd"));
        assert!(table.is_cipher_column("email_cipher"));
        assert!(!table.is_cipher_column("pwd_assisted"));
    }

    #[test]
    fn test_logic_columns_sorted() {
        assert_eq!(t_user().logic_columns(), vec!["email", "pwd"]);
    }

    #[test]
    fn test_duplicate_logic_column_rejected() {
        let result = EncryptTable::new(
            "t",
            [
                EncryptColumn::new("pwd", "a", "aes"),
                EncryptColumn::new("PWD", "b", "aes"),
            ],
        );
        assert!(matches!(result, Err(EncryptError::InvalidConfig(_))));
    }

    #[test]
    fn test_physical_name_clash_across_columns_rejected() {
        let result = EncryptTable::new(
            "t",
            [
                EncryptColumn::new("pwd", "shared", "aes"),
                EncryptColumn::new("email", "shared", "aes"),
            ],
        );
        assert!(result.is_err());

        let result = EncryptTable::new(
            "t",
            [
                EncryptColumn::new("pwd", "email", "aes"),
                EncryptColumn::new("email", "email_cipher", "aes"),
            ],
        );
        assert!(result.is_err());
    }
}
