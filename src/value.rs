use std::{borrow::Cow, fmt};

use crate::rewriter::escape_sql_string;

/// A scalar value as it appears in SQL text or in a bind parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlValue {
    Null,
    Integer(i64),
    /// Any other numeric literal, kept verbatim (decimals, exponents, big integers).
    Number(String),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// The plaintext fed to encrypt algorithms. `None` for NULL.
    pub fn plaintext(&self) -> Option<Cow<'_, str>> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(i) => Some(Cow::Owned(i.to_string())),
            SqlValue::Number(n) => Some(Cow::Borrowed(n)),
            SqlValue::Text(s) => Some(Cow::Borrowed(s)),
        }
    }

    /// Render as a SQL literal.
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Number(n) => n.clone(),
            SqlValue::Text(s) => format!("'{}'", escape_sql_string(s)),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.plaintext() {
            Some(s) => f.write_str(&s),
            None => f.write_str("NULL"),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}
