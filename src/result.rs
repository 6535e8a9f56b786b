//! Decryption of rows read through a rewritten SELECT.

use log::warn;

use crate::{
    error::Result,
    rule::{ColumnRole, EncryptRule},
    schema::SchemaMetaData,
    statement::{ProjectionSegment, StatementContext, TablesContext},
    token::{ColumnOrigin, SqlToken, SubstitutableColumnNameToken},
    value::SqlValue,
};

/// Maps each output column of a rewritten query back to the logic column it
/// was read for, and decrypts the columns read from ciphertext.
#[derive(Debug)]
pub struct ResultDecryptor<'a> {
    rule: &'a EncryptRule,
    columns: Vec<Option<ColumnOrigin>>,
}

impl<'a> ResultDecryptor<'a> {
    /// `tokens` are the tokens the statement was rewritten with.
    pub fn new(
        rule: &'a EncryptRule,
        statement: &StatementContext,
        tokens: &[SqlToken],
        schema: &dyn SchemaMetaData,
    ) -> Self {
        let mut columns = Vec::new();
        let Some(select) = statement.select() else {
            return Self { rule, columns };
        };
        let tables = TablesContext::new(&select.tables);

        for projection in &select.projections {
            if let Some(token) = projection_token(tokens, projection) {
                columns.extend(token.projections.iter().map(|p| p.origin.clone()));
                continue;
            }
            match projection {
                ProjectionSegment::Column { .. } | ProjectionSegment::Expression { .. } => {
                    columns.push(None)
                }
                ProjectionSegment::Shorthand { owner, .. } => {
                    // Not rewritten, so no encrypted table is involved, but the
                    // width still decides where later columns land.
                    for table in tables.shorthand_tables(owner.as_ref()) {
                        let Some(width) = schema.columns(&table.name.value).map(|c| c.len()) else {
                            warn!(
                                "result columns after `{}.*` not decrypted: no schema",
                                table.name.value
                            );
                            return Self { rule, columns };
                        };
                        columns.extend(std::iter::repeat_n(None, width));
                    }
                }
            }
        }
        Self { rule, columns }
    }

    /// Origin of output column `index`, if it was read for an encrypted column.
    pub fn column_origin(&self, index: usize) -> Option<&ColumnOrigin> {
        self.columns.get(index).and_then(Option::as_ref)
    }

    /// Whether any output column needs decrypting.
    pub fn is_empty(&self) -> bool {
        !self
            .columns
            .iter()
            .flatten()
            .any(|origin| origin.role == ColumnRole::Cipher)
    }

    /// Decrypt the ciphertext columns of `row` in place. Columns read from
    /// plain columns, and unencrypted columns, are left as they are.
    pub fn decrypt_row(&self, row: &mut [SqlValue]) -> Result<()> {
        for (value, origin) in row.iter_mut().zip(&self.columns) {
            let Some(origin) = origin.as_ref().filter(|o| o.role == ColumnRole::Cipher) else {
                continue;
            };
            let plain = self
                .rule
                .decrypt_value(&origin.table, &origin.logic_column, value)?;
            if let Some(plain) = plain {
                *value = plain;
            }
        }
        Ok(())
    }
}

fn projection_token<'t>(
    tokens: &'t [SqlToken],
    projection: &ProjectionSegment,
) -> Option<&'t SubstitutableColumnNameToken> {
    let span = projection.span();
    tokens.iter().find_map(|t| match t {
        SqlToken::ColumnName(column) if column.span == span => Some(column),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::TokenGenerateBuilder, config::DatabaseType, generator::tests::schema, parser,
        rule::tests::test_rule,
    };

    fn decrypt(sql: &str, query_with_cipher_column: bool, row: &[&str]) -> Vec<SqlValue> {
        let rule = test_rule();
        let statement = parser::parse(sql, DatabaseType::MySql).unwrap();
        let tokens = TokenGenerateBuilder::new(&rule, query_with_cipher_column)
            .generate_sql_tokens(&statement, &schema())
            .unwrap();
        let decryptor = ResultDecryptor::new(&rule, &statement, &tokens, &schema());
        let mut row: Vec<SqlValue> = row.iter().map(|v| SqlValue::from(*v)).collect();
        decryptor.decrypt_row(&mut row).unwrap();
        row
    }

    #[test]
    fn test_decrypt_projected_cipher_columns() {
        let row = decrypt("SELECT id, pwd, phone FROM t_encrypt", true, &["1", "enc:p", "enc:555"]);
        assert_eq!(row, vec![SqlValue::from("1"), SqlValue::from("p"), SqlValue::from("555")]);
    }

    #[test]
    fn test_shorthand_expanded_in_schema_order() {
        let row = decrypt(
            "SELECT * FROM t_encrypt",
            true,
            &["1", "enc:p", "enc:e", "enc:555"],
        );
        assert_eq!(
            row,
            vec![
                SqlValue::from("1"),
                SqlValue::from("p"),
                SqlValue::from("e"),
                SqlValue::from("555"),
            ]
        );
    }

    #[test]
    fn test_plain_reads_are_untouched() {
        let row = decrypt("SELECT email, phone FROM t_encrypt", false, &["e", "enc:555"]);
        assert_eq!(row, vec![SqlValue::from("e"), SqlValue::from("555")]);
    }

    #[test]
    fn test_unrewritten_shorthand_keeps_positions() {
        let row = decrypt(
            "SELECT o.*, u.phone FROM t_order o JOIN t_encrypt u ON u.id = o.user_id",
            true,
            &["1", "2", "3", "enc:555"],
        );
        assert_eq!(row[3], SqlValue::from("555"));
        assert_eq!(row[0], SqlValue::from("1"));
    }

    #[test]
    fn test_non_select_has_nothing_to_decrypt() {
        let rule = test_rule();
        let statement =
            parser::parse("UPDATE t_encrypt SET phone = '1'", DatabaseType::MySql).unwrap();
        let decryptor = ResultDecryptor::new(&rule, &statement, &[], &schema());
        assert!(decryptor.is_empty());
        assert!(decryptor.column_origin(0).is_none());
    }
}
