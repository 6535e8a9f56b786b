use log::{debug, warn};

use super::{GenerateContext, PreviousTokens, SqlTokenGenerator, origin};
use crate::{
    error::Result,
    rule::{ColumnRole, EncryptColumn, EncryptTable},
    statement::{
        AlterTableAction, ColumnDefinitionSegment, Identifier, SqlStatement, StatementContext,
    },
    token::{
        AlterColumnItem, AlterColumnToken, ColumnDefinitionToken, ColumnProjection, SqlToken,
        SubstitutableColumnNameToken, quote_identifier,
    },
};

/// One definition per physical column. The cipher column keeps the whole
/// definition tail; derived columns keep the type and NOT NULL.
fn expand_definition(column: &EncryptColumn, definition: &ColumnDefinitionSegment) -> Vec<String> {
    column
        .physical_columns()
        .into_iter()
        .map(|(role, name)| render_definition(role, name, definition))
        .collect()
}

fn render_definition(role: ColumnRole, name: &str, definition: &ColumnDefinitionSegment) -> String {
    let mut rendered = format!(
        "{} {}",
        quote_identifier(name, definition.column.quote),
        definition.data_type
    );
    match role {
        ColumnRole::Cipher | ColumnRole::Logic => {
            if !definition.tail.is_empty() {
                rendered.push(' ');
                rendered.push_str(&definition.tail);
            }
        }
        ColumnRole::AssistedQuery | ColumnRole::Plain => {
            if definition.not_null {
                rendered.push_str(" NOT NULL");
            }
        }
    }
    rendered
}

fn quoted(name: &str, like: &Identifier) -> String {
    quote_identifier(name, like.quote)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateTableTokenGenerator;

impl SqlTokenGenerator for CreateTableTokenGenerator {
    fn name(&self) -> &'static str {
        "create_table"
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        matches!(
            &statement.statement,
            SqlStatement::CreateTable(create) if !create.column_definitions.is_empty()
        )
    }

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        _previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        let SqlStatement::CreateTable(create) = &statement.statement else {
            return Ok(Vec::new());
        };
        let table_name = create.table.name.value.as_str();
        let Some(encrypt_table) = ctx.rule.find_encrypt_table(table_name) else {
            return Ok(Vec::new());
        };

        let mut tokens = Vec::new();
        for definition in &create.column_definitions {
            if let Some(column) = encrypt_table.find_encrypt_column(&definition.column.value) {
                tokens.push(SqlToken::ColumnDefinition(ColumnDefinitionToken {
                    span: definition.span,
                    definitions: expand_definition(column, definition),
                }));
            }
        }

        for constraint in &create.constraints {
            for ident in &constraint.columns {
                let Some(column) = encrypt_table.find_encrypt_column(&ident.value) else {
                    continue;
                };
                tokens.push(SqlToken::ColumnName(SubstitutableColumnNameToken {
                    span: ident.span,
                    projections: vec![ColumnProjection {
                        owner: None,
                        name: column.cipher_column().to_string(),
                        quote: ident.quote,
                        alias: None,
                        origin: Some(origin(table_name, column, ColumnRole::Cipher)),
                    }],
                }));
            }
        }

        debug!("create table {table_name}: {} encrypt tokens", tokens.len());
        Ok(tokens)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlterTableTokenGenerator;

impl AlterTableTokenGenerator {
    fn items(table: &EncryptTable, action: &AlterTableAction) -> Option<Vec<AlterColumnItem>> {
        match action {
            AlterTableAction::Add {
                keyword,
                definition,
                ..
            } => {
                let column = table.find_encrypt_column(&definition.column.value)?;
                Some(
                    expand_definition(column, definition)
                        .into_iter()
                        .map(|definition| AlterColumnItem::Add {
                            keyword: keyword.clone(),
                            definition,
                        })
                        .collect(),
                )
            }
            AlterTableAction::Modify {
                keyword,
                definition,
                ..
            } => {
                let column = table.find_encrypt_column(&definition.column.value)?;
                Some(
                    expand_definition(column, definition)
                        .into_iter()
                        .map(|definition| AlterColumnItem::Modify {
                            keyword: keyword.clone(),
                            definition,
                        })
                        .collect(),
                )
            }
            AlterTableAction::Change {
                keyword,
                previous,
                definition,
                ..
            } => {
                let (old, new) = Self::renamed_pair(table, previous, &definition.column)?;
                Some(
                    new.physical_columns()
                        .into_iter()
                        .filter_map(|(role, name)| {
                            let old_name = old.physical_column(role)?;
                            Some(AlterColumnItem::Change {
                                keyword: keyword.clone(),
                                previous: quoted(old_name, previous),
                                definition: render_definition(role, name, definition),
                            })
                        })
                        .collect(),
                )
            }
            AlterTableAction::Drop { columns, .. } => {
                if !columns.iter().any(|c| table.is_encrypt_column(&c.value)) {
                    return None;
                }
                let names = columns
                    .iter()
                    .flat_map(|ident| match table.find_encrypt_column(&ident.value) {
                        Some(column) => column
                            .physical_columns()
                            .into_iter()
                            .map(|(_, name)| quoted(name, ident))
                            .collect(),
                        None => vec![quoted(&ident.value, ident)],
                    })
                    .collect();
                Some(vec![AlterColumnItem::Drop { columns: names }])
            }
            AlterTableAction::Rename { previous, next, .. } => {
                let (old, new) = Self::renamed_pair(table, previous, next)?;
                Some(
                    new.physical_columns()
                        .into_iter()
                        .filter_map(|(role, name)| {
                            Some(AlterColumnItem::Rename {
                                previous: quoted(old.physical_column(role)?, previous),
                                next: quoted(name, next),
                            })
                        })
                        .collect(),
                )
            }
        }
    }

    /// Both names must be encrypted with the same set of derived columns,
    /// otherwise the physical columns cannot be renamed one to one.
    fn renamed_pair<'t>(
        table: &'t EncryptTable,
        previous: &Identifier,
        next: &Identifier,
    ) -> Option<(&'t EncryptColumn, &'t EncryptColumn)> {
        let old = table.find_encrypt_column(&previous.value);
        let new = table.find_encrypt_column(&next.value);
        match (old, new) {
            (Some(old), Some(new)) if old.has_same_shape(new) => Some((old, new)),
            (None, None) => None,
            _ => {
                warn!(
                    "cannot rename {}.{} to {}: encrypt mappings differ",
                    table.name(),
                    previous.value,
                    next.value
                );
                None
            }
        }
    }
}

impl SqlTokenGenerator for AlterTableTokenGenerator {
    fn name(&self) -> &'static str {
        "alter_table"
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        matches!(&statement.statement, SqlStatement::AlterTable(alter) if !alter.actions.is_empty())
    }

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        _previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        let SqlStatement::AlterTable(alter) = &statement.statement else {
            return Ok(Vec::new());
        };
        let Some(encrypt_table) = ctx.rule.find_encrypt_table(&alter.table.name.value) else {
            return Ok(Vec::new());
        };

        let tokens: Vec<_> = alter
            .actions
            .iter()
            .filter_map(|action| {
                let items = Self::items(encrypt_table, action)?;
                (!items.is_empty()).then(|| {
                    SqlToken::AlterColumn(AlterColumnToken {
                        span: action.span(),
                        items,
                        database_type: ctx.database_type,
                    })
                })
            })
            .collect();

        debug!(
            "alter table {}: {} encrypt tokens",
            alter.table.name.value,
            tokens.len()
        );
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        builder::TokenGenerateBuilder,
        config::DatabaseType,
        generator::tests::{schema, texts},
        parser,
        rule::tests::test_rule,
    };

    #[test]
    fn test_create_table_expands_encrypted_columns() {
        let texts = texts(
            "CREATE TABLE t_encrypt (id INT PRIMARY KEY, pwd VARCHAR(64) NOT NULL DEFAULT '', \
             phone VARCHAR(20))",
        );
        assert_eq!(
            texts,
            vec![
                "pwd_cipher VARCHAR(64) NOT NULL DEFAULT '', pwd_assisted VARCHAR(64) NOT NULL, \
                 pwd_plain VARCHAR(64) NOT NULL",
                "phone_cipher VARCHAR(20)",
            ]
        );
    }

    #[test]
    fn test_create_table_plain_column_keeps_type() {
        let texts = texts("CREATE TABLE t_encrypt (email VARCHAR(100) UNIQUE)");
        assert_eq!(
            texts,
            vec!["email_cipher VARCHAR(100) UNIQUE, email_plain VARCHAR(100)"]
        );
    }

    #[test]
    fn test_create_table_constraint_columns_renamed() {
        let texts =
            texts("CREATE TABLE t_encrypt (id INT, phone VARCHAR(20), PRIMARY KEY (id, phone))");
        assert_eq!(texts, vec!["phone_cipher VARCHAR(20)", "phone_cipher"]);
    }

    #[test]
    fn test_create_unencrypted_table_is_untouched() {
        assert!(texts("CREATE TABLE t_order (order_id INT, amount INT)").is_empty());
    }

    #[test]
    fn test_drop_column_covers_every_physical_column() {
        assert_eq!(
            texts("ALTER TABLE t_encrypt DROP COLUMN pwd"),
            vec!["DROP COLUMN pwd_cipher, DROP COLUMN pwd_assisted, DROP COLUMN pwd_plain"]
        );
    }

    #[test]
    fn test_drop_column_oracle_style() {
        let rule = test_rule();
        let statement =
            parser::parse("ALTER TABLE t_encrypt DROP (pwd, id)", DatabaseType::Oracle).unwrap();
        let tokens = TokenGenerateBuilder::new(&rule, true)
            .database_type(DatabaseType::Oracle)
            .generate_sql_tokens(&statement, &schema())
            .unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].render(), "DROP (pwd_cipher, pwd_assisted, pwd_plain, id)");
    }

    #[test]
    fn test_add_and_modify_column() {
        assert_eq!(
            texts(
                "ALTER TABLE t_encrypt ADD COLUMN email VARCHAR(50), \
                 MODIFY phone VARCHAR(30) NOT NULL"
            ),
            vec![
                "ADD COLUMN email_cipher VARCHAR(50), ADD COLUMN email_plain VARCHAR(50)",
                "MODIFY phone_cipher VARCHAR(30) NOT NULL",
            ]
        );
    }

    #[test]
    fn test_change_requires_matching_mappings() {
        // `phone` is cipher only, `pwd` has an assisted column.
        assert!(texts("ALTER TABLE t_encrypt CHANGE COLUMN phone pwd VARCHAR(10)").is_empty());
        assert_eq!(
            texts("ALTER TABLE t_encrypt CHANGE COLUMN phone phone VARCHAR(10)"),
            vec!["CHANGE COLUMN phone_cipher phone_cipher VARCHAR(10)"]
        );
    }

    #[test]
    fn test_rename_unencrypted_column_is_untouched() {
        assert!(texts("ALTER TABLE t_encrypt RENAME COLUMN id TO user_id").is_empty());
    }
}
