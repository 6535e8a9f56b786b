use log::{debug, trace, warn};

use super::{GenerateContext, PreviousTokens, SqlTokenGenerator, origin};
use crate::{
    error::Result,
    rule::{ColumnRole, EncryptColumn},
    statement::{Identifier, ProjectionSegment, StatementContext, TableSegment, TablesContext},
    token::{ColumnProjection, SqlToken, SubstitutableColumnNameToken, quote_identifier},
};

/// Physical column a projection reads: the plain column when reads are not
/// routed through ciphertext and one exists, otherwise the cipher column.
fn read_column<'r>(ctx: &GenerateContext<'_>, column: &'r EncryptColumn) -> (ColumnRole, &'r str) {
    match column.plain_column() {
        Some(plain) if !ctx.query_with_cipher_column => (ColumnRole::Plain, plain),
        _ => (ColumnRole::Cipher, column.cipher_column()),
    }
}

fn owner_text(owner: &Identifier) -> String {
    quote_identifier(&owner.value, owner.quote)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionTokenGenerator;

impl ProjectionTokenGenerator {
    fn expand_shorthand(
        ctx: &GenerateContext<'_>,
        owner: Option<&Identifier>,
        targets: &[&TableSegment],
    ) -> Option<Vec<ColumnProjection>> {
        let mut projections = Vec::new();
        for table in targets {
            let table_name = table.name.value.as_str();
            let Some(columns) = ctx.schema.columns(table_name) else {
                warn!("cannot expand shorthand projection: no schema for {table_name}");
                return None;
            };
            let qualifier = match owner {
                Some(owner) => Some(owner_text(owner)),
                None if targets.len() > 1 => {
                    Some(owner_text(table.alias.as_ref().unwrap_or(&table.name)))
                }
                None => None,
            };
            for column in columns {
                let projection = match ctx.rule.find_encrypt_column(table_name, &column) {
                    Some(encrypt_column) => {
                        let (role, name) = read_column(ctx, encrypt_column);
                        ColumnProjection {
                            owner: qualifier.clone(),
                            name: name.to_string(),
                            quote: None,
                            alias: Some(column),
                            origin: Some(origin(table_name, encrypt_column, role)),
                        }
                    }
                    None => ColumnProjection {
                        owner: qualifier.clone(),
                        name: column,
                        quote: None,
                        alias: None,
                        origin: None,
                    },
                };
                projections.push(projection);
            }
        }
        Some(projections)
    }

    fn projection_token(
        ctx: &GenerateContext<'_>,
        tables: &TablesContext<'_>,
        projection: &ProjectionSegment,
    ) -> Option<SqlToken> {
        match projection {
            ProjectionSegment::Column { column, alias, span } => {
                let Some(table_name) = tables.find_table_name(column, ctx.schema) else {
                    trace!("projection {}: owner unresolved", column.name.value);
                    return None;
                };
                let encrypt_column = ctx.rule.find_encrypt_column(table_name, &column.name.value)?;
                let (role, name) = read_column(ctx, encrypt_column);
                let alias = alias
                    .as_ref()
                    .map(|a| a.value.clone())
                    .unwrap_or_else(|| column.name.value.clone());
                Some(SqlToken::ColumnName(SubstitutableColumnNameToken {
                    span: *span,
                    projections: vec![ColumnProjection {
                        owner: column.owner.as_ref().map(owner_text),
                        name: name.to_string(),
                        quote: column.name.quote,
                        alias: Some(alias),
                        origin: Some(origin(table_name, encrypt_column, role)),
                    }],
                }))
            }
            ProjectionSegment::Shorthand { owner, span } => {
                let targets = tables.shorthand_tables(owner.as_ref());
                let involves_encryption = targets
                    .iter()
                    .any(|t| ctx.rule.find_encrypt_table(&t.name.value).is_some());
                if !involves_encryption {
                    return None;
                }
                let projections = Self::expand_shorthand(ctx, owner.as_ref(), &targets)?;
                Some(SqlToken::ColumnName(SubstitutableColumnNameToken {
                    span: *span,
                    projections,
                }))
            }
            ProjectionSegment::Expression { .. } => None,
        }
    }
}

impl SqlTokenGenerator for ProjectionTokenGenerator {
    fn name(&self) -> &'static str {
        "projection"
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        statement.scopes().iter().any(|s| !s.projections.is_empty())
    }

    /// Projections of the client-facing SELECT and of EXISTS subqueries.
    /// Other subqueries feed comparisons or derived tables, where a
    /// physical column would not match what the outer level expects.
    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        let mut tokens = Vec::new();
        for scope in statement.scopes() {
            let tables = scope.tables_context();
            for projection in scope.projections {
                if let Some(token) = Self::projection_token(ctx, &tables, projection) {
                    previous.remove_starting_at(projection.span().start());
                    tokens.push(token);
                }
            }
        }

        if !tokens.is_empty() {
            debug!("projection: {} encrypt tokens", tokens.len());
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use crate::generator::tests::{rendered, texts};

    #[test]
    fn test_column_projection_aliased_to_logic_name() {
        assert_eq!(
            texts("SELECT id, pwd, phone AS p FROM t_encrypt"),
            vec!["pwd_cipher AS pwd", "phone_cipher AS p"]
        );
    }

    #[test]
    fn test_plain_column_read_when_not_querying_cipher() {
        let tokens = rendered("SELECT email, pwd, phone FROM t_encrypt", false);
        let texts: Vec<_> = tokens.into_iter().map(|(_, t)| t).collect();
        assert_eq!(
            texts,
            vec!["email_plain AS email", "pwd_plain AS pwd", "phone_cipher AS phone"]
        );
    }

    #[test]
    fn test_shorthand_expanded_in_schema_order() {
        assert_eq!(
            texts("SELECT * FROM t_encrypt"),
            vec!["id, pwd_cipher AS pwd, email_cipher AS email, phone_cipher AS phone"]
        );
    }

    #[test]
    fn test_qualified_shorthand_in_join() {
        assert_eq!(
            texts("SELECT u.*, o.* FROM t_encrypt u JOIN t_order o ON u.id = o.user_id"),
            vec!["u.id, u.pwd_cipher AS pwd, u.email_cipher AS email, u.phone_cipher AS phone"]
        );
    }

    #[test]
    fn test_unqualified_shorthand_over_join_is_qualified() {
        let texts = texts("SELECT * FROM t_encrypt u, t_order o");
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("u.id, u.pwd_cipher AS pwd"));
        assert!(texts[0].ends_with("o.order_id, o.user_id, o.amount"));
    }

    #[test]
    fn test_unencrypted_table_projection_untouched() {
        assert!(texts("SELECT * FROM t_order").is_empty());
        assert!(texts("SELECT order_id, amount FROM t_order").is_empty());
    }

    #[test]
    fn test_exists_subquery_projection_rewritten() {
        assert_eq!(
            texts(
                "SELECT order_id FROM t_order o WHERE EXISTS \
                 (SELECT e.pwd FROM t_encrypt e WHERE e.id = o.user_id)"
            ),
            vec!["e.pwd_cipher AS pwd"]
        );
    }

    #[test]
    fn test_value_subquery_projections_untouched() {
        assert!(texts("SELECT (SELECT MAX(phone) FROM t_encrypt) AS m FROM t_order").is_empty());
        let in_list = "SELECT order_id FROM t_order WHERE user_id IN (SELECT pwd FROM t_encrypt)";
        assert!(texts(in_list).is_empty());
        assert!(texts("SELECT d.pwd FROM (SELECT pwd FROM t_encrypt) d").is_empty());
    }

    #[test]
    fn test_unqualified_column_in_join_resolved_by_schema() {
        assert_eq!(
            texts("SELECT pwd, amount FROM t_encrypt, t_order"),
            vec!["pwd_cipher AS pwd"]
        );
    }
}
