use log::{debug, trace, warn};

use super::{GenerateContext, PreviousTokens, SqlTokenGenerator, origin, render_value};
use crate::{
    error::Result,
    rule::{ColumnRole, EncryptColumn},
    statement::{ExpressionSegment, PredicateOperator, StatementContext},
    token::{
        ColumnProjection, PredicateValueToken, SqlToken, SubstitutableColumnNameToken,
        quote_identifier,
    },
};

/// Physical column a predicate compares against.
///
/// Equality goes through the assisted-query column when there is one, then
/// the cipher column when queries run on ciphertext, then the plain column.
/// Ciphertext does not preserve order or substrings, so LIKE, BETWEEN and
/// range comparisons can only use the plain column. `None` leaves the
/// predicate untouched.
fn predicate_target<'r>(
    ctx: &GenerateContext<'_>,
    column: &'r EncryptColumn,
    operator: PredicateOperator,
) -> Option<(ColumnRole, &'r str)> {
    let plain = column.plain_column().map(|plain| (ColumnRole::Plain, plain));
    if !operator.is_equality() {
        return plain;
    }
    if let Some(assisted) = column.assisted_query_column() {
        return Some((ColumnRole::AssistedQuery, assisted));
    }
    if ctx.query_with_cipher_column {
        return Some((ColumnRole::Cipher, column.cipher_column()));
    }
    plain
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredicateColumnTokenGenerator;

impl SqlTokenGenerator for PredicateColumnTokenGenerator {
    fn name(&self) -> &'static str {
        "predicate_column"
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        statement.scopes().iter().any(|s| !s.predicates.is_empty())
    }

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        _previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        let mut tokens = Vec::new();
        for scope in statement.scopes() {
            let tables = scope.tables_context();
            for predicate in scope.predicates {
                let column = &predicate.column;
                if predicate
                    .operands
                    .iter()
                    .any(|o| matches!(o, ExpressionSegment::Column(_)))
                {
                    trace!("predicate on {} compares columns, skipped", column.name.value);
                    continue;
                }
                let Some(table) = tables.find_table_name(column, ctx.schema) else {
                    trace!("predicate column {}: owner unresolved", column.name.value);
                    continue;
                };
                let Some(encrypt_column) = ctx.rule.find_encrypt_column(table, &column.name.value)
                else {
                    continue;
                };
                let Some((role, name)) = predicate_target(ctx, encrypt_column, predicate.operator)
                else {
                    warn!(
                        "predicate on {table}.{} left unrewritten: no queryable physical column",
                        column.name.value
                    );
                    continue;
                };
                tokens.push(SqlToken::ColumnName(SubstitutableColumnNameToken {
                    span: column.span,
                    projections: vec![ColumnProjection {
                        owner: column
                            .owner
                            .as_ref()
                            .map(|o| quote_identifier(&o.value, o.quote)),
                        name: name.to_string(),
                        quote: column.name.quote,
                        alias: None,
                        origin: Some(origin(table, encrypt_column, role)),
                    }],
                }));
            }
        }

        if !tokens.is_empty() {
            debug!("predicate columns: {} encrypt tokens", tokens.len());
        }
        Ok(tokens)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredicateRightValueTokenGenerator;

impl SqlTokenGenerator for PredicateRightValueTokenGenerator {
    fn name(&self) -> &'static str {
        "predicate_right_value"
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        statement.scopes().iter().any(|s| !s.predicates.is_empty())
    }

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        let scopes = statement.scopes();
        let mut tokens = Vec::new();
        for predicate in scopes.iter().flat_map(|s| s.predicates) {
            // The column token decides which physical column, and so which
            // encryptor, the operands are compared against.
            let Some(origin) = previous
                .column_name_at(predicate.column.span)
                .and_then(|t| t.projections.first())
                .and_then(|p| p.origin.as_ref())
            else {
                continue;
            };
            if origin.role == ColumnRole::Plain {
                continue;
            }
            let Some(column) = ctx.rule.find_encrypt_column(&origin.table, &origin.logic_column)
            else {
                continue;
            };

            for operand in &predicate.operands {
                let ExpressionSegment::Literal { span, .. } = operand else {
                    continue;
                };
                let value = render_value(ctx, &origin.table, column, origin.role, operand)?;
                if let Some(value) = value {
                    let span = *span;
                    tokens.push(SqlToken::PredicateValue(PredicateValueToken { span, value }));
                }
            }
        }

        if !tokens.is_empty() {
            debug!("predicate values: {} encrypt tokens", tokens.len());
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use crate::generator::tests::{rendered, texts};

    #[test]
    fn test_equality_uses_assisted_query_pair() {
        assert_eq!(
            texts("SELECT id FROM t_encrypt WHERE pwd = 'secret'"),
            vec!["pwd_assisted", "'assist:secret'"]
        );
    }

    #[test]
    fn test_cipher_pair_without_assisted_column() {
        assert_eq!(
            texts("SELECT id FROM t_encrypt WHERE phone <> '1' AND id > 3"),
            vec!["phone_cipher", "'enc:1'"]
        );
    }

    #[test]
    fn test_in_list_values_each_encrypted() {
        assert_eq!(
            texts("DELETE FROM t_encrypt WHERE pwd IN ('a', 'b')"),
            vec!["pwd_assisted", "'assist:a'", "'assist:b'"]
        );
    }

    #[test]
    fn test_range_and_like_use_plain_column_only() {
        // Values stay in plaintext; phone has no plain column and is left alone.
        assert_eq!(
            texts("SELECT id FROM t_encrypt WHERE pwd > 'a' AND email LIKE 'b%' AND phone < '5'"),
            vec!["pwd_plain", "email_plain"]
        );
        assert!(texts("SELECT id FROM t_encrypt WHERE phone NOT LIKE ?").is_empty());
    }

    #[test]
    fn test_between_uses_plain_column_only() {
        let sql = "SELECT id FROM t_encrypt \
                   WHERE pwd BETWEEN 'a' AND 'b' OR phone NOT BETWEEN 1 AND 2";
        assert_eq!(texts(sql), vec!["pwd_plain"]);
    }

    #[test]
    fn test_subquery_predicates_rewritten() {
        let in_list = "SELECT id FROM t_order WHERE user_id IN \
                       (SELECT id FROM t_encrypt WHERE pwd = 'x')";
        assert_eq!(texts(in_list), vec!["pwd_assisted", "'assist:x'"]);
        let derived = "SELECT amount FROM (SELECT * FROM t_encrypt WHERE phone = '1') d \
                       WHERE amount > 2";
        assert_eq!(texts(derived), vec!["phone_cipher", "'enc:1'"]);
    }

    #[test]
    fn test_correlated_subquery_resolves_outer_table() {
        assert_eq!(
            texts(
                "SELECT id FROM t_encrypt u WHERE EXISTS \
                 (SELECT 1 FROM t_order o WHERE o.user_id = u.id AND u.phone = '5')"
            ),
            vec!["u.phone_cipher", "'enc:5'"]
        );
    }

    #[test]
    fn test_plain_column_when_not_querying_cipher() {
        let sql = "SELECT id FROM t_encrypt WHERE email = 'x' OR phone = 'y'";
        let texts: Vec<_> = rendered(sql, false).into_iter().map(|(_, t)| t).collect();
        // email compares in plaintext, phone has neither plain nor assisted column.
        assert_eq!(texts, vec!["email_plain"]);
    }

    #[test]
    fn test_parameter_operand_keeps_marker() {
        assert_eq!(texts("SELECT id FROM t_encrypt WHERE pwd = ?"), vec!["pwd_assisted"]);
    }

    #[test]
    fn test_column_operand_left_alone() {
        assert!(texts("SELECT id FROM t_encrypt WHERE pwd = phone").is_empty());
    }

    #[test]
    fn test_offsets_point_at_source() {
        let sql = "SELECT id FROM t_encrypt WHERE pwd = 'secret'";
        let tokens = rendered(sql, true);
        assert_eq!(tokens[0].0, sql.find("pwd").unwrap());
        assert_eq!(tokens[1].0, sql.find("'secret'").unwrap());
    }
}
