//! Bound parameter rewriting.
//!
//! Tokens can repeat a parameter marker (one `?` per physical column) and
//! move parameters bound for encrypted columns. The rewriter produces the
//! parameter list that lines up with the rewritten SQL.

use std::collections::HashMap;

use log::{debug, warn};

use crate::{
    error::{EncryptError, Result},
    rule::{ColumnRole, EncryptRule},
    statement::{ExpressionSegment, ParameterMarker, Span, StatementContext},
    token::{ColumnOrigin, SqlToken},
    value::SqlValue,
};

pub struct ParameterRewriter<'a> {
    rule: &'a EncryptRule,
}

enum Slot<'t> {
    Marker(&'t ParameterMarker),
    Token(&'t SqlToken),
}

impl<'a> ParameterRewriter<'a> {
    pub fn new(rule: &'a EncryptRule) -> Self {
        Self { rule }
    }

    /// Parameters for the SQL produced by splicing `tokens` into the
    /// statement's text.
    pub fn rewrite(
        &self,
        statement: &StatementContext,
        tokens: &[SqlToken],
        parameters: &[SqlValue],
    ) -> Result<Vec<SqlValue>> {
        let predicate_origins = predicate_origins(statement, tokens);
        let rewritten = if statement.uses_numbered_parameters() {
            self.rewrite_numbered(statement, tokens, parameters, &predicate_origins)?
        } else {
            self.rewrite_positional(statement, tokens, parameters, &predicate_origins)?
        };
        if rewritten.len() != parameters.len() {
            debug!("parameters: {} -> {}", parameters.len(), rewritten.len());
        }
        Ok(rewritten)
    }

    /// `?` markers bind by position, so the output follows the rewritten
    /// text: markers outside any token keep their place, and each token
    /// contributes the markers it renders, in rendering order.
    fn rewrite_positional(
        &self,
        statement: &StatementContext,
        tokens: &[SqlToken],
        parameters: &[SqlValue],
        predicate_origins: &HashMap<Span, &ColumnOrigin>,
    ) -> Result<Vec<SqlValue>> {
        let mut slots: Vec<(usize, Slot<'_>)> = statement
            .parameter_markers
            .iter()
            .filter(|m| !tokens.iter().any(|t| t.span().contains(&m.span)))
            .map(|m| (m.span.start(), Slot::Marker(m)))
            .chain(tokens.iter().map(|t| (t.start(), Slot::Token(t))))
            .collect();
        slots.sort_by_key(|(start, _)| *start);

        let mut rewritten = Vec::with_capacity(parameters.len());
        for (_, slot) in slots {
            match slot {
                Slot::Marker(marker) => {
                    let value = parameter(parameters, marker.index)?;
                    let origin = predicate_origins.get(&marker.span).copied();
                    rewritten.push(self.bind(origin, value)?);
                }
                Slot::Token(token) => {
                    for binding in token.parameter_bindings() {
                        let value = parameter(parameters, binding.index)?;
                        rewritten.push(self.bind(binding.origin.as_ref(), value)?);
                    }
                }
            }
        }
        Ok(rewritten)
    }

    /// Numbered markers keep their numbers, so values are replaced in
    /// place. Generators never repeat a numbered marker.
    fn rewrite_numbered(
        &self,
        statement: &StatementContext,
        tokens: &[SqlToken],
        parameters: &[SqlValue],
        predicate_origins: &HashMap<Span, &ColumnOrigin>,
    ) -> Result<Vec<SqlValue>> {
        let mut rewritten = parameters.to_vec();
        let mut replace = |index: usize, origin: Option<&ColumnOrigin>| -> Result<()> {
            let value = parameter(parameters, index)?;
            rewritten[index] = self.bind(origin, value)?;
            Ok(())
        };

        for marker in &statement.parameter_markers {
            if let Some(origin) = predicate_origins.get(&marker.span) {
                replace(marker.index, Some(*origin))?;
            }
        }
        for binding in tokens.iter().flat_map(SqlToken::parameter_bindings) {
            if binding.origin.is_some() {
                replace(binding.index, binding.origin.as_ref())?;
            }
        }
        Ok(rewritten)
    }

    fn bind(&self, origin: Option<&ColumnOrigin>, value: &SqlValue) -> Result<SqlValue> {
        let Some(origin) = origin else {
            return Ok(value.clone());
        };
        let encrypted = match origin.role {
            ColumnRole::Cipher => {
                self.rule
                    .encrypt_value(&origin.table, &origin.logic_column, value)?
            }
            ColumnRole::AssistedQuery => {
                self.rule
                    .encrypt_assisted_query_value(&origin.table, &origin.logic_column, value)?
            }
            ColumnRole::Plain | ColumnRole::Logic => return Ok(value.clone()),
        };
        Ok(encrypted.unwrap_or_else(|| {
            warn!(
                "parameter for {}.{} bound unencrypted: column no longer encrypted",
                origin.table, origin.logic_column
            );
            value.clone()
        }))
    }
}

fn parameter(parameters: &[SqlValue], index: usize) -> Result<&SqlValue> {
    parameters.get(index).ok_or(EncryptError::MissingParameter(index))
}

/// Marker spans of predicate operands whose column was rewritten, with the
/// physical column they are now compared against. Covers every query level.
fn predicate_origins<'t>(
    statement: &StatementContext,
    tokens: &'t [SqlToken],
) -> HashMap<Span, &'t ColumnOrigin> {
    let mut origins = HashMap::new();
    let scopes = statement.scopes();
    for predicate in scopes.iter().flat_map(|s| s.predicates) {
        let origin = tokens.iter().find_map(|t| match t {
            SqlToken::ColumnName(column) if column.span == predicate.column.span => {
                column.projections.first().and_then(|p| p.origin.as_ref())
            }
            _ => None,
        });
        let Some(origin) = origin else {
            continue;
        };
        for operand in &predicate.operands {
            if let ExpressionSegment::Parameter(marker) = operand {
                origins.insert(marker.span, origin);
            }
        }
    }
    origins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::TokenGenerateBuilder, config::DatabaseType, generator::tests::schema, parser,
        rule::tests::test_rule,
    };

    fn rewrite(sql: &str, database_type: DatabaseType, parameters: &[SqlValue]) -> Vec<SqlValue> {
        let rule = test_rule();
        let statement = parser::parse(sql, database_type).unwrap();
        let tokens = TokenGenerateBuilder::new(&rule, true)
            .database_type(database_type)
            .generate_sql_tokens(&statement, &schema())
            .unwrap();
        ParameterRewriter::new(&rule)
            .rewrite(&statement, &tokens, parameters)
            .unwrap()
    }

    fn values(items: &[&str]) -> Vec<SqlValue> {
        items.iter().map(|s| SqlValue::from(*s)).collect()
    }

    #[test]
    fn test_insert_parameters_expand_per_physical_column() {
        let rewritten = rewrite(
            "INSERT INTO t_encrypt (id, pwd, email) VALUES (?, ?, ?), (?, ?, ?)",
            DatabaseType::MySql,
            &values(&["1", "p1", "e1", "2", "p2", "e2"]),
        );
        assert_eq!(
            rewritten,
            values(&[
                "1", "enc:p1", "assist:p1", "p1", "enc:e1", "e1", "2", "enc:p2", "assist:p2", "p2",
                "enc:e2", "e2",
            ])
        );
    }

    #[test]
    fn test_update_and_predicate_parameters() {
        let rewritten = rewrite(
            "UPDATE t_encrypt SET pwd = ?, id = ? WHERE phone = ? AND id = ?",
            DatabaseType::MySql,
            &values(&["p", "7", "555", "9"]),
        );
        assert_eq!(rewritten, values(&["enc:p", "assist:p", "p", "7", "enc:555", "9"]));
    }

    #[test]
    fn test_assisted_query_predicate_parameter() {
        let rewritten = rewrite(
            "SELECT id FROM t_encrypt WHERE pwd IN (?, ?)",
            DatabaseType::MySql,
            &values(&["a", "b"]),
        );
        assert_eq!(rewritten, values(&["assist:a", "assist:b"]));
    }

    #[test]
    fn test_numbered_parameters_replaced_in_place() {
        let rewritten = rewrite(
            "UPDATE t_encrypt SET phone = $2 WHERE pwd = $1",
            DatabaseType::PostgreSql,
            &values(&["secret", "555"]),
        );
        assert_eq!(rewritten, values(&["assist:secret", "enc:555"]));
    }

    #[test]
    fn test_insert_set_parameters() {
        let rewritten = rewrite(
            "INSERT INTO t_encrypt SET id = ?, pwd = ?, phone = ?",
            DatabaseType::MySql,
            &values(&["1", "p", "555"]),
        );
        assert_eq!(rewritten, values(&["1", "enc:p", "assist:p", "p", "enc:555"]));
    }

    #[test]
    fn test_subquery_predicate_parameters() {
        let rewritten = rewrite(
            "DELETE FROM t_order WHERE user_id IN \
             (SELECT id FROM t_encrypt WHERE phone = ? AND id > ?)",
            DatabaseType::MySql,
            &values(&["555", "3"]),
        );
        assert_eq!(rewritten, values(&["enc:555", "3"]));
    }

    #[test]
    fn test_range_parameters_stay_plaintext() {
        let parameters = values(&["a", "b", "c"]);
        let rewritten = rewrite(
            "SELECT id FROM t_encrypt WHERE pwd BETWEEN ? AND ? OR email LIKE ?",
            DatabaseType::MySql,
            &parameters,
        );
        assert_eq!(rewritten, parameters);
    }

    #[test]
    fn test_withdrawn_insert_binds_original_parameters() {
        let parameters = values(&["1", "2"]);
        let rewritten = rewrite(
            "INSERT INTO t_encrypt (id, phone) VALUES (?, CONCAT(?, 'x'))",
            DatabaseType::MySql,
            &parameters,
        );
        assert_eq!(rewritten, parameters);
    }

    #[test]
    fn test_unencrypted_parameters_untouched() {
        let parameters = values(&["1", "2"]);
        let rewritten = rewrite(
            "SELECT order_id FROM t_order WHERE order_id = ? AND amount > ?",
            DatabaseType::MySql,
            &parameters,
        );
        assert_eq!(rewritten, parameters);
    }

    #[test]
    fn test_missing_parameter_is_error() {
        let rule = test_rule();
        let sql = "SELECT id FROM t_encrypt WHERE pwd = ?";
        let statement = parser::parse(sql, DatabaseType::MySql).unwrap();
        let result = ParameterRewriter::new(&rule).rewrite(&statement, &[], &[]);
        assert!(matches!(result, Err(EncryptError::MissingParameter(0))));
    }
}
