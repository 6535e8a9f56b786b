//! Clause-level token generators.
//!
//! Generators are stateless. Everything a run needs (rule, schema, flags)
//! arrives in a [`GenerateContext`], and the tokens produced so far for the
//! statement arrive in a [`PreviousTokens`] accumulator owned by the caller.

mod assignment;
mod ddl;
mod insert_columns;
mod insert_values;
mod predicate;
mod projection;

use log::warn;

pub use assignment::{AssignmentTokenGenerator, InsertOnDuplicateKeyUpdateTokenGenerator};
pub use ddl::{AlterTableTokenGenerator, CreateTableTokenGenerator};
pub use insert_columns::{
    InsertColumnsTokenGenerator, InsertDefaultColumnsTokenGenerator,
    InsertSelectColumnsTokenGenerator,
};
pub use insert_values::InsertValuesTokenGenerator;
pub use predicate::{PredicateColumnTokenGenerator, PredicateRightValueTokenGenerator};
pub use projection::ProjectionTokenGenerator;

use crate::{
    config::DatabaseType,
    error::Result,
    rule::{ColumnRole, EncryptColumn, EncryptRule},
    schema::SchemaMetaData,
    statement::{ColumnSegment, ExpressionSegment, Span, StatementContext},
    token::{
        ColumnOrigin, InsertColumnsToken, ParameterBinding, RenderedValue, SqlToken,
        SubstitutableColumnNameToken, quote_identifier,
    },
};

/// Per-call inputs shared by every generator.
pub struct GenerateContext<'a> {
    pub rule: &'a EncryptRule,
    pub schema: &'a dyn SchemaMetaData,
    pub query_with_cipher_column: bool,
    pub database_type: DatabaseType,
}

/// Tokens produced so far for one statement.
#[derive(Debug, Default)]
pub struct PreviousTokens {
    tokens: Vec<SqlToken>,
}

impl PreviousTokens {
    pub fn tokens(&self) -> &[SqlToken] {
        &self.tokens
    }

    pub fn extend(&mut self, tokens: impl IntoIterator<Item = SqlToken>) {
        self.tokens.extend(tokens);
    }

    pub fn into_tokens(self) -> Vec<SqlToken> {
        self.tokens
    }

    /// Drop every token starting at `start`, returning how many went.
    pub fn remove_starting_at(&mut self, start: usize) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|t| t.start() != start);
        before - self.tokens.len()
    }

    pub fn insert_columns(&self) -> Option<&InsertColumnsToken> {
        self.tokens.iter().find_map(|t| match t {
            SqlToken::InsertColumns(columns) => Some(columns),
            _ => None,
        })
    }

    pub fn insert_columns_mut(&mut self) -> Option<&mut InsertColumnsToken> {
        self.tokens.iter_mut().find_map(|t| match t {
            SqlToken::InsertColumns(columns) => Some(columns),
            _ => None,
        })
    }

    pub fn insert_columns_at_mut(&mut self, start: usize) -> Option<&mut InsertColumnsToken> {
        self.tokens.iter_mut().find_map(|t| match t {
            SqlToken::InsertColumns(columns) if columns.span.start() == start => Some(columns),
            _ => None,
        })
    }

    pub fn column_name_at(&self, span: Span) -> Option<&SubstitutableColumnNameToken> {
        self.tokens.iter().find_map(|t| match t {
            SqlToken::ColumnName(column) if column.span == span => Some(column),
            _ => None,
        })
    }
}

pub trait SqlTokenGenerator {
    fn name(&self) -> &'static str;

    /// Structural check only. Must not consult the rule.
    fn applies(&self, statement: &StatementContext) -> bool;

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>>;
}

/// The fixed set of encrypt generators, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptTokenGenerator {
    CreateTable(CreateTableTokenGenerator),
    AlterTable(AlterTableTokenGenerator),
    Projection(ProjectionTokenGenerator),
    Assignment(AssignmentTokenGenerator),
    PredicateColumn(PredicateColumnTokenGenerator),
    PredicateRightValue(PredicateRightValueTokenGenerator),
    InsertDefaultColumns(InsertDefaultColumnsTokenGenerator),
    InsertColumns(InsertColumnsTokenGenerator),
    InsertSelectColumns(InsertSelectColumnsTokenGenerator),
    InsertValues(InsertValuesTokenGenerator),
    InsertOnDuplicateKeyUpdate(InsertOnDuplicateKeyUpdateTokenGenerator),
}

impl EncryptTokenGenerator {
    pub const PIPELINE: [EncryptTokenGenerator; 11] = [
        EncryptTokenGenerator::CreateTable(CreateTableTokenGenerator),
        EncryptTokenGenerator::AlterTable(AlterTableTokenGenerator),
        EncryptTokenGenerator::Projection(ProjectionTokenGenerator),
        EncryptTokenGenerator::Assignment(AssignmentTokenGenerator),
        EncryptTokenGenerator::PredicateColumn(PredicateColumnTokenGenerator),
        EncryptTokenGenerator::PredicateRightValue(PredicateRightValueTokenGenerator),
        EncryptTokenGenerator::InsertDefaultColumns(InsertDefaultColumnsTokenGenerator),
        EncryptTokenGenerator::InsertColumns(InsertColumnsTokenGenerator),
        EncryptTokenGenerator::InsertSelectColumns(InsertSelectColumnsTokenGenerator),
        EncryptTokenGenerator::InsertValues(InsertValuesTokenGenerator),
        EncryptTokenGenerator::InsertOnDuplicateKeyUpdate(
            InsertOnDuplicateKeyUpdateTokenGenerator,
        ),
    ];

    fn inner(&self) -> &dyn SqlTokenGenerator {
        match self {
            EncryptTokenGenerator::CreateTable(g) => g,
            EncryptTokenGenerator::AlterTable(g) => g,
            EncryptTokenGenerator::Projection(g) => g,
            EncryptTokenGenerator::Assignment(g) => g,
            EncryptTokenGenerator::PredicateColumn(g) => g,
            EncryptTokenGenerator::PredicateRightValue(g) => g,
            EncryptTokenGenerator::InsertDefaultColumns(g) => g,
            EncryptTokenGenerator::InsertColumns(g) => g,
            EncryptTokenGenerator::InsertSelectColumns(g) => g,
            EncryptTokenGenerator::InsertValues(g) => g,
            EncryptTokenGenerator::InsertOnDuplicateKeyUpdate(g) => g,
        }
    }
}

impl SqlTokenGenerator for EncryptTokenGenerator {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        self.inner().applies(statement)
    }

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        self.inner().generate(statement, ctx, previous)
    }
}

fn origin(table: &str, column: &EncryptColumn, role: ColumnRole) -> ColumnOrigin {
    ColumnOrigin {
        table: table.to_string(),
        logic_column: column.logic_column().to_string(),
        role,
    }
}

/// Render `expr` as the value written to the `role` column of `column`.
///
/// `None` for expression shapes that cannot be encrypted. Numbered parameter
/// markers cannot feed derived columns, since every slot would need a fresh
/// number.
fn render_value(
    ctx: &GenerateContext<'_>,
    table: &str,
    column: &EncryptColumn,
    role: ColumnRole,
    expr: &ExpressionSegment,
) -> Result<Option<RenderedValue>> {
    match expr {
        ExpressionSegment::Literal { value, .. } => {
            let logic = column.logic_column();
            let rendered = match role {
                ColumnRole::Cipher => ctx.rule.encrypt_value(table, logic, value)?,
                ColumnRole::AssistedQuery => {
                    ctx.rule.encrypt_assisted_query_value(table, logic, value)?
                }
                ColumnRole::Plain | ColumnRole::Logic => Some(value.clone()),
            };
            Ok(rendered.map(RenderedValue::Literal))
        }
        ExpressionSegment::Parameter(marker) => {
            if !marker.is_positional() && column.physical_columns().len() > 1 {
                warn!(
                    "numbered parameter {} cannot feed derived columns of {table}.{}",
                    marker.marker,
                    column.logic_column()
                );
                return Ok(None);
            }
            Ok(Some(RenderedValue::Parameter {
                marker: marker.marker.clone(),
                binding: ParameterBinding {
                    index: marker.index,
                    origin: Some(origin(table, column, role)),
                },
            }))
        }
        ExpressionSegment::Column(_)
        | ExpressionSegment::InsertValueReference { .. }
        | ExpressionSegment::Other { .. } => Ok(None),
    }
}

/// Pass-through rendering for values of unencrypted columns.
fn render_original(expr: &ExpressionSegment) -> RenderedValue {
    match expr {
        ExpressionSegment::Literal { value, .. } => RenderedValue::Literal(value.clone()),
        ExpressionSegment::Parameter(marker) => RenderedValue::Parameter {
            marker: marker.marker.clone(),
            binding: ParameterBinding {
                index: marker.index,
                origin: None,
            },
        },
        ExpressionSegment::Column(column) => RenderedValue::Original(column_text(column)),
        ExpressionSegment::InsertValueReference { column, .. } => {
            RenderedValue::Original(format!("VALUES({})", column_text(column)))
        }
        ExpressionSegment::Other { text, .. } => RenderedValue::Original(text.clone()),
    }
}

fn column_text(column: &ColumnSegment) -> String {
    let name = quote_identifier(&column.name.value, column.name.quote);
    match &column.owner {
        Some(owner) => format!("{}.{name}", quote_identifier(&owner.value, owner.quote)),
        None => name,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        builder::TokenGenerateBuilder, parser, rule::tests::test_rule, schema::InMemorySchema,
    };

    pub(crate) fn schema() -> InMemorySchema {
        InMemorySchema::default()
            .with_table("t_encrypt", ["id", "pwd", "email", "phone"])
            .with_table("t_order", ["order_id", "user_id", "amount"])
    }

    /// Tokens for `sql` against [`test_rule`], rendered as `(start, text)`.
    pub(crate) fn rendered(sql: &str, query_with_cipher_column: bool) -> Vec<(usize, String)> {
        let rule = test_rule();
        let statement = parser::parse(sql, DatabaseType::MySql).unwrap();
        let builder = TokenGenerateBuilder::new(&rule, query_with_cipher_column);
        let mut tokens = builder.generate_sql_tokens(&statement, &schema()).unwrap();
        tokens.sort_by_key(SqlToken::start);
        tokens.iter().map(|t| (t.start(), t.render())).collect()
    }

    pub(crate) fn texts(sql: &str) -> Vec<String> {
        rendered(sql, true).into_iter().map(|(_, text)| text).collect()
    }

    #[test]
    fn test_pipeline_order_is_fixed() {
        let names: Vec<_> = EncryptTokenGenerator::PIPELINE.iter().map(|g| g.name()).collect();
        assert_eq!(
            names,
            vec![
                "create_table",
                "alter_table",
                "projection",
                "assignment",
                "predicate_column",
                "predicate_right_value",
                "insert_default_columns",
                "insert_columns",
                "insert_select_columns",
                "insert_values",
                "insert_on_duplicate_key_update",
            ]
        );
    }

    #[test]
    fn test_previous_tokens_remove_starting_at() {
        let mut previous = PreviousTokens::default();
        previous.extend([
            SqlToken::PredicateValue(crate::token::PredicateValueToken {
                span: Span::new(3, 4),
                value: RenderedValue::Original("x".into()),
            }),
            SqlToken::PredicateValue(crate::token::PredicateValueToken {
                span: Span::new(8, 9),
                value: RenderedValue::Original("y".into()),
            }),
        ]);
        assert_eq!(previous.remove_starting_at(3), 1);
        assert_eq!(previous.tokens().len(), 1);
        assert_eq!(previous.tokens()[0].start(), 8);
    }
}
