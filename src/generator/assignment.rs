use log::{debug, warn};

use super::{GenerateContext, PreviousTokens, SqlTokenGenerator, render_value};
use crate::{
    error::Result,
    rule::{ColumnRole, EncryptColumn},
    statement::{
        AssignmentSegment, ExpressionSegment, SqlStatement, StatementContext, TablesContext,
    },
    token::{AssignmentItem, AssignmentToken, RenderedValue, SqlToken, quote_identifier},
};

/// `column = value` expanded to one pair per physical column. `None` when
/// the column is not encrypted or the value shape cannot be encrypted.
fn assignment_token(
    ctx: &GenerateContext<'_>,
    table: &str,
    assignment: &AssignmentSegment,
) -> Result<Option<SqlToken>> {
    let target = &assignment.column;
    let Some(column) = ctx.rule.find_encrypt_column(table, &target.name.value) else {
        return Ok(None);
    };
    let qualify = |name: &str| {
        let name = quote_identifier(name, target.name.quote);
        match &target.owner {
            Some(owner) => format!("{}.{name}", quote_identifier(&owner.value, owner.quote)),
            None => name,
        }
    };

    let mut items = Vec::new();
    for (role, name) in column.physical_columns() {
        let value = match &assignment.value {
            ExpressionSegment::InsertValueReference { column: source, .. } => {
                insert_value_reference(ctx, table, column, &source.name.value, role).map(
                    |physical| {
                        RenderedValue::Original(format!(
                            "VALUES({})",
                            quote_identifier(physical, source.name.quote)
                        ))
                    },
                )
            }
            expr => render_value(ctx, table, column, role, expr)?,
        };
        let Some(value) = value else {
            warn!(
                "assignment to {table}.{} left unrewritten: unsupported value",
                column.logic_column()
            );
            return Ok(None);
        };
        items.push(AssignmentItem {
            column: qualify(name),
            value,
        });
    }

    Ok(Some(SqlToken::Assignment(AssignmentToken {
        span: assignment.span,
        items,
    })))
}

/// Physical column of `source` in `VALUES(source)` matching `role`.
fn insert_value_reference<'r>(
    ctx: &'r GenerateContext<'_>,
    table: &str,
    target: &EncryptColumn,
    source: &str,
    role: ColumnRole,
) -> Option<&'r str> {
    let source = ctx.rule.find_encrypt_column(table, source)?;
    if !source.has_same_shape(target) {
        return None;
    }
    source.physical_column(role)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignmentTokenGenerator;

impl SqlTokenGenerator for AssignmentTokenGenerator {
    fn name(&self) -> &'static str {
        "assignment"
    }

    /// UPDATE ... SET and the MySQL `INSERT ... SET` form.
    fn applies(&self, statement: &StatementContext) -> bool {
        match &statement.statement {
            SqlStatement::Update(update) => !update.assignments.is_empty(),
            SqlStatement::Insert(insert) => insert.set_assignments().is_some_and(|a| !a.is_empty()),
            _ => false,
        }
    }

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        _previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        let mut tokens = Vec::new();
        match &statement.statement {
            SqlStatement::Update(update) => {
                let tables = TablesContext::new(&update.tables);
                for assignment in &update.assignments {
                    let Some(table) = tables.find_table_name(&assignment.column, ctx.schema) else {
                        continue;
                    };
                    tokens.extend(assignment_token(ctx, table, assignment)?);
                }
            }
            SqlStatement::Insert(insert) => {
                let table = insert.table.name.value.as_str();
                for assignment in insert.set_assignments().unwrap_or_default() {
                    tokens.extend(assignment_token(ctx, table, assignment)?);
                }
            }
            _ => {}
        }

        if !tokens.is_empty() {
            debug!("assignments: {} encrypt tokens", tokens.len());
        }
        Ok(tokens)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOnDuplicateKeyUpdateTokenGenerator;

impl SqlTokenGenerator for InsertOnDuplicateKeyUpdateTokenGenerator {
    fn name(&self) -> &'static str {
        "insert_on_duplicate_key_update"
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        matches!(
            &statement.statement,
            SqlStatement::Insert(insert) if !insert.on_duplicate_key_update.is_empty()
        )
    }

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        _previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        let SqlStatement::Insert(insert) = &statement.statement else {
            return Ok(Vec::new());
        };
        let table = insert.table.name.value.as_str();

        let mut tokens = Vec::new();
        for assignment in &insert.on_duplicate_key_update {
            tokens.extend(assignment_token(ctx, table, assignment)?);
        }

        if !tokens.is_empty() {
            debug!("on duplicate key update {table}: {} encrypt tokens", tokens.len());
        }
        Ok(tokens)
    }
}
