use log::{debug, warn};

use super::{GenerateContext, PreviousTokens, SqlTokenGenerator, render_original, render_value};
use crate::{
    error::Result,
    rule::ColumnRole,
    statement::{InsertValuesSegment, SqlStatement, StatementContext},
    token::{InsertColumnsToken, InsertValuesToken, RenderedValue, SqlToken},
};

/// Rewrites VALUES rows to line up with the expanded insert column list.
///
/// Runs after the column generators and reads their token: every row gets
/// exactly one value per physical column. If any row cannot be rendered the
/// statement gets no values token and the column list goes back to logic
/// names, so no value reaches a cipher column unencrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertValuesTokenGenerator;

impl InsertValuesTokenGenerator {
    fn render_row(
        ctx: &GenerateContext<'_>,
        columns: &InsertColumnsToken,
        row: &InsertValuesSegment,
    ) -> Result<Option<Vec<RenderedValue>>> {
        let mut rendered = Vec::with_capacity(columns.columns.len());
        for column in &columns.columns {
            let Some(expr) = row.values.get(column.origin_index) else {
                return Ok(None);
            };
            let value = match column.role {
                ColumnRole::Logic => Some(render_original(expr)),
                role => match ctx.rule.find_encrypt_column(&columns.table, &column.logic_column) {
                    Some(encrypt_column) => {
                        render_value(ctx, &columns.table, encrypt_column, role, expr)?
                    }
                    None => None,
                },
            };
            let Some(value) = value else {
                warn!(
                    "insert into {}: value for {} cannot be encrypted, insert left unrewritten",
                    columns.table, column.logic_column
                );
                return Ok(None);
            };
            rendered.push(value);
        }
        Ok(Some(rendered))
    }

    fn render_rows(
        ctx: &GenerateContext<'_>,
        columns: &InsertColumnsToken,
        rows: &[InsertValuesSegment],
    ) -> Result<Option<Vec<Vec<RenderedValue>>>> {
        let expected = columns.logic_column_count();
        if let Some(row) = rows.iter().find(|row| row.values.len() != expected) {
            warn!(
                "insert into {}: row has {} values for {expected} columns, insert left unrewritten",
                columns.table,
                row.values.len()
            );
            return Ok(None);
        }

        let mut rendered = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::render_row(ctx, columns, row)? {
                Some(values) => rendered.push(values),
                None => return Ok(None),
            }
        }
        Ok(Some(rendered))
    }

    /// Undo the column expansion. An explicit list gets its logic names back
    /// by dropping the token; a generated list is reduced to logic names.
    fn withdraw_columns(previous: &mut PreviousTokens) {
        let Some(columns) = previous.insert_columns_mut() else {
            return;
        };
        if !columns.parenthesize {
            let start = columns.span.start();
            previous.remove_starting_at(start);
            return;
        }
        columns.columns.dedup_by_key(|c| c.origin_index);
        for column in &mut columns.columns {
            column.name = column.logic_column.clone();
            column.role = ColumnRole::Logic;
        }
    }
}

impl SqlTokenGenerator for InsertValuesTokenGenerator {
    fn name(&self) -> &'static str {
        "insert_values"
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        matches!(
            &statement.statement,
            SqlStatement::Insert(insert) if insert.values().is_some_and(|rows| !rows.is_empty())
        )
    }

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        let SqlStatement::Insert(insert) = &statement.statement else {
            return Ok(Vec::new());
        };
        let Some(rows) = insert.values() else {
            return Ok(Vec::new());
        };
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            return Ok(Vec::new());
        };
        let Some(columns) = previous.insert_columns() else {
            return Ok(Vec::new());
        };
        let Some(rendered) = Self::render_rows(ctx, columns, rows)? else {
            Self::withdraw_columns(previous);
            return Ok(Vec::new());
        };
        debug!("insert into {}: {} rows rewritten", columns.table, rendered.len());

        Ok(vec![SqlToken::InsertValues(InsertValuesToken {
            span: first.span.cover(&last.span),
            rows: rendered,
        })])
    }
}
