use log::{debug, warn};

use super::{GenerateContext, PreviousTokens, SqlTokenGenerator, origin};
use crate::{
    error::Result,
    rule::{ColumnRole, EncryptColumn, EncryptTable},
    statement::{
        InsertSource, InsertStatement, ProjectionSegment, Span, SqlStatement, StatementContext,
    },
    token::{
        ColumnProjection, InsertColumn, InsertColumnsToken, SqlToken, SubstitutableColumnNameToken,
        quote_identifier,
    },
};

/// Expand logic columns into physical ones: cipher, assisted query, plain,
/// each right where its logic column was.
fn expand_columns<'c>(
    table: &EncryptTable,
    logic_columns: impl IntoIterator<Item = (&'c str, Option<char>)>,
) -> Vec<InsertColumn> {
    let mut expanded = Vec::new();
    for (origin_index, (name, quote)) in logic_columns.into_iter().enumerate() {
        match table.find_encrypt_column(name) {
            Some(column) => {
                for (role, physical) in column.physical_columns() {
                    expanded.push(InsertColumn {
                        name: physical.to_string(),
                        quote,
                        origin_index,
                        logic_column: column.logic_column().to_string(),
                        role,
                    });
                }
            }
            None => expanded.push(InsertColumn {
                name: name.to_string(),
                quote,
                origin_index,
                logic_column: name.to_string(),
                role: ColumnRole::Logic,
            }),
        }
    }
    expanded
}

fn insert_with_values(statement: &StatementContext) -> Option<&InsertStatement> {
    match &statement.statement {
        SqlStatement::Insert(insert) if matches!(insert.source, InsertSource::Values(_)) => {
            Some(insert)
        }
        _ => None,
    }
}

/// INSERT without a column list: the schema's columns, expanded, inserted
/// right after the table name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertDefaultColumnsTokenGenerator;

impl SqlTokenGenerator for InsertDefaultColumnsTokenGenerator {
    fn name(&self) -> &'static str {
        "insert_default_columns"
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        insert_with_values(statement).is_some_and(|insert| insert.columns.is_none())
    }

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        let Some(insert) = insert_with_values(statement) else {
            return Ok(Vec::new());
        };
        let table_name = insert.table.name.value.as_str();
        let Some(encrypt_table) = ctx.rule.find_encrypt_table(table_name) else {
            return Ok(Vec::new());
        };
        let at = insert.table.span.end();

        // Another producer already listed the default columns: expand its
        // logic columns instead of emitting a second list.
        if let Some(existing) = previous.insert_columns_at_mut(at) {
            let logic: Vec<_> = existing
                .columns
                .iter()
                .map(|c| (c.logic_column.clone(), c.quote, c.role))
                .collect();
            let mut seen = std::collections::HashSet::new();
            let names: Vec<_> = logic
                .iter()
                .filter(|(name, _, _)| seen.insert(name.to_ascii_lowercase()))
                .map(|(name, quote, _)| (name.as_str(), *quote))
                .collect();
            existing.columns = expand_columns(encrypt_table, names);
            debug!("insert {table_name}: extended existing default column list");
            return Ok(Vec::new());
        }

        let Some(columns) = ctx.schema.columns(table_name) else {
            warn!("insert into {table_name} without column list: table unknown to schema");
            return Ok(Vec::new());
        };
        let expanded = expand_columns(encrypt_table, columns.iter().map(|c| (c.as_str(), None)));
        debug!("insert {table_name}: {} default columns", expanded.len());

        Ok(vec![SqlToken::InsertColumns(InsertColumnsToken {
            span: Span::insertion(at),
            table: table_name.to_string(),
            columns: expanded,
            parenthesize: true,
        })])
    }
}

/// Explicit column list with a VALUES source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertColumnsTokenGenerator;

impl SqlTokenGenerator for InsertColumnsTokenGenerator {
    fn name(&self) -> &'static str {
        "insert_columns"
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        insert_with_values(statement).is_some_and(|insert| insert.columns.is_some())
    }

    fn generate(
        &self,
        statement: &StatementContext,
        ctx: &GenerateContext<'_>,
        _previous: &mut PreviousTokens,
    ) -> Result<Vec<SqlToken>> {
        let Some(insert) = insert_with_values(statement) else {
            return Ok(Vec::new());
        };
        let Some(list) = &insert.columns else {
            return Ok(Vec::new());
        };
        let table_name = insert.table.name.value.as_str();
        let Some(encrypt_table) = ctx.rule.find_encrypt_table(table_name) else {
            return Ok(Vec::new());
        };
        let (Some(first), Some(last)) = (list.columns.first(), list.columns.last()) else {
            return Ok(Vec::new());
        };
        if !list
            .columns
            .iter()
            .any(|c| encrypt_table.is_encrypt_column(&c.name.value))
        {
            return Ok(Vec::new());
        }

        let expanded = expand_columns(
            encrypt_table,
            list.columns.iter().map(|c| (c.name.value.as_str(), c.name.quote)),
        );
        debug!(
            "insert {table_name}: {} -> {} columns",
            list.columns.len(),
            expanded.len()
        );

        Ok(vec![SqlToken::InsertColumns(InsertColumnsToken {
            span: first.span.cover(&last.span),
            table: table_name.to_string(),
            columns: expanded,
            parenthesize: false,
        })])
    }
}

/// INSERT ... SELECT. Target column `i` takes projection `i`, and an
/// encrypted target is only expanded when its source is an encrypted column
/// with the same encryption: stored values then move across unchanged,
/// physical column by physical column. Any other pairing keeps the logic
/// names on both sides, which the database rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSelectColumnsTokenGenerator;

impl InsertSelectColumnsTokenGenerator {
    /// Encrypt column read by `projection`, as resolved by the projection
    /// generator.
    fn source<'r>(
        ctx: &'r GenerateContext<'_>,
        previous: &PreviousTokens,
        projection: &ProjectionSegment,
    ) -> Option<(String, &'r EncryptColumn)> {
        let ProjectionSegment::Column { span, .. } = projection else {
            return None;
        };
        let origin = previous.column_name_at(*span)?.projections.first()?.origin.as_ref()?;
        let column = ctx.rule.find_encrypt_column(&origin.table, &origin.logic_column)?;
        Some((origin.table.clone(), column))
    }

    fn copied_projection(
        projection: &ProjectionSegment,
        table: &str,
        column: &EncryptColumn,
    ) -> Option<SqlToken> {
        let ProjectionSegment::Column { column: source, span, .. } = projection else {
            return None;
        };
        let owner = source
            .owner
            .as_ref()
            .map(|o| quote_identifier(&o.value, o.quote));
        let projections = column
            .physical_columns()
            .into_iter()
            .map(|(role, name)| ColumnProjection {
                owner: owner.clone(),
                name: name.to_string(),
                quote: source.name.quote,
                alias: None,
                origin: Some(origin(table, column, role)),
            })
            .collect();
        Some(SqlToken::ColumnName(SubstitutableColumnNameToken {
            span: *span,
            projections,
        }))
    }
}

impl SqlTokenGenerator for InsertSelectColumnsTokenGenerator {
    fn name(&self) -> &'static str {
        "insert_select_columns"
    }

    fn applies(&self, statement: &StatementContext) -> bool {
        matches!(&statement.statement, SqlStatement::Insert(insert) if insert.select().is_some())
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
        let Some(select) = insert.select() else {
            return Ok(Vec::new());
        };
        let table_name = insert.table.name.value.as_str();
        let encrypt_table = ctx.rule.find_encrypt_table(table_name);

        let schema_columns;
        let targets: Vec<(&str, Option<char>)> = match &insert.columns {
            Some(list) => list
                .columns
                .iter()
                .map(|c| (c.name.value.as_str(), c.name.quote))
                .collect(),
            None => {
                schema_columns = ctx.schema.columns(table_name).unwrap_or_default();
                schema_columns.iter().map(|c| (c.as_str(), None)).collect()
            }
        };
        let pairable = targets.len() == select.projections.len()
            && !select
                .projections
                .iter()
                .any(|p| matches!(p, ProjectionSegment::Shorthand { .. }));

        let mut columns = Vec::new();
        let mut projections = Vec::new();
        let mut any_paired = false;
        for (origin_index, (name, quote)) in targets.iter().copied().enumerate() {
            let target = encrypt_table.and_then(|t| t.find_encrypt_column(name));
            let projection = select.projections.get(origin_index).filter(|_| pairable);
            let source = projection.and_then(|p| Self::source(ctx, previous, p));
            match (target, projection, source) {
                (Some(target), Some(projection), Some((source_table, source)))
                    if target.has_same_encryption(source) =>
                {
                    any_paired = true;
                    columns.extend(target.physical_columns().into_iter().map(|(role, physical)| {
                        InsertColumn {
                            name: physical.to_string(),
                            quote,
                            origin_index,
                            logic_column: target.logic_column().to_string(),
                            role,
                        }
                    }));
                    projections.extend(Self::copied_projection(projection, &source_table, source));
                }
                (target, _, source) => {
                    if target.is_some() || source.is_some() {
                        warn!(
                            "insert into {table_name}: {name} is not copied from a column with \
                             the same encryption, left unrewritten"
                        );
                    }
                    columns.push(InsertColumn {
                        name: name.to_string(),
                        quote,
                        origin_index,
                        logic_column: name.to_string(),
                        role: ColumnRole::Logic,
                    });
                }
            }
        }

        // Projection tokens other than the copies would feed ciphertext, or
        // plaintext read under another key, into the target.
        for projection in &select.projections {
            previous.remove_starting_at(projection.span().start());
        }

        let mut tokens = projections;
        match (&insert.columns, encrypt_table) {
            (Some(list), Some(_)) if any_paired => {
                if let (Some(first), Some(last)) = (list.columns.first(), list.columns.last()) {
                    tokens.push(SqlToken::InsertColumns(InsertColumnsToken {
                        span: first.span.cover(&last.span),
                        table: table_name.to_string(),
                        columns,
                        parenthesize: false,
                    }));
                }
            }
            (None, Some(_)) if !columns.is_empty() => {
                tokens.push(SqlToken::InsertColumns(InsertColumnsToken {
                    span: Span::insertion(insert.table.span.end()),
                    table: table_name.to_string(),
                    columns,
                    parenthesize: true,
                }));
            }
            (None, Some(_)) => {
                warn!("insert into {table_name} without column list: table unknown to schema");
            }
            _ => {}
        }

        if !tokens.is_empty() {
            debug!("insert select {table_name}: {} encrypt tokens", tokens.len());
        }
        Ok(tokens)
    }
}
