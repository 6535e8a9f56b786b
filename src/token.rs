//! Position-addressed substitutions produced by the generators.

use std::fmt;

use crate::{config::DatabaseType, rule::ColumnRole, statement::Span, value::SqlValue};

pub(crate) fn quote_identifier(name: &str, quote: Option<char>) -> String {
    match quote {
        Some('[') => format!("[{name}]"),
        Some(q) => format!("{q}{name}{q}"),
        None => name.to_string(),
    }
}

/// Where a physical column came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnOrigin {
    pub table: String,
    pub logic_column: String,
    pub role: ColumnRole,
}

/// Original parameter feeding a rendered marker, and the column it is bound for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    pub index: usize,
    pub origin: Option<ColumnOrigin>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedValue {
    Literal(SqlValue),
    Parameter {
        marker: String,
        binding: ParameterBinding,
    },
    /// Source text kept as written.
    Original(String),
}

impl fmt::Display for RenderedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderedValue::Literal(value) => f.write_str(&value.to_literal()),
            RenderedValue::Parameter { marker, .. } => f.write_str(marker),
            RenderedValue::Original(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnProjection {
    /// Qualifier as written, quotes included.
    pub owner: Option<String>,
    pub name: String,
    pub quote: Option<char>,
    pub alias: Option<String>,
    pub origin: Option<ColumnOrigin>,
}

impl fmt::Display for ColumnProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(owner) = &self.owner {
            write!(f, "{owner}.")?;
        }
        f.write_str(&quote_identifier(&self.name, self.quote))?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {}", quote_identifier(alias, self.quote))?;
        }
        Ok(())
    }
}

/// Replaces a column reference (projection, predicate column, constraint
/// column, insert target) with one or more physical column references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutableColumnNameToken {
    pub span: Span,
    pub projections: Vec<ColumnProjection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertColumn {
    pub name: String,
    pub quote: Option<char>,
    /// Index of the logic column in the source column list.
    pub origin_index: usize,
    pub logic_column: String,
    pub role: ColumnRole,
}

/// Physical INSERT target list. When the source omitted the list the token
/// is an insertion after the table name and renders its own parentheses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertColumnsToken {
    pub span: Span,
    pub table: String,
    pub columns: Vec<InsertColumn>,
    pub parenthesize: bool,
}

impl InsertColumnsToken {
    /// Number of logic columns the list was expanded from.
    pub fn logic_column_count(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.origin_index + 1)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertValuesToken {
    pub span: Span,
    pub rows: Vec<Vec<RenderedValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentItem {
    pub column: String,
    pub value: RenderedValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentToken {
    pub span: Span,
    pub items: Vec<AssignmentItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateValueToken {
    pub span: Span,
    pub value: RenderedValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinitionToken {
    pub span: Span,
    pub definitions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterColumnItem {
    Add { keyword: String, definition: String },
    Modify { keyword: String, definition: String },
    Change { keyword: String, previous: String, definition: String },
    Drop { columns: Vec<String> },
    Rename { previous: String, next: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterColumnToken {
    pub span: Span,
    pub items: Vec<AlterColumnItem>,
    pub database_type: DatabaseType,
}

impl AlterColumnToken {
    fn render_item(&self, item: &AlterColumnItem) -> String {
        match item {
            AlterColumnItem::Add { keyword, definition }
            | AlterColumnItem::Modify { keyword, definition } => format!("{keyword} {definition}"),
            AlterColumnItem::Change {
                keyword,
                previous,
                definition,
            } => format!("{keyword} {previous} {definition}"),
            AlterColumnItem::Rename { previous, next } => {
                format!("RENAME COLUMN {previous} TO {next}")
            }
            AlterColumnItem::Drop { columns } => match self.database_type {
                DatabaseType::Oracle => format!("DROP ({})", columns.join(", ")),
                DatabaseType::SqlServer => format!("DROP COLUMN {}", columns.join(", ")),
                DatabaseType::MySql | DatabaseType::PostgreSql => columns
                    .iter()
                    .map(|c| format!("DROP COLUMN {c}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlToken {
    ColumnName(SubstitutableColumnNameToken),
    InsertColumns(InsertColumnsToken),
    InsertValues(InsertValuesToken),
    Assignment(AssignmentToken),
    PredicateValue(PredicateValueToken),
    ColumnDefinition(ColumnDefinitionToken),
    AlterColumn(AlterColumnToken),
}

impl SqlToken {
    pub fn span(&self) -> Span {
        match self {
            SqlToken::ColumnName(t) => t.span,
            SqlToken::InsertColumns(t) => t.span,
            SqlToken::InsertValues(t) => t.span,
            SqlToken::Assignment(t) => t.span,
            SqlToken::PredicateValue(t) => t.span,
            SqlToken::ColumnDefinition(t) => t.span,
            SqlToken::AlterColumn(t) => t.span,
        }
    }

    pub fn start(&self) -> usize {
        self.span().start()
    }

    pub fn stop(&self) -> isize {
        self.span().stop()
    }

    /// Replacement text for the token's span.
    pub fn render(&self) -> String {
        match self {
            SqlToken::ColumnName(t) => join(&t.projections),
            SqlToken::InsertColumns(t) => {
                let list = t
                    .columns
                    .iter()
                    .map(|c| quote_identifier(&c.name, c.quote))
                    .collect::<Vec<_>>()
                    .join(", ");
                if t.parenthesize {
                    format!(" ({list})")
                } else {
                    list
                }
            }
            SqlToken::InsertValues(t) => t
                .rows
                .iter()
                .map(|row| format!("({})", join(row)))
                .collect::<Vec<_>>()
                .join(", "),
            SqlToken::Assignment(t) => t
                .items
                .iter()
                .map(|item| format!("{} = {}", item.column, item.value))
                .collect::<Vec<_>>()
                .join(", "),
            SqlToken::PredicateValue(t) => t.value.to_string(),
            SqlToken::ColumnDefinition(t) => t.definitions.join(", "),
            SqlToken::AlterColumn(t) => t
                .items
                .iter()
                .map(|item| t.render_item(item))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Parameters referenced by the rendered text, in rendering order.
    pub fn parameter_bindings(&self) -> Vec<&ParameterBinding> {
        let values: Vec<&RenderedValue> = match self {
            SqlToken::InsertValues(t) => t.rows.iter().flatten().collect(),
            SqlToken::Assignment(t) => t.items.iter().map(|i| &i.value).collect(),
            SqlToken::PredicateValue(t) => vec![&t.value],
            SqlToken::ColumnName(_)
            | SqlToken::InsertColumns(_)
            | SqlToken::ColumnDefinition(_)
            | SqlToken::AlterColumn(_) => Vec::new(),
        };
        values
            .into_iter()
            .filter_map(|v| match v {
                RenderedValue::Parameter { binding, .. } => Some(binding),
                _ => None,
            })
            .collect()
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
