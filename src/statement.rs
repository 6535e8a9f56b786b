//! Bound statement context consumed by the token generators.
//!
//! Every positional segment carries a [`Span`] into the original SQL text.
//! Spans are produced by the parser from the tokenizer's locations and are
//! never recomputed by searching the text.

use crate::{schema::SchemaMetaData, value::SqlValue};

/// Byte range in the original SQL, `start..end` with `end` exclusive.
///
/// A span with `start == end` is an insertion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    start: usize,
    end: usize,
}

impl Span {
    /// Build from inclusive offsets, as reported by a parser.
    pub fn new(start: usize, stop: usize) -> Self {
        Self {
            start,
            end: stop + 1,
        }
    }

    /// Zero-width span before byte `at`.
    pub fn insertion(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub(crate) fn from_range(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// Inclusive stop offset. For an insertion point this is `start - 1`.
    pub fn stop(&self) -> isize {
        self.end as isize - 1
    }

    /// Exclusive end offset.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Smallest span covering both.
    pub fn cover(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn slice<'a>(&self, sql: &'a str) -> &'a str {
        sql.get(self.start..self.end).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub value: String,
    pub quote: Option<char>,
    pub span: Span,
}

impl Identifier {
    pub fn matches(&self, name: &str) -> bool {
        self.value.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSegment {
    pub name: Identifier,
    pub alias: Option<Identifier>,
    pub span: Span,
}

impl TableSegment {
    /// Whether `owner` (a column qualifier) refers to this table.
    pub fn is_referenced_by(&self, owner: &str) -> bool {
        match &self.alias {
            Some(alias) => alias.matches(owner),
            None => self.name.matches(owner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSegment {
    pub owner: Option<Identifier>,
    pub name: Identifier,
    pub span: Span,
}

/// Position of a parameter marker in the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterMarker {
    /// Zero-based index into the bound parameter list.
    pub index: usize,
    pub marker: String,
    pub span: Span,
}

impl ParameterMarker {
    /// `?`-style markers are bound by position of appearance.
    pub fn is_positional(&self) -> bool {
        self.marker == "?"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionSegment {
    Literal { value: SqlValue, span: Span },
    Parameter(ParameterMarker),
    Column(ColumnSegment),
    /// `VALUES(col)` inside ON DUPLICATE KEY UPDATE.
    InsertValueReference { column: ColumnSegment, span: Span },
    Other { text: String, span: Span },
}

impl ExpressionSegment {
    pub fn span(&self) -> Span {
        match self {
            ExpressionSegment::Literal { span, .. }
            | ExpressionSegment::InsertValueReference { span, .. }
            | ExpressionSegment::Other { span, .. } => *span,
            ExpressionSegment::Parameter(marker) => marker.span,
            ExpressionSegment::Column(column) => column.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionSegment {
    Column {
        column: ColumnSegment,
        alias: Option<Identifier>,
        span: Span,
    },
    /// `*` or `owner.*`.
    Shorthand {
        owner: Option<Identifier>,
        span: Span,
    },
    Expression {
        text: String,
        alias: Option<Identifier>,
        span: Span,
    },
}

impl ProjectionSegment {
    pub fn span(&self) -> Span {
        match self {
            ProjectionSegment::Column { span, .. }
            | ProjectionSegment::Shorthand { span, .. }
            | ProjectionSegment::Expression { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOperator {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Like,
    NotLike,
    In,
    NotIn,
    /// Two operands, lower and upper bound.
    Between,
    NotBetween,
}

impl PredicateOperator {
    /// Operators answerable by comparing assisted-query digests.
    pub fn is_equality(self) -> bool {
        matches!(
            self,
            PredicateOperator::Equal
                | PredicateOperator::NotEqual
                | PredicateOperator::In
                | PredicateOperator::NotIn
        )
    }
}

/// `column op operand`, `column [NOT] IN (operands)` or
/// `column [NOT] BETWEEN low AND high`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateSegment {
    pub column: ColumnSegment,
    pub operator: PredicateOperator,
    pub operands: Vec<ExpressionSegment>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentSegment {
    pub column: ColumnSegment,
    pub value: ExpressionSegment,
    pub span: Span,
}

/// One parenthesized VALUES row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertValuesSegment {
    pub values: Vec<ExpressionSegment>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinitionSegment {
    pub column: Identifier,
    pub data_type: String,
    /// Everything after the data type, verbatim (`NOT NULL DEFAULT ''`, ...).
    pub tail: String,
    pub not_null: bool,
    pub span: Span,
}

/// A table-level constraint naming columns of the table being defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConstraintSegment {
    pub columns: Vec<Identifier>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterTableAction {
    /// `keyword` is the action keyword as written, e.g. `ADD COLUMN`.
    Add {
        keyword: String,
        definition: ColumnDefinitionSegment,
        span: Span,
    },
    Modify {
        keyword: String,
        definition: ColumnDefinitionSegment,
        span: Span,
    },
    Change {
        keyword: String,
        previous: Identifier,
        definition: ColumnDefinitionSegment,
        span: Span,
    },
    Drop {
        columns: Vec<Identifier>,
        span: Span,
    },
    Rename {
        previous: Identifier,
        next: Identifier,
        span: Span,
    },
}

impl AlterTableAction {
    pub fn span(&self) -> Span {
        match self {
            AlterTableAction::Add { span, .. }
            | AlterTableAction::Modify { span, .. }
            | AlterTableAction::Change { span, .. }
            | AlterTableAction::Drop { span, .. }
            | AlterTableAction::Rename { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableStatement {
    pub table: TableSegment,
    pub column_definitions: Vec<ColumnDefinitionSegment>,
    pub constraints: Vec<TableConstraintSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterTableStatement {
    pub table: TableSegment,
    pub actions: Vec<AlterTableAction>,
}

/// Explicit INSERT column list. `span` covers the parentheses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertColumnsSegment {
    pub columns: Vec<ColumnSegment>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertSource {
    Values(Vec<InsertValuesSegment>),
    /// MySQL `INSERT INTO t SET col = value, ...`.
    Set(Vec<AssignmentSegment>),
    Select(Box<SelectStatement>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: TableSegment,
    pub columns: Option<InsertColumnsSegment>,
    pub source: InsertSource,
    pub on_duplicate_key_update: Vec<AssignmentSegment>,
}

impl InsertStatement {
    pub fn values(&self) -> Option<&[InsertValuesSegment]> {
        match &self.source {
            InsertSource::Values(rows) => Some(rows),
            InsertSource::Set(_) | InsertSource::Select(_) => None,
        }
    }

    pub fn set_assignments(&self) -> Option<&[AssignmentSegment]> {
        match &self.source {
            InsertSource::Set(assignments) => Some(assignments),
            InsertSource::Values(_) | InsertSource::Select(_) => None,
        }
    }

    pub fn select(&self) -> Option<&SelectStatement> {
        match &self.source {
            InsertSource::Select(select) => Some(select),
            InsertSource::Values(_) | InsertSource::Set(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatement {
    pub tables: Vec<TableSegment>,
    pub assignments: Vec<AssignmentSegment>,
    pub predicates: Vec<PredicateSegment>,
    pub subqueries: Vec<SubquerySegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStatement {
    pub tables: Vec<TableSegment>,
    pub predicates: Vec<PredicateSegment>,
    pub subqueries: Vec<SubquerySegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectStatement {
    pub projections: Vec<ProjectionSegment>,
    pub tables: Vec<TableSegment>,
    /// Predicates from WHERE and from JOIN ... ON.
    pub predicates: Vec<PredicateSegment>,
    /// SELECTs nested directly in this one.
    pub subqueries: Vec<SubquerySegment>,
}

/// Where a nested SELECT sits, which decides what its projections feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryKind {
    /// `(SELECT ...) alias` in a FROM list.
    Derived,
    /// `[NOT] EXISTS (SELECT ...)`. Projected values are discarded.
    Exists,
    /// Any other position: IN lists, comparisons, scalar projections.
    Expression,
}

/// A parenthesized SELECT. `span` covers the parentheses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubquerySegment {
    pub kind: SubqueryKind,
    pub select: SelectStatement,
    pub span: Span,
}

/// One query level of a statement.
#[derive(Debug, Clone)]
pub struct QueryScope<'a> {
    pub tables: &'a [TableSegment],
    /// Tables of the enclosing levels, nearest first.
    pub outer: Vec<&'a TableSegment>,
    /// Projections whose physical columns may be rewritten. Empty for
    /// levels whose values flow somewhere the read path cannot follow.
    pub projections: &'a [ProjectionSegment],
    pub predicates: &'a [PredicateSegment],
}

impl<'a> QueryScope<'a> {
    pub fn tables_context(&self) -> TablesContext<'a> {
        TablesContext::new(self.tables).with_outer(self.outer.clone())
    }

    fn push_subqueries(
        scopes: &mut Vec<QueryScope<'a>>,
        subqueries: &'a [SubquerySegment],
        tables: &'a [TableSegment],
        outer: &[&'a TableSegment],
    ) {
        let enclosing: Vec<_> = tables.iter().chain(outer.iter().copied()).collect();
        for subquery in subqueries {
            let with_projections = subquery.kind == SubqueryKind::Exists;
            Self::push_select(scopes, &subquery.select, with_projections, enclosing.clone());
        }
    }

    fn push_select(
        scopes: &mut Vec<QueryScope<'a>>,
        select: &'a SelectStatement,
        with_projections: bool,
        outer: Vec<&'a TableSegment>,
    ) {
        let projections: &[ProjectionSegment] = if with_projections {
            &select.projections
        } else {
            &[]
        };
        scopes.push(QueryScope {
            tables: &select.tables,
            outer: outer.clone(),
            projections,
            predicates: &select.predicates,
        });
        Self::push_subqueries(scopes, &select.subqueries, &select.tables, &outer);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlStatement {
    CreateTable(CreateTableStatement),
    AlterTable(AlterTableStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Select(SelectStatement),
    /// Any statement kind outside the rewritten clause families.
    Other,
}

/// A statement together with every parameter marker it contains, in order
/// of appearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementContext {
    pub statement: SqlStatement,
    pub parameter_markers: Vec<ParameterMarker>,
}

impl StatementContext {
    pub fn new(statement: SqlStatement) -> Self {
        Self {
            statement,
            parameter_markers: Vec::new(),
        }
    }

    pub fn with_parameter_markers(mut self, markers: Vec<ParameterMarker>) -> Self {
        self.parameter_markers = markers;
        self
    }

    /// The SELECT whose projections reach the client, if any.
    pub fn select(&self) -> Option<&SelectStatement> {
        match &self.statement {
            SqlStatement::Select(select) => Some(select),
            SqlStatement::Insert(insert) => insert.select(),
            _ => None,
        }
    }

    /// Tables visible to column references in projections and predicates.
    pub fn query_tables(&self) -> &[TableSegment] {
        match &self.statement {
            SqlStatement::Select(select) => &select.tables,
            SqlStatement::Insert(insert) => {
                insert.select().map(|s| s.tables.as_slice()).unwrap_or(&[])
            }
            SqlStatement::Update(update) => &update.tables,
            SqlStatement::Delete(delete) => &delete.tables,
            SqlStatement::CreateTable(_) | SqlStatement::AlterTable(_) | SqlStatement::Other => &[],
        }
    }

    pub fn predicates(&self) -> &[PredicateSegment] {
        match &self.statement {
            SqlStatement::Select(select) => &select.predicates,
            SqlStatement::Insert(insert) => {
                insert.select().map(|s| s.predicates.as_slice()).unwrap_or(&[])
            }
            SqlStatement::Update(update) => &update.predicates,
            SqlStatement::Delete(delete) => &delete.predicates,
            SqlStatement::CreateTable(_) | SqlStatement::AlterTable(_) | SqlStatement::Other => &[],
        }
    }

    /// Every query level, outermost first. Projections are offered for the
    /// SELECT that reaches the client and for EXISTS subqueries only.
    pub fn scopes(&self) -> Vec<QueryScope<'_>> {
        let mut scopes = Vec::new();
        match &self.statement {
            SqlStatement::Select(select) => {
                QueryScope::push_select(&mut scopes, select, true, Vec::new());
            }
            SqlStatement::Insert(insert) => {
                if let Some(select) = insert.select() {
                    QueryScope::push_select(&mut scopes, select, true, Vec::new());
                }
            }
            SqlStatement::Update(update) => {
                scopes.push(QueryScope {
                    tables: &update.tables,
                    outer: Vec::new(),
                    projections: &[],
                    predicates: &update.predicates,
                });
                QueryScope::push_subqueries(&mut scopes, &update.subqueries, &update.tables, &[]);
            }
            SqlStatement::Delete(delete) => {
                scopes.push(QueryScope {
                    tables: &delete.tables,
                    outer: Vec::new(),
                    projections: &[],
                    predicates: &delete.predicates,
                });
                QueryScope::push_subqueries(&mut scopes, &delete.subqueries, &delete.tables, &[]);
            }
            SqlStatement::CreateTable(_) | SqlStatement::AlterTable(_) | SqlStatement::Other => {}
        }
        scopes
    }

    pub fn uses_numbered_parameters(&self) -> bool {
        self.parameter_markers.iter().any(|m| !m.is_positional())
    }
}

/// Resolves which table a column reference belongs to.
pub struct TablesContext<'a> {
    tables: &'a [TableSegment],
    outer: Vec<&'a TableSegment>,
}

impl<'a> TablesContext<'a> {
    pub fn new(tables: &'a [TableSegment]) -> Self {
        Self {
            tables,
            outer: Vec::new(),
        }
    }

    /// Tables of enclosing queries, consulted for qualified references the
    /// current level does not define.
    pub fn with_outer(mut self, outer: Vec<&'a TableSegment>) -> Self {
        self.outer = outer;
        self
    }

    /// Owning table name of `column`, or `None` when it cannot be decided.
    ///
    /// Qualified columns resolve through aliases and table names, the
    /// current level first. An unqualified column in a single-table level
    /// belongs to that table; with several tables the schema must name
    /// exactly one owner.
    pub fn find_table_name(
        &self,
        column: &ColumnSegment,
        schema: &dyn SchemaMetaData,
    ) -> Option<&'a str> {
        if let Some(owner) = &column.owner {
            return self
                .tables
                .iter()
                .chain(self.outer.iter().copied())
                .find(|t| t.is_referenced_by(&owner.value))
                .map(|t| t.name.value.as_str());
        }

        if let [only] = self.tables {
            return Some(only.name.value.as_str());
        }

        let mut owners = self
            .tables
            .iter()
            .filter(|t| schema.contains_column(&t.name.value, &column.name.value));
        match (owners.next(), owners.next()) {
            (Some(table), None) => Some(table.name.value.as_str()),
            _ => None,
        }
    }

    /// Tables a shorthand projection expands to.
    pub fn shorthand_tables(&self, owner: Option<&Identifier>) -> Vec<&'a TableSegment> {
        match owner {
            Some(owner) => self
                .tables
                .iter()
                .filter(|t| t.is_referenced_by(&owner.value))
                .collect(),
            None => self.tables.iter().collect(),
        }
    }
}
