//! Builds a [`StatementContext`] from SQL text.
//!
//! The parser works on sqlparser's token stream rather than its AST: the
//! generators need byte offsets for every clause fragment, and only the
//! tokenizer reports locations. Statement shapes outside the rewritten
//! clause families come back as [`SqlStatement::Other`].

mod ddl;
mod dml;
mod expr;
mod select;

use log::trace;
use sqlparser::{
    dialect::{Dialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect},
    tokenizer::{Location, Token, Tokenizer},
};

use crate::{
    config::DatabaseType,
    error::{EncryptError, Result},
    statement::{
        Identifier, ParameterMarker, Span, SqlStatement, StatementContext, SubquerySegment,
        TableSegment,
    },
};

/// Parse one statement. Trailing statements after a `;` are ignored.
pub fn parse(sql: &str, database_type: DatabaseType) -> Result<StatementContext> {
    let mut parser = StatementParser::new(sql, database_type)?;
    let statement = parser.parse_statement()?;
    Ok(StatementContext::new(statement).with_parameter_markers(parser.markers))
}

fn dialect(database_type: DatabaseType) -> Box<dyn Dialect> {
    match database_type {
        DatabaseType::MySql => Box::new(MySqlDialect {}),
        DatabaseType::PostgreSql => Box::new(PostgreSqlDialect {}),
        DatabaseType::SqlServer => Box::new(MsSqlDialect {}),
        DatabaseType::Oracle => Box::new(GenericDialect {}),
    }
}

/// Maps tokenizer locations (1-based line, 1-based char column) to byte
/// offsets.
struct LineIndex<'a> {
    sql: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(sql: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(sql.match_indices('\n').map(|(i, _)| i + 1));
        Self { sql, line_starts }
    }

    fn offset(&self, location: Location) -> usize {
        let line = (location.line as usize).saturating_sub(1);
        let Some(&line_start) = self.line_starts.get(line) else {
            return self.sql.len();
        };
        let column = (location.column as usize).saturating_sub(1);
        self.sql[line_start..]
            .char_indices()
            .nth(column)
            .map(|(i, _)| line_start + i)
            .unwrap_or(self.sql.len())
    }
}

#[derive(Debug, Clone)]
struct SpannedToken {
    token: Token,
    span: Span,
}

/// Words that end a clause and so can never be a bare alias.
const RESERVED: &[&str] = &[
    "AND", "AS", "BY", "CROSS", "DUPLICATE", "EXCEPT", "FETCH", "FOR", "FORCE", "FROM", "FULL",
    "GROUP", "HAVING", "IGNORE", "INNER", "INTERSECT", "INTO", "JOIN", "LEFT", "LIMIT", "LOCK",
    "NATURAL", "NOT", "OFFSET", "ON", "OR", "ORDER", "OUTER", "RETURNING", "RIGHT", "SELECT", "SET",
    "STRAIGHT_JOIN", "UNION", "USE", "USING", "VALUE", "VALUES", "WHERE", "WINDOW", "WITH",
];

/// `$n` outside PostgreSQL. Other dialects tokenize it as an identifier or
/// an unnumbered placeholder, and the value bound for it would be lost.
fn foreign_marker(token: &Token, database_type: DatabaseType) -> Option<&str> {
    if database_type == DatabaseType::PostgreSql {
        return None;
    }
    let text = match token {
        Token::Placeholder(marker) => marker.as_str(),
        Token::Word(w) if w.quote_style.is_none() => w.value.as_str(),
        _ => return None,
    };
    let digits = text.strip_prefix('$')?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(text)
}

pub(crate) struct StatementParser<'a> {
    sql: &'a str,
    tokens: Vec<SpannedToken>,
    index: usize,
    database_type: DatabaseType,
    markers: Vec<ParameterMarker>,
    /// Subqueries of the query level being parsed.
    subqueries: Vec<SubquerySegment>,
}

impl<'a> StatementParser<'a> {
    fn new(sql: &'a str, database_type: DatabaseType) -> Result<Self> {
        let dialect = dialect(database_type);
        let raw = Tokenizer::new(&*dialect, sql).tokenize_with_location()?;
        let lines = LineIndex::new(sql);

        let tokens: Vec<_> = raw
            .into_iter()
            .filter(|t| !matches!(t.token, Token::Whitespace(_) | Token::EOF))
            .map(|t| SpannedToken {
                span: Span::from_range(lines.offset(t.span.start), lines.offset(t.span.end)),
                token: t.token,
            })
            .collect();

        if let Some((marker, span)) = tokens
            .iter()
            .find_map(|t| foreign_marker(&t.token, database_type).map(|m| (m, t.span)))
        {
            return Err(EncryptError::Parse(format!(
                "parameter marker {marker} at offset {} is not supported for {database_type:?}",
                span.start()
            )));
        }

        let markers = Self::collect_markers(&tokens);
        Ok(Self {
            sql,
            tokens,
            index: 0,
            database_type,
            markers,
            subqueries: Vec::new(),
        })
    }

    /// Every parameter marker in order of appearance. `?` markers count up
    /// from zero, numbered markers (`$1`, `?2`, `:3`) use their number.
    fn collect_markers(tokens: &[SpannedToken]) -> Vec<ParameterMarker> {
        let mut positional = 0;
        tokens
            .iter()
            .filter_map(|t| match &t.token {
                Token::Placeholder(marker) => {
                    let numbered = marker
                        .get(1..)
                        .and_then(|n| n.parse::<usize>().ok())
                        .filter(|n| *n > 0);
                    let index = match numbered {
                        Some(n) if marker != "?" => n - 1,
                        _ => {
                            positional += 1;
                            positional - 1
                        }
                    };
                    Some(ParameterMarker {
                        index,
                        marker: marker.clone(),
                        span: t.span,
                    })
                }
                _ => None,
            })
            .collect()
    }

    fn parse_statement(&mut self) -> Result<SqlStatement> {
        let statement = if self.parse_keyword("SELECT") {
            SqlStatement::Select(self.parse_select_body()?)
        } else if self.parse_keyword("INSERT") || self.parse_keyword("REPLACE") {
            self.parse_insert()?
        } else if self.parse_keyword("UPDATE") {
            SqlStatement::Update(self.parse_update()?)
        } else if self.parse_keyword("DELETE") {
            SqlStatement::Delete(self.parse_delete()?)
        } else if self.peek_create_table() {
            SqlStatement::CreateTable(self.parse_create_table()?)
        } else if self.parse_keyword_seq(&["ALTER", "TABLE"]) {
            SqlStatement::AlterTable(self.parse_alter_table()?)
        } else {
            trace!("statement left unparsed: {}", self.sql.trim());
            SqlStatement::Other
        };
        Ok(statement)
    }

    // --- token access ---

    fn peek(&self) -> Option<&SpannedToken> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&SpannedToken> {
        self.tokens
            .get(self.index + n)
            .filter(|t| !matches!(t.token, Token::SemiColon))
    }

    fn next_token(&mut self) -> Option<SpannedToken> {
        let token = self.peek()?.clone();
        self.index += 1;
        Some(token)
    }

    fn is_statement_end(&self) -> bool {
        self.peek().is_none()
    }

    /// End offset of the token consumed last.
    fn previous_end(&self) -> usize {
        self.index
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span.end())
            .unwrap_or(0)
    }

    fn current_start(&self) -> usize {
        self.peek().map(|t| t.span.start()).unwrap_or(self.sql.len())
    }

    fn error(&self, expected: &str) -> EncryptError {
        let found = self
            .peek()
            .map(|t| t.token.to_string())
            .unwrap_or_else(|| "end of statement".to_string());
        EncryptError::Parse(format!(
            "expected {expected}, found {found} at offset {}",
            self.current_start()
        ))
    }

    // --- keywords ---

    fn peek_keyword_nth(&self, n: usize, keyword: &str) -> bool {
        matches!(
            self.peek_nth(n).map(|t| &t.token),
            Some(Token::Word(w)) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword)
        )
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek_keyword_nth(0, keyword)
    }

    fn peek_any_keyword(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.peek_keyword(k))
    }

    fn parse_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    /// Consume the whole sequence or nothing.
    fn parse_keyword_seq(&mut self, keywords: &[&str]) -> bool {
        if keywords
            .iter()
            .enumerate()
            .all(|(n, k)| self.peek_keyword_nth(n, k))
        {
            self.index += keywords.len();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.parse_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(keyword))
        }
    }

    fn consume_token(&mut self, expected: &Token) -> bool {
        if self.peek().is_some_and(|t| &t.token == expected) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(t) if &t.token == expected => {
                let span = t.span;
                self.index += 1;
                Ok(span)
            }
            _ => Err(self.error(&expected.to_string())),
        }
    }

    fn peek_token_is(&self, expected: &Token) -> bool {
        self.peek().is_some_and(|t| &t.token == expected)
    }

    // --- identifiers and names ---

    fn peek_word(&self) -> bool {
        matches!(self.peek().map(|t| &t.token), Some(Token::Word(_)))
    }

    fn parse_identifier(&mut self) -> Result<Identifier> {
        match self.peek() {
            Some(SpannedToken {
                token: Token::Word(w),
                span,
            }) => {
                let ident = Identifier {
                    value: w.value.clone(),
                    quote: w.quote_style,
                    span: *span,
                };
                self.index += 1;
                Ok(ident)
            }
            _ => Err(self.error("identifier")),
        }
    }

    /// `[catalog.][schema.]name`, returning the last part and the span of
    /// the whole name.
    fn parse_object_name(&mut self) -> Result<(Identifier, Span)> {
        let first = self.parse_identifier()?;
        let start = first.span;
        let mut name = first;
        while self.peek_token_is(&Token::Period)
            && matches!(self.peek_nth(1).map(|t| &t.token), Some(Token::Word(_)))
        {
            self.index += 1;
            name = self.parse_identifier()?;
        }
        let span = start.cover(&name.span);
        Ok((name, span))
    }

    /// `AS alias` or a bare alias that is not a clause keyword.
    fn parse_optional_alias(&mut self) -> Result<Option<Identifier>> {
        if self.parse_keyword("AS") {
            return self.parse_identifier().map(Some);
        }
        match self.peek().map(|t| &t.token) {
            Some(Token::Word(w))
                if w.quote_style.is_some()
                    || !RESERVED.iter().any(|r| w.value.eq_ignore_ascii_case(r)) =>
            {
                self.parse_identifier().map(Some)
            }
            _ => Ok(None),
        }
    }

    /// A single table reference: `name [AS] [alias]`.
    fn parse_table_segment(&mut self) -> Result<TableSegment> {
        let (name, span) = self.parse_object_name()?;
        let alias = self.parse_optional_alias()?;
        let span = match &alias {
            Some(alias) => span.cover(&alias.span),
            None => span,
        };
        Ok(TableSegment { name, alias, span })
    }

    // --- skipping ---

    /// Consume a balanced `( ... )`, returning its span.
    fn skip_parenthesized(&mut self) -> Result<Span> {
        let open = self.expect_token(&Token::LParen)?;
        let mut depth = 1usize;
        while let Some(token) = self.next_token() {
            match token.token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(open.cover(&token.span));
                    }
                }
                _ => {}
            }
        }
        Err(self.error(")"))
    }

    fn peek_subquery(&self) -> bool {
        self.peek_token_is(&Token::LParen) && self.peek_keyword_nth(1, "SELECT")
    }

    fn peek_on_duplicate_key_update(&self) -> bool {
        self.peek_keyword("ON") && self.peek_keyword_nth(1, "DUPLICATE")
    }

    fn slice(&self, span: Span) -> &'a str {
        span.slice(self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        statement::{
            AlterTableAction, ExpressionSegment, InsertSource, PredicateOperator, ProjectionSegment,
        },
        value::SqlValue,
    };

    fn parse_mysql(sql: &str) -> StatementContext {
        parse(sql, DatabaseType::MySql).unwrap()
    }

    #[test]
    fn test_offsets_follow_multibyte_text() {
        let sql = "SELECT pwd FROM t_encrypt WHERE name = 'é' AND\n  pwd = 'x'";
        let context = parse_mysql(sql);
        let predicates = context.predicates();
        assert_eq!(predicates.len(), 2);
        assert_eq!(predicates[1].column.span.slice(sql), "pwd");
        assert_eq!(predicates[1].operands[0].span().slice(sql), "'x'");
        assert_eq!(predicates[0].operands[0].span().slice(sql), "'é'");
    }

    #[test]
    fn test_dollar_marker_outside_postgres_is_error() {
        let err = parse("INSERT INTO t (id, a) VALUES ($1, $2)", DatabaseType::MySql).unwrap_err();
        assert!(matches!(err, EncryptError::Parse(m) if m.contains("$1")));
        assert!(parse("SELECT a FROM t WHERE b = $1", DatabaseType::Oracle).is_err());
        assert!(parse("SELECT a FROM t WHERE b = $1", DatabaseType::PostgreSql).is_ok());
        // Inside a string it is just text.
        assert!(parse("SELECT a FROM t WHERE b = '$1'", DatabaseType::MySql).is_ok());
    }

    #[test]
    fn test_parameter_markers_numbered() {
        let context = parse_mysql("UPDATE t SET a = ?, b = ? WHERE c = ?");
        let indexes: Vec<_> = context.parameter_markers.iter().map(|m| m.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);

        let context = parse("UPDATE t SET a = $2 WHERE c = $1", DatabaseType::PostgreSql).unwrap();
        let indexes: Vec<_> = context.parameter_markers.iter().map(|m| m.index).collect();
        assert_eq!(indexes, vec![1, 0]);
        assert!(context.uses_numbered_parameters());
    }

    #[test]
    fn test_select_projections_and_aliases() {
        let sql = "SELECT u.pwd AS p, phone tel, *, o.*, COUNT(id) AS n \
                   FROM t_encrypt u JOIN t_order o ON u.id = o.user_id";
        let context = parse_mysql(sql);
        let select = context.select().unwrap();
        assert_eq!(select.projections.len(), 5);
        match &select.projections[0] {
            ProjectionSegment::Column { column, alias, span } => {
                assert_eq!(column.owner.as_ref().unwrap().value, "u");
                assert_eq!(alias.as_ref().unwrap().value, "p");
                assert_eq!(span.slice(sql), "u.pwd AS p");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            &select.projections[1],
            ProjectionSegment::Column { alias: Some(a), .. } if a.value == "tel"
        ));
        assert!(matches!(
            &select.projections[2],
            ProjectionSegment::Shorthand { owner: None, .. }
        ));
        assert!(matches!(
            &select.projections[3],
            ProjectionSegment::Shorthand { owner: Some(o), .. } if o.value == "o"
        ));
        assert!(matches!(
            &select.projections[4],
            ProjectionSegment::Expression { alias: Some(a), .. } if a.value == "n"
        ));

        assert_eq!(select.tables.len(), 2);
        assert_eq!(select.tables[1].alias.as_ref().unwrap().value, "o");
        assert_eq!(select.predicates.len(), 0);
    }

    #[test]
    fn test_where_condition_tree() {
        let sql = "SELECT id FROM t WHERE (a = 1 OR NOT b <> 'x') AND c IN (?, -2) \
                   AND d BETWEEN 1 AND ? AND e LIKE 'y%' AND f IS NULL AND g = h";
        let context = parse_mysql(sql);
        let ops: Vec<_> = context
            .predicates()
            .iter()
            .map(|p| (p.column.name.value.as_str(), p.operator))
            .collect();
        assert_eq!(
            ops,
            vec![
                ("a", PredicateOperator::Equal),
                ("b", PredicateOperator::NotEqual),
                ("c", PredicateOperator::In),
                ("d", PredicateOperator::Between),
                ("e", PredicateOperator::Like),
                ("g", PredicateOperator::Equal),
            ]
        );
        let in_operands = &context.predicates()[2].operands;
        assert!(matches!(in_operands[0], ExpressionSegment::Parameter(_)));
        assert!(matches!(
            &in_operands[1],
            ExpressionSegment::Literal { value: SqlValue::Integer(-2), span }
                if span.slice(sql) == "-2"
        ));
        let between = &context.predicates()[3].operands;
        assert_eq!(between.len(), 2);
        assert!(matches!(between[1], ExpressionSegment::Parameter(_)));
        assert!(matches!(context.predicates()[5].operands[0], ExpressionSegment::Column(_)));
    }

    #[test]
    fn test_insert_values_rows() {
        let sql = "INSERT INTO t_encrypt (id, pwd) VALUES (1, 'a'), (2, NULL) \
                   ON DUPLICATE KEY UPDATE pwd = VALUES(pwd)";
        let context = parse_mysql(sql);
        let SqlStatement::Insert(insert) = &context.statement else {
            panic!("not an insert");
        };
        let columns = insert.columns.as_ref().unwrap();
        assert_eq!(columns.span.slice(sql), "(id, pwd)");
        let rows = insert.values().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].span.slice(sql), "(2, NULL)");
        assert!(matches!(
            rows[1].values[1],
            ExpressionSegment::Literal { value: SqlValue::Null, .. }
        ));
        assert!(matches!(
            insert.on_duplicate_key_update[0].value,
            ExpressionSegment::InsertValueReference { .. }
        ));
    }

    #[test]
    fn test_insert_select_source() {
        let context = parse_mysql("INSERT INTO t (a) SELECT b FROM s WHERE c = 1");
        let SqlStatement::Insert(insert) = &context.statement else {
            panic!("not an insert");
        };
        assert!(matches!(insert.source, InsertSource::Select(_)));
        assert_eq!(context.predicates().len(), 1);
        assert_eq!(context.query_tables()[0].name.value, "s");
    }

    #[test]
    fn test_create_table_definitions() {
        let sql = "CREATE TABLE IF NOT EXISTS t (id INT UNSIGNED NOT NULL, \
                   v DECIMAL(10, 2) DEFAULT 0, CONSTRAINT pk PRIMARY KEY (id, v(4)))";
        let context = parse_mysql(sql);
        let SqlStatement::CreateTable(create) = &context.statement else {
            panic!("not a create table");
        };
        let id = &create.column_definitions[0];
        assert_eq!(id.data_type, "INT UNSIGNED");
        assert_eq!(id.tail, "NOT NULL");
        assert!(id.not_null);
        let v = &create.column_definitions[1];
        assert_eq!(v.data_type, "DECIMAL(10, 2)");
        assert_eq!(v.tail, "DEFAULT 0");
        assert!(!v.not_null);
        let names: Vec<_> = create.constraints[0]
            .columns
            .iter()
            .map(|c| c.value.as_str())
            .collect();
        assert_eq!(names, vec!["id", "v"]);
    }

    #[test]
    fn test_alter_table_actions() {
        let sql = "ALTER TABLE t ADD COLUMN a INT, MODIFY b TEXT, CHANGE c d INT, DROP COLUMN e, \
                   RENAME COLUMN f TO g, ADD INDEX idx (a)";
        let context = parse_mysql(sql);
        let SqlStatement::AlterTable(alter) = &context.statement else {
            panic!("not an alter table");
        };
        assert_eq!(alter.actions.len(), 5);
        assert!(matches!(
            &alter.actions[0],
            AlterTableAction::Add { keyword, .. } if keyword == "ADD COLUMN"
        ));
        assert!(matches!(
            &alter.actions[1],
            AlterTableAction::Modify { keyword, .. } if keyword == "MODIFY"
        ));
        assert!(matches!(
            &alter.actions[2],
            AlterTableAction::Change { previous, .. } if previous.value == "c"
        ));
        assert!(matches!(
            &alter.actions[3],
            AlterTableAction::Drop { columns, .. } if columns.len() == 1
        ));
        assert!(matches!(
            &alter.actions[4],
            AlterTableAction::Rename { next, .. } if next.value == "g"
        ));
        assert_eq!(alter.actions[3].span().slice(sql), "DROP COLUMN e");
    }

    #[test]
    fn test_sql_server_drop_list() {
        let sql = "ALTER TABLE t DROP COLUMN [a], b";
        let context = parse(sql, DatabaseType::SqlServer).unwrap();
        let SqlStatement::AlterTable(alter) = &context.statement else {
            panic!("not an alter table");
        };
        let AlterTableAction::Drop { columns, span } = &alter.actions[0] else {
            panic!("not a drop");
        };
        assert_eq!(columns[0].quote, Some('['));
        assert_eq!(columns.len(), 2);
        assert_eq!(span.slice(sql), "DROP COLUMN [a], b");
    }

    #[test]
    fn test_unrecognised_statement() {
        assert_eq!(parse_mysql("SHOW TABLES").statement, SqlStatement::Other);
        assert_eq!(parse_mysql("CREATE INDEX i ON t (a)").statement, SqlStatement::Other);
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(parse("SELECT 'abc", DatabaseType::MySql).is_err());
    }
}
