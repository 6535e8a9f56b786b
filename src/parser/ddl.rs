use sqlparser::tokenizer::Token;

use super::StatementParser;
use crate::{
    error::Result,
    statement::{
        AlterTableAction, AlterTableStatement, ColumnDefinitionSegment, CreateTableStatement,
        Identifier, Span, TableConstraintSegment, TableSegment,
    },
};

const CONSTRAINT_START: &[&str] = &[
    "CONSTRAINT", "PRIMARY", "UNIQUE", "KEY", "INDEX", "FOREIGN", "FULLTEXT", "SPATIAL", "CHECK",
    "EXCLUDE", "LIKE", "PERIOD",
];

/// Words that can follow the first word of a data type.
const TYPE_SUFFIXES: &[&str] = &["UNSIGNED", "SIGNED", "ZEROFILL", "PRECISION", "VARYING"];

const ALTER_ACTIONS: &[&str] = &[
    "ADD",
    "ALTER",
    "CHANGE",
    "DROP",
    "MODIFY",
    "RENAME",
    "ALGORITHM",
    "LOCK",
];

impl StatementParser<'_> {
    pub(super) fn peek_create_table(&self) -> bool {
        if !self.peek_keyword("CREATE") {
            return false;
        }
        let mut n = 1;
        while ["GLOBAL", "LOCAL", "TEMPORARY", "TEMP"]
            .iter()
            .any(|k| self.peek_keyword_nth(n, k))
        {
            n += 1;
        }
        self.peek_keyword_nth(n, "TABLE")
    }

    pub(super) fn parse_create_table(&mut self) -> Result<CreateTableStatement> {
        while !self.parse_keyword("TABLE") {
            self.next_token().ok_or_else(|| self.error("TABLE"))?;
        }
        self.parse_keyword_seq(&["IF", "NOT", "EXISTS"]);
        let (name, span) = self.parse_object_name()?;
        let table = TableSegment { name, alias: None, span };

        let mut column_definitions = Vec::new();
        let mut constraints = Vec::new();
        // CREATE TABLE ... AS SELECT and CREATE TABLE ... LIKE carry no definitions.
        if !self.consume_token(&Token::LParen) {
            return Ok(CreateTableStatement {
                table,
                column_definitions,
                constraints,
            });
        }

        loop {
            if self.peek_any_keyword(CONSTRAINT_START) {
                constraints.extend(self.parse_table_constraint()?);
            } else {
                column_definitions.push(self.parse_column_definition()?);
            }
            if !self.consume_token(&Token::Comma) {
                break;
            }
        }
        self.expect_token(&Token::RParen)?;

        Ok(CreateTableStatement {
            table,
            column_definitions,
            constraints,
        })
    }

    /// Table-level constraint. Only the first column list belongs to the
    /// table being defined; `REFERENCES other (...)` and CHECK expressions
    /// name no columns of it.
    fn parse_table_constraint(&mut self) -> Result<Option<TableConstraintSegment>> {
        let start = self.current_start();
        let mut check = false;
        while !self.peek_token_is(&Token::LParen) && !self.at_element_end() {
            check |= self.peek_keyword("CHECK");
            self.index += 1;
        }
        if check || !self.peek_token_is(&Token::LParen) {
            self.skip_expression(&[])?;
            return Ok(None);
        }

        self.index += 1;
        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_identifier()?);
            // Prefix lengths and ordering: `col(10) DESC`.
            self.skip_expression(&[])?;
            if !self.consume_token(&Token::Comma) {
                break;
            }
        }
        self.expect_token(&Token::RParen)?;
        self.skip_expression(&[])?;

        Ok(Some(TableConstraintSegment {
            columns,
            span: Span::from_range(start, self.previous_end()),
        }))
    }

    fn at_element_end(&self) -> bool {
        self.is_statement_end()
            || self.peek_token_is(&Token::Comma)
            || self.peek_token_is(&Token::RParen)
    }

    /// `name type [attributes...]` up to the next top-level comma or the
    /// closing parenthesis of the element list.
    pub(super) fn parse_column_definition(&mut self) -> Result<ColumnDefinitionSegment> {
        let column = self.parse_identifier()?;

        let type_start = self.current_start();
        self.parse_identifier()?;
        loop {
            if self.peek_token_is(&Token::LParen) {
                self.skip_parenthesized()?;
            } else if self.peek_any_keyword(TYPE_SUFFIXES) {
                self.index += 1;
            } else if self.peek_any_keyword(&["WITH", "WITHOUT"])
                && self.peek_keyword_nth(1, "TIME")
                && self.peek_keyword_nth(2, "ZONE")
            {
                self.index += 3;
            } else if self.peek_token_is(&Token::LBracket)
                && self.peek_nth(1).is_some_and(|t| t.token == Token::RBracket)
            {
                self.index += 2;
            } else {
                break;
            }
        }
        let type_end = self.previous_end();

        let mut not_null = false;
        let mut depth = 0usize;
        while depth > 0 || !self.at_element_end() {
            if depth == 0 && self.peek_keyword("NOT") && self.peek_keyword_nth(1, "NULL") {
                not_null = true;
            }
            let Some(token) = self.next_token() else {
                break;
            };
            match token.token {
                Token::LParen => depth += 1,
                Token::RParen => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        let end = self.previous_end();

        Ok(ColumnDefinitionSegment {
            data_type: self.slice(Span::from_range(type_start, type_end)).to_string(),
            tail: self.slice(Span::from_range(type_end, end)).trim().to_string(),
            not_null,
            span: Span::from_range(column.span.start(), end),
            column,
        })
    }

    /// Everything after ALTER TABLE. Actions that do not touch columns are
    /// skipped.
    pub(super) fn parse_alter_table(&mut self) -> Result<AlterTableStatement> {
        self.parse_keyword_seq(&["IF", "EXISTS"]);
        self.parse_keyword("ONLY");
        let (name, span) = self.parse_object_name()?;
        let table = TableSegment { name, alias: None, span };

        let mut actions = Vec::new();
        while !self.is_statement_end() {
            actions.extend(self.parse_alter_action()?);
            if !self.consume_token(&Token::Comma) {
                break;
            }
        }
        Ok(AlterTableStatement { table, actions })
    }

    /// The action keywords as written, single-spaced.
    fn keyword_text(&self, from: usize) -> String {
        self.tokens[from..self.index]
            .iter()
            .map(|t| self.slice(t.span))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn parse_alter_action(&mut self) -> Result<Option<AlterTableAction>> {
        let from = self.index;
        let start = self.current_start();

        let is_add = self.peek_keyword("ADD");
        if self.parse_keyword("ADD") || self.parse_keyword("MODIFY") {
            self.parse_keyword("COLUMN");
            let keyword = self.keyword_text(from);
            if self.peek_any_keyword(CONSTRAINT_START) || self.peek_token_is(&Token::LParen) {
                self.skip_expression(&[])?;
                return Ok(None);
            }
            self.parse_keyword_seq(&["IF", "NOT", "EXISTS"]);
            let definition = self.parse_column_definition()?;
            let span = Span::from_range(start, self.previous_end());
            return Ok(Some(if is_add {
                AlterTableAction::Add { keyword, definition, span }
            } else {
                AlterTableAction::Modify { keyword, definition, span }
            }));
        }

        if self.parse_keyword("CHANGE") {
            self.parse_keyword("COLUMN");
            let keyword = self.keyword_text(from);
            let previous = self.parse_identifier()?;
            let definition = self.parse_column_definition()?;
            return Ok(Some(AlterTableAction::Change {
                keyword,
                previous,
                definition,
                span: Span::from_range(start, self.previous_end()),
            }));
        }

        if self.parse_keyword("DROP") {
            return self.parse_drop_columns().map(|columns| {
                columns.map(|columns| AlterTableAction::Drop {
                    columns,
                    span: Span::from_range(start, self.previous_end()),
                })
            });
        }

        if self.parse_keyword_seq(&["RENAME", "COLUMN"]) {
            let previous = self.parse_identifier()?;
            self.expect_keyword("TO")?;
            let next = self.parse_identifier()?;
            return Ok(Some(AlterTableAction::Rename {
                previous,
                next,
                span: Span::from_range(start, self.previous_end()),
            }));
        }

        self.skip_expression(&[])?;
        Ok(None)
    }

    /// Columns named by a DROP action: `DROP [COLUMN] a`, SQL Server's
    /// `DROP COLUMN a, b` and Oracle's `DROP (a, b)`. `None` for drops of
    /// keys, indexes and constraints.
    fn parse_drop_columns(&mut self) -> Result<Option<Vec<Identifier>>> {
        if self.consume_token(&Token::LParen) {
            let mut columns = Vec::new();
            loop {
                columns.push(self.parse_identifier()?);
                if !self.consume_token(&Token::Comma) {
                    break;
                }
            }
            self.expect_token(&Token::RParen)?;
            return Ok(Some(columns));
        }
        if self.peek_any_keyword(CONSTRAINT_START) || self.peek_keyword("PARTITION") {
            self.skip_expression(&[])?;
            return Ok(None);
        }

        self.parse_keyword("COLUMN");
        self.parse_keyword_seq(&["IF", "EXISTS"]);
        let mut columns = vec![self.parse_identifier()?];
        while self.peek_token_is(&Token::Comma)
            && matches!(self.peek_nth(1).map(|t| &t.token), Some(Token::Word(_)))
            && !ALTER_ACTIONS.iter().any(|k| self.peek_keyword_nth(1, k))
        {
            self.index += 1;
            columns.push(self.parse_identifier()?);
        }
        // CASCADE / RESTRICT
        while self.peek_any_keyword(&["CASCADE", "RESTRICT"]) {
            self.index += 1;
        }
        Ok(Some(columns))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::DatabaseType,
        parser::parse,
        statement::{AlterTableAction, SqlStatement},
    };

    #[test]
    fn test_oracle_drop_list() {
        let sql = "ALTER TABLE t DROP (a, b)";
        let context = parse(sql, DatabaseType::Oracle).unwrap();
        let SqlStatement::AlterTable(alter) = &context.statement else {
            panic!("not an alter table");
        };
        let AlterTableAction::Drop { columns, span } = &alter.actions[0] else {
            panic!("not a drop");
        };
        assert_eq!(columns.len(), 2);
        assert_eq!(span.slice(sql), "DROP (a, b)");
    }

    #[test]
    fn test_check_constraint_names_no_columns() {
        let context = parse(
            "CREATE TABLE t (a INT CHECK (a > 0), b INT, CONSTRAINT c CHECK (b > a), \
             FOREIGN KEY (b) REFERENCES o (id))",
            DatabaseType::MySql,
        )
        .unwrap();
        let SqlStatement::CreateTable(create) = &context.statement else {
            panic!("not a create table");
        };
        assert_eq!(create.column_definitions.len(), 2);
        assert_eq!(create.column_definitions[0].tail, "CHECK (a > 0)");
        assert_eq!(create.constraints.len(), 1);
        assert_eq!(create.constraints[0].columns[0].value, "b");
    }

    #[test]
    fn test_create_table_as_select() {
        let context = parse("CREATE TABLE t AS SELECT * FROM s", DatabaseType::MySql).unwrap();
        let SqlStatement::CreateTable(create) = &context.statement else {
            panic!("not a create table");
        };
        assert!(create.column_definitions.is_empty());
    }
}
