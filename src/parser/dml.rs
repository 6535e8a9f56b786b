use sqlparser::tokenizer::Token;

use super::{StatementParser, expr::CLAUSE_END};
use crate::{
    error::Result,
    statement::{
        AssignmentSegment, DeleteStatement, InsertColumnsSegment, InsertSource, InsertStatement,
        InsertValuesSegment, Span, SqlStatement, TableSegment, UpdateStatement,
    },
};

const MODIFIERS: &[&str] = &[
    "LOW_PRIORITY",
    "DELAYED",
    "HIGH_PRIORITY",
    "QUICK",
    "IGNORE",
    "ONLY",
];

impl StatementParser<'_> {
    fn skip_modifiers(&mut self) {
        while self.peek_any_keyword(MODIFIERS) {
            self.index += 1;
        }
    }

    /// `column = expression`
    fn parse_assignment(&mut self, stops: &[&str]) -> Result<AssignmentSegment> {
        let column = self.try_parse_column().ok_or_else(|| self.error("column"))?;
        self.expect_token(&Token::Eq)?;
        let value = self.parse_expression(stops)?;
        let span = Span::from_range(column.span.start(), self.previous_end());
        Ok(AssignmentSegment { column, value, span })
    }

    fn parse_assignments(&mut self, stops: &[&str]) -> Result<Vec<AssignmentSegment>> {
        let mut assignments = Vec::new();
        loop {
            assignments.push(self.parse_assignment(stops)?);
            if !self.consume_token(&Token::Comma) {
                return Ok(assignments);
            }
        }
    }

    /// Everything after INSERT (or REPLACE).
    pub(super) fn parse_insert(&mut self) -> Result<SqlStatement> {
        self.skip_modifiers();
        self.parse_keyword("INTO");
        let (name, name_span) = self.parse_object_name()?;
        let alias = if self.parse_keyword("AS") {
            Some(self.parse_identifier()?)
        } else {
            None
        };
        let span = alias.as_ref().map_or(name_span, |a| name_span.cover(&a.span));
        let table = TableSegment { name, alias, span };

        let columns = if self.peek_token_is(&Token::LParen) && !self.peek_subquery() {
            Some(self.parse_insert_columns()?)
        } else {
            None
        };

        let source = if self.parse_keyword("VALUES") || self.parse_keyword("VALUE") {
            let mut rows = Vec::new();
            loop {
                rows.push(self.parse_values_row()?);
                if !self.consume_token(&Token::Comma) {
                    break;
                }
            }
            InsertSource::Values(rows)
        } else if self.parse_keyword_seq(&["DEFAULT", "VALUES"]) {
            InsertSource::Values(Vec::new())
        } else if columns.is_none() && self.parse_keyword("SET") {
            InsertSource::Set(self.parse_assignments(&["ON"])?)
        } else if self.parse_keyword("SELECT") {
            InsertSource::Select(Box::new(self.parse_select_body()?))
        } else if self.peek_subquery() {
            self.index += 2;
            let select = self.parse_select_body()?;
            self.expect_token(&Token::RParen)?;
            InsertSource::Select(Box::new(select))
        } else {
            return Err(self.error("VALUES, SET or SELECT"));
        };

        let on_duplicate_key_update =
            if self.parse_keyword_seq(&["ON", "DUPLICATE", "KEY", "UPDATE"]) {
                self.parse_assignments(&[])?
            } else {
                Vec::new()
            };

        Ok(SqlStatement::Insert(InsertStatement {
            table,
            columns,
            source,
            on_duplicate_key_update,
        }))
    }

    fn parse_insert_columns(&mut self) -> Result<InsertColumnsSegment> {
        let open = self.expect_token(&Token::LParen)?;
        let mut columns = Vec::new();
        if !self.peek_token_is(&Token::RParen) {
            loop {
                columns.push(self.try_parse_column().ok_or_else(|| self.error("column"))?);
                if !self.consume_token(&Token::Comma) {
                    break;
                }
            }
        }
        let close = self.expect_token(&Token::RParen)?;
        Ok(InsertColumnsSegment {
            columns,
            span: open.cover(&close),
        })
    }

    fn parse_values_row(&mut self) -> Result<InsertValuesSegment> {
        let open = self.expect_token(&Token::LParen)?;
        let mut values = Vec::new();
        if !self.peek_token_is(&Token::RParen) {
            loop {
                values.push(self.parse_expression(&[])?);
                if !self.consume_token(&Token::Comma) {
                    break;
                }
            }
        }
        let close = self.expect_token(&Token::RParen)?;
        Ok(InsertValuesSegment {
            values,
            span: open.cover(&close),
        })
    }

    /// Everything after UPDATE.
    pub(super) fn parse_update(&mut self) -> Result<UpdateStatement> {
        let enclosing = std::mem::take(&mut self.subqueries);
        self.skip_modifiers();
        let mut tables = Vec::new();
        let mut predicates = Vec::new();
        self.parse_table_references(&mut tables, &mut predicates)?;
        self.expect_keyword("SET")?;
        let assignments = self.parse_assignments(CLAUSE_END)?;
        if self.parse_keyword("FROM") {
            self.parse_table_references(&mut tables, &mut predicates)?;
        }
        if self.parse_keyword("WHERE") {
            self.parse_condition(&mut predicates, CLAUSE_END)?;
        }
        Ok(UpdateStatement {
            tables,
            assignments,
            predicates,
            subqueries: std::mem::replace(&mut self.subqueries, enclosing),
        })
    }

    /// Everything after DELETE, including the multi-table forms
    /// `DELETE t1 FROM t1 JOIN t2 ...` and `DELETE FROM t1 USING ...`.
    pub(super) fn parse_delete(&mut self) -> Result<DeleteStatement> {
        let enclosing = std::mem::take(&mut self.subqueries);
        self.skip_modifiers();
        if !self.parse_keyword("FROM") {
            let start = self.index;
            while !self.is_statement_end()
                && !self.peek_keyword("FROM")
                && !self.peek_keyword("WHERE")
            {
                self.index += 1;
            }
            if !self.parse_keyword("FROM") {
                self.index = start;
            }
        }

        let mut tables = Vec::new();
        let mut predicates = Vec::new();
        self.parse_table_references(&mut tables, &mut predicates)?;
        if self.parse_keyword("USING") {
            tables.clear();
            self.parse_table_references(&mut tables, &mut predicates)?;
        }
        if self.parse_keyword("WHERE") {
            self.parse_condition(&mut predicates, CLAUSE_END)?;
        }
        Ok(DeleteStatement {
            tables,
            predicates,
            subqueries: std::mem::replace(&mut self.subqueries, enclosing),
        })
    }
}
