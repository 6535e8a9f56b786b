use sqlparser::tokenizer::Token;

use super::{StatementParser, expr::CLAUSE_END};
use crate::{
    error::Result,
    statement::{
        PredicateSegment, ProjectionSegment, SelectStatement, Span, SubqueryKind, SubquerySegment,
        TableSegment,
    },
};

const JOIN_PREFIXES: &[&str] = &["INNER", "CROSS", "LEFT", "RIGHT", "FULL", "NATURAL", "OUTER"];

impl StatementParser<'_> {
    /// Everything after the SELECT keyword. Clauses after WHERE (GROUP BY,
    /// ORDER BY, LIMIT, set operations) are not rewritten and are skipped.
    pub(super) fn parse_select_body(&mut self) -> Result<SelectStatement> {
        let enclosing = std::mem::take(&mut self.subqueries);
        if !self.parse_keyword("DISTINCT") && !self.parse_keyword("DISTINCTROW") {
            self.parse_keyword("ALL");
        }
        if self.parse_keyword("TOP") {
            self.parse_operand()?;
        }

        let mut projections = Vec::new();
        loop {
            projections.push(self.parse_projection()?);
            if !self.consume_token(&Token::Comma) {
                break;
            }
        }

        let mut tables = Vec::new();
        let mut predicates = Vec::new();
        if self.parse_keyword("FROM") {
            self.parse_table_references(&mut tables, &mut predicates)?;
        }
        if self.parse_keyword("WHERE") {
            self.parse_condition(&mut predicates, CLAUSE_END)?;
        }
        self.skip_select_tail();

        Ok(SelectStatement {
            projections,
            tables,
            predicates,
            subqueries: std::mem::replace(&mut self.subqueries, enclosing),
        })
    }

    /// Up to the end of the statement, the parenthesis closing a subquery,
    /// or the ON DUPLICATE KEY UPDATE of an INSERT ... SELECT.
    fn skip_select_tail(&mut self) {
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token.token {
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => return,
                Token::RParen => depth -= 1,
                _ if depth == 0 && self.peek_on_duplicate_key_update() => return,
                _ => {}
            }
            self.index += 1;
        }
    }

    /// `( SELECT ... )`, recorded as a subquery of the level being parsed.
    pub(super) fn parse_subquery(&mut self, kind: SubqueryKind) -> Result<Span> {
        let open = self.expect_token(&Token::LParen)?;
        self.expect_keyword("SELECT")?;
        let select = self.parse_select_body()?;
        let close = self.expect_token(&Token::RParen)?;
        let span = open.cover(&close);
        self.subqueries.push(SubquerySegment { kind, select, span });
        Ok(span)
    }

    fn parse_projection(&mut self) -> Result<ProjectionSegment> {
        let Some(first) = self.peek().cloned() else {
            return Err(self.error("projection"));
        };

        if first.token == Token::Mul {
            self.index += 1;
            return Ok(ProjectionSegment::Shorthand {
                owner: None,
                span: first.span,
            });
        }

        // owner.*
        if matches!(first.token, Token::Word(_))
            && self.peek_nth(1).is_some_and(|t| t.token == Token::Period)
            && self.peek_nth(2).is_some_and(|t| t.token == Token::Mul)
        {
            let owner = self.parse_identifier()?;
            self.index += 2;
            return Ok(ProjectionSegment::Shorthand {
                owner: Some(owner),
                span: Span::from_range(first.span.start(), self.previous_end()),
            });
        }

        let start = self.index;
        if let Some(column) = self.try_parse_column() {
            if self.at_projection_end() || self.peek_word() {
                let alias = self.parse_optional_alias()?;
                if self.at_projection_end() {
                    let span = Span::from_range(column.span.start(), self.previous_end());
                    return Ok(ProjectionSegment::Column { column, alias, span });
                }
            }
            self.index = start;
        }

        let mut stops: Vec<&str> = CLAUSE_END.to_vec();
        stops.push("AS");
        self.skip_expression(&stops)?;
        let text_end = self.previous_end();
        let alias = if self.parse_keyword("AS") {
            Some(self.parse_identifier()?)
        } else {
            None
        };
        Ok(ProjectionSegment::Expression {
            text: self.slice(Span::from_range(first.span.start(), text_end)).to_string(),
            alias,
            span: Span::from_range(first.span.start(), self.previous_end()),
        })
    }

    fn at_projection_end(&self) -> bool {
        self.is_statement_end()
            || self.peek_token_is(&Token::Comma)
            || self.peek_token_is(&Token::RParen)
            || self.peek_any_keyword(CLAUSE_END)
    }

    /// FROM list with comma joins and JOIN clauses. Derived tables become
    /// subqueries and do not resolve column owners. ON conditions contribute
    /// predicates.
    pub(super) fn parse_table_references(
        &mut self,
        tables: &mut Vec<TableSegment>,
        predicates: &mut Vec<PredicateSegment>,
    ) -> Result<()> {
        self.parse_table_factor(tables)?;
        loop {
            if self.consume_token(&Token::Comma) {
                self.parse_table_factor(tables)?;
                continue;
            }
            let start = self.index;
            while self.peek_any_keyword(JOIN_PREFIXES) {
                self.index += 1;
            }
            if !(self.parse_keyword("JOIN") || self.parse_keyword("STRAIGHT_JOIN")) {
                self.index = start;
                return Ok(());
            }
            self.parse_table_factor(tables)?;
            if self.parse_keyword("ON") {
                self.parse_condition(predicates, CLAUSE_END)?;
            } else if self.parse_keyword("USING") {
                self.skip_parenthesized()?;
            }
        }
    }

    fn parse_table_factor(&mut self, tables: &mut Vec<TableSegment>) -> Result<()> {
        if self.peek_token_is(&Token::LParen) {
            if self.peek_subquery() {
                self.parse_subquery(SubqueryKind::Derived)?;
            } else {
                self.skip_parenthesized()?;
            }
            self.parse_optional_alias()?;
            return Ok(());
        }
        let table = self.parse_table_segment()?;
        // MySQL index hints.
        while self.peek_any_keyword(&["USE", "FORCE", "IGNORE"])
            && self.peek_keyword_nth(1, "INDEX")
        {
            self.index += 2;
            self.skip_parenthesized()?;
        }
        tables.push(table);
        Ok(())
    }
}
