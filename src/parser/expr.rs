use sqlparser::tokenizer::Token;

use super::StatementParser;
use crate::{
    config::DatabaseType,
    error::Result,
    statement::{
        ColumnSegment, ExpressionSegment, PredicateOperator, PredicateSegment, Span, SubqueryKind,
    },
    value::SqlValue,
};

/// Keywords that end a condition or an expression at nesting depth zero.
pub(super) const CLAUSE_END: &[&str] = &[
    "CROSS", "EXCEPT", "FETCH", "FOR", "FROM", "FULL", "GROUP", "HAVING", "INNER", "INTERSECT",
    "JOIN", "LEFT", "LIMIT", "LOCK", "NATURAL", "OFFSET", "ON", "ORDER", "RETURNING", "RIGHT",
    "SET", "STRAIGHT_JOIN", "UNION", "USING", "WHERE", "WINDOW",
];

const CONDITION_STOPS: &[&str] = &["AND", "OR", "XOR"];

impl StatementParser<'_> {
    /// `[owner.]name`, not followed by `(` (that would be a function call).
    /// Restores the position and returns `None` when the tokens do not form
    /// a column reference.
    pub(super) fn try_parse_column(&mut self) -> Option<ColumnSegment> {
        let start = self.index;
        let column = self.parse_column_ref();
        match column {
            Some(column)
                if !self.peek_token_is(&Token::LParen) && !self.peek_token_is(&Token::Period) =>
            {
                Some(column)
            }
            _ => {
                self.index = start;
                None
            }
        }
    }

    fn parse_column_ref(&mut self) -> Option<ColumnSegment> {
        if !self.peek_word() {
            return None;
        }
        let mut parts = vec![self.parse_identifier().ok()?];
        while self.peek_token_is(&Token::Period)
            && matches!(self.peek_nth(1).map(|t| &t.token), Some(Token::Word(_)))
        {
            self.index += 1;
            parts.push(self.parse_identifier().ok()?);
        }
        let name = parts.pop()?;
        let owner = parts.pop();
        let span = parts
            .first()
            .or(owner.as_ref())
            .map(|first| first.span.cover(&name.span))
            .unwrap_or(name.span);
        Some(ColumnSegment { owner, name, span })
    }

    fn literal(&self, token: &Token) -> Option<SqlValue> {
        match token {
            Token::SingleQuotedString(s) | Token::NationalStringLiteral(s) => {
                Some(SqlValue::Text(s.clone()))
            }
            Token::DoubleQuotedString(s) if self.database_type == DatabaseType::MySql => {
                Some(SqlValue::Text(s.clone()))
            }
            Token::Number(n, _) => Some(number(n, false)),
            Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case("NULL") => {
                Some(SqlValue::Null)
            }
            _ => None,
        }
    }

    /// One operand: literal, parameter, column, `VALUES(col)`, or a single
    /// opaque term (function call, parenthesized expression or subquery,
    /// other token).
    pub(super) fn parse_operand(&mut self) -> Result<ExpressionSegment> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("expression"));
        };

        if let Some(value) = self.literal(&token.token) {
            self.index += 1;
            return Ok(ExpressionSegment::Literal { value, span: token.span });
        }

        match &token.token {
            Token::Placeholder(_) => {
                self.index += 1;
                if let Some(marker) = self.markers.iter().find(|m| m.span == token.span) {
                    return Ok(ExpressionSegment::Parameter(marker.clone()));
                }
                Ok(self.other(token.span))
            }
            Token::Minus => {
                if let Some(Token::Number(n, _)) = self.peek_nth(1).map(|t| &t.token) {
                    let value = number(n, true);
                    self.index += 2;
                    let span = Span::from_range(token.span.start(), self.previous_end());
                    return Ok(ExpressionSegment::Literal { value, span });
                }
                self.index += 1;
                Ok(self.other(token.span))
            }
            Token::LParen => {
                let span = if self.peek_subquery() {
                    self.parse_subquery(SubqueryKind::Expression)?
                } else {
                    self.skip_parenthesized()?
                };
                Ok(self.other(span))
            }
            Token::Word(w)
                if w.quote_style.is_none()
                    && (w.value.eq_ignore_ascii_case("VALUES")
                        || w.value.eq_ignore_ascii_case("VALUE"))
                    && self.peek_nth(1).is_some_and(|t| t.token == Token::LParen) =>
            {
                let start = self.index;
                self.index += 2;
                if let Some(column) = self.try_parse_column() {
                    if let Ok(close) = self.expect_token(&Token::RParen) {
                        return Ok(ExpressionSegment::InsertValueReference {
                            column,
                            span: token.span.cover(&close),
                        });
                    }
                }
                self.index = start + 1;
                let span = token.span.cover(&self.skip_parenthesized()?);
                Ok(self.other(span))
            }
            Token::Word(_) => {
                if let Some(column) = self.try_parse_column() {
                    return Ok(ExpressionSegment::Column(column));
                }
                // Function call, possibly qualified.
                self.index += 1;
                while self.peek_token_is(&Token::Period) && self.peek_nth(1).is_some() {
                    self.index += 2;
                }
                if self.peek_token_is(&Token::LParen) {
                    self.skip_parenthesized()?;
                }
                Ok(self.other(Span::from_range(token.span.start(), self.previous_end())))
            }
            _ => {
                self.index += 1;
                Ok(self.other(token.span))
            }
        }
    }

    fn other(&self, span: Span) -> ExpressionSegment {
        ExpressionSegment::Other {
            text: self.slice(span).to_string(),
            span,
        }
    }

    fn at_expression_end(&self, stops: &[&str]) -> bool {
        match self.peek().map(|t| &t.token) {
            None | Some(Token::Comma) | Some(Token::RParen) => true,
            Some(Token::Word(w)) if w.quote_style.is_none() => {
                stops.iter().any(|s| w.value.eq_ignore_ascii_case(s))
            }
            _ => false,
        }
    }

    /// A full expression up to a comma, a closing parenthesis, or one of
    /// `stops`. Anything more than a single operand is [`ExpressionSegment::Other`].
    pub(super) fn parse_expression(&mut self, stops: &[&str]) -> Result<ExpressionSegment> {
        let operand = self.parse_operand()?;
        if self.at_expression_end(stops) {
            return Ok(operand);
        }
        let start = operand.span().start();
        self.skip_expression(stops)?;
        let span = Span::from_range(start, self.previous_end());
        Ok(self.other(span))
    }

    /// Skip tokens up to a comma, closing parenthesis, or stop keyword at
    /// depth zero. `BETWEEN x AND y` and `CASE ... END` are kept whole.
    /// Subqueries on the way are parsed, not skipped.
    pub(super) fn skip_expression(&mut self, stops: &[&str]) -> Result<()> {
        let mut depth = 0usize;
        let mut between = false;
        loop {
            if depth == 0 {
                if between && self.peek_keyword("AND") {
                    between = false;
                    self.index += 1;
                    continue;
                }
                if self.at_expression_end(stops) {
                    break;
                }
            }
            if self.peek_subquery() {
                self.parse_subquery(SubqueryKind::Expression)?;
                continue;
            }
            let Some(token) = self.next_token() else {
                break;
            };
            match &token.token {
                Token::LParen => depth += 1,
                Token::RParen => depth = depth.saturating_sub(1),
                Token::Word(w) if w.quote_style.is_none() => {
                    match w.value.to_ascii_uppercase().as_str() {
                        "CASE" => depth += 1,
                        "END" => depth = depth.saturating_sub(1),
                        "BETWEEN" if depth == 0 => between = true,
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// A boolean condition: terms joined by AND / OR / XOR. Recognised
    /// predicates are appended to `predicates`; `stops` end the condition.
    pub(super) fn parse_condition(
        &mut self,
        predicates: &mut Vec<PredicateSegment>,
        stops: &[&str],
    ) -> Result<()> {
        loop {
            self.parse_condition_term(predicates, stops)?;
            if !CONDITION_STOPS.iter().any(|k| self.parse_keyword(k)) {
                return Ok(());
            }
        }
    }

    fn parse_condition_term(
        &mut self,
        predicates: &mut Vec<PredicateSegment>,
        stops: &[&str],
    ) -> Result<()> {
        let all_stops: Vec<&str> = stops.iter().chain(CONDITION_STOPS).copied().collect();

        if self.parse_keyword("NOT") {
            return self.parse_condition_term(predicates, stops);
        }
        if self.parse_keyword("EXISTS") {
            if self.peek_subquery() {
                self.parse_subquery(SubqueryKind::Exists)?;
            } else {
                self.skip_parenthesized()?;
            }
            return Ok(());
        }
        if self.peek_token_is(&Token::LParen) {
            if self.peek_subquery() {
                self.parse_subquery(SubqueryKind::Expression)?;
            } else {
                self.index += 1;
                self.parse_condition(predicates, &[])?;
                // Row constructors and arithmetic inside the parentheses
                // are not conditions; skip whatever is left of them.
                while !self.consume_token(&Token::RParen) {
                    if self.is_statement_end() {
                        return Err(self.error(")"));
                    }
                    self.skip_expression(&[])?;
                    self.consume_token(&Token::Comma);
                }
            }
            if !self.at_expression_end(&all_stops) {
                self.skip_expression(&all_stops)?;
            }
            return Ok(());
        }

        if let Some(predicate) = self.try_parse_predicate(&all_stops)? {
            predicates.push(predicate);
            return Ok(());
        }
        if self.at_expression_end(&all_stops) {
            return Err(self.error("condition"));
        }
        self.skip_expression(&all_stops)
    }

    fn parse_predicate_operator(&mut self) -> Option<PredicateOperator> {
        let operator = match self.peek().map(|t| &t.token)? {
            Token::Eq | Token::DoubleEq => PredicateOperator::Equal,
            Token::Neq => PredicateOperator::NotEqual,
            Token::Lt => PredicateOperator::Less,
            Token::LtEq => PredicateOperator::LessOrEqual,
            Token::Gt => PredicateOperator::Greater,
            Token::GtEq => PredicateOperator::GreaterOrEqual,
            _ => {
                return if self.parse_keyword("LIKE") {
                    Some(PredicateOperator::Like)
                } else if self.parse_keyword("IN") {
                    Some(PredicateOperator::In)
                } else if self.parse_keyword("BETWEEN") {
                    Some(PredicateOperator::Between)
                } else if self.parse_keyword_seq(&["NOT", "LIKE"]) {
                    Some(PredicateOperator::NotLike)
                } else if self.parse_keyword_seq(&["NOT", "IN"]) {
                    Some(PredicateOperator::NotIn)
                } else if self.parse_keyword_seq(&["NOT", "BETWEEN"]) {
                    Some(PredicateOperator::NotBetween)
                } else {
                    None
                };
            }
        };
        self.index += 1;
        Some(operator)
    }

    /// `column op operand`, `column [NOT] IN (operands)` or
    /// `column [NOT] BETWEEN low AND high`. Restores the position and
    /// returns `None` for any other shape.
    fn try_parse_predicate(&mut self, stops: &[&str]) -> Result<Option<PredicateSegment>> {
        let start = self.index;
        let Some(column) = self.try_parse_column() else {
            return Ok(None);
        };
        let Some(operator) = self.parse_predicate_operator() else {
            self.index = start;
            return Ok(None);
        };

        let operands = if matches!(operator, PredicateOperator::In | PredicateOperator::NotIn) {
            if !self.peek_token_is(&Token::LParen) || self.peek_subquery() {
                self.index = start;
                return Ok(None);
            }
            self.index += 1;
            let mut operands = Vec::new();
            loop {
                operands.push(self.parse_expression(&[])?);
                if !self.consume_token(&Token::Comma) {
                    break;
                }
            }
            self.expect_token(&Token::RParen)?;
            operands
        } else if matches!(operator, PredicateOperator::Between | PredicateOperator::NotBetween) {
            // `stops` holds AND, which ends the lower bound.
            let low = self.parse_expression(stops)?;
            self.expect_keyword("AND")?;
            let high = self.parse_expression(stops)?;
            vec![low, high]
        } else {
            let operand = self.parse_expression(stops)?;
            if self.parse_keyword("ESCAPE") {
                self.next_token();
            }
            vec![operand]
        };

        let span = Span::from_range(column.span.start(), self.previous_end());
        Ok(Some(PredicateSegment {
            column,
            operator,
            operands,
            span,
        }))
    }
}

fn number(text: &str, negative: bool) -> SqlValue {
    let text = if negative { format!("-{text}") } else { text.to_string() };
    match text.parse::<i64>() {
        Ok(n) => SqlValue::Integer(n),
        Err(_) => SqlValue::Number(text),
    }
}
