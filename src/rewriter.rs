//! Splices generated tokens back into the SQL text and drives a full
//! statement rewrite.

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::{
    builder::TokenGenerateBuilder,
    config::{DatabaseType, EncryptRuleConfig, RewriteOptions},
    error::Result,
    parameter::ParameterRewriter,
    parser,
    result::ResultDecryptor,
    rule::{EncryptRule, RuleHolder},
    schema::SchemaMetaData,
    statement::StatementContext,
    token::SqlToken,
    value::SqlValue,
};

pub(crate) fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

/// Replace each token's span of `sql` with its rendering.
///
/// Tokens are applied in start order. Insertion points sort before a token
/// starting at the same offset. A token overlapping one already applied is
/// dropped.
pub fn apply_tokens(sql: &str, tokens: &[SqlToken]) -> String {
    let mut ordered: Vec<&SqlToken> = tokens.iter().collect();
    ordered.sort_by_key(|t| (t.start(), t.span().end()));

    let mut rewritten = String::with_capacity(sql.len() + 32);
    let mut cursor = 0;
    for token in ordered {
        let span = token.span();
        if span.start() < cursor || span.end() > sql.len() {
            warn!("token at {}..{} overlaps a previous rewrite, skipped", span.start(), span.end());
            continue;
        }
        rewritten.push_str(&sql[cursor..span.start()]);
        rewritten.push_str(&token.render());
        cursor = span.end();
    }
    rewritten.push_str(&sql[cursor..]);
    rewritten
}

/// Output of one rewrite: the SQL to send to the database and the
/// parameters to bind to it.
#[derive(Debug, Clone)]
pub struct RewriteResult {
    pub sql: String,
    pub parameters: Vec<SqlValue>,
    pub statement: StatementContext,
    pub tokens: Vec<SqlToken>,
    rule: Arc<EncryptRule>,
}

impl RewriteResult {
    /// Whether any token changed the statement.
    pub fn is_rewritten(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Rule snapshot the statement was rewritten with.
    pub fn rule(&self) -> &EncryptRule {
        &self.rule
    }
}

/// Rewrites logical SQL against the current encrypt rule.
///
/// The rule can be replaced at any time through [`SqlRewriter::rules`].
/// Each statement uses the snapshot taken when its rewrite started, and the
/// [`RewriteResult`] keeps that snapshot for decrypting the statement's rows.
pub struct SqlRewriter {
    rules: RuleHolder,
    schema: Arc<dyn SchemaMetaData + Send + Sync>,
    options: RewriteOptions,
}

impl SqlRewriter {
    pub fn new(
        rule: EncryptRule,
        schema: Arc<dyn SchemaMetaData + Send + Sync>,
        options: RewriteOptions,
    ) -> Self {
        Self {
            rules: RuleHolder::new(rule),
            schema,
            options,
        }
    }

    /// Build the rule from its serialized form. `query_with_cipher_column`
    /// comes from the configuration.
    pub fn from_config(
        config: EncryptRuleConfig,
        schema: Arc<dyn SchemaMetaData + Send + Sync>,
        database_type: DatabaseType,
    ) -> Result<Self> {
        let options = RewriteOptions {
            database_type,
            query_with_cipher_column: config.query_with_cipher_column,
        };
        Ok(Self::new(EncryptRule::new(config)?, schema, options))
    }

    pub fn rules(&self) -> &RuleHolder {
        &self.rules
    }

    pub fn options(&self) -> RewriteOptions {
        self.options
    }

    pub fn rewrite(&self, sql: &str) -> Result<RewriteResult> {
        self.rewrite_with_parameters(sql, &[])
    }

    pub fn rewrite_with_parameters(
        &self,
        sql: &str,
        parameters: &[SqlValue],
    ) -> Result<RewriteResult> {
        let rule = self.rules.snapshot();
        let statement = parser::parse(sql, self.options.database_type)?;

        let tokens = TokenGenerateBuilder::new(&rule, self.options.query_with_cipher_column)
            .database_type(self.options.database_type)
            .generate_sql_tokens(&statement, self.schema.as_ref())?;
        let parameters = ParameterRewriter::new(&rule).rewrite(&statement, &tokens, parameters)?;

        let rewritten = if tokens.is_empty() {
            sql.to_string()
        } else {
            apply_tokens(sql, &tokens)
        };
        if tokens.is_empty() {
            trace!("unchanged: {sql}");
        } else {
            debug!("rewrote: {sql} -> {rewritten}");
        }

        Ok(RewriteResult {
            sql: rewritten,
            parameters,
            statement,
            tokens,
            rule,
        })
    }

    /// Decrypts rows returned by the rewritten statement of `result`.
    pub fn result_decryptor<'r>(&self, result: &'r RewriteResult) -> ResultDecryptor<'r> {
        ResultDecryptor::new(&result.rule, &result.statement, &result.tokens, self.schema.as_ref())
    }
}
