//! Runs the encrypt generator pipeline over one statement.

use log::{debug, trace};

use crate::{
    config::DatabaseType,
    error::Result,
    generator::{EncryptTokenGenerator, GenerateContext, PreviousTokens, SqlTokenGenerator},
    rule::EncryptRule,
    schema::SchemaMetaData,
    statement::StatementContext,
    token::SqlToken,
};

#[derive(Debug, Clone, Copy)]
pub struct TokenGenerateBuilder<'a> {
    rule: &'a EncryptRule,
    query_with_cipher_column: bool,
    database_type: DatabaseType,
}

impl<'a> TokenGenerateBuilder<'a> {
    pub fn new(rule: &'a EncryptRule, query_with_cipher_column: bool) -> Self {
        Self {
            rule,
            query_with_cipher_column,
            database_type: DatabaseType::default(),
        }
    }

    pub fn database_type(mut self, database_type: DatabaseType) -> Self {
        self.database_type = database_type;
        self
    }

    /// The generators in the order they run. Later generators read what
    /// earlier ones produced, so the order is fixed.
    pub fn sql_token_generators(&self) -> [EncryptTokenGenerator; 11] {
        EncryptTokenGenerator::PIPELINE
    }

    /// All tokens for `statement`. Never fails for unsupported shapes, only
    /// when an encryption algorithm fails.
    pub fn generate_sql_tokens(
        &self,
        statement: &StatementContext,
        schema: &dyn SchemaMetaData,
    ) -> Result<Vec<SqlToken>> {
        let ctx = GenerateContext {
            rule: self.rule,
            schema,
            query_with_cipher_column: self.query_with_cipher_column,
            database_type: self.database_type,
        };

        let mut previous = PreviousTokens::default();
        for generator in self.sql_token_generators() {
            if !generator.applies(statement) {
                continue;
            }
            let tokens = generator.generate(statement, &ctx, &mut previous)?;
            trace!("{}: {} tokens", generator.name(), tokens.len());
            previous.extend(tokens);
        }

        let tokens = previous.into_tokens();
        debug!("generated {} sql tokens", tokens.len());
        Ok(tokens)
    }
}
