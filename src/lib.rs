pub mod algorithm;
pub mod builder;
pub mod config;
pub mod error;
pub mod generator;
pub mod parameter;
pub mod parser;
pub mod result;
pub mod rewriter;
pub mod rule;
pub mod schema;
pub mod statement;
pub mod token;
pub mod value;

pub use algorithm::EncryptAlgorithm;
pub use builder::TokenGenerateBuilder;
pub use config::{DatabaseType, EncryptRuleConfig, RewriteOptions};
pub use error::{EncryptError, Result};
pub use parameter::ParameterRewriter;
pub use result::ResultDecryptor;
pub use rewriter::{RewriteResult, SqlRewriter, apply_tokens};
pub use rule::{EncryptRule, RuleHolder};
pub use schema::{InMemorySchema, SchemaMetaData};
pub use statement::StatementContext;
pub use token::SqlToken;
pub use value::SqlValue;
