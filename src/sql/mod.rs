//! SQL front end: lexer, parser, typed AST, validation and execution

pub mod ast;
mod evaluator;
mod executor;
mod join;
mod lexer;
mod parser;
mod token;
mod validator;

pub use ast::Statement;
pub use evaluator::NamedRow;
pub use executor::{ExecutorCtx, QueryResult};
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::{Token, TokenType};
pub use validator::Validator;

use crate::error::Result;

/// Parse one SQL statement.
pub fn parse(sql: &str) -> Result<Statement> {
    let tokens = Lexer::new(sql).tokenize()?;
    Parser::new(tokens).parse()
}
