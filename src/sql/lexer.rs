//! SQL lexer: converts a statement string into tokens

use super::token::{Token, TokenType};
use crate::error::{DbError, Result};

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = matches!(token.token_type, TokenType::Eof);
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let line = self.line;
        let column = self.column;

        if self.is_eof() {
            return Ok(Token::new(TokenType::Eof, line, column));
        }

        let ch = self.current_char();

        // Line comments
        if ch == '-' && self.peek_char() == Some('-') {
            self.skip_line_comment();
            return self.next_token();
        }

        let token_type = match ch {
            '\'' => self.read_string()?,
            '0'..='9' => self.read_number()?,
            'a'..='z' | 'A'..='Z' | '_' => self.read_identifier(),
            '=' => {
                self.advance();
                TokenType::Eq
            }
            '!' => {
                self.advance();
                if !self.is_eof() && self.current_char() == '=' {
                    self.advance();
                    TokenType::Ne
                } else {
                    return Err(DbError::Parse(format!(
                        "unexpected character '!' at {}:{}",
                        line, column
                    )));
                }
            }
            '<' => {
                self.advance();
                if !self.is_eof() && self.current_char() == '=' {
                    self.advance();
                    TokenType::Le
                } else if !self.is_eof() && self.current_char() == '>' {
                    self.advance();
                    TokenType::Ne
                } else {
                    TokenType::Lt
                }
            }
            '>' => {
                self.advance();
                if !self.is_eof() && self.current_char() == '=' {
                    self.advance();
                    TokenType::Ge
                } else {
                    TokenType::Gt
                }
            }
            '+' => {
                self.advance();
                TokenType::Plus
            }
            '-' => {
                self.advance();
                TokenType::Minus
            }
            '*' => {
                self.advance();
                TokenType::Star
            }
            '/' => {
                self.advance();
                TokenType::Slash
            }
            '(' => {
                self.advance();
                TokenType::LParen
            }
            ')' => {
                self.advance();
                TokenType::RParen
            }
            '[' => {
                self.advance();
                TokenType::LBracket
            }
            ']' => {
                self.advance();
                TokenType::RBracket
            }
            ',' => {
                self.advance();
                TokenType::Comma
            }
            ';' => {
                self.advance();
                TokenType::Semicolon
            }
            '.' => {
                self.advance();
                TokenType::Dot
            }
            other => {
                return Err(DbError::Parse(format!(
                    "unexpected character '{}' at {}:{}",
                    other, line, column
                )));
            }
        };

        Ok(Token::new(token_type, line, column))
    }

    fn read_string(&mut self) -> Result<TokenType> {
        let line = self.line;
        let column = self.column;
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            if self.is_eof() {
                return Err(DbError::Parse(format!(
                    "unterminated string starting at {}:{}",
                    line, column
                )));
            }
            let ch = self.current_char();
            if ch == '\'' {
                // Doubled quote escapes a quote.
                if self.peek_char() == Some('\'') {
                    value.push('\'');
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance();
                break;
            }
            value.push(ch);
            self.advance();
        }
        Ok(TokenType::StringLiteral(value))
    }

    fn read_number(&mut self) -> Result<TokenType> {
        let line = self.line;
        let column = self.column;
        let mut text = String::new();
        let mut is_float = false;

        while !self.is_eof() {
            let ch = self.current_char();
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else if ch == '.' && !is_float
                && self.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false)
            {
                is_float = true;
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if is_float {
            text.parse::<f64>()
                .map(TokenType::FloatLiteral)
                .map_err(|_| {
                    DbError::Parse(format!("invalid number '{}' at {}:{}", text, line, column))
                })
        } else {
            text.parse::<i64>()
                .map(TokenType::IntLiteral)
                .map_err(|_| {
                    DbError::Parse(format!("invalid number '{}' at {}:{}", text, line, column))
                })
        }
    }

    fn read_identifier(&mut self) -> TokenType {
        let mut text = String::new();
        while !self.is_eof() {
            let ch = self.current_char();
            if ch.is_ascii_alphanumeric() || ch == '_' {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        TokenType::from_keyword(&text).unwrap_or(TokenType::Identifier(text))
    }

    fn skip_whitespace(&mut self) {
        while !self.is_eof() && self.current_char().is_whitespace() {
            self.advance();
        }
    }

    fn skip_line_comment(&mut self) {
        while !self.is_eof() && self.current_char() != '\n' {
            self.advance();
        }
    }

    fn current_char(&self) -> char {
        self.input[self.position]
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if self.is_eof() {
            return;
        }
        if self.current_char() == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.position += 1;
    }

    fn is_eof(&self) -> bool {
        self.position >= self.input.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(sql: &str) -> Vec<TokenType> {
        Lexer::new(sql)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn test_select_tokens() {
        let tokens = types("SELECT id FROM users WHERE age >= 21;");
        assert_eq!(
            tokens,
            vec![
                TokenType::Select,
                TokenType::Identifier("id".into()),
                TokenType::From,
                TokenType::Identifier("users".into()),
                TokenType::Where,
                TokenType::Identifier("age".into()),
                TokenType::Ge,
                TokenType::IntLiteral(21),
                TokenType::Semicolon,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(types("select SeLeCt SELECT").len(), 4);
        assert!(types("select")[0] == TokenType::Select);
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(
            types("42 3.5"),
            vec![
                TokenType::IntLiteral(42),
                TokenType::FloatLiteral(3.5),
                TokenType::Eof
            ]
        );
    }

    #[test]
    fn test_string_with_escaped_quote() {
        assert_eq!(
            types("'it''s'"),
            vec![TokenType::StringLiteral("it's".into()), TokenType::Eof]
        );
    }

    #[test]
    fn test_unterminated_string_is_parse_error() {
        assert!(matches!(
            Lexer::new("'oops").tokenize(),
            Err(DbError::Parse(_))
        ));
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            types("= != <> < <= > >="),
            vec![
                TokenType::Eq,
                TokenType::Ne,
                TokenType::Ne,
                TokenType::Lt,
                TokenType::Le,
                TokenType::Gt,
                TokenType::Ge,
                TokenType::Eof
            ]
        );
    }

    #[test]
    fn test_line_comment_skipped() {
        assert_eq!(
            types("SELECT -- everything\n1"),
            vec![TokenType::Select, TokenType::IntLiteral(1), TokenType::Eof]
        );
    }

    #[test]
    fn test_embedding_literal_tokens() {
        assert_eq!(
            types("[1.0, 2.0]"),
            vec![
                TokenType::LBracket,
                TokenType::FloatLiteral(1.0),
                TokenType::Comma,
                TokenType::FloatLiteral(2.0),
                TokenType::RBracket,
                TokenType::Eof
            ]
        );
    }
}
