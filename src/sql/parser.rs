//! SQL parser: converts tokens into the typed AST

use super::ast::*;
use super::token::{Token, TokenType};
use crate::error::{DbError, Result};
use crate::types::{DataType, Value};

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse one SQL statement.
    pub fn parse(&mut self) -> Result<Statement> {
        let stmt = match &self.current().token_type {
            TokenType::Select => Statement::Select(self.parse_select()?),
            TokenType::Insert => Statement::Insert(self.parse_insert()?),
            TokenType::Update => Statement::Update(self.parse_update()?),
            TokenType::Delete => Statement::Delete(self.parse_delete()?),
            TokenType::Create => self.parse_create()?,
            TokenType::Drop => self.parse_drop()?,
            TokenType::Alter => Statement::AlterTable(self.parse_alter()?),
            TokenType::Begin => {
                self.advance();
                Statement::Begin
            }
            TokenType::Commit => {
                self.advance();
                Statement::Commit
            }
            TokenType::Rollback => {
                self.advance();
                Statement::Rollback
            }
            TokenType::Vacuum => {
                self.advance();
                let table = match &self.current().token_type {
                    TokenType::Identifier(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                Statement::Vacuum { table }
            }
            TokenType::Show => {
                self.advance();
                self.expect(TokenType::Tables)?;
                Statement::ShowTables
            }
            TokenType::Describe => {
                self.advance();
                Statement::Describe(self.expect_identifier()?)
            }
            _ => return Err(self.error("expected a SQL statement")),
        };

        if matches!(self.current().token_type, TokenType::Semicolon) {
            self.advance();
        }
        if !matches!(self.current().token_type, TokenType::Eof) {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(stmt)
    }

    fn parse_select(&mut self) -> Result<SelectStmt> {
        self.expect(TokenType::Select)?;
        let distinct = self.match_token(TokenType::Distinct);
        let items = self.parse_select_items()?;

        self.expect(TokenType::From)?;
        let from = self.parse_table_ref()?;

        let where_clause = if self.match_token(TokenType::Where) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };

        let group_by = if self.match_token(TokenType::Group) {
            self.expect(TokenType::By)?;
            self.parse_column_ref_list()?
        } else {
            Vec::new()
        };

        let having = if self.match_token(TokenType::Having) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };

        let order_by = if self.match_token(TokenType::Order) {
            self.expect(TokenType::By)?;
            self.parse_order_by()?
        } else {
            Vec::new()
        };

        let limit = if self.match_token(TokenType::Limit) {
            Some(self.parse_usize()?)
        } else {
            None
        };

        Ok(SelectStmt {
            distinct,
            items,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
        })
    }

    fn parse_select_items(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = Vec::new();
        loop {
            if self.match_token(TokenType::Star) {
                items.push(SelectItem::Star);
            } else {
                let expr = self.parse_expr(0)?;
                let alias = self.parse_alias()?;
                items.push(SelectItem::Expr { expr, alias });
            }
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(items)
    }

    /// `AS alias` or a bare trailing identifier.
    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.match_token(TokenType::As) {
            return Ok(Some(self.expect_identifier()?));
        }
        if let TokenType::Identifier(name) = &self.current().token_type {
            let name = name.clone();
            self.advance();
            return Ok(Some(name));
        }
        Ok(None)
    }

    fn parse_table_ref(&mut self) -> Result<TableRef> {
        let mut left = self.parse_table_primary()?;

        loop {
            let join_type = match &self.current().token_type {
                TokenType::Join => JoinType::Inner,
                TokenType::Inner => {
                    self.advance();
                    JoinType::Inner
                }
                TokenType::Left => {
                    self.advance();
                    self.match_token(TokenType::Outer);
                    JoinType::Left
                }
                TokenType::Right => {
                    self.advance();
                    self.match_token(TokenType::Outer);
                    JoinType::Right
                }
                _ => break,
            };
            self.expect(TokenType::Join)?;
            let right = self.parse_table_primary()?;
            self.expect(TokenType::On)?;
            let on = self.parse_expr(0)?;
            left = TableRef::Join {
                left: Box::new(left),
                right: Box::new(right),
                join_type,
                on,
            };
        }
        Ok(left)
    }

    fn parse_table_primary(&mut self) -> Result<TableRef> {
        let name = self.expect_identifier()?;
        let alias = if self.match_token(TokenType::As) {
            Some(self.expect_identifier()?)
        } else if let TokenType::Identifier(a) = &self.current().token_type {
            let a = a.clone();
            self.advance();
            Some(a)
        } else {
            None
        };
        Ok(TableRef::Table { name, alias })
    }

    fn parse_column_ref_list(&mut self) -> Result<Vec<ColumnRef>> {
        let mut refs = Vec::new();
        loop {
            refs.push(self.parse_column_ref()?);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(refs)
    }

    fn parse_column_ref(&mut self) -> Result<ColumnRef> {
        let first = self.expect_identifier()?;
        if self.match_token(TokenType::Dot) {
            let column = self.expect_identifier()?;
            Ok(ColumnRef {
                table: Some(first),
                column,
            })
        } else {
            Ok(ColumnRef::bare(first))
        }
    }

    fn parse_order_by(&mut self) -> Result<Vec<OrderByItem>> {
        let mut items = Vec::new();
        loop {
            let expr = self.parse_expr(0)?;
            let asc = if self.match_token(TokenType::Desc) {
                false
            } else {
                self.match_token(TokenType::Asc);
                true
            };
            items.push(OrderByItem { expr, asc });
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_insert(&mut self) -> Result<InsertStmt> {
        self.expect(TokenType::Insert)?;
        self.expect(TokenType::Into)?;
        let table = self.expect_identifier()?;

        let columns = if self.match_token(TokenType::LParen) {
            let mut cols = Vec::new();
            loop {
                cols.push(self.expect_identifier()?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            self.expect(TokenType::RParen)?;
            Some(cols)
        } else {
            None
        };

        self.expect(TokenType::Values)?;
        let mut rows = Vec::new();
        loop {
            self.expect(TokenType::LParen)?;
            let mut values = Vec::new();
            loop {
                values.push(self.parse_expr(0)?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            self.expect(TokenType::RParen)?;
            rows.push(values);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }

        Ok(InsertStmt {
            table,
            columns,
            rows,
        })
    }

    fn parse_update(&mut self) -> Result<UpdateStmt> {
        self.expect(TokenType::Update)?;
        let table = self.expect_identifier()?;
        self.expect(TokenType::Set)?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_identifier()?;
            self.expect(TokenType::Eq)?;
            let value = self.parse_expr(0)?;
            assignments.push((column, value));
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }

        let where_clause = if self.match_token(TokenType::Where) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };

        Ok(UpdateStmt {
            table,
            assignments,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt> {
        self.expect(TokenType::Delete)?;
        self.expect(TokenType::From)?;
        let table = self.expect_identifier()?;
        let where_clause = if self.match_token(TokenType::Where) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };
        Ok(DeleteStmt {
            table,
            where_clause,
        })
    }

    fn parse_create(&mut self) -> Result<Statement> {
        self.expect(TokenType::Create)?;
        match &self.current().token_type {
            TokenType::Table => {
                self.advance();
                let table = self.expect_identifier()?;
                self.expect(TokenType::LParen)?;
                let mut columns = Vec::new();
                loop {
                    columns.push(self.parse_column_def()?);
                    if !self.match_token(TokenType::Comma) {
                        break;
                    }
                }
                self.expect(TokenType::RParen)?;
                Ok(Statement::CreateTable(CreateTableStmt { table, columns }))
            }
            TokenType::Index => {
                self.advance();
                let index = self.expect_identifier()?;
                self.expect(TokenType::On)?;
                let table = self.expect_identifier()?;
                self.expect(TokenType::LParen)?;
                let column = self.expect_identifier()?;
                self.expect(TokenType::RParen)?;
                Ok(Statement::CreateIndex(CreateIndexStmt {
                    index,
                    table,
                    column,
                }))
            }
            _ => Err(self.error("expected TABLE or INDEX after CREATE")),
        }
    }

    fn parse_drop(&mut self) -> Result<Statement> {
        self.expect(TokenType::Drop)?;
        match &self.current().token_type {
            TokenType::Table => {
                self.advance();
                let if_exists = if self.match_token(TokenType::If) {
                    self.expect(TokenType::Exists)?;
                    true
                } else {
                    false
                };
                let table = self.expect_identifier()?;
                Ok(Statement::DropTable { table, if_exists })
            }
            TokenType::Index => {
                self.advance();
                let index = self.expect_identifier()?;
                Ok(Statement::DropIndex { index })
            }
            _ => Err(self.error("expected TABLE or INDEX after DROP")),
        }
    }

    fn parse_alter(&mut self) -> Result<AlterTableStmt> {
        self.expect(TokenType::Alter)?;
        self.expect(TokenType::Table)?;
        let table = self.expect_identifier()?;

        let op = match &self.current().token_type {
            TokenType::Add => {
                self.advance();
                self.expect(TokenType::Column)?;
                AlterTableOp::AddColumn(self.parse_column_def()?)
            }
            TokenType::Drop => {
                self.advance();
                self.expect(TokenType::Column)?;
                AlterTableOp::DropColumn(self.expect_identifier()?)
            }
            TokenType::Rename => {
                self.advance();
                self.expect(TokenType::Column)?;
                let old = self.expect_identifier()?;
                self.expect(TokenType::To)?;
                let new = self.expect_identifier()?;
                AlterTableOp::RenameColumn { old, new }
            }
            _ => return Err(self.error("expected ADD, DROP or RENAME after ALTER TABLE")),
        };

        Ok(AlterTableStmt { table, op })
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.expect_identifier()?;
        let (data_type, dimension) = match &self.current().token_type {
            TokenType::IntType => {
                self.advance();
                (DataType::Int, None)
            }
            TokenType::FloatType => {
                self.advance();
                (DataType::Float, None)
            }
            TokenType::TextType => {
                self.advance();
                (DataType::Text, None)
            }
            TokenType::BoolType => {
                self.advance();
                (DataType::Bool, None)
            }
            TokenType::EmbeddingType => {
                self.advance();
                let dimension = if self.match_token(TokenType::LParen) {
                    let dim = self.parse_usize()?;
                    self.expect(TokenType::RParen)?;
                    Some(dim)
                } else {
                    None
                };
                (DataType::Embedding, dimension)
            }
            _ => return Err(self.error("expected a column type")),
        };
        Ok(ColumnDef {
            name,
            data_type,
            dimension,
        })
    }

    /// Precedence-climbing expression parser.
    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            // Plain binary operators.
            let op = match &self.current().token_type {
                TokenType::Or => Some(BinaryOp::Or),
                TokenType::And => Some(BinaryOp::And),
                TokenType::Eq => Some(BinaryOp::Eq),
                TokenType::Ne => Some(BinaryOp::Ne),
                TokenType::Lt => Some(BinaryOp::Lt),
                TokenType::Le => Some(BinaryOp::Le),
                TokenType::Gt => Some(BinaryOp::Gt),
                TokenType::Ge => Some(BinaryOp::Ge),
                TokenType::Plus => Some(BinaryOp::Add),
                TokenType::Minus => Some(BinaryOp::Sub),
                TokenType::Star => Some(BinaryOp::Mul),
                TokenType::Slash => Some(BinaryOp::Div),
                _ => None,
            };
            if let Some(op) = op {
                if op.precedence() < min_prec {
                    break;
                }
                self.advance();
                let right = self.parse_expr(op.precedence() + 1)?;
                left = Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
                continue;
            }

            // Predicate forms at comparison precedence.
            const PREDICATE_PREC: u8 = 3;
            if PREDICATE_PREC < min_prec {
                break;
            }
            match &self.current().token_type {
                TokenType::Is => {
                    self.advance();
                    let negated = self.match_token(TokenType::Not);
                    self.expect(TokenType::Null)?;
                    left = Expr::IsNull {
                        expr: Box::new(left),
                        negated,
                    };
                }
                TokenType::Like => {
                    self.advance();
                    let pattern = self.parse_expr(PREDICATE_PREC + 1)?;
                    left = Expr::Like {
                        expr: Box::new(left),
                        pattern: Box::new(pattern),
                        negated: false,
                    };
                }
                TokenType::In => {
                    self.advance();
                    left = self.parse_in_rhs(left, false)?;
                }
                TokenType::Not => {
                    // Postfix forms: NOT LIKE, NOT IN.
                    match self.peek().map(|t| &t.token_type) {
                        Some(TokenType::Like) => {
                            self.advance();
                            self.advance();
                            let pattern = self.parse_expr(PREDICATE_PREC + 1)?;
                            left = Expr::Like {
                                expr: Box::new(left),
                                pattern: Box::new(pattern),
                                negated: true,
                            };
                        }
                        Some(TokenType::In) => {
                            self.advance();
                            self.advance();
                            left = self.parse_in_rhs(left, true)?;
                        }
                        _ => break,
                    }
                }
                _ => break,
            }
        }

        Ok(left)
    }

    fn parse_in_rhs(&mut self, expr: Expr, negated: bool) -> Result<Expr> {
        self.expect(TokenType::LParen)?;
        if matches!(self.current().token_type, TokenType::Select) {
            let query = self.parse_select()?;
            self.expect(TokenType::RParen)?;
            return Ok(Expr::InSubquery {
                expr: Box::new(expr),
                query: Box::new(query),
                negated,
            });
        }
        let mut list = Vec::new();
        loop {
            list.push(self.parse_expr(0)?);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RParen)?;
        Ok(Expr::InList {
            expr: Box::new(expr),
            list,
            negated,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match &self.current().token_type {
            TokenType::Not => {
                // NOT EXISTS keeps its own node; everything else is a
                // generic trinary negation.
                if matches!(self.peek().map(|t| &t.token_type), Some(TokenType::Exists)) {
                    self.advance();
                    return self.parse_exists(true);
                }
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_expr(3)?)))
            }
            TokenType::Minus => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            TokenType::Exists => self.parse_exists(false),
            _ => self.parse_primary(),
        }
    }

    fn parse_exists(&mut self, negated: bool) -> Result<Expr> {
        self.expect(TokenType::Exists)?;
        self.expect(TokenType::LParen)?;
        let query = self.parse_select()?;
        self.expect(TokenType::RParen)?;
        Ok(Expr::Exists {
            query: Box::new(query),
            negated,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.current().token_type.clone() {
            TokenType::IntLiteral(i) => {
                self.advance();
                Ok(Expr::Literal(Value::Int(i)))
            }
            TokenType::FloatLiteral(f) => {
                self.advance();
                Ok(Expr::Literal(Value::Float(f)))
            }
            TokenType::StringLiteral(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Text(s)))
            }
            TokenType::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenType::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenType::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenType::LBracket => self.parse_embedding_literal(),
            TokenType::LParen => {
                self.advance();
                if matches!(self.current().token_type, TokenType::Select) {
                    let query = self.parse_select()?;
                    self.expect(TokenType::RParen)?;
                    return Ok(Expr::Subquery(Box::new(query)));
                }
                let expr = self.parse_expr(0)?;
                self.expect(TokenType::RParen)?;
                Ok(expr)
            }
            TokenType::Identifier(name) => {
                self.advance();
                // Aggregate or function call.
                if matches!(self.current().token_type, TokenType::LParen) {
                    return self.parse_call(&name);
                }
                if self.match_token(TokenType::Dot) {
                    let column = self.expect_identifier()?;
                    return Ok(Expr::Column(ColumnRef {
                        table: Some(name),
                        column,
                    }));
                }
                Ok(Expr::Column(ColumnRef::bare(name)))
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr> {
        let func = match name.to_uppercase().as_str() {
            "COUNT" => AggFunc::Count,
            "SUM" => AggFunc::Sum,
            "AVG" => AggFunc::Avg,
            "MIN" => AggFunc::Min,
            "MAX" => AggFunc::Max,
            other => {
                return Err(DbError::Parse(format!("unknown function '{}'", other)));
            }
        };
        self.expect(TokenType::LParen)?;

        if func == AggFunc::Count && self.match_token(TokenType::Star) {
            self.expect(TokenType::RParen)?;
            return Ok(Expr::Aggregate {
                func,
                arg: None,
            });
        }
        let arg = self.parse_column_ref()?;
        self.expect(TokenType::RParen)?;
        Ok(Expr::Aggregate {
            func,
            arg: Some(arg),
        })
    }

    fn parse_embedding_literal(&mut self) -> Result<Expr> {
        self.expect(TokenType::LBracket)?;
        let mut values = Vec::new();
        if !matches!(self.current().token_type, TokenType::RBracket) {
            loop {
                let negative = self.match_token(TokenType::Minus);
                let x = match self.current().token_type.clone() {
                    TokenType::IntLiteral(i) => {
                        self.advance();
                        i as f32
                    }
                    TokenType::FloatLiteral(f) => {
                        self.advance();
                        f as f32
                    }
                    _ => return Err(self.error("expected a number in embedding literal")),
                };
                values.push(if negative { -x } else { x });
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenType::RBracket)?;
        Ok(Expr::Literal(Value::Embedding(values)))
    }

    fn parse_usize(&mut self) -> Result<usize> {
        match self.current().token_type.clone() {
            TokenType::IntLiteral(i) if i >= 0 => {
                self.advance();
                Ok(i as usize)
            }
            _ => Err(self.error("expected a non-negative integer")),
        }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position + 1)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
    }

    fn match_token(&mut self, token_type: TokenType) -> bool {
        if std::mem::discriminant(&self.current().token_type)
            == std::mem::discriminant(&token_type)
        {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token_type: TokenType) -> Result<()> {
        if self.match_token(token_type.clone()) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", token_type)))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.current().token_type.clone() {
            TokenType::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected an identifier")),
        }
    }

    fn error(&self, message: &str) -> DbError {
        let token = self.current();
        DbError::Parse(format!(
            "{} at {}:{} (found {:?})",
            message, token.line, token.column, token.token_type
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Lexer;

    fn parse(sql: &str) -> Statement {
        let tokens = Lexer::new(sql).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn parse_err(sql: &str) -> DbError {
        let tokens = Lexer::new(sql).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap_err()
    }

    #[test]
    fn test_parse_create_table() {
        let stmt = parse(
            "CREATE TABLE products (id INT, name TEXT, price FLOAT, tags EMBEDDING(3))",
        );
        match stmt {
            Statement::CreateTable(create) => {
                assert_eq!(create.table, "products");
                assert_eq!(create.columns.len(), 4);
                assert_eq!(create.columns[3].data_type, DataType::Embedding);
                assert_eq!(create.columns[3].dimension, Some(3));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_insert_multi_row() {
        let stmt = parse("INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')");
        match stmt {
            Statement::Insert(insert) => {
                assert_eq!(insert.table, "t");
                assert_eq!(insert.columns, Some(vec!["a".into(), "b".into()]));
                assert_eq!(insert.rows.len(), 2);
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_select_with_all_clauses() {
        let stmt = parse(
            "SELECT DISTINCT department, COUNT(*) FROM users \
             WHERE age > 21 GROUP BY department HAVING COUNT(*) > 1 \
             ORDER BY department DESC LIMIT 10",
        );
        match stmt {
            Statement::Select(select) => {
                assert!(select.distinct);
                assert_eq!(select.items.len(), 2);
                assert!(select.where_clause.is_some());
                assert_eq!(select.group_by, vec![ColumnRef::bare("department")]);
                assert!(select.having.is_some());
                assert_eq!(select.order_by.len(), 1);
                assert!(!select.order_by[0].asc);
                assert_eq!(select.limit, Some(10));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_join_tree() {
        let stmt = parse(
            "SELECT u.name, o.total FROM users u \
             LEFT JOIN orders o ON u.id = o.user_id",
        );
        match stmt {
            Statement::Select(select) => match select.from {
                TableRef::Join {
                    join_type, left, right, ..
                } => {
                    assert_eq!(join_type, JoinType::Left);
                    assert!(matches!(*left, TableRef::Table { ref alias, .. } if alias.as_deref() == Some("u")));
                    assert!(matches!(*right, TableRef::Table { ref alias, .. } if alias.as_deref() == Some("o")));
                }
                other => panic!("expected join, got {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_scalar_subquery() {
        let stmt = parse("SELECT * FROM products WHERE price > (SELECT AVG(price) FROM products)");
        match stmt {
            Statement::Select(select) => match select.where_clause.unwrap() {
                Expr::Binary { right, .. } => {
                    assert!(matches!(*right, Expr::Subquery(_)));
                }
                other => panic!("expected comparison, got {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_in_and_exists() {
        let stmt = parse(
            "SELECT * FROM t WHERE id IN (1, 2, 3) AND x NOT IN (SELECT y FROM u) \
             AND EXISTS (SELECT z FROM v) AND NOT EXISTS (SELECT w FROM s)",
        );
        match stmt {
            Statement::Select(select) => {
                let clause = format!("{:?}", select.where_clause.unwrap());
                assert!(clause.contains("InList"));
                assert!(clause.contains("InSubquery"));
                assert!(clause.contains("negated: true"));
                assert!(clause.contains("Exists"));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_operator_precedence() {
        let stmt = parse("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3");
        match stmt {
            Statement::Select(select) => match select.where_clause.unwrap() {
                // OR binds loosest: (a=1) OR ((b=2) AND (c=3))
                Expr::Binary { op, right, .. } => {
                    assert_eq!(op, BinaryOp::Or);
                    assert!(matches!(
                        *right,
                        Expr::Binary { op: BinaryOp::And, .. }
                    ));
                }
                other => panic!("expected OR, got {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_transaction_statements() {
        assert!(matches!(parse("BEGIN"), Statement::Begin));
        assert!(matches!(parse("COMMIT;"), Statement::Commit));
        assert!(matches!(parse("ROLLBACK"), Statement::Rollback));
    }

    #[test]
    fn test_parse_vacuum() {
        assert!(matches!(parse("VACUUM"), Statement::Vacuum { table: None }));
        match parse("VACUUM accounts") {
            Statement::Vacuum { table } => assert_eq!(table.as_deref(), Some("accounts")),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_alter_table() {
        match parse("ALTER TABLE t ADD COLUMN note TEXT") {
            Statement::AlterTable(alter) => {
                assert!(matches!(alter.op, AlterTableOp::AddColumn(_)));
            }
            other => panic!("unexpected statement {:?}", other),
        }
        match parse("ALTER TABLE t RENAME COLUMN a TO b") {
            Statement::AlterTable(alter) => match alter.op {
                AlterTableOp::RenameColumn { old, new } => {
                    assert_eq!(old, "a");
                    assert_eq!(new, "b");
                }
                other => panic!("unexpected op {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_drop_if_exists() {
        match parse("DROP TABLE IF EXISTS t") {
            Statement::DropTable { table, if_exists } => {
                assert_eq!(table, "t");
                assert!(if_exists);
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_err("SELECT"), DbError::Parse(_)));
        assert!(matches!(parse_err("INSERT users"), DbError::Parse(_)));
        assert!(matches!(parse_err("SELECT * FROM t WHERE"), DbError::Parse(_)));
        assert!(matches!(parse_err("SELECT NOPE(x) FROM t"), DbError::Parse(_)));
    }

    #[test]
    fn test_parse_embedding_literal() {
        let stmt = parse("INSERT INTO t VALUES ([0.5, -1.5, 2])");
        match stmt {
            Statement::Insert(insert) => match &insert.rows[0][0] {
                Expr::Literal(Value::Embedding(v)) => {
                    assert_eq!(v, &vec![0.5, -1.5, 2.0]);
                }
                other => panic!("expected embedding literal, got {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }
}
