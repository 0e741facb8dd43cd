//! Token types for the SQL lexer

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Keywords
    Select,
    From,
    Where,
    Insert,
    Into,
    Values,
    Update,
    Set,
    Delete,
    Create,
    Table,
    Index,
    Drop,
    Alter,
    Add,
    Column,
    Rename,
    To,
    If,
    Exists,
    And,
    Or,
    Not,
    Like,
    In,
    Is,
    Null,
    As,
    Order,
    By,
    Asc,
    Desc,
    Limit,
    Distinct,
    Group,
    Having,
    Join,
    Left,
    Right,
    Inner,
    Outer,
    On,
    Begin,
    Commit,
    Rollback,
    Vacuum,
    Show,
    Describe,
    Tables,

    // Data types
    IntType,
    FloatType,
    TextType,
    BoolType,
    EmbeddingType,

    // Operators
    Eq,      // =
    Ne,      // != or <>
    Lt,      // <
    Gt,      // >
    Le,      // <=
    Ge,      // >=
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /

    // Delimiters
    LParen,    // (
    RParen,    // )
    LBracket,  // [
    RBracket,  // ]
    Comma,     // ,
    Semicolon, // ;
    Dot,       // .

    // Literals
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    Identifier(String),
    True,
    False,

    // Special
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(token_type: TokenType, line: usize, column: usize) -> Self {
        Self {
            token_type,
            line,
            column,
        }
    }
}

impl TokenType {
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "select" => Some(TokenType::Select),
            "from" => Some(TokenType::From),
            "where" => Some(TokenType::Where),
            "insert" => Some(TokenType::Insert),
            "into" => Some(TokenType::Into),
            "values" => Some(TokenType::Values),
            "update" => Some(TokenType::Update),
            "set" => Some(TokenType::Set),
            "delete" => Some(TokenType::Delete),
            "create" => Some(TokenType::Create),
            "table" => Some(TokenType::Table),
            "index" => Some(TokenType::Index),
            "drop" => Some(TokenType::Drop),
            "alter" => Some(TokenType::Alter),
            "add" => Some(TokenType::Add),
            "column" => Some(TokenType::Column),
            "rename" => Some(TokenType::Rename),
            "to" => Some(TokenType::To),
            "if" => Some(TokenType::If),
            "exists" => Some(TokenType::Exists),
            "and" => Some(TokenType::And),
            "or" => Some(TokenType::Or),
            "not" => Some(TokenType::Not),
            "like" => Some(TokenType::Like),
            "in" => Some(TokenType::In),
            "is" => Some(TokenType::Is),
            "null" => Some(TokenType::Null),
            "as" => Some(TokenType::As),
            "order" => Some(TokenType::Order),
            "by" => Some(TokenType::By),
            "asc" => Some(TokenType::Asc),
            "desc" => Some(TokenType::Desc),
            "limit" => Some(TokenType::Limit),
            "distinct" => Some(TokenType::Distinct),
            "group" => Some(TokenType::Group),
            "having" => Some(TokenType::Having),
            "join" => Some(TokenType::Join),
            "left" => Some(TokenType::Left),
            "right" => Some(TokenType::Right),
            "inner" => Some(TokenType::Inner),
            "outer" => Some(TokenType::Outer),
            "on" => Some(TokenType::On),
            "begin" => Some(TokenType::Begin),
            "commit" => Some(TokenType::Commit),
            "rollback" => Some(TokenType::Rollback),
            "vacuum" => Some(TokenType::Vacuum),
            "show" => Some(TokenType::Show),
            "describe" => Some(TokenType::Describe),
            "tables" => Some(TokenType::Tables),
            "integer" | "int" => Some(TokenType::IntType),
            "float" | "real" | "double" => Some(TokenType::FloatType),
            "text" | "varchar" | "string" => Some(TokenType::TextType),
            "boolean" | "bool" => Some(TokenType::BoolType),
            "embedding" | "vector" => Some(TokenType::EmbeddingType),
            "true" => Some(TokenType::True),
            "false" => Some(TokenType::False),
            _ => None,
        }
    }
}
