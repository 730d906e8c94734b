use narrow_ast::span::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum TokKind {
    // trivia / eof / error
    Eof,
    /// Error token (unexpected character, bad literal)
    Error(String),
    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    ColonColon, // Union::tag
    Semicolon,
    Dot,
    Arrow, // -> for return types
    // assignment
    Eq,
    // arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    // equality
    EqEq,
    BangEq,
    // relational
    Lt,
    Le,
    Gt,
    Ge,
    // logical
    AndAnd,
    OrOr,
    // unary
    Bang,
    // idents / keywords
    Ident(String),
    KwLet,
    KwFn,
    KwTrue,
    KwFalse,
    KwIf,
    KwElse,
    KwReturn,
    KwUnion,
    KwType,
    KwVisitor,
    KwFor,
    KwSwitch,
    KwCase,
    KwDefault,
    KwIs,
    KwAsBang, // as! (unchecked cast)
    // literals
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct Tok {
    pub kind: TokKind,
    pub span: Span,
}
