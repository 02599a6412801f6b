use std::fmt::{Display, Formatter, Result};

#[derive(Debug, PartialEq, Clone)]
pub enum TokenType {
    Text(String),
    StringLit(String),
    Number(u64),
    Colon,
    Dash,
    LBracket,
    RBracket,
    Comma,
    Newline,
    Indent(usize),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenType,
    pub loc: Loc,
}

#[derive(Debug, Clone, Copy)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            TokenType::Text(s) => write!(f, "{s}"),
            TokenType::StringLit(s) => write!(f, "\"{s}\""),
            TokenType::Number(n) => write!(f, "{n}"),
            TokenType::Colon => write!(f, ":"),
            TokenType::Dash => write!(f, "-"),
            TokenType::LBracket => write!(f, "["),
            TokenType::RBracket => write!(f, "]"),
            TokenType::Comma => write!(f, ","),
            TokenType::Newline => write!(f, "\\n"),
            TokenType::Indent(n) => {
                for _ in 0..*n {
                    write!(f, " ")?;
                }
                Ok(())
            }
        }
    }
}

impl Display for Loc {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "'{}' at {}", self.kind, self.loc)
    }
}
