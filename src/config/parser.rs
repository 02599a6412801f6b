use crate::config::lexer::Lexer;
use crate::config::tokens::{Loc, Token, TokenType};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub loc: Option<Loc>,
    pub context: Vec<String>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[1;31mconfig error\x1b[0m: {}", self.message)?;
        if let Some(loc) = self.loc {
            write!(f, " \x1b[38;5;244m(at {})\x1b[0m", loc)?;
        }
        if !self.context.is_empty() {
            writeln!(f, "\n  \x1b[1;34mtrace:\x1b[0m")?;
            for (i, ctx) in self.context.iter().rev().enumerate() {
                writeln!(f, "{}\u{21b3} {}", " ".repeat(2 + i * 2), ctx)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

pub type ParseResult<T> = Result<T, ConfigError>;

fn err(message: impl Into<String>, loc: Option<Loc>) -> ConfigError {
    ConfigError { message: message.into(), loc, context: Vec::new() }
}

/// Recursive-descent cursor over the token stream produced by [`Lexer`].
pub struct ConfigParser {
    pub tokens: Vec<Token>,
    pub cursor: usize,
}

impl ConfigParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, cursor: 0 }
    }

    pub fn peek_kind(&self) -> Option<&TokenType> {
        self.tokens.get(self.cursor).map(|t| &t.kind)
    }

    pub fn peek_kind_at(&self, offset: usize) -> Option<&TokenType> {
        self.tokens.get(self.cursor + offset).map(|t| &t.kind)
    }

    pub fn peek_loc(&self) -> Option<Loc> {
        self.tokens.get(self.cursor).map(|t| t.loc)
    }

    pub fn next_token(&mut self) -> Option<&Token> {
        if self.cursor < self.tokens.len() {
            let t = &self.tokens[self.cursor];
            self.cursor += 1;
            Some(t)
        } else {
            None
        }
    }

    pub fn consume(&mut self, expected: TokenType) -> ParseResult<()> {
        let loc = self.peek_loc();
        match self.next_token() {
            Some(t) if std::mem::discriminant(&t.kind) == std::mem::discriminant(&expected) => Ok(()),
            Some(t) => Err(err(format!("expected {:?}, found {:?}", expected, t.kind), Some(t.loc))),
            None => Err(err(format!("expected {:?}, found EOF", expected), loc)),
        }
    }

    pub fn skip_newlines(&mut self) {
        while let Some(k) = self.peek_kind() {
            if matches!(k, TokenType::Newline | TokenType::Indent(_)) {
                self.cursor += 1;
            } else {
                break;
            }
        }
    }

    pub fn skip_newlines_only(&mut self) -> bool {
        let mut skipped = false;
        while matches!(self.peek_kind(), Some(TokenType::Newline)) {
            self.cursor += 1;
            skipped = true;
        }
        skipped
    }

    pub fn parse_scalar_string(&mut self) -> ParseResult<String> {
        let loc = self.peek_loc();
        match self.next_token() {
            Some(t) => match &t.kind {
                TokenType::Text(s) | TokenType::StringLit(s) => Ok(s.clone()),
                _ => Err(err(format!("expected string, found {:?}", t.kind), Some(t.loc))),
            },
            None => Err(err("expected string, found EOF", loc)),
        }
    }

    pub fn parse_scalar_number(&mut self) -> ParseResult<u64> {
        let loc = self.peek_loc();
        match self.next_token() {
            Some(t) => match t.kind {
                TokenType::Number(n) => Ok(n),
                _ => Err(err(format!("expected number, found {:?}", t.kind), Some(t.loc))),
            },
            None => Err(err("expected number, found EOF", loc)),
        }
    }

    /// Advances past one `key:` and returns the key text, leaving the cursor on
    /// the value. Returns `None` at end of input or on dedent below `min_indent`.
    pub fn next_map_key(&mut self, min_indent: usize) -> ParseResult<Option<String>> {
        self.skip_newlines_only();
        if let Some(TokenType::Indent(n)) = self.peek_kind() {
            if *n < min_indent {
                return Ok(None);
            }
            self.cursor += 1;
        } else if min_indent > 0 {
            return Ok(None);
        }

        match self.peek_kind() {
            None | Some(TokenType::Dash) => Ok(None),
            _ => {
                let key = self.parse_scalar_string()?;
                self.consume(TokenType::Colon)?;
                Ok(Some(key))
            }
        }
    }
}

/// Implemented for any value the config DSL can produce. Structs implement this
/// by hand (see `config::types`) rather than through a derive macro -- the schema
/// is small and fixed, so a proc-macro buys nothing but indirection.
pub trait FromYaml: Sized {
    fn from_yaml(parser: &mut ConfigParser, min_indent: usize) -> ParseResult<Self>;

    fn from_str(input: &str) -> ParseResult<Self> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer
            .tokenize()
            .map_err(|e| ConfigError { message: e, loc: None, context: vec!["lexing phase".to_string()] })?;

        let mut parser = ConfigParser::new(tokens);
        let result = Self::from_yaml(&mut parser, 0)?;

        parser.skip_newlines();
        if parser.peek_kind().is_some() {
            return Err(err(
                format!("unexpected content after configuration: {:?}", parser.peek_kind().unwrap()),
                parser.peek_loc(),
            ));
        }

        Ok(result)
    }
}

impl FromYaml for String {
    fn from_yaml(parser: &mut ConfigParser, _min_indent: usize) -> ParseResult<Self> {
        parser.parse_scalar_string()
    }
}

impl FromYaml for u16 {
    fn from_yaml(parser: &mut ConfigParser, _min_indent: usize) -> ParseResult<Self> {
        let loc = parser.peek_loc();
        let n = parser.parse_scalar_number()?;
        if n > u16::MAX as u64 {
            return Err(err(format!("value {} out of range for u16", n), loc));
        }
        Ok(n as u16)
    }
}

impl FromYaml for u64 {
    fn from_yaml(parser: &mut ConfigParser, _min_indent: usize) -> ParseResult<Self> {
        parser.parse_scalar_number()
    }
}

impl FromYaml for usize {
    fn from_yaml(parser: &mut ConfigParser, _min_indent: usize) -> ParseResult<Self> {
        parser.parse_scalar_number().map(|n| n as usize)
    }
}

impl FromYaml for u8 {
    fn from_yaml(parser: &mut ConfigParser, _min_indent: usize) -> ParseResult<Self> {
        let loc = parser.peek_loc();
        let n = parser.parse_scalar_number()?;
        if n > u8::MAX as u64 {
            return Err(err(format!("value {} out of range for u8", n), loc));
        }
        Ok(n as u8)
    }
}

impl FromYaml for bool {
    fn from_yaml(parser: &mut ConfigParser, _min_indent: usize) -> ParseResult<Self> {
        let val = parser.parse_scalar_string()?;
        Ok(val == "true" || val == "on")
    }
}

impl<T: FromYaml> FromYaml for Option<T> {
    fn from_yaml(parser: &mut ConfigParser, min_indent: usize) -> ParseResult<Self> {
        Ok(Some(T::from_yaml(parser, min_indent)?))
    }
}

impl FromYaml for HashMap<u16, String> {
    fn from_yaml(parser: &mut ConfigParser, _min_indent: usize) -> ParseResult<Self> {
        let mut map = HashMap::new();
        parser.skip_newlines_only();

        let mut map_indent = 0;
        if let Some(TokenType::Indent(n)) = parser.peek_kind() {
            map_indent = *n;
        }

        loop {
            parser.skip_newlines_only();

            if let Some(TokenType::Indent(n)) = parser.peek_kind() {
                if *n < map_indent {
                    break;
                }
                parser.cursor += 1;
            } else if map_indent > 0 {
                break;
            }

            match parser.peek_kind() {
                None | Some(TokenType::Dash) | Some(TokenType::RBracket) => break,
                _ => {}
            }

            let loc = parser.peek_loc();
            let key = u16::from_yaml(parser, map_indent)?;
            parser.consume(TokenType::Colon)?;

            if map.contains_key(&key) {
                return Err(err(format!("duplicate key '{}' in map", key), loc));
            }

            let value = String::from_yaml(parser, map_indent)
                .map_err(|mut e| { e.context.push(format!("parsing value for status {}", key)); e })?;

            map.insert(key, value);
        }

        Ok(map)
    }
}
