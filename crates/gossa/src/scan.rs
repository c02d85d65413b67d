//! Scanner for the source language.
//!
//! Produces a token stream with source lines. Newlines insert implicit
//! semicolons after tokens that can end a statement, so the parser only
//! ever sees explicit statement boundaries.

use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Int(i64),
    /// Integer literal in the upper half of the `uint64` range, beyond
    /// what `Int` can carry.
    Uint(u64),
    Float(f64),
    Str(String),

    // keywords
    Package,
    Import,
    Func,
    Var,
    Const,
    Type,
    Return,
    If,
    Else,
    For,
    Range,
    Break,
    Continue,
    Defer,
    Go,
    Select,
    Case,
    Default,
    Chan,
    Map,
    Struct,
    Interface,

    // operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    AmpCaret,
    Shl,
    Shr,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    AmpCaretEq,
    ShlEq,
    ShrEq,
    AndAnd,
    OrOr,
    Arrow,
    PlusPlus,
    MinusMinus,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Assign,
    Define,
    Bang,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Semi,
    Colon,
    Eof,
}

impl Token {
    /// Whether an end-of-line after this token inserts a semicolon.
    fn ends_statement(&self) -> bool {
        matches!(
            self,
            Self::Ident(_)
                | Self::Int(_)
                | Self::Uint(_)
                | Self::Float(_)
                | Self::Str(_)
                | Self::Return
                | Self::Break
                | Self::Continue
                | Self::PlusPlus
                | Self::MinusMinus
                | Self::RParen
                | Self::RBracket
                | Self::RBrace
        )
    }
}

/// A token with its 1-based source line.
#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub tok: Token,
    pub line: u32,
}

pub(crate) fn scan(source: &str) -> Result<Vec<Spanned>, Error> {
    Scanner::new(source).run()
}

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    out: Vec<Spanned>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            out: Vec::new(),
        }
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::build(message, self.line)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            return true;
        }
        false
    }

    fn push(&mut self, tok: Token) {
        self.out.push(Spanned { tok, line: self.line });
    }

    /// Applies the implicit-semicolon rule at a line break.
    fn newline(&mut self) {
        if let Some(last) = self.out.last()
            && last.tok.ends_statement()
        {
            self.push(Token::Semi);
        }
    }

    fn run(mut self) -> Result<Vec<Spanned>, Error> {
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    self.newline();
                    self.bump();
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' => {
                    self.bump();
                    if self.eat('/') {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    } else if self.eat('*') {
                        self.block_comment()?;
                    } else if self.eat('=') {
                        self.push(Token::SlashEq);
                    } else {
                        self.push(Token::Slash);
                    }
                }
                c if c.is_ascii_digit() => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.ident(),
                '"' => self.string()?,
                '`' => self.raw_string()?,
                '\'' => self.rune()?,
                _ => self.operator()?,
            }
        }
        self.newline();
        self.push(Token::Eof);
        Ok(self.out)
    }

    fn block_comment(&mut self) -> Result<(), Error> {
        let start_line = self.line;
        loop {
            match self.bump() {
                Some('*') if self.eat('/') => {
                    if self.line > start_line {
                        self.newline();
                    }
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(self.err("unterminated block comment")),
            }
        }
    }

    fn number(&mut self) -> Result<(), Error> {
        let mut text = String::new();
        if self.peek() == Some('0') {
            text.push(self.bump().expect("peeked digit"));
            if self.eat('x') || self.eat('X') {
                let mut hex = String::new();
                while let Some(c) = self.peek() {
                    if c.is_ascii_hexdigit() {
                        hex.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                if hex.is_empty() {
                    return Err(self.err("malformed hexadecimal literal"));
                }
                // literals beyond i64 stay representable as uint64
                let tok = match i64::from_str_radix(&hex, 16) {
                    Ok(value) => Token::Int(value),
                    Err(_) => Token::Uint(
                        u64::from_str_radix(&hex, 16).map_err(|_| self.err("integer literal overflows"))?,
                    ),
                };
                self.push(tok);
                return Ok(());
            }
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let mut is_float = false;
        if self.peek() == Some('.') {
            // lookahead: `1..` never occurs, but `x[1:]` style colons do not
            // reach here; a dot always starts a fraction in a number.
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            text.push('e');
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                text.push(self.bump().expect("peeked sign"));
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if is_float {
            let value: f64 = text.parse().map_err(|_| self.err("malformed float literal"))?;
            self.push(Token::Float(value));
        } else {
            let tok = match text.parse::<i64>() {
                Ok(value) => Token::Int(value),
                Err(_) => Token::Uint(text.parse::<u64>().map_err(|_| self.err("integer literal overflows"))?),
            };
            self.push(tok);
        }
        Ok(())
    }

    fn ident(&mut self) {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let tok = match name.as_str() {
            "package" => Token::Package,
            "import" => Token::Import,
            "func" => Token::Func,
            "var" => Token::Var,
            "const" => Token::Const,
            "type" => Token::Type,
            "return" => Token::Return,
            "if" => Token::If,
            "else" => Token::Else,
            "for" => Token::For,
            "range" => Token::Range,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "defer" => Token::Defer,
            "go" => Token::Go,
            "select" => Token::Select,
            "case" => Token::Case,
            "default" => Token::Default,
            "chan" => Token::Chan,
            "map" => Token::Map,
            "struct" => Token::Struct,
            "interface" => Token::Interface,
            _ => Token::Ident(name),
        };
        self.push(tok);
    }

    fn escape(&mut self) -> Result<char, Error> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some('0') => Ok('\0'),
            Some('x') => {
                let mut code = 0u32;
                for _ in 0..2 {
                    let c = self.bump().ok_or_else(|| self.err("unterminated escape"))?;
                    let digit = c.to_digit(16).ok_or_else(|| self.err("malformed hex escape"))?;
                    code = code * 16 + digit;
                }
                char::from_u32(code).ok_or_else(|| self.err("invalid character escape"))
            }
            Some('u') => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let c = self.bump().ok_or_else(|| self.err("unterminated escape"))?;
                    let digit = c.to_digit(16).ok_or_else(|| self.err("malformed unicode escape"))?;
                    code = code * 16 + digit;
                }
                char::from_u32(code).ok_or_else(|| self.err("invalid character escape"))
            }
            Some(c) => Err(self.err(format!("unknown escape \\{c}"))),
            None => Err(self.err("unterminated escape")),
        }
    }

    fn string(&mut self) -> Result<(), Error> {
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => text.push(self.escape()?),
                Some('\n') | None => return Err(self.err("unterminated string literal")),
                Some(c) => text.push(c),
            }
        }
        self.push(Token::Str(text));
        Ok(())
    }

    fn raw_string(&mut self) -> Result<(), Error> {
        self.bump(); // opening backquote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('`') => break,
                None => return Err(self.err("unterminated raw string literal")),
                Some(c) => text.push(c),
            }
        }
        self.push(Token::Str(text));
        Ok(())
    }

    fn rune(&mut self) -> Result<(), Error> {
        self.bump(); // opening quote
        let c = match self.bump() {
            Some('\\') => self.escape()?,
            Some('\'') | None => return Err(self.err("empty character literal")),
            Some(c) => c,
        };
        if self.bump() != Some('\'') {
            return Err(self.err("unterminated character literal"));
        }
        self.push(Token::Int(i64::from(u32::from(c))));
        Ok(())
    }

    fn operator(&mut self) -> Result<(), Error> {
        let c = self.bump().expect("caller peeked");
        let tok = match c {
            '+' => {
                if self.eat('+') {
                    Token::PlusPlus
                } else if self.eat('=') {
                    Token::PlusEq
                } else {
                    Token::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    Token::MinusMinus
                } else if self.eat('=') {
                    Token::MinusEq
                } else {
                    Token::Minus
                }
            }
            '*' => {
                if self.eat('=') {
                    Token::StarEq
                } else {
                    Token::Star
                }
            }
            '%' => {
                if self.eat('=') {
                    Token::PercentEq
                } else {
                    Token::Percent
                }
            }
            '&' => {
                if self.eat('^') {
                    if self.eat('=') { Token::AmpCaretEq } else { Token::AmpCaret }
                } else if self.eat('&') {
                    Token::AndAnd
                } else if self.eat('=') {
                    Token::AmpEq
                } else {
                    Token::Amp
                }
            }
            '|' => {
                if self.eat('|') {
                    Token::OrOr
                } else if self.eat('=') {
                    Token::PipeEq
                } else {
                    Token::Pipe
                }
            }
            '^' => {
                if self.eat('=') {
                    Token::CaretEq
                } else {
                    Token::Caret
                }
            }
            '<' => {
                if self.eat('<') {
                    if self.eat('=') { Token::ShlEq } else { Token::Shl }
                } else if self.eat('-') {
                    Token::Arrow
                } else if self.eat('=') {
                    Token::LtEq
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('>') {
                    if self.eat('=') { Token::ShrEq } else { Token::Shr }
                } else if self.eat('=') {
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            '=' => {
                if self.eat('=') {
                    Token::EqEq
                } else {
                    Token::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    Token::NotEq
                } else {
                    Token::Bang
                }
            }
            ':' => {
                if self.eat('=') {
                    Token::Define
                } else {
                    Token::Colon
                }
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            '.' => Token::Dot,
            ';' => Token::Semi,
            other => return Err(self.err(format!("unexpected character {other:?}"))),
        };
        self.push(tok);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        scan(src).unwrap().into_iter().map(|s| s.tok).collect()
    }

    #[test]
    fn implicit_semicolons() {
        let toks = kinds("x := 1\ny := 2\n");
        assert!(toks.contains(&Token::Semi));
        let semis = toks.iter().filter(|t| **t == Token::Semi).count();
        assert_eq!(semis, 2);
    }

    #[test]
    fn no_semicolon_after_operator() {
        let toks = kinds("x := 1 +\n2\n");
        let semis = toks.iter().filter(|t| **t == Token::Semi).count();
        assert_eq!(semis, 1);
    }

    #[test]
    fn channel_arrow_and_shifts() {
        assert_eq!(kinds("<-c")[0], Token::Arrow);
        assert_eq!(kinds("a << 2")[1], Token::Shl);
        assert_eq!(kinds("a &^ b")[1], Token::AmpCaret);
        assert_eq!(kinds("a &^= b")[1], Token::AmpCaretEq);
    }

    #[test]
    fn literals() {
        assert_eq!(kinds("0x1f")[0], Token::Int(31));
        assert_eq!(kinds("1.5e2")[0], Token::Float(150.0));
        assert_eq!(kinds("\"a\\tb\"")[0], Token::Str("a\tb".to_owned()));
        assert_eq!(kinds("`raw\\n`")[0], Token::Str("raw\\n".to_owned()));
        assert_eq!(kinds("'A'")[0], Token::Int(65));
    }

    #[test]
    fn wide_literals_scan_as_uint() {
        assert_eq!(kinds("0xFFFFFFFFFFFFFFFF")[0], Token::Uint(u64::MAX));
        assert_eq!(kinds("0xcbf29ce484222325")[0], Token::Uint(0xcbf2_9ce4_8422_2325));
        assert_eq!(kinds("18446744073709551615")[0], Token::Uint(u64::MAX));
        // the i64 range keeps its signed token
        assert_eq!(kinds("9223372036854775807")[0], Token::Int(i64::MAX));
        assert!(scan("18446744073709551616").is_err());
    }

    #[test]
    fn line_numbers_advance() {
        let toks = scan("a\nb\n").unwrap();
        let b = toks.iter().find(|s| s.tok == Token::Ident("b".into())).unwrap();
        assert_eq!(b.line, 2);
    }

    #[test]
    fn unterminated_string_reports_line() {
        let err = scan("x := \"oops").unwrap_err();
        assert_eq!(err.line(), Some(1));
    }
}
