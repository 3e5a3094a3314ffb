//! Lexical Analysis
//!
//! Compiler pass that tokenizes source code, producing a sequence of
//! tokens with source locations.

use std::fmt;

use crate::compiler::parser::ast::Loc;
use crate::error::{CompileError, Result};

/// Types of lexical elements.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum TokenKind {
    // Keywords.
    Func,
    Let,
    Int,
    Void,
    If,
    Else,
    For,
    Return,
    Break,
    Continue,

    // Identifiers and literals.
    Ident(String),
    Number(i64),

    // Operators.
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    BangEq,
    Lt,
    Le,
    Gt,
    Ge,
    AmpAmp,
    PipePipe,
    Bang,
    Assign,
    Arrow,

    // Punctuation.
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Func => "func",
            TokenKind::Let => "let",
            TokenKind::Int => "int",
            TokenKind::Void => "void",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::For => "for",
            TokenKind::Return => "return",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Ident(name) => return write!(f, "identifier '{name}'"),
            TokenKind::Number(v) => return write!(f, "integer '{v}'"),
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::EqEq => "==",
            TokenKind::BangEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::AmpAmp => "&&",
            TokenKind::PipePipe => "||",
            TokenKind::Bang => "!",
            TokenKind::Assign => "=",
            TokenKind::Arrow => "->",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Semi => ";",
            TokenKind::Comma => ",",
            TokenKind::Eof => "end of file",
        };
        write!(f, "'{s}'")
    }
}

/// Minimal lexical element of the source language.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Loc,
}

/// Byte-oriented lexer over source code.
#[derive(Debug)]
pub struct Lexer<'a> {
    src: &'a [u8],
    cur: usize,
    // Index one past the most recent newline (used to calculate the current
    // column).
    bol: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    /// Returns a new `Lexer` over the given source bytes.
    #[must_use]
    pub fn new(src: &'a [u8]) -> Self {
        Self {
            src,
            cur: 0,
            bol: 0,
            line: 1,
        }
    }

    /// Tokenizes the entire source, producing the token sequence terminated
    /// by an `Eof` token.
    ///
    /// # Errors
    ///
    /// Returns an error for bytes outside the language's alphabet and for
    /// integer literals that overflow a 64-bit signed integer.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia();

            let loc = self.loc();
            let Some(b) = self.first() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    loc,
                });
                return Ok(tokens);
            };

            let kind = match b {
                b'(' => self.single(TokenKind::LParen),
                b')' => self.single(TokenKind::RParen),
                b'{' => self.single(TokenKind::LBrace),
                b'}' => self.single(TokenKind::RBrace),
                b'[' => self.single(TokenKind::LBracket),
                b']' => self.single(TokenKind::RBracket),
                b';' => self.single(TokenKind::Semi),
                b',' => self.single(TokenKind::Comma),
                b'+' => self.single(TokenKind::Plus),
                b'*' => self.single(TokenKind::Star),
                b'/' => self.single(TokenKind::Slash),
                b'%' => self.single(TokenKind::Percent),
                b'-' => {
                    self.cur += 1;
                    if self.first() == Some(b'>') {
                        self.cur += 1;
                        TokenKind::Arrow
                    } else {
                        TokenKind::Minus
                    }
                }
                b'=' => {
                    self.cur += 1;
                    if self.first() == Some(b'=') {
                        self.cur += 1;
                        TokenKind::EqEq
                    } else {
                        TokenKind::Assign
                    }
                }
                b'!' => {
                    self.cur += 1;
                    if self.first() == Some(b'=') {
                        self.cur += 1;
                        TokenKind::BangEq
                    } else {
                        TokenKind::Bang
                    }
                }
                b'<' => {
                    self.cur += 1;
                    if self.first() == Some(b'=') {
                        self.cur += 1;
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }
                b'>' => {
                    self.cur += 1;
                    if self.first() == Some(b'=') {
                        self.cur += 1;
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }
                b'&' => {
                    self.cur += 1;
                    if self.first() == Some(b'&') {
                        self.cur += 1;
                        TokenKind::AmpAmp
                    } else {
                        return Err(self.err(loc, "expected '&&'"));
                    }
                }
                b'|' => {
                    self.cur += 1;
                    if self.first() == Some(b'|') {
                        self.cur += 1;
                        TokenKind::PipePipe
                    } else {
                        return Err(self.err(loc, "expected '||'"));
                    }
                }
                b'0'..=b'9' => self.number(loc)?,
                b if b.is_ascii_alphabetic() || b == b'_' => self.ident_or_keyword(),
                b => {
                    return Err(self.err(loc, &format!("unexpected character '{}'", b as char)));
                }
            };

            tokens.push(Token { kind, loc });
        }
    }

    fn first(&self) -> Option<u8> {
        self.src.get(self.cur).copied()
    }

    fn second(&self) -> Option<u8> {
        self.src.get(self.cur + 1).copied()
    }

    fn loc(&self) -> Loc {
        Loc {
            line: self.line,
            col: (self.cur - self.bol) as u32,
        }
    }

    fn err(&self, loc: Loc, message: &str) -> CompileError {
        CompileError::Lex {
            message: message.to_string(),
            line: loc.line,
            col: loc.col,
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.cur += 1;
        kind
    }

    /// Skips whitespace and `//` line comments.
    fn skip_trivia(&mut self) {
        while let Some(b) = self.first() {
            match b {
                b'\n' => {
                    self.cur += 1;
                    self.bol = self.cur;
                    self.line += 1;
                }
                b if b.is_ascii_whitespace() => self.cur += 1,
                b'/' if self.second() == Some(b'/') => {
                    while let Some(b) = self.first() {
                        if b == b'\n' {
                            break;
                        }
                        self.cur += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn number(&mut self, loc: Loc) -> Result<TokenKind> {
        let start = self.cur;
        while let Some(b) = self.first() {
            if !b.is_ascii_digit() {
                break;
            }
            self.cur += 1;
        }

        let text = std::str::from_utf8(&self.src[start..self.cur])
            .expect("ASCII digits are valid UTF-8");

        let value = text
            .parse::<i64>()
            .map_err(|_| self.err(loc, &format!("integer literal '{text}' is out of range")))?;

        Ok(TokenKind::Number(value))
    }

    fn ident_or_keyword(&mut self) -> TokenKind {
        let start = self.cur;
        while let Some(b) = self.first() {
            if !(b.is_ascii_alphanumeric() || b == b'_') {
                break;
            }
            self.cur += 1;
        }

        let text = std::str::from_utf8(&self.src[start..self.cur])
            .expect("ASCII bytes are valid UTF-8");

        match text {
            "func" => TokenKind::Func,
            "let" => TokenKind::Let,
            "int" => TokenKind::Int,
            "void" => TokenKind::Void,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            _ => TokenKind::Ident(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src.as_bytes())
            .tokenize()
            .expect("source should lex")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexer_valid_return_zero() {
        let kinds = kinds("func main() -> int { return 0; }");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Func,
                TokenKind::Ident("main".into()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::Int,
                TokenKind::LBrace,
                TokenKind::Return,
                TokenKind::Number(0),
                TokenKind::Semi,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexer_valid_compound_operators() {
        let kinds = kinds("== != <= >= && || -> < > = ! -");
        assert_eq!(
            kinds,
            vec![
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::Arrow,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Assign,
                TokenKind::Bang,
                TokenKind::Minus,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexer_valid_array_type() {
        let kinds = kinds("let a [4][2]int = {};");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Let,
                TokenKind::Ident("a".into()),
                TokenKind::LBracket,
                TokenKind::Number(4),
                TokenKind::RBracket,
                TokenKind::LBracket,
                TokenKind::Number(2),
                TokenKind::RBracket,
                TokenKind::Int,
                TokenKind::Assign,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexer_valid_line_comment() {
        let kinds = kinds("// a comment\nreturn // trailing\n;");
        assert_eq!(
            kinds,
            vec![TokenKind::Return, TokenKind::Semi, TokenKind::Eof]
        );
    }

    #[test]
    fn lexer_valid_keywords_vs_idents() {
        let kinds = kinds("form fortress for let lettuce");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("form".into()),
                TokenKind::Ident("fortress".into()),
                TokenKind::For,
                TokenKind::Let,
                TokenKind::Ident("lettuce".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexer_tracks_lines_and_columns() {
        let tokens = Lexer::new(b"func\n  main")
            .tokenize()
            .expect("source should lex");
        assert_eq!((tokens[0].loc.line, tokens[0].loc.col), (1, 0));
        assert_eq!((tokens[1].loc.line, tokens[1].loc.col), (2, 2));
    }

    #[test]
    fn lexer_invalid_single_ampersand() {
        let err = Lexer::new(b"a & b").tokenize().unwrap_err();
        assert!(err.to_string().contains("expected '&&'"));
    }

    #[test]
    fn lexer_invalid_unexpected_symbol() {
        let err = Lexer::new(b"return 0 @ 1;").tokenize().unwrap_err();
        assert!(err.to_string().contains("unexpected character '@'"));
    }

    #[test]
    fn lexer_invalid_huge_integer() {
        let err = Lexer::new(b"return 99999999999999999999;")
            .tokenize()
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
