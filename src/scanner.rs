use crate::error::{ErrorKind, StaticError};
use crate::token::{Literal, Token, TokenKind};

/// Turns a source string into tokens, tracking the current line and
/// collecting scan errors instead of stopping at the first one.
pub struct Scanner<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    errors: Vec<StaticError>,
    /// Byte offset of the first character of the lexeme being scanned.
    start: usize,
    /// Byte offset one past the last consumed character.
    current: usize,
    line: usize,
}

/// Convenience entry point used by the driver and tests.
pub fn scan_tokens(source: &str) -> (Vec<Token>, Vec<StaticError>) {
    Scanner::new(source).scan_tokens()
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: Vec::new(),
            errors: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    pub fn scan_tokens(mut self) -> (Vec<Token>, Vec<StaticError>) {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token();
        }

        self.tokens
            .push(Token::new(TokenKind::Eof, String::new(), None, self.line));
        (self.tokens, self.errors)
    }

    fn scan_token(&mut self) {
        let Some(c) = self.advance() else {
            return;
        };

        match c {
            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            '[' => self.add_token(TokenKind::LeftSquare),
            ']' => self.add_token(TokenKind::RightSquare),
            ',' => self.add_token(TokenKind::Comma),
            '.' => self.add_token(TokenKind::Dot),
            '+' => self.add_token(TokenKind::Plus),
            '*' => self.add_token(TokenKind::Asterisk),
            '^' => self.add_token(TokenKind::Caret),
            '%' => self.add_token(TokenKind::Percent),
            ';' => self.add_token(TokenKind::Semicolon),
            '|' => self.add_token(TokenKind::Pipe),
            '#' => self.add_token(TokenKind::Hashtag),
            '-' => {
                let kind = if self.match_char('>') {
                    TokenKind::MapsTo
                } else {
                    TokenKind::Minus
                };
                self.add_token(kind);
            }
            ':' => {
                let kind = if self.match_char('=') {
                    TokenKind::Assign
                } else {
                    TokenKind::Colon
                };
                self.add_token(kind);
            }
            '=' => {
                let kind = if self.match_char('=') {
                    TokenKind::EqualEqual
                } else if self.match_char('>') {
                    TokenKind::Implies
                } else {
                    TokenKind::Equal
                };
                self.add_token(kind);
            }
            '!' | '¬' => {
                let kind = if self.match_char('=') {
                    TokenKind::NotEqual
                } else {
                    TokenKind::Not
                };
                self.add_token(kind);
            }
            '<' => {
                let kind = if self.match_char('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.add_token(kind);
            }
            '>' => {
                let kind = if self.match_char('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.add_token(kind);
            }
            '/' => {
                if self.match_char('/') {
                    // Comment runs to the end of the line
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                } else {
                    self.add_token(TokenKind::Slash);
                }
            }
            // Unicode operators are single tokens
            '∑' => self.add_token(TokenKind::Summation),
            '∧' => self.add_token(TokenKind::And),
            '∨' => self.add_token(TokenKind::Or),
            '∈' => self.add_token(TokenKind::In),
            '≠' => self.add_token(TokenKind::NotEqual),
            '≤' => self.add_token(TokenKind::LessEqual),
            '≥' => self.add_token(TokenKind::GreaterEqual),
            '→' => self.add_token(TokenKind::MapsTo),
            '⇒' => self.add_token(TokenKind::Implies),
            ' ' | '\r' | '\t' => {}
            '\n' => self.line += 1,
            '"' => self.string(),
            c if c.is_ascii_digit() => self.number(),
            c if c.is_ascii_alphabetic() || c == '_' => self.identifier(),
            _ => self.error("Unexpected character"),
        }
    }

    fn string(&mut self) {
        while let Some(c) = self.peek() {
            if c == '"' {
                break;
            }
            // Strings may span lines; no escape sequences are processed
            if c == '\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            self.error("Unterminated string");
            return;
        }

        // Closing quote
        self.advance();

        let value = self.source[self.start + 1..self.current - 1].to_string();
        self.add_literal_token(TokenKind::String, Literal::String(value));
    }

    fn number(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        // A fractional part needs a digit after the dot; a bare dot is left
        // for the next lexeme
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let value: f64 = self.source[self.start..self.current].parse().unwrap();
        self.add_literal_token(TokenKind::Number, Literal::Number(value));
    }

    fn identifier(&mut self) {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance();
        }

        let kind = match &self.source[self.start..self.current] {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "xor" => TokenKind::Xor,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "let" => TokenKind::Let,
            "null" => TokenKind::Null,
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "do" => TokenKind::Do,
            "out" => TokenKind::Out,
            "return" => TokenKind::Return,
            "function" => TokenKind::Function,
            _ => TokenKind::Identifier,
        };

        self.add_token(kind);
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.source[self.current..].chars().next()?;
        self.current += c.len_utf8();
        Some(c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.current..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.current..].chars();
        chars.next();
        chars.next()
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn add_token(&mut self, kind: TokenKind) {
        let lexeme = self.source[self.start..self.current].to_string();
        self.tokens.push(Token::new(kind, lexeme, None, self.line));
    }

    fn add_literal_token(&mut self, kind: TokenKind, literal: Literal) {
        let lexeme = self.source[self.start..self.current].to_string();
        self.tokens
            .push(Token::new(kind, lexeme, Some(literal), self.line));
    }

    fn error(&mut self, message: &str) {
        self.errors
            .push(StaticError::new(self.line, ErrorKind::Syntax, message));
    }
}
