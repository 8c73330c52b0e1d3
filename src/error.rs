use std::fmt::Display;

use thiserror::Error;

use crate::token::{Token, TokenKind};

/// Classification attached to every reported error, static or runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Type,
    Variable,
    Argument,
    Parameter,
    Function,
    Identifier,
    Return,
    ZeroDivision,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Variable => "VariableError",
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::Parameter => "ParameterError",
            ErrorKind::Function => "FunctionError",
            ErrorKind::Identifier => "IdentifierError",
            ErrorKind::Return => "ReturnError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
        };
        write!(f, "{}", name)
    }
}

/// An error found before execution, by the scanner, parser or resolver.
///
/// `location` is empty for scanner errors, ` at 'LEXEME'` for token errors
/// and ` at end` when the offending token is EOF.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("[line {}] {}{}: {}.", .line, .kind, .location, .message)]
pub struct StaticError {
    pub line: usize,
    pub location: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl StaticError {
    pub fn new(line: usize, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            line,
            location: String::new(),
            kind,
            message: message.into(),
        }
    }

    pub fn at_token(token: &Token, kind: ErrorKind, message: impl Into<String>) -> Self {
        let location = if token.kind == TokenKind::Eof {
            " at end".to_string()
        } else {
            format!(" at '{}'", token.lexeme)
        };
        Self {
            line: token.line,
            location,
            kind,
            message: message.into(),
        }
    }
}

/// An error raised during evaluation, carrying the token it blames.
#[derive(Debug, Clone, Error)]
#[error("[line {}] {}: {}.", .token.line, .kind, .message)]
pub struct RuntimeError {
    pub token: Token,
    pub kind: ErrorKind,
    pub message: String,
}

impl RuntimeError {
    pub fn new(token: Token, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            token,
            kind,
            message: message.into(),
        }
    }
}
