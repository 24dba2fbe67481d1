use thiserror::Error;

use crate::ast::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NameResolution,
    TypeMismatch,
    ShapeOrKind,
    Redeclaration,
    IntentMisuse,
    Unsupported,
    Verifier,
    Internal,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct SemanticError {
    pub kind: ErrorKind,
    pub message: String,
    pub loc: Location,
}

impl SemanticError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, loc: Location) -> Self {
        Self {
            kind,
            message: message.into(),
            loc,
        }
    }
}

pub type Result<T> = std::result::Result<T, SemanticError>;
