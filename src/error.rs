use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("Lex error: {0}")]
    LexError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Semantic error: {0}")]
    SemanticError(String),

    #[error("Emit error: {0}")]
    EmitError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    ArchiveError(#[from] bincode::Error),

    #[error("Archive format error: {0}")]
    ArchiveFormatError(String),
}

pub type Result<T> = std::result::Result<T, CompilerError>;

#[macro_export]
macro_rules! bail_lex {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::LexError(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_parse {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::ParseError(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_semantic {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::SemanticError(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_emit {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::EmitError(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_archive {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::ArchiveFormatError(format!($($arg)*)))
    };
}
