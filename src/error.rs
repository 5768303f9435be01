//! Error types for atrepo

use std::fmt;
use thiserror::Error;

/// Result type alias for atrepo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in atrepo operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored bytes do not hash to their CID. Never recovered from.
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid CID: {0}")]
    InvalidCid(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid record value: {0}")]
    InvalidValue(String),

    #[error("No signing key registered for {0}")]
    MissingKey(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid store file: {0}")]
    InvalidFile(String),

    #[error("Store is locked by another process: {0}")]
    Locked(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

/// Malformed canonical bytes, located at `offset`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("codec error at offset {offset}: {kind}")]
pub struct CodecError {
    pub offset: usize,
    pub kind: CodecErrorKind,
}

impl CodecError {
    pub fn new(offset: usize, kind: CodecErrorKind) -> Self {
        CodecError { offset, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecErrorKind {
    UnexpectedEof,
    UnknownType(u8),
    InvalidUtf8,
    UnsortedKey,
    NonCanonicalFloat,
    InvalidLink,
    TrailingBytes,
    TooDeep,
    /// Well-formed value with the wrong shape for the expected structure
    Shape(String),
}

impl fmt::Display for CodecErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecErrorKind::UnexpectedEof => write!(f, "unexpected end of input"),
            CodecErrorKind::UnknownType(b) => write!(f, "unknown type byte 0x{:02x}", b),
            CodecErrorKind::InvalidUtf8 => write!(f, "invalid UTF-8"),
            CodecErrorKind::UnsortedKey => write!(f, "map keys out of order or duplicated"),
            CodecErrorKind::NonCanonicalFloat => write!(f, "non-canonical float"),
            CodecErrorKind::InvalidLink => write!(f, "invalid link"),
            CodecErrorKind::TrailingBytes => write!(f, "trailing bytes"),
            CodecErrorKind::TooDeep => write!(f, "nesting too deep"),
            CodecErrorKind::Shape(msg) => write!(f, "{}", msg),
        }
    }
}
