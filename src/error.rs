//! Error types for RespVault

use thiserror::Error;
use std::io;

/// Result type alias for RespVault operations
pub type Result<T> = std::result::Result<T, RespVaultError>;

/// Custom error types for RespVault
#[derive(Error, Debug)]
pub enum RespVaultError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Replay failed at record {record} (byte {offset}): {reason}")]
    Replay {
        record: u64,
        offset: u64,
        reason: String,
    },

    #[error("WAL error: {0}")]
    Wal(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),
}

/// Command-level failures. These never end a connection: the engine turns
/// them into Error values and the `Display` text is what the client sees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR value is not an integer")]
    NotAnInteger,

    #[error("ERR increment or decrement would overflow")]
    Overflow,
}

impl RespVaultError {
    /// True when the error means the peer went away mid-value rather than
    /// sending something malformed.
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, RespVaultError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for RespVaultError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => RespVaultError::Protocol("incomplete input".to_string()),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                RespVaultError::Protocol(format!("Parse error: {:?}", e.code))
            }
        }
    }
}
