//! Error types for address allocation

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for allocator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Allocator errors
///
/// Every variant carries a human-readable description of what went wrong.
/// None of them are retried inside the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed address or CIDR, prefix length out of range, family mismatch
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transition not legal from the address's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Block full: {0}")]
    BlockFull(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Detach of a block the client does not own
    #[error("Not associated: {0}")]
    NotAssociated(String),

    #[error("Block not empty: {0}")]
    BlockNotEmpty(String),

    /// The persistence gateway failed or timed out
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Payload-free classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    InvalidState,
    PoolExhausted,
    BlockFull,
    NotFound,
    NotAssociated,
    BlockNotEmpty,
    StorageUnavailable,
}

impl ErrorKind {
    /// Response code the request layer reports for this kind
    pub fn response_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidArgument => 400,
            ErrorKind::NotAssociated => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState => 409,
            ErrorKind::BlockNotEmpty => 412,
            ErrorKind::StorageUnavailable => 503,
            ErrorKind::PoolExhausted => 507,
            ErrorKind::BlockFull => 508,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::BlockFull => "block_full",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotAssociated => "not_associated",
            ErrorKind::BlockNotEmpty => "block_not_empty",
            ErrorKind::StorageUnavailable => "storage_unavailable",
        };
        write!(f, "{}", name)
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::PoolExhausted(_) => ErrorKind::PoolExhausted,
            Error::BlockFull(_) => ErrorKind::BlockFull,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::NotAssociated(_) => ErrorKind::NotAssociated,
            Error::BlockNotEmpty(_) => ErrorKind::BlockNotEmpty,
            Error::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
        }
    }

    /// Shorthand for `self.kind().response_code()`
    pub fn response_code(&self) -> u16 {
        self.kind().response_code()
    }
}

impl From<ipnet::PrefixLenError> for Error {
    fn from(e: ipnet::PrefixLenError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

impl From<ipnet::AddrParseError> for Error {
    fn from(e: ipnet::AddrParseError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::InvalidArgument(format!("config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_response_codes_are_distinct() {
        let kinds = [
            ErrorKind::InvalidArgument,
            ErrorKind::InvalidState,
            ErrorKind::PoolExhausted,
            ErrorKind::BlockFull,
            ErrorKind::NotFound,
            ErrorKind::NotAssociated,
            ErrorKind::BlockNotEmpty,
            ErrorKind::StorageUnavailable,
        ];

        let codes: HashSet<u16> = kinds.iter().map(|k| k.response_code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_kind_matches_variant() {
        let err = Error::BlockFull("192.0.2.0/30".to_string());
        assert_eq!(err.kind(), ErrorKind::BlockFull);
        assert_eq!(err.response_code(), 508);
        assert_eq!(err.to_string(), "Block full: 192.0.2.0/30");
    }

    #[test]
    fn test_parse_errors_are_invalid_argument() {
        let err: Error = "not-an-ip".parse::<std::net::IpAddr>().unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err: Error = "10.0.0.0/99".parse::<ipnet::IpNet>().unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
