use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
    #[error("invalid length")]
    InvalidLength,
}
