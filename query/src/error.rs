use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("query description must be a JSON object keyed by namespace")]
    NotAnObject,
    #[error("namespace `{0}` node must be a JSON object")]
    NamespaceNotAnObject(String),
    #[error("invalid `order`/`orderBy` clause: {0}")]
    InvalidOrder(String),
    #[error("invalid `$aggregate` clause: {0}")]
    InvalidAggregate(String),
}
