//! InstaQL-shaped query description: parsing, where-clause evaluation,
//! ordering, pagination, and aggregation over EAV entity maps.
//!
//! This crate is storage-agnostic: it knows how to interpret a query
//! description and evaluate it against anything implementing [`Filterable`],
//! but holds no entities itself. `driftbase-core`'s Query Engine owns
//! materialization and wires this crate's primitives together.

pub mod aggregate;
pub mod error;
pub mod filter;
pub mod include;
pub mod order;
pub mod query_desc;

pub use aggregate::{apply_aggregate, parse_aggregate, AggregateField, Reducer};
pub use error::QueryError;
pub use filter::{compare_values, matches, Filterable};
pub use include::{foreign_key_for_many, is_plural, parent_foreign_key_for_one, target_namespace_for_one};
pub use order::{parse_order, sort_by_keys, Direction, OrderKey};
pub use query_desc::{NamespaceQuery, QueryDescription};
