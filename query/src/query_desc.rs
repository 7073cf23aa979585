//! Top-level query description parsing and canonical serialization (spec §3.1, §4.3).

use serde_json::Value;
use std::collections::BTreeMap;

use crate::{
    aggregate::{parse_aggregate, AggregateField},
    error::QueryError,
    order::{parse_order, OrderKey},
};

#[derive(Debug, Clone)]
pub struct NamespaceQuery {
    pub where_clause: Option<Value>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// relation name -> raw sub-query description (parsed lazily by the
    /// include-expansion step, which needs store access).
    pub include: BTreeMap<String, Value>,
    pub aggregate: Option<Vec<AggregateField>>,
    pub group_by: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueryDescription {
    pub namespaces: BTreeMap<String, NamespaceQuery>,
    raw: Value,
}

impl QueryDescription {
    pub fn parse(desc: &Value) -> Result<Self, QueryError> {
        let top = desc.as_object().ok_or(QueryError::NotAnObject)?;
        let mut namespaces = BTreeMap::new();
        for (ns, node) in top {
            let node_obj = node.as_object().ok_or_else(|| QueryError::NamespaceNotAnObject(ns.clone()))?;

            let where_clause = node_obj.get("where").cloned();

            let order_by = match node_obj.get("order").or_else(|| node_obj.get("orderBy")) {
                Some(v) => parse_order(v)?,
                None => Vec::new(),
            };

            let limit = node_obj.get("limit").and_then(Value::as_u64).map(|n| n as usize);
            let offset = node_obj.get("offset").and_then(Value::as_u64).map(|n| n as usize);

            let include = node_obj
                .get("include")
                .and_then(Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();

            let aggregate = match node_obj.get("$aggregate") {
                Some(v) => Some(parse_aggregate(v)?),
                None => None,
            };

            let group_by = match node_obj.get("$groupBy") {
                Some(Value::String(s)) => vec![s.clone()],
                Some(Value::Array(arr)) => arr.iter().filter_map(Value::as_str).map(str::to_string).collect(),
                _ => Vec::new(),
            };

            namespaces.insert(ns.clone(), NamespaceQuery { where_clause, order_by, limit, offset, include, aggregate, group_by });
        }
        Ok(Self { namespaces, raw: desc.clone() })
    }

    /// The canonical serialization of the raw description, used as the
    /// Query Engine's cache key (spec §4.3). `serde_json::Map` is backed by
    /// a `BTreeMap` by default (no `preserve_order` feature enabled in this
    /// workspace), so plain `to_string` already yields key-sorted, stable
    /// output across equivalent descriptions.
    pub fn cache_key(&self) -> String { self.raw.to_string() }

    pub fn raw(&self) -> &Value { &self.raw }
}
