//! `$aggregate` / `$groupBy` support (spec §4.1 "Aggregation").

use serde_json::{Map, Value};

use crate::{error::QueryError, filter::compare_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Reducer {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "count" => Some(Reducer::Count),
            "sum" => Some(Reducer::Sum),
            "avg" => Some(Reducer::Avg),
            "min" => Some(Reducer::Min),
            "max" => Some(Reducer::Max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregateField {
    /// Key under which the reduced value is written in the result row.
    pub output: String,
    pub reducer: Reducer,
    /// Attribute name, or `"*"` for `count`.
    pub arg: String,
}

/// `$aggregate` accepts `{reducer: attr}` (output key = reducer name, e.g.
/// `{"count": "*"}`) or `{output_name: {reducer: attr}}` for custom names
/// or multiple reducers of the same kind.
pub fn parse_aggregate(value: &Value) -> Result<Vec<AggregateField>, QueryError> {
    let map = value.as_object().ok_or_else(|| QueryError::InvalidAggregate("must be an object".into()))?;
    map.iter()
        .map(|(key, val)| {
            if let Some(reducer) = Reducer::parse(key.as_str()) {
                let arg = val.as_str().unwrap_or("*").to_string();
                Ok(AggregateField { output: key.clone(), reducer, arg })
            } else if let Some(inner) = val.as_object() {
                let (rk, arg_val) =
                    inner.iter().next().ok_or_else(|| QueryError::InvalidAggregate(format!("empty reducer spec for `{key}`")))?;
                let reducer = Reducer::parse(rk.as_str()).ok_or_else(|| QueryError::InvalidAggregate(format!("unknown reducer `{rk}`")))?;
                let arg = arg_val.as_str().unwrap_or("*").to_string();
                Ok(AggregateField { output: key.clone(), reducer, arg })
            } else {
                Err(QueryError::InvalidAggregate(format!("cannot interpret `{key}`")))
            }
        })
        .collect()
}

fn numeric(v: &Value) -> Option<f64> { v.as_f64() }

fn reduce(entities: &[Map<String, Value>], field: &AggregateField) -> Value {
    match field.reducer {
        Reducer::Count if field.arg == "*" => Value::from(entities.len()),
        Reducer::Count => Value::from(entities.iter().filter(|e| e.get(field.arg.as_str()).is_some()).count()),
        Reducer::Sum => {
            let total: f64 = entities.iter().filter_map(|e| e.get(field.arg.as_str())).filter_map(numeric).sum();
            serde_json::Number::from_f64(total).map(Value::Number).unwrap_or(Value::Null)
        }
        Reducer::Avg => {
            let vals: Vec<f64> = entities.iter().filter_map(|e| e.get(field.arg.as_str())).filter_map(numeric).collect();
            if vals.is_empty() {
                Value::Null
            } else {
                let avg = vals.iter().sum::<f64>() / vals.len() as f64;
                serde_json::Number::from_f64(avg).map(Value::Number).unwrap_or(Value::Null)
            }
        }
        Reducer::Min => entities
            .iter()
            .filter_map(|e| e.get(field.arg.as_str()))
            .min_by(|a, b| compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
            .unwrap_or(Value::Null),
        Reducer::Max => entities
            .iter()
            .filter_map(|e| e.get(field.arg.as_str()))
            .max_by(|a, b| compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

/// Group by the distinct tuple of `group_by` field values (insertion order of
/// first appearance), reducing each group with `fields`. Without
/// `group_by`, produces exactly one row over the whole set (spec §4.1).
pub fn apply_aggregate(entities: &[Map<String, Value>], fields: &[AggregateField], group_by: &[String]) -> Vec<Map<String, Value>> {
    if group_by.is_empty() {
        let mut row = Map::new();
        for field in fields {
            row.insert(field.output.clone(), reduce(entities, field));
        }
        return vec![row];
    }

    let mut groups: Vec<(Vec<Value>, Vec<Map<String, Value>>)> = Vec::new();
    for entity in entities {
        let key: Vec<Value> = group_by.iter().map(|g| entity.get(g.as_str()).cloned().unwrap_or(Value::Null)).collect();
        match groups.iter_mut().find(|(k, _)| k == &key) {
            Some((_, bucket)) => bucket.push(entity.clone()),
            None => groups.push((key, vec![entity.clone()])),
        }
    }

    groups
        .into_iter()
        .map(|(key, bucket)| {
            let mut row = Map::new();
            for (name, value) in group_by.iter().zip(key) {
                row.insert(name.clone(), value);
            }
            for field in fields {
                row.insert(field.output.clone(), reduce(&bucket, field));
            }
            row
        })
        .collect()
}
