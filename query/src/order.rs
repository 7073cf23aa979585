//! Order-by parsing and application (spec §4.1 "Order semantics").

use serde_json::Value;
use std::cmp::Ordering;

use crate::{error::QueryError, filter::Filterable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderKey {
    pub field: String,
    pub direction: Direction,
}

/// Accepted forms: a single `"field dir"` string, an object `{field: dir}`,
/// or a list of either. Multi-key sorts are applied right-to-left (last key
/// least significant) so the parsed order preserves clause order and the
/// sorter walks it in reverse.
pub fn parse_order(value: &Value) -> Result<Vec<OrderKey>, QueryError> {
    match value {
        Value::String(s) => Ok(vec![parse_order_string(s)?]),
        Value::Object(map) => map.iter().map(|(field, dir)| parse_order_pair(field, dir)).collect(),
        Value::Array(items) => {
            let mut keys = Vec::new();
            for item in items {
                keys.extend(parse_order(item)?);
            }
            Ok(keys)
        }
        other => Err(QueryError::InvalidOrder(format!("unsupported order clause: {other}"))),
    }
}

fn parse_order_string(s: &str) -> Result<OrderKey, QueryError> {
    let mut parts = s.split_whitespace();
    let field = parts.next().ok_or_else(|| QueryError::InvalidOrder("empty order string".into()))?.to_string();
    let direction = match parts.next() {
        None => Direction::Asc,
        Some(d) => parse_direction(d)?,
    };
    Ok(OrderKey { field, direction })
}

fn parse_order_pair(field: &str, dir: &Value) -> Result<OrderKey, QueryError> {
    let direction = match dir {
        Value::String(s) => parse_direction(s)?,
        Value::Null => Direction::Asc,
        other => return Err(QueryError::InvalidOrder(format!("unsupported direction: {other}"))),
    };
    Ok(OrderKey { field: field.to_string(), direction })
}

fn parse_direction(s: &str) -> Result<Direction, QueryError> {
    match s.to_ascii_lowercase().as_str() {
        "asc" => Ok(Direction::Asc),
        "desc" => Ok(Direction::Desc),
        other => Err(QueryError::InvalidOrder(format!("unknown direction: {other}"))),
    }
}

/// `null` sorts last under `asc`, first under `desc` (spec §4.1).
fn compare_one<F: Filterable>(a: &F, b: &F, key: &OrderKey) -> Ordering {
    let av = a.get(&key.field);
    let bv = b.get(&key.field);
    let ordering = match (av, bv) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), Some(_)) => Ordering::Greater,
        (Some(_), None | Some(Value::Null)) => Ordering::Less,
        (Some(a), Some(b)) => crate::filter::compare_values(a, b).unwrap_or(Ordering::Equal),
    };
    match key.direction {
        Direction::Asc => ordering,
        Direction::Desc => ordering.reverse(),
    }
}

/// Stable sort applying all keys, right-to-left (spec §4.1).
pub fn sort_by_keys<F: Filterable + Clone>(items: &mut [F], keys: &[OrderKey]) {
    for key in keys.iter().rev() {
        items.sort_by(|a, b| compare_one(a, b, key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone)]
    struct Row(serde_json::Map<String, Value>);
    impl Filterable for Row {
        fn get(&self, name: &str) -> Option<&Value> { self.0.get(name) }
    }
    fn row(v: Value) -> Row { Row(v.as_object().unwrap().clone()) }

    #[test]
    fn parses_string_form() {
        let keys = parse_order(&json!("views desc")).unwrap();
        assert_eq!(keys[0].field, "views");
        assert_eq!(keys[0].direction, Direction::Desc);
    }

    #[test]
    fn nulls_sort_last_asc_first_desc() {
        let mut items = vec![row(json!({"v": 1})), row(json!({"v": null})), row(json!({"v": 2}))];
        sort_by_keys(&mut items, &[OrderKey { field: "v".into(), direction: Direction::Asc }]);
        assert_eq!(items[2].0.get("v").unwrap(), &Value::Null);

        let mut items = vec![row(json!({"v": 1})), row(json!({"v": null})), row(json!({"v": 2}))];
        sort_by_keys(&mut items, &[OrderKey { field: "v".into(), direction: Direction::Desc }]);
        assert_eq!(items[0].0.get("v").unwrap(), &Value::Null);
    }
}
