//! Structural predicates over catalog documents.

use serde_json::Value;

use tilestore_common::{StoreError, StoreResult};

/// A filter over dotted field paths of a descriptor document.
///
/// Only equality, set membership and inclusive numeric ranges are supported.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Range {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Filter::Range {
            field: field.into(),
            min,
            max,
        }
    }

    /// Conjunction of `self` and `other`.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Evaluate against a document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { field, value } => {
                lookup(doc, field).is_some_and(|v| values_equal(v, value))
            }
            Filter::In { field, values } => lookup(doc, field)
                .is_some_and(|v| values.iter().any(|candidate| values_equal(v, candidate))),
            Filter::Range { field, min, max } => match lookup(doc, field).and_then(Value::as_f64) {
                Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
                None => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }

    /// Parse the JSON query form.
    ///
    /// ```json
    /// {"year": 2024, "provider": {"$in": ["usgs", "esa"]}, "date": {"$gte": 20240101}}
    /// ```
    pub fn from_json(query: &Value) -> StoreResult<Self> {
        let object = query
            .as_object()
            .ok_or_else(|| StoreError::Config(format!("filter must be an object: {}", query)))?;

        let mut filter = Filter::All;
        for (field, condition) in object {
            filter = filter.and(parse_condition(field, condition)?);
        }
        Ok(filter)
    }
}

fn parse_condition(field: &str, condition: &Value) -> StoreResult<Filter> {
    let Some(ops) = condition.as_object().filter(|o| o.keys().all(|k| k.starts_with('$'))) else {
        return Ok(Filter::eq(field, condition.clone()));
    };

    let mut filter = Filter::All;
    let mut min = None;
    let mut max = None;
    for (op, operand) in ops {
        match op.as_str() {
            "$eq" => filter = filter.and(Filter::eq(field, operand.clone())),
            "$in" => {
                let values = operand.as_array().ok_or_else(|| {
                    StoreError::Config(format!("$in on '{}' expects an array", field))
                })?;
                filter = filter.and(Filter::is_in(field, values.iter().cloned()));
            }
            "$gte" | "$lte" => {
                let bound = operand.as_f64().ok_or_else(|| {
                    StoreError::Config(format!("{} on '{}' expects a number", op, field))
                })?;
                if op == "$gte" {
                    min = Some(bound);
                } else {
                    max = Some(bound);
                }
            }
            other => {
                return Err(StoreError::Config(format!(
                    "unsupported filter operator '{}' on '{}'",
                    other, field
                )))
            }
        }
    }
    if min.is_some() || max.is_some() {
        filter = filter.and(Filter::range(field, min, max));
    }
    Ok(filter)
}

/// Resolve a dotted path such as `backend.endpoint`.
pub fn lookup<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(doc, |value, segment| value.get(segment))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "kind": "image",
            "year": 2024,
            "date": 20240315,
            "provider": "usgs",
            "backend": { "endpoint": "local" }
        })
    }

    #[test]
    fn test_eq_and_nested() {
        assert!(Filter::eq("year", 2024).matches(&doc()));
        assert!(Filter::eq("year", 2024.0).matches(&doc()));
        assert!(Filter::eq("backend.endpoint", "local").matches(&doc()));
        assert!(!Filter::eq("provider", "esa").matches(&doc()));
        assert!(!Filter::eq("missing", 1).matches(&doc()));
    }

    #[test]
    fn test_in_and_range() {
        assert!(Filter::is_in("provider", ["esa", "usgs"]).matches(&doc()));
        assert!(Filter::range("date", Some(20240101.0), Some(20241231.0)).matches(&doc()));
        assert!(!Filter::range("date", None, Some(20231231.0)).matches(&doc()));
        assert!(!Filter::range("provider", Some(0.0), None).matches(&doc()));
    }

    #[test]
    fn test_from_json() {
        let filter = Filter::from_json(&json!({
            "kind": "image",
            "provider": {"$in": ["usgs", "esa"]},
            "date": {"$gte": 20240101, "$lte": 20240331}
        }))
        .unwrap();
        assert!(filter.matches(&doc()));

        let filter = Filter::from_json(&json!({"date": {"$gte": 20250101}})).unwrap();
        assert!(!filter.matches(&doc()));

        assert!(Filter::from_json(&json!({"date": {"$regex": "2024.*"}})).is_err());
        assert!(Filter::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_and_flattens() {
        let f = Filter::All
            .and(Filter::eq("a", 1))
            .and(Filter::eq("b", 2))
            .and(Filter::All);
        assert_eq!(f, Filter::And(vec![Filter::eq("a", 1), Filter::eq("b", 2)]));
    }
}
