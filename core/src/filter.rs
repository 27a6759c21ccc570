//! Query filters and their normalization into the wire form.
//!
//! Callers may pass either the structured form (a logical operator plus a
//! list of conditions) or the legacy flat shorthand
//! `[[path, relation, v1, v2, ...], ...]`. The service only understands the
//! structured form, so shorthand is normalized before a read is sent.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ApiError, Result};
use crate::types::{json_type_name, FieldValue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// Comparison applied by a condition.
///
/// Unknown relation names are carried verbatim in `Other` so newer server
/// relations keep working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Is,
    IsNot,
    LessThan,
    GreaterThan,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Between,
    In,
    NotIn,
    InLast,
    NotInLast,
    InNext,
    NotInNext,
    TypeIs,
    TypeIsNot,
    NameContains,
    NameIs,
    Other(String),
}

impl Relation {
    pub fn as_str(&self) -> &str {
        match self {
            Relation::Is => "is",
            Relation::IsNot => "is_not",
            Relation::LessThan => "less_than",
            Relation::GreaterThan => "greater_than",
            Relation::Contains => "contains",
            Relation::NotContains => "not_contains",
            Relation::StartsWith => "starts_with",
            Relation::EndsWith => "ends_with",
            Relation::Between => "between",
            Relation::In => "in",
            Relation::NotIn => "not_in",
            Relation::InLast => "in_last",
            Relation::NotInLast => "not_in_last",
            Relation::InNext => "in_next",
            Relation::NotInNext => "not_in_next",
            Relation::TypeIs => "type_is",
            Relation::TypeIsNot => "type_is_not",
            Relation::NameContains => "name_contains",
            Relation::NameIs => "name_is",
            Relation::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "is" => Relation::Is,
            "is_not" => Relation::IsNot,
            "less_than" => Relation::LessThan,
            "greater_than" => Relation::GreaterThan,
            "contains" => Relation::Contains,
            "not_contains" => Relation::NotContains,
            "starts_with" => Relation::StartsWith,
            "ends_with" => Relation::EndsWith,
            "between" => Relation::Between,
            "in" => Relation::In,
            "not_in" => Relation::NotIn,
            "in_last" => Relation::InLast,
            "not_in_last" => Relation::NotInLast,
            "in_next" => Relation::InNext,
            "not_in_next" => Relation::NotInNext,
            "type_is" => Relation::TypeIs,
            "type_is_not" => Relation::TypeIsNot,
            "name_contains" => Relation::NameContains,
            "name_is" => Relation::NameIs,
            other => Relation::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Relation {
    fn from(s: &str) -> Self {
        Relation::parse(s)
    }
}

impl Serialize for Relation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// `{path, relation, values}` as sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub path: String,
    pub relation: Relation,
    pub values: Vec<FieldValue>,
}

impl Condition {
    pub fn new(path: impl Into<String>, relation: impl Into<Relation>, values: Vec<FieldValue>) -> Self {
        Self {
            path: path.into(),
            relation: relation.into(),
            values,
        }
    }

    /// Shortcut for the common `path is value` condition.
    pub fn is(path: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(path, Relation::Is, vec![value.into()])
    }
}

/// Structured filter: every condition combined with one logical operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterGroup {
    pub logical_operator: LogicalOperator,
    pub conditions: Vec<Condition>,
}

impl FilterGroup {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self {
            logical_operator: LogicalOperator::And,
            conditions,
        }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self {
            logical_operator: LogicalOperator::Or,
            conditions,
        }
    }
}

/// Filters accepted by `find`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filters {
    /// Legacy `[path, relation, v1, v2, ...]` rows.
    Shorthand(Vec<Vec<Value>>),
    Structured(FilterGroup),
}

impl Default for Filters {
    fn default() -> Self {
        Filters::Shorthand(Vec::new())
    }
}

impl From<FilterGroup> for Filters {
    fn from(group: FilterGroup) -> Self {
        Filters::Structured(group)
    }
}

impl Filters {
    /// Match every entity.
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse filters from JSON: an array is shorthand, an object is structured.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Array(rows) => {
                let rows = rows
                    .iter()
                    .map(|row| {
                        row.as_array().cloned().ok_or_else(|| {
                            ApiError::Validation(format!("filter row must be an array, got {}", json_type_name(row)))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Filters::Shorthand(rows))
            }
            Value::Object(obj) => {
                let logical_operator = match obj.get("logical_operator") {
                    None | Some(Value::Null) => LogicalOperator::And,
                    Some(Value::String(op)) if op == "and" => LogicalOperator::And,
                    Some(Value::String(op)) if op == "or" => LogicalOperator::Or,
                    Some(other) => {
                        return Err(ApiError::Validation(format!("unknown logical operator {other}")))
                    }
                };
                let conditions = match obj.get("conditions") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items.iter().map(condition_from_json).collect::<Result<_>>()?,
                    Some(other) => {
                        return Err(ApiError::Validation(format!(
                            "filter conditions must be an array, got {}",
                            json_type_name(other)
                        )))
                    }
                };
                Ok(Filters::Structured(FilterGroup {
                    logical_operator,
                    conditions,
                }))
            }
            other => Err(ApiError::Validation(format!(
                "filters must be an array or an object, got {}",
                json_type_name(other)
            ))),
        }
    }
}

fn condition_from_json(value: &Value) -> Result<Condition> {
    let path = value.get("path").and_then(Value::as_str);
    let relation = value.get("relation").and_then(Value::as_str);
    let (Some(path), Some(relation)) = (path, relation) else {
        return Err(ApiError::Validation(format!(
            "filter condition needs string 'path' and 'relation': {value}"
        )));
    };
    let values = match value.get("values") {
        Some(Value::Array(items)) => items.iter().map(FieldValue::from_json).collect::<Result<_>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(single) => vec![FieldValue::from_json(single)?],
    };
    Ok(Condition::new(path, relation, values))
}

/// Turn caller filters into the structured wire form.
///
/// `filter_operator` only applies to shorthand: absent, empty or `"all"`
/// means `and`, anything else means `or`. Combining it with structured
/// filters is rejected.
pub fn normalize(filters: &Filters, filter_operator: Option<&str>) -> Result<FilterGroup> {
    let filter_operator = filter_operator.filter(|op| !op.is_empty());
    match filters {
        Filters::Structured(group) => {
            if filter_operator.is_some() {
                return Err(ApiError::Validation(
                    "Deprecated: Use of filter_operator for find() is not valid any more. \
                     Use the logical_operator of a structured filter instead."
                        .to_string(),
                ));
            }
            Ok(group.clone())
        }
        Filters::Shorthand(rows) => {
            let logical_operator = match filter_operator {
                None | Some("all") => LogicalOperator::And,
                Some(_) => LogicalOperator::Or,
            };
            let conditions = rows.iter().map(|row| shorthand_condition(row)).collect::<Result<_>>()?;
            Ok(FilterGroup {
                logical_operator,
                conditions,
            })
        }
    }
}

fn shorthand_condition(row: &[Value]) -> Result<Condition> {
    match row {
        [Value::String(path), Value::String(relation), values @ ..] => {
            let values = values.iter().map(FieldValue::from_json).collect::<Result<_>>()?;
            Ok(Condition::new(path.as_str(), relation.as_str(), values))
        }
        _ => Err(ApiError::Validation(format!(
            "filter must start with a field path and a relation: {}",
            Value::Array(row.to_vec())
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn shorthand_normalizes_to_and_by_default() {
        let filters = Filters::Shorthand(vec![vec![json!("code"), json!("is"), json!("A1")]]);
        let group = normalize(&filters, None).unwrap();
        assert_eq!(
            serde_json::to_value(&group).unwrap(),
            json!({
                "logical_operator": "and",
                "conditions": [{"path": "code", "relation": "is", "values": ["A1"]}]
            })
        );
    }

    #[test]
    fn shorthand_with_any_operator_becomes_or() {
        let filters = Filters::Shorthand(vec![
            vec![json!("id"), json!("between"), json!(1), json!(5)],
            vec![json!("code"), json!("contains"), json!("hero")],
        ]);
        let group = normalize(&filters, Some("any")).unwrap();
        assert_eq!(group.logical_operator, LogicalOperator::Or);
        assert_eq!(group.conditions[0].values, vec![FieldValue::Int(1), FieldValue::Int(5)]);
        assert_eq!(group.conditions[1].relation, Relation::Contains);
    }

    #[test]
    fn all_operator_is_and() {
        let group = normalize(&Filters::none(), Some("all")).unwrap();
        assert_eq!(group.logical_operator, LogicalOperator::And);
        assert!(group.conditions.is_empty());
    }

    #[test]
    fn structured_with_filter_operator_is_rejected() {
        let filters = Filters::from(FilterGroup::all(vec![Condition::is("code", "A1")]));
        let err = normalize(&filters, Some("any")).unwrap_err();
        assert!(err.to_string().starts_with("Deprecated"));
    }

    #[test]
    fn structured_passes_through() {
        let group = FilterGroup::any(vec![Condition::is("code", "A1"), Condition::is("code", "A2")]);
        let out = normalize(&Filters::from(group.clone()), None).unwrap();
        assert_eq!(out, group);
    }

    #[test]
    fn short_rows_are_rejected() {
        let filters = Filters::Shorthand(vec![vec![json!("code")]]);
        assert!(matches!(normalize(&filters, None), Err(ApiError::Validation(_))));
    }

    #[test]
    fn unknown_relations_pass_through_verbatim() {
        let c = Condition::new("sg_tags", "in_calendar_month", vec![FieldValue::Int(0)]);
        assert_eq!(
            serde_json::to_value(&c).unwrap(),
            json!({"path": "sg_tags", "relation": "in_calendar_month", "values": [0]})
        );
    }

    #[test]
    fn from_json_reads_both_forms() {
        let shorthand = Filters::from_json(&json!([["code", "is", "A1"]])).unwrap();
        assert!(matches!(shorthand, Filters::Shorthand(ref rows) if rows.len() == 1));

        let structured = Filters::from_json(&json!({
            "logical_operator": "or",
            "conditions": [{"path": "id", "relation": "in", "values": [1, 2]}]
        }))
        .unwrap();
        let Filters::Structured(group) = structured else {
            panic!("expected structured filters");
        };
        assert_eq!(group.logical_operator, LogicalOperator::Or);
        assert_eq!(group.conditions[0].values.len(), 2);
    }

    #[test]
    fn conditions_that_are_not_a_list_are_rejected() {
        let err = Filters::from_json(&json!({
            "logical_operator": "and",
            "conditions": {"path": "code", "relation": "is", "values": ["A1"]}
        }))
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref msg) if msg.contains("conditions")));
    }

    #[test]
    fn non_string_logical_operator_is_rejected() {
        let err = Filters::from_json(&json!({"logical_operator": 5, "conditions": []})).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    proptest! {
        #[test]
        fn shorthand_normalization_preserves_rows(
            rows in prop::collection::vec(("[a-z_]{1,8}", "[a-z_]{1,10}", prop::collection::vec(any::<i64>(), 0..4)), 0..6),
            op in prop::option::of(prop_oneof![Just("all".to_string()), Just("any".to_string()), "[a-z]{1,5}"]),
        ) {
            let filters = Filters::Shorthand(
                rows.iter()
                    .map(|(p, r, vs)| {
                        let mut row = vec![json!(p), json!(r)];
                        row.extend(vs.iter().map(|v| json!(v)));
                        row
                    })
                    .collect(),
            );
            let group = normalize(&filters, op.as_deref()).unwrap();
            let expected_op = match op.as_deref() {
                None | Some("all") => LogicalOperator::And,
                Some(_) => LogicalOperator::Or,
            };
            prop_assert_eq!(group.logical_operator, expected_op);
            prop_assert_eq!(group.conditions.len(), rows.len());
            for (cond, (p, r, vs)) in group.conditions.iter().zip(rows.iter()) {
                prop_assert_eq!(&cond.path, p);
                prop_assert_eq!(cond.relation.as_str(), r.as_str());
                let expected: Vec<FieldValue> = vs.iter().map(|v| FieldValue::Int(*v)).collect();
                prop_assert_eq!(&cond.values, &expected);
            }
        }
    }
}
