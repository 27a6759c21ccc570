//! Domain values exchanged with the entity service.
//!
//! # Design
//! Field payloads are an ordered association list of names to a tagged
//! `FieldValue`, so every value the client puts on the wire has a known shape.
//! Entities coming back are plain JSON maps: the server decides which
//! columns exist, and the caller owns whatever it receives.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, Result};

/// An entity as returned by the service: column name to JSON value.
pub type Entity = serde_json::Map<String, Value>;

/// Locator of a single record in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: i64,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }
}

/// A single field value in a filter or mutation payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Entity(EntityRef),
    MultiEntity(Vec<EntityRef>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Convert an arbitrary JSON value, recognising entity references.
    ///
    /// Objects are only accepted when they carry a string `type` and an
    /// integer `id`; anything else is rejected.
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(items) => {
                let refs: Option<Vec<EntityRef>> = items.iter().map(entity_ref_from_json).collect();
                match refs {
                    Some(refs) if !refs.is_empty() => FieldValue::MultiEntity(refs),
                    _ => FieldValue::List(items.iter().map(FieldValue::from_json).collect::<Result<_>>()?),
                }
            }
            Value::Object(_) => match entity_ref_from_json(value) {
                Some(entity) => FieldValue::Entity(entity),
                None => {
                    return Err(ApiError::Validation(format!(
                        "cannot use object as a field value, expected an entity reference with 'type' and 'id': {value}"
                    )))
                }
            },
        })
    }
}

fn entity_ref_from_json(value: &Value) -> Option<EntityRef> {
    let obj = value.as_object()?;
    let entity_type = obj.get("type")?.as_str()?;
    let id = obj.get("id")?.as_i64()?;
    Some(EntityRef::new(entity_type, id))
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v.into())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(v: NaiveDate) -> Self {
        FieldValue::Date(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::DateTime(v)
    }
}

impl From<EntityRef> for FieldValue {
    fn from(v: EntityRef) -> Self {
        FieldValue::Entity(v)
    }
}

impl From<Vec<EntityRef>> for FieldValue {
    fn from(v: Vec<EntityRef>) -> Self {
        FieldValue::MultiEntity(v)
    }
}

/// One `{field_name, value}` pair of a create/update payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldEntry {
    pub field_name: String,
    pub value: FieldValue,
}

/// One `{property_name, value}` pair of a schema payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyEntry {
    pub property_name: String,
    pub value: FieldValue,
}

/// Ordered field name to value association list.
///
/// Inserting an existing name replaces the value but keeps its position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, FieldValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Build from a JSON object, keeping the object's iteration order.
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            ApiError::Validation(format!("expected a field/value object, got {}", json_type_name(value)))
        })?;
        let mut map = FieldMap::new();
        for (k, v) in obj {
            map.insert(k.clone(), FieldValue::from_json(v)?);
        }
        Ok(map)
    }

    pub fn to_field_list(&self) -> Vec<FieldEntry> {
        self.iter()
            .map(|(k, v)| FieldEntry {
                field_name: k.to_string(),
                value: v.clone(),
            })
            .collect()
    }

    pub fn to_property_list(&self) -> Vec<PropertyEntry> {
        self.iter()
            .map(|(k, v)| PropertyEntry {
                property_name: k.to_string(),
                value: v.clone(),
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Human-readable JSON type name, used in validation messages.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Python-style truthiness of a JSON value.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_keeps_caller_key_order() {
        let map = FieldMap::from_json(&json!({"sg_status_list": "ip", "code": "A1", "description": "tree"})).unwrap();
        let names: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["sg_status_list", "code", "description"]);
        let wire = serde_json::to_string(&map.to_field_list()).unwrap();
        assert!(wire.find("sg_status_list").unwrap() < wire.find("\"code\"").unwrap());
    }

    #[test]
    fn field_value_serializes_untagged() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(serde_json::to_value(FieldValue::from("A1")).unwrap(), json!("A1"));
        assert_eq!(serde_json::to_value(FieldValue::Null).unwrap(), Value::Null);
        assert_eq!(serde_json::to_value(FieldValue::from(date)).unwrap(), json!("2024-03-01"));
        assert_eq!(
            serde_json::to_value(FieldValue::from(EntityRef::new("Project", 4))).unwrap(),
            json!({"type": "Project", "id": 4})
        );
    }

    #[test]
    fn datetime_serializes_as_rfc3339() {
        let dt = DateTime::parse_from_rfc3339("2024-03-01T10:20:30Z").unwrap().with_timezone(&Utc);
        let v = serde_json::to_value(FieldValue::from(dt)).unwrap();
        assert_eq!(v, json!("2024-03-01T10:20:30Z"));
    }

    #[test]
    fn from_json_recognises_entity_references() {
        let v = FieldValue::from_json(&json!({"type": "Shot", "id": 7, "name": "sh010"})).unwrap();
        assert_eq!(v, FieldValue::Entity(EntityRef::new("Shot", 7)));

        let v = FieldValue::from_json(&json!([{"type": "Shot", "id": 7}, {"type": "Shot", "id": 8}])).unwrap();
        assert_eq!(
            v,
            FieldValue::MultiEntity(vec![EntityRef::new("Shot", 7), EntityRef::new("Shot", 8)])
        );
    }

    #[test]
    fn from_json_keeps_plain_lists() {
        let v = FieldValue::from_json(&json!(["a", 1, 2.5])).unwrap();
        assert_eq!(
            v,
            FieldValue::List(vec![FieldValue::from("a"), FieldValue::Int(1), FieldValue::Float(2.5)])
        );
    }

    #[test]
    fn from_json_rejects_arbitrary_objects() {
        let err = FieldValue::from_json(&json!({"foo": 1})).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn field_map_keeps_insertion_order_and_replaces_in_place() {
        let mut map = FieldMap::new().with("code", "A1").with("description", "first");
        map.insert("code", "A2");
        let names: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["code", "description"]);
        assert_eq!(map.get("code"), Some(&FieldValue::from("A2")));
    }

    #[test]
    fn field_list_wire_shape() {
        let map: FieldMap = [("code", "A1"), ("sg_status", "ip")].into_iter().collect();
        let v = serde_json::to_value(map.to_field_list()).unwrap();
        assert_eq!(
            v,
            json!([
                {"field_name": "code", "value": "A1"},
                {"field_name": "sg_status", "value": "ip"}
            ])
        );
    }

    #[test]
    fn truthiness_matches_empty_values() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!(12)));
        assert!(is_truthy(&json!({"id": 1})));
    }
}
