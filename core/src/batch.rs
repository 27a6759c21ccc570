//! Batch operations and their translation into the `batch` call arguments.
//!
//! Operations can be built with the typed constructors or parsed from JSON
//! maps carrying a `request_type` discriminator. Parsing checks the required
//! keys of each kind before anything is sent and names every missing key.

use serde::Serialize;
use serde_json::Value;

use crate::error::{ApiError, Result};
use crate::types::{json_type_name, FieldEntry, FieldMap};

/// One create/update/delete instruction of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    Create {
        entity_type: String,
        data: FieldMap,
        return_fields: Option<Vec<String>>,
    },
    Update {
        entity_type: String,
        entity_id: i64,
        data: FieldMap,
    },
    Delete {
        entity_type: String,
        entity_id: i64,
    },
}

impl BatchOperation {
    pub fn create(entity_type: impl Into<String>, data: FieldMap) -> Self {
        BatchOperation::Create {
            entity_type: entity_type.into(),
            data,
            return_fields: None,
        }
    }

    pub fn update(entity_type: impl Into<String>, entity_id: i64, data: FieldMap) -> Self {
        BatchOperation::Update {
            entity_type: entity_type.into(),
            entity_id,
            data,
        }
    }

    pub fn delete(entity_type: impl Into<String>, entity_id: i64) -> Self {
        BatchOperation::Delete {
            entity_type: entity_type.into(),
            entity_id,
        }
    }

    /// Parse a `{request_type, entity_type, entity_id?, data?, return_fields?}` map.
    pub fn from_json(request: &Value) -> Result<Self> {
        let obj = request.as_object().ok_or_else(|| {
            ApiError::Validation(format!(
                "Batched request must be an object, got {}: {request}",
                json_type_name(request)
            ))
        })?;
        required_keys("Batched request", &["request_type", "entity_type"], request)?;

        let entity_type = obj["entity_type"]
            .as_str()
            .ok_or_else(|| ApiError::Validation(format!("Batched request has a non-string entity_type: {request}")))?
            .to_string();

        match obj["request_type"].as_str() {
            Some("create") => {
                required_keys("Batched create request", &["data"], request)?;
                let return_fields = match obj.get("return_fields") {
                    None | Some(Value::Null) => None,
                    Some(fields) => Some(string_list(fields, request)?),
                };
                Ok(BatchOperation::Create {
                    entity_type,
                    data: FieldMap::from_json(&obj["data"])?,
                    return_fields,
                })
            }
            Some("update") => {
                required_keys("Batched update request", &["entity_id", "data"], request)?;
                Ok(BatchOperation::Update {
                    entity_type,
                    entity_id: entity_id(request)?,
                    data: FieldMap::from_json(&obj["data"])?,
                })
            }
            Some("delete") => {
                required_keys("Batched delete request", &["entity_id"], request)?;
                Ok(BatchOperation::Delete {
                    entity_type,
                    entity_id: entity_id(request)?,
                })
            }
            _ => Err(ApiError::Validation(format!(
                "Invalid request_type for batch: {}",
                obj["request_type"]
            ))),
        }
    }

    /// Wire form of this operation.
    pub fn translate(&self) -> BatchRequest {
        match self {
            BatchOperation::Create {
                entity_type,
                data,
                return_fields,
            } => BatchRequest {
                request_type: "create",
                entity_type: entity_type.clone(),
                id: None,
                fields: Some(data.to_field_list()),
                return_fields: return_fields.clone(),
            },
            BatchOperation::Update {
                entity_type,
                entity_id,
                data,
            } => BatchRequest {
                request_type: "update",
                entity_type: entity_type.clone(),
                id: Some(*entity_id),
                fields: Some(data.to_field_list()),
                return_fields: None,
            },
            BatchOperation::Delete { entity_type, entity_id } => BatchRequest {
                request_type: "delete",
                entity_type: entity_type.clone(),
                id: Some(*entity_id),
                fields: None,
                return_fields: None,
            },
        }
    }
}

/// A single element of the `batch` call's argument list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRequest {
    pub request_type: &'static str,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_fields: Option<Vec<String>>,
}

/// Parse and validate a JSON list of batch requests.
///
/// Everything is validated up front; the first invalid element aborts the
/// whole batch.
pub fn parse_requests(requests: &Value) -> Result<Vec<BatchOperation>> {
    let Value::Array(items) = requests else {
        return Err(ApiError::Validation(format!(
            "batch() expects a list. Instead was sent a {}",
            json_type_name(requests)
        )));
    };
    items.iter().map(BatchOperation::from_json).collect()
}

/// Translate operations into wire form, keeping input order.
pub fn translate(operations: &[BatchOperation]) -> Vec<BatchRequest> {
    operations.iter().map(BatchOperation::translate).collect()
}

fn required_keys(message: &str, keys: &[&str], data: &Value) -> Result<()> {
    let missing: Vec<&str> = keys
        .iter()
        .copied()
        .filter(|k| data.get(*k).is_none())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(ApiError::Validation(format!(
        "{message} missing required key: {}. Value was: {data}.",
        missing.join(", ")
    )))
}

fn entity_id(request: &Value) -> Result<i64> {
    request["entity_id"]
        .as_i64()
        .ok_or_else(|| ApiError::Validation(format!("Batched request has a non-integer entity_id: {request}")))
}

fn string_list(value: &Value, request: &Value) -> Result<Vec<String>> {
    value
        .as_array()
        .and_then(|items| items.iter().map(|v| v.as_str().map(str::to_string)).collect())
        .ok_or_else(|| ApiError::Validation(format!("return_fields must be a list of strings: {request}")))
}
