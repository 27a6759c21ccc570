//! In-memory stand-in for the entity service.
//!
//! Serves the JSON-encoded RPC endpoint (`/api3_preview/`), the legacy
//! session endpoint (`/api2/`), the upload endpoints, the thumbnail resolver
//! and protected attachment downloads. Only the subset of filtering the
//! client tests need is implemented.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

pub const SCRIPT_NAME: &str = "test_script";
pub const SCRIPT_KEY: &str = "test_key";

const FAULT_AUTH: i64 = 102;
const FAULT_NOT_FOUND: i64 = 103;
const FAULT_BAD_REQUEST: i64 = 104;

pub type Entity = Map<String, Value>;

#[derive(Clone, Debug)]
struct Record {
    entity: Entity,
    retired: bool,
}

#[derive(Clone, Debug)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Server state. Build one with `Store::default()` and seed it as needed.
#[derive(Debug, Default)]
pub struct Store {
    records: Vec<Record>,
    next_id: i64,
    attachments: HashMap<i64, Attachment>,
    thumbnails: HashMap<(String, i64), String>,
    sessions: Vec<String>,
    /// Number of thumbnail lookups to answer with garbage before behaving.
    thumbnail_hiccups: u32,
    read_calls: usize,
}

impl Store {
    /// Insert an entity directly, returning its id.
    pub fn seed(&mut self, entity_type: &str, fields: Value) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        let mut entity = fields.as_object().cloned().unwrap_or_default();
        entity.insert("type".into(), json!(entity_type));
        entity.insert("id".into(), json!(id));
        self.records.push(Record {
            entity,
            retired: false,
        });
        id
    }

    pub fn with_thumbnail_hiccups(mut self, hiccups: u32) -> Self {
        self.thumbnail_hiccups = hiccups;
        self
    }

    fn find_mut(&mut self, entity_type: &str, id: i64) -> Option<&mut Record> {
        self.records
            .iter_mut()
            .find(|r| r.entity["type"] == entity_type && r.entity["id"] == id && !r.retired)
    }
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    app_with(Store::default())
}

pub fn app_with(store: Store) -> Router {
    let db: Db = Arc::new(RwLock::new(store));
    Router::new()
        .route("/api3_preview/", post(rpc))
        .route("/api2/", post(legacy_rpc))
        .route("/upload/upload_file", post(upload_file))
        .route("/upload/publish_thumbnail", post(publish_thumbnail))
        .route("/upload/get_thumbnail_url", get(get_thumbnail_url))
        .route("/file_serve/attachment/{id}", get(download_attachment))
        .route("/_stats", get(stats))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, store: Store) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(store)).await
}

// ---------------------------------------------------------------------------
// RPC
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RpcCall {
    pub method_name: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

struct Fault(i64, String);

type RpcResult = Result<Value, Fault>;

fn respond(result: RpcResult) -> Json<Value> {
    match result {
        Ok(results) => Json(json!({ "results": results })),
        Err(Fault(code, message)) => Json(json!({
            "exception": true,
            "error_code": code,
            "message": message,
        })),
    }
}

fn check_auth(auth: Option<&Value>) -> Result<(), Fault> {
    let ok = auth.is_some_and(|a| a["script_name"] == SCRIPT_NAME && a["script_key"] == SCRIPT_KEY);
    if ok {
        Ok(())
    } else {
        Err(Fault(FAULT_AUTH, "API authentication failed".into()))
    }
}

async fn rpc(State(db): State<Db>, Json(call): Json<RpcCall>) -> Json<Value> {
    debug!(method = %call.method_name, "rpc");
    if let Err(fault) = check_auth(call.params.first()) {
        return respond(Err(fault));
    }
    let args = call.params.get(1).cloned().unwrap_or(Value::Null);
    let mut store = db.write().await;
    let result = match call.method_name.as_str() {
        "read" => {
            store.read_calls += 1;
            read(&store, &args)
        }
        "create" => create(&mut store, &args),
        "update" => update(&mut store, &args),
        "delete" => delete(&mut store, &args),
        "batch" => batch(&mut store, &args),
        "schema_read" => Ok(json!({"Asset": {"code": {"data_type": {"value": "text"}}}})),
        "schema_entity_read" => Ok(json!({"Asset": {"name": {"value": "Asset"}}})),
        "schema_field_read" => {
            let mut fields = Map::new();
            let name = args["field_name"].as_str().unwrap_or("code");
            fields.insert(name.to_string(), json!({"data_type": {"value": "text"}}));
            Ok(Value::Object(fields))
        }
        "schema_field_create" => Ok(json!("sg_new_field")),
        "schema_field_update" | "schema_field_delete" => Ok(json!(true)),
        other => Err(Fault(FAULT_BAD_REQUEST, format!("unknown method {other}"))),
    };
    respond(result)
}

async fn legacy_rpc(State(db): State<Db>, Json(call): Json<RpcCall>) -> Json<Value> {
    if call.method_name != "getSessionToken" {
        return respond(Err(Fault(FAULT_BAD_REQUEST, format!("unknown method {}", call.method_name))));
    }
    let credentials = call.params.first().cloned().unwrap_or(Value::Null);
    if credentials != json!([SCRIPT_NAME, SCRIPT_KEY]) {
        return respond(Err(Fault(FAULT_AUTH, "API authentication failed".into())));
    }
    let token = Uuid::new_v4().simple().to_string();
    db.write().await.sessions.push(token.clone());
    Json(json!({ "session_id": token }))
}

fn read(store: &Store, args: &Value) -> RpcResult {
    let entity_type = args["type"].as_str().unwrap_or_default();
    let retired = args["return_only"] == "retired";
    let conditions = args["filters"]["conditions"].as_array().cloned().unwrap_or_default();
    let any = args["filters"]["logical_operator"] == "or";

    let mut matching: Vec<&Entity> = store
        .records
        .iter()
        .filter(|r| r.entity["type"] == entity_type && r.retired == retired)
        .map(|r| &r.entity)
        .filter(|e| {
            if conditions.is_empty() {
                return true;
            }
            let mut results = conditions.iter().map(|c| condition_matches(e, c));
            if any {
                results.any(|m| m)
            } else {
                results.all(|m| m)
            }
        })
        .collect();

    if let Some(sorts) = args["sorts"].as_array() {
        matching.sort_by(|a, b| {
            for sort in sorts {
                let field = sort["field_name"].as_str().unwrap_or("id");
                let mut ord = compare(
                    a.get(field).unwrap_or(&Value::Null),
                    b.get(field).unwrap_or(&Value::Null),
                );
                if sort["direction"] == "desc" {
                    ord = ord.reverse();
                }
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    let per_page = args["paging"]["entities_per_page"].as_u64().unwrap_or(500).max(1) as usize;
    let page = args["paging"]["current_page"].as_u64().unwrap_or(1).max(1) as usize;
    let fields: Vec<String> = args["return_fields"]
        .as_array()
        .map(|f| f.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let entities: Vec<Value> = matching
        .iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .map(|e| Value::Object(project(e, &fields)))
        .collect();

    Ok(json!({
        "entities": entities,
        "paging_info": {"entity_count": matching.len()}
    }))
}

fn condition_matches(entity: &Entity, condition: &Value) -> bool {
    let field = condition["path"].as_str().unwrap_or_default();
    let actual = entity.get(field).unwrap_or(&Value::Null);
    let values = condition["values"].as_array().cloned().unwrap_or_default();
    let first = values.first().unwrap_or(&Value::Null);
    match condition["relation"].as_str().unwrap_or_default() {
        "is" => actual == first,
        "is_not" => actual != first,
        "in" => values.contains(actual),
        "not_in" => !values.contains(actual),
        "contains" => match (actual.as_str(), first.as_str()) {
            (Some(a), Some(f)) => a.contains(f),
            _ => false,
        },
        "greater_than" => compare(actual, first) == Ordering::Greater,
        "less_than" => compare(actual, first) == Ordering::Less,
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn project(entity: &Entity, fields: &[String]) -> Entity {
    let mut out = Map::new();
    out.insert("type".into(), entity["type"].clone());
    out.insert("id".into(), entity["id"].clone());
    for field in fields {
        out.insert(field.clone(), entity.get(field).cloned().unwrap_or(Value::Null));
    }
    out
}

fn apply_fields(entity: &mut Entity, fields: &Value) -> Result<Vec<String>, Fault> {
    let fields = fields
        .as_array()
        .ok_or_else(|| Fault(FAULT_BAD_REQUEST, "fields must be a list".into()))?;
    let mut names = Vec::new();
    for f in fields {
        let name = f["field_name"]
            .as_str()
            .ok_or_else(|| Fault(FAULT_BAD_REQUEST, format!("bad field entry {f}")))?;
        entity.insert(name.to_string(), f["value"].clone());
        names.push(name.to_string());
    }
    Ok(names)
}

fn create(store: &mut Store, args: &Value) -> RpcResult {
    let entity_type = args["type"]
        .as_str()
        .ok_or_else(|| Fault(FAULT_BAD_REQUEST, "create needs a type".into()))?;
    let mut fields = Entity::new();
    apply_fields(&mut fields, &args["fields"])?;
    let id = store.seed(entity_type, Value::Object(fields));
    let record = store.find_mut(entity_type, id).map(|r| r.entity.clone()).unwrap_or_default();
    let return_fields: Vec<String> = args["return_fields"]
        .as_array()
        .map(|f| f.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_else(|| vec!["id".into()]);
    Ok(Value::Object(project(&record, &return_fields)))
}

fn update(store: &mut Store, args: &Value) -> RpcResult {
    let entity_type = args["type"].as_str().unwrap_or_default();
    let id = args["id"].as_i64().unwrap_or_default();
    let record = store
        .find_mut(entity_type, id)
        .ok_or_else(|| Fault(FAULT_NOT_FOUND, format!("{entity_type} {id} not found")))?;
    let names = apply_fields(&mut record.entity, &args["fields"])?;
    Ok(Value::Object(project(&record.entity, &names)))
}

fn delete(store: &mut Store, args: &Value) -> RpcResult {
    let entity_type = args["type"].as_str().unwrap_or_default();
    let id = args["id"].as_i64().unwrap_or_default();
    let record = store
        .find_mut(entity_type, id)
        .ok_or_else(|| Fault(FAULT_NOT_FOUND, format!("{entity_type} {id} not found")))?;
    record.retired = true;
    Ok(json!(true))
}

fn batch(store: &mut Store, args: &Value) -> RpcResult {
    let requests = args
        .as_array()
        .ok_or_else(|| Fault(FAULT_BAD_REQUEST, "batch expects a list".into()))?;
    requests
        .iter()
        .map(|r| match r["request_type"].as_str() {
            Some("create") => create(store, r),
            Some("update") => update(store, r),
            Some("delete") => delete(store, r),
            _ => Err(Fault(FAULT_BAD_REQUEST, format!("bad batch request {r}"))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

#[derive(Default)]
struct UploadForm {
    text: HashMap<String, String>,
    file: Option<(String, Attachment)>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, StatusCode> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                let bytes = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?.to_vec();
                form.file = Some((
                    name,
                    Attachment {
                        filename,
                        content_type,
                        bytes,
                    },
                ));
            }
            None => {
                let value = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                form.text.insert(name, value);
            }
        }
    }
    Ok(form)
}

/// Shared validation: credentials and target. `Err` holds the response body.
fn check_upload(form: &UploadForm) -> Result<(String, i64), String> {
    if form.text.get("script_name").map(String::as_str) != Some(SCRIPT_NAME)
        || form.text.get("script_key").map(String::as_str) != Some(SCRIPT_KEY)
    {
        return Err("0Authentication failed".into());
    }
    let entity_type = form.text.get("entity_type").cloned().unwrap_or_default();
    if entity_type == "Broken" {
        return Err("0Server error".into());
    }
    let entity_id = form
        .text
        .get("entity_id")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| "0Missing entity_id".to_string())?;
    Ok((entity_type, entity_id))
}

async fn upload_file(State(db): State<Db>, multipart: Multipart) -> Result<String, StatusCode> {
    let form = read_form(multipart).await?;
    let (entity_type, entity_id) = match check_upload(&form) {
        Ok(target) => target,
        Err(body) => return Ok(body),
    };
    let Some((_, attachment)) = form.file else {
        return Ok("0No file".into());
    };
    let mut store = db.write().await;
    store.next_id += 1;
    let id = store.next_id;
    if let Some(field_name) = form.text.get("field_name") {
        if let Some(record) = store.find_mut(&entity_type, entity_id) {
            record.entity.insert(
                field_name.clone(),
                json!({"type": "Attachment", "id": id, "name": form.text.get("display_name")}),
            );
        }
    }
    store.attachments.insert(id, attachment);
    Ok(format!("1:{id}"))
}

async fn publish_thumbnail(State(db): State<Db>, multipart: Multipart) -> Result<String, StatusCode> {
    let form = read_form(multipart).await?;
    let (entity_type, entity_id) = match check_upload(&form) {
        Ok(target) => target,
        Err(body) => return Ok(body),
    };
    let Some((field, attachment)) = form.file else {
        return Ok("0No file".into());
    };
    if field != "thumb_image" {
        return Ok("0Expected thumb_image".into());
    }
    let mut store = db.write().await;
    store.next_id += 1;
    let id = store.next_id;
    let path = format!("/thumbs/{entity_type}/{entity_id}/{}", attachment.filename);
    if let Some(record) = store.find_mut(&entity_type, entity_id) {
        record.entity.insert("image".into(), json!({"id": id}));
    }
    store.thumbnails.insert((entity_type, entity_id), path);
    store.attachments.insert(id, attachment);
    Ok("1".into())
}

#[derive(Deserialize)]
pub struct ThumbnailQuery {
    pub entity_type: String,
    pub entity_id: i64,
}

async fn get_thumbnail_url(State(db): State<Db>, Query(q): Query<ThumbnailQuery>) -> String {
    let mut store = db.write().await;
    if store.thumbnail_hiccups > 0 {
        store.thumbnail_hiccups -= 1;
        return "<html><body>Proxy Error</body></html>".into();
    }
    match store.thumbnails.get(&(q.entity_type.clone(), q.entity_id)) {
        Some(path) => format!("1\n{path}\n"),
        None => format!("0\nno thumbnail for {}:{}\n", q.entity_type, q.entity_id),
    }
}

// ---------------------------------------------------------------------------
// Downloads
// ---------------------------------------------------------------------------

async fn download_attachment(
    State(db): State<Db>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Vec<u8>, StatusCode> {
    let store = db.read().await;
    let session = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|c| c.split(';').find_map(|p| p.trim().strip_prefix("_session_id=")));
    if !session.is_some_and(|s| store.sessions.iter().any(|t| t == s)) {
        return Ok(b"\n<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 4.01//EN\">\n<html><body>Please log in</body></html>".to_vec());
    }
    store
        .attachments
        .get(&id)
        .map(|a| a.bytes.clone())
        .ok_or(StatusCode::NOT_FOUND)
}

async fn stats(State(db): State<Db>) -> Json<Value> {
    let store = db.read().await;
    Json(json!({
        "read_calls": store.read_calls,
        "attachments": store.attachments.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_assets(n: usize) -> Store {
        let mut store = Store::default();
        for i in 1..=n {
            store.seed("Asset", json!({"code": format!("A{i}")}));
        }
        store
    }

    #[test]
    fn read_pages_and_counts() {
        let store = store_with_assets(7);
        let args = json!({
            "type": "Asset",
            "return_fields": ["code"],
            "filters": {"logical_operator": "and", "conditions": []},
            "return_only": "active",
            "paging": {"entities_per_page": 5, "current_page": 2}
        });
        let Ok(page) = read(&store, &args) else {
            panic!("read failed");
        };
        assert_eq!(page["paging_info"]["entity_count"], 7);
        assert_eq!(page["entities"].as_array().unwrap().len(), 2);
        assert_eq!(page["entities"][0]["code"], "A6");
    }

    #[test]
    fn read_filters_and_sorts() {
        let store = store_with_assets(4);
        let args = json!({
            "type": "Asset",
            "return_fields": ["code"],
            "filters": {"logical_operator": "or", "conditions": [
                {"path": "code", "relation": "is", "values": ["A1"]},
                {"path": "code", "relation": "is", "values": ["A3"]}
            ]},
            "return_only": "active",
            "paging": {"entities_per_page": 50, "current_page": 1},
            "sorts": [{"field_name": "code", "direction": "desc"}]
        });
        let Ok(page) = read(&store, &args) else {
            panic!("read failed");
        };
        let codes: Vec<&str> = page["entities"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["code"].as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["A3", "A1"]);
    }

    #[test]
    fn delete_retires() {
        let mut store = store_with_assets(1);
        assert!(delete(&mut store, &json!({"type": "Asset", "id": 1})).is_ok());
        assert!(delete(&mut store, &json!({"type": "Asset", "id": 1})).is_err());
        let args = json!({"type": "Asset", "return_only": "retired", "paging": {"entities_per_page": 5, "current_page": 1}});
        let Ok(page) = read(&store, &args) else {
            panic!("read failed");
        };
        assert_eq!(page["paging_info"]["entity_count"], 1);
    }

    #[test]
    fn auth_is_checked() {
        assert!(check_auth(Some(&json!({"script_name": SCRIPT_NAME, "script_key": SCRIPT_KEY}))).is_ok());
        assert!(check_auth(Some(&json!({"script_name": SCRIPT_NAME, "script_key": "nope"}))).is_err());
        assert!(check_auth(None).is_err());
    }
}
