//! The public facade over the entity service.
//!
//! # Design
//! `Shotgun` holds the validated configuration and three collaborators: the
//! API endpoint transport, the legacy endpoint transport (session tokens
//! only) and an HTTP executor for the upload/thumbnail/download endpoints.
//! It carries no mutable state. RPC results arrive wrapped in a `results`
//! envelope which is unwrapped here. For the side endpoints, each operation
//! is split into a `build_*` method producing an `HttpRequest` and a
//! `parse_*` method consuming the `HttpResponse`, as with the RPC encoding.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};
use url::form_urlencoded;

use crate::batch::{self, BatchOperation};
use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::filter::Filters;
use crate::http::{HttpExecutor, HttpRequest, HttpResponse};
use crate::query::{self, FindOptions, ReadPage};
use crate::rpc::{Auth, RpcError, RpcMethod, RpcTransport};
use crate::thumbnail;
use crate::transport::{JsonRpcTransport, UreqExecutor};
use crate::types::{is_truthy, Entity, FieldMap, PropertyEntry};
use crate::upload::{self, UploadRequest};

const API_PATH: &str = "/api3_preview/";
const LEGACY_API_PATH: &str = "/api2/";
const DOWNLOAD_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; U; Intel Mac OS X 10.5; en-US; rv:1.9.0.7) Gecko/2009021906 Firefox/3.0.7";

/// Authenticated browser session, needed for protected downloads.
///
/// Obtained once with `Shotgun::session` and passed explicitly; it is never
/// refreshed behind the caller's back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Synchronous client for the entity service.
pub struct Shotgun {
    config: ClientConfig,
    base_url: String,
    auth: Auth,
    api: Arc<dyn RpcTransport>,
    legacy: Arc<dyn RpcTransport>,
    http: Arc<dyn HttpExecutor>,
}

impl Shotgun {
    /// Connect with the default `ureq` transports.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = config.validate()?;
        let http: Arc<dyn HttpExecutor> =
            Arc::new(UreqExecutor::new(config.http_proxy.as_deref(), config.timeout)?);
        let api = Arc::new(JsonRpcTransport::new(format!("{base_url}{API_PATH}"), http.clone()));
        let legacy = Arc::new(JsonRpcTransport::new(format!("{base_url}{LEGACY_API_PATH}"), http.clone()));
        Self::with_transports(config, api, legacy, http)
    }

    /// Build a client over caller-supplied transports.
    pub fn with_transports(
        config: ClientConfig,
        api: Arc<dyn RpcTransport>,
        legacy: Arc<dyn RpcTransport>,
        http: Arc<dyn HttpExecutor>,
    ) -> Result<Self> {
        let base_url = config.validate()?;
        let auth = Auth {
            script_name: config.script_name.clone(),
            script_key: config.script_key.clone(),
        };
        Ok(Self {
            config,
            base_url,
            auth,
            api,
            legacy,
            http,
        })
    }

    /// Scheme, host and port of the service, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // RPC plumbing
    // -----------------------------------------------------------------------

    fn call_raw(&self, transport: &dyn RpcTransport, method: &str, params: &[Value]) -> Result<Value> {
        debug!(method, endpoint = transport.endpoint(), "rpc call");
        transport.call(method, params).map_err(|e| match e {
            RpcError::Fault { code, message } => {
                if self.config.log_faults {
                    error!(method, code, message = %message, "rpc fault");
                }
                ApiError::Fault { code, message }
            }
            RpcError::Transport(message) => ApiError::Transport {
                url: transport.endpoint().to_string(),
                message: format!("{method}: {message}"),
            },
        })
    }

    /// Call `method` with auth prepended and unwrap the `results` envelope.
    fn call_api(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(serde_json::to_value(&self.auth)?);
        params.extend(args);
        let response = self.call_raw(self.api.as_ref(), method, &params)?;
        match response {
            Value::Object(mut envelope) => envelope
                .remove("results")
                .ok_or_else(|| ApiError::Protocol(format!("response to {method} has no 'results' key"))),
            other => Err(ApiError::Protocol(format!(
                "response to {method} is not an object: {other}"
            ))),
        }
    }

    fn call(&self, method: RpcMethod, args: Vec<Value>) -> Result<Value> {
        self.call_api(method.as_str(), args)
    }

    /// Forward any method name to the API endpoint.
    ///
    /// Escape hatch for server methods without a typed wrapper; prefer the
    /// typed operations.
    pub fn invoke(&self, method_name: &str, args: Vec<Value>) -> Result<Value> {
        self.call_api(method_name, args)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Find entities of `entity_type` matching `filters`, reading every page.
    ///
    /// When `image` is among the requested fields, truthy image values are
    /// replaced with resolved thumbnail URLs.
    pub fn find(&self, entity_type: &str, filters: &Filters, options: &FindOptions) -> Result<Vec<Entity>> {
        let request = query::build_read_request(entity_type, filters, options, self.config.records_per_page)?;
        let mut records = query::paginate(request, options.limit, |req| {
            let results = self.call(RpcMethod::Read, vec![serde_json::to_value(req)?])?;
            serde_json::from_value::<ReadPage>(results)
                .map_err(|e| ApiError::Protocol(format!("malformed read results: {e}")))
        })?;

        if options.fields.iter().any(|f| f == "image") {
            for record in records.iter_mut() {
                if !record.get("image").is_some_and(is_truthy) {
                    continue;
                }
                let id = record
                    .get("id")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ApiError::Protocol(format!("{entity_type} record without an integer id")))?;
                let url = self.thumbnail_url(entity_type, id)?;
                record.insert("image".to_string(), Value::String(url));
            }
        }
        Ok(records)
    }

    /// Like `find` with a limit of one. Zero matches is `Ok(None)`.
    pub fn find_one(&self, entity_type: &str, filters: &Filters, options: &FindOptions) -> Result<Option<Entity>> {
        let options = options.clone().limit(1);
        Ok(self.find(entity_type, filters, &options)?.into_iter().next())
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Create an entity; `return_fields` defaults to `["id"]`.
    pub fn create(&self, entity_type: &str, data: &FieldMap, return_fields: Option<&[String]>) -> Result<Entity> {
        let args = CreateArgs {
            entity_type,
            fields: data.to_field_list(),
            return_fields: return_fields.map(<[String]>::to_vec).unwrap_or_else(|| vec!["id".to_string()]),
        };
        let results = self.call(RpcMethod::Create, vec![serde_json::to_value(args)?])?;
        expect_entity(RpcMethod::Create, results)
    }

    pub fn update(&self, entity_type: &str, entity_id: i64, data: &FieldMap) -> Result<Entity> {
        let args = json!({
            "type": entity_type,
            "id": entity_id,
            "fields": data.to_field_list(),
        });
        let results = self.call(RpcMethod::Update, vec![args])?;
        expect_entity(RpcMethod::Update, results)
    }

    /// Retire an entity. Returns the server's verdict.
    pub fn delete(&self, entity_type: &str, entity_id: i64) -> Result<bool> {
        let results = self.call(RpcMethod::Delete, vec![json!({"type": entity_type, "id": entity_id})])?;
        results
            .as_bool()
            .ok_or_else(|| ApiError::Protocol(format!("delete returned a non-boolean result: {results}")))
    }

    /// Run operations in one round trip. Results come back in input order.
    pub fn batch(&self, operations: &[BatchOperation]) -> Result<Vec<Value>> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        let requests = serde_json::to_value(batch::translate(operations))?;
        match self.call(RpcMethod::Batch, vec![requests])? {
            Value::Array(results) => Ok(results),
            other => Err(ApiError::Protocol(format!("batch returned a non-list result: {other}"))),
        }
    }

    /// `batch` over JSON request maps with a `request_type` discriminator.
    ///
    /// Every request is validated before anything is sent.
    pub fn batch_json(&self, requests: &Value) -> Result<Vec<Value>> {
        let operations = batch::parse_requests(requests)?;
        self.batch(&operations)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    pub fn schema_read(&self) -> Result<Value> {
        self.call(RpcMethod::SchemaRead, Vec::new())
    }

    pub fn schema_entity_read(&self) -> Result<Value> {
        self.call(RpcMethod::SchemaEntityRead, Vec::new())
    }

    pub fn schema_field_read(&self, entity_type: &str, field_name: Option<&str>) -> Result<Value> {
        let mut args = Map::new();
        args.insert("type".into(), json!(entity_type));
        if let Some(field_name) = field_name {
            args.insert("field_name".into(), json!(field_name));
        }
        self.call(RpcMethod::SchemaFieldRead, vec![Value::Object(args)])
    }

    /// Create a field. `display_name` becomes the leading `name` property.
    pub fn schema_field_create(
        &self,
        entity_type: &str,
        data_type: &str,
        display_name: &str,
        properties: &FieldMap,
    ) -> Result<Value> {
        let mut property_list = vec![PropertyEntry {
            property_name: "name".to_string(),
            value: display_name.into(),
        }];
        property_list.extend(properties.to_property_list());
        let args = json!({
            "type": entity_type,
            "data_type": data_type,
            "properties": property_list,
        });
        self.call(RpcMethod::SchemaFieldCreate, vec![args])
    }

    pub fn schema_field_update(&self, entity_type: &str, field_name: &str, properties: &FieldMap) -> Result<Value> {
        let args = json!({
            "type": entity_type,
            "field_name": field_name,
            "properties": properties.to_property_list(),
        });
        self.call(RpcMethod::SchemaFieldUpdate, vec![args])
    }

    pub fn schema_field_delete(&self, entity_type: &str, field_name: &str) -> Result<Value> {
        let args = json!({"type": entity_type, "field_name": field_name});
        self.call(RpcMethod::SchemaFieldDelete, vec![args])
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    /// Upload a file to an entity. Returns the new attachment id (0 when the
    /// server does not report one).
    pub fn upload(&self, request: &UploadRequest) -> Result<i64> {
        request.check_path()?;
        let url = format!("{}{}", self.base_url, request.endpoint_path());
        let mut form = request.to_form(&self.auth)?;
        let mut http_request = HttpRequest::post(url.as_str());
        form.apply(&mut http_request)?;
        let params = upload::describe_params(&form);

        let response = self.http.execute(&http_request).map_err(|message| ApiError::Transport {
            url: url.clone(),
            message: format!("{message}\n({params})"),
        })?;
        let id = upload::parse_response(&request.path, &url, &params, &response)?;
        info!(
            entity_type = %request.entity_type,
            entity_id = request.entity_id,
            attachment_id = id,
            "uploaded {}",
            request.path.display()
        );
        Ok(id)
    }

    pub fn upload_thumbnail(&self, entity_type: &str, entity_id: i64, path: impl AsRef<std::path::Path>) -> Result<i64> {
        self.upload(&UploadRequest::thumbnail(entity_type, entity_id, path))
    }

    // -----------------------------------------------------------------------
    // Thumbnails
    // -----------------------------------------------------------------------

    pub fn build_thumbnail_request(&self, entity_type: &str, entity_id: i64) -> HttpRequest {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("entity_type", entity_type)
            .append_pair("entity_id", &entity_id.to_string())
            .finish();
        HttpRequest::get(format!("{}/upload/get_thumbnail_url?{query}", self.base_url))
    }

    /// Resolve the full thumbnail URL of an entity, retrying ambiguous answers.
    pub fn thumbnail_url(&self, entity_type: &str, entity_id: i64) -> Result<String> {
        let request = self.build_thumbnail_request(entity_type, entity_id);
        let path = thumbnail::resolve(entity_type, entity_id, || {
            let response = self.http.execute(&request).map_err(|message| ApiError::Transport {
                url: request.url.clone(),
                message,
            })?;
            if !response.is_success() {
                return Err(ApiError::Transport {
                    url: request.url.clone(),
                    message: format!("HTTP {}: {}", response.status, response.text()),
                });
            }
            Ok(response.text())
        })?;
        Ok(format!("{}{path}", self.base_url))
    }

    // -----------------------------------------------------------------------
    // Protected downloads
    // -----------------------------------------------------------------------

    /// Exchange the script credentials for a browser session token.
    pub fn session(&self) -> Result<Session> {
        let credentials = json!([self.auth.script_name, self.auth.script_key]);
        let response = self.call_raw(self.legacy.as_ref(), RpcMethod::GetSessionToken.as_str(), &[credentials])?;
        response
            .get("session_id")
            .and_then(Value::as_str)
            .map(Session::new)
            .ok_or_else(|| ApiError::Protocol(format!("session token response has no 'session_id': {response}")))
    }

    pub fn build_download_request(&self, session: &Session, attachment_id: i64) -> HttpRequest {
        let mut request = HttpRequest::get(format!("{}/file_serve/attachment/{attachment_id}", self.base_url));
        request.set_header("Cookie", format!("_session_id={}", session.token()));
        request.set_header("User-Agent", DOWNLOAD_USER_AGENT);
        request
    }

    /// Check a download response, rejecting HTML error pages.
    pub fn parse_download(&self, url: &str, response: HttpResponse) -> Result<Vec<u8>> {
        if !response.is_success() {
            return Err(ApiError::Transport {
                url: url.to_string(),
                message: format!("Failed to open {url}\nWe failed with error code - {}.", response.status),
            });
        }
        if response.body.trim_ascii_start().starts_with(b"<!DOCTYPE HTML") {
            return Err(ApiError::DownloadFailed {
                url: url.to_string(),
                response: response.text(),
            });
        }
        Ok(response.body)
    }

    /// Download the binary content of an attachment.
    pub fn download_attachment(&self, session: &Session, attachment_id: i64) -> Result<Vec<u8>> {
        let request = self.build_download_request(session, attachment_id);
        let response = self.http.execute(&request).map_err(|reason| ApiError::Transport {
            url: request.url.clone(),
            message: format!(
                "Failed to open {}\n{reason}\nThis usually means the server doesn't exist, is down, \
                 or we don't have an internet connection.",
                request.url
            ),
        })?;
        self.parse_download(&request.url, response)
    }
}

#[derive(Serialize)]
struct CreateArgs<'a> {
    #[serde(rename = "type")]
    entity_type: &'a str,
    fields: Vec<crate::types::FieldEntry>,
    return_fields: Vec<String>,
}

fn expect_entity(method: RpcMethod, results: Value) -> Result<Entity> {
    match results {
        Value::Object(entity) => Ok(entity),
        other => Err(ApiError::Protocol(format!("{method} returned a non-object result: {other}"))),
    }
}
