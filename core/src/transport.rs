//! Default transports: a blocking `ureq` HTTP executor and a JSON encoding
//! of the RPC protocol carried over any `HttpExecutor`.
//!
//! # Design
//! An RPC call is POSTed as `{"method_name": ..., "params": [...]}` and the
//! response document is returned as-is. A fault comes back as
//! `{"exception": true, "error_code": n, "message": "..."}`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{ApiError, Result};
use crate::http::{HttpExecutor, HttpMethod, HttpRequest, HttpResponse};
use crate::rpc::{RpcError, RpcTransport};

/// `HttpExecutor` backed by a shared `ureq::Agent`.
pub struct UreqExecutor {
    agent: ureq::Agent,
}

impl UreqExecutor {
    pub fn new(http_proxy: Option<&str>, timeout: Option<Duration>) -> Result<Self> {
        let mut config = ureq::Agent::config_builder().http_status_as_error(false);
        if let Some(timeout) = timeout {
            config = config.timeout_global(Some(timeout));
        }
        if let Some(proxy) = http_proxy {
            let proxy = ureq::Proxy::new(proxy)
                .map_err(|e| ApiError::Config(format!("invalid http proxy '{proxy}': {e}")))?;
            config = config.proxy(Some(proxy));
        }
        Ok(Self {
            agent: config.build().new_agent(),
        })
    }
}

impl HttpExecutor for UreqExecutor {
    fn execute(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, String> {
        let result = match request.method {
            HttpMethod::Get => {
                let mut builder = self.agent.get(request.url.as_str());
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.call()
            }
            HttpMethod::Post => {
                let mut builder = self.agent.post(request.url.as_str());
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                match &request.body {
                    Some(body) => builder.send(&body[..]),
                    None => builder.send_empty(),
                }
            }
        };
        let mut response = result.map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_vec()
            .map_err(|e| e.to_string())?;

        Ok(HttpResponse { status, headers, body })
    }
}

/// RPC transport speaking the JSON encoding to one endpoint.
pub struct JsonRpcTransport {
    endpoint: String,
    http: Arc<dyn HttpExecutor>,
}

impl JsonRpcTransport {
    pub fn new(endpoint: impl Into<String>, http: Arc<dyn HttpExecutor>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }

    pub fn build_request(&self, method: &str, params: &[Value]) -> std::result::Result<HttpRequest, RpcError> {
        let body = serde_json::to_vec(&json!({ "method_name": method, "params": params }))
            .map_err(|e| RpcError::Transport(format!("cannot encode call: {e}")))?;
        let mut request = HttpRequest::post(self.endpoint.as_str());
        request.set_header("Content-Type", "application/json; charset=utf-8");
        request.body = Some(body);
        Ok(request)
    }

    pub fn parse_response(&self, response: &HttpResponse) -> std::result::Result<Value, RpcError> {
        if !response.is_success() {
            return Err(RpcError::Transport(format!("HTTP {}: {}", response.status, response.text())));
        }
        let value: Value = serde_json::from_slice(&response.body)
            .map_err(|e| RpcError::Transport(format!("undecodable response: {e}")))?;
        if value.get("exception").and_then(Value::as_bool) == Some(true) {
            return Err(RpcError::Fault {
                code: value.get("error_code").and_then(Value::as_i64).unwrap_or(0),
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown fault")
                    .to_string(),
            });
        }
        Ok(value)
    }
}

impl RpcTransport for JsonRpcTransport {
    fn call(&self, method: &str, params: &[Value]) -> std::result::Result<Value, RpcError> {
        let request = self.build_request(method, params)?;
        let response = self.http.execute(&request).map_err(RpcError::Transport)?;
        self.parse_response(&response)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
