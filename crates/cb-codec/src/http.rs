//! HTTP envelope and JSON body builders for the query-family services
//! (query, analytics, search, views, management — spec §5). This module is
//! transport-agnostic: it produces and parses plain request/response
//! structs; `cb-cluster` is responsible for actually dispatching them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: Vec::new(), body: Vec::new() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json_body(mut self, body: &Value) -> Self {
        self.body = serde_json::to_vec(body).expect("Value serialization is infallible");
        self.headers.push(("Content-Type".to_string(), "application/json".to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }
}

/// Scan consistency for query/analytics requests (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanConsistency {
    NotBounded,
    RequestPlus,
    AtPlus,
}

/// One bucket's sparse vbucket-seqno/vbucket-uuid pairs, as carried in
/// `scan_vectors` when `ScanConsistency::AtPlus` is requested (spec §3
/// `MutationState`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanVector {
    /// Keyed by partition index as a string, per the server's wire format.
    pub sparse: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub scan_consistency: Option<ScanConsistency>,
    pub scan_vectors: Option<ScanVector>,
    pub named_params: Map<String, Value>,
    pub positional_params: Vec<Value>,
    pub profile: Option<String>,
    pub max_parallelism: Option<u32>,
    pub pipeline_batch: Option<u32>,
    pub pipeline_cap: Option<u32>,
    pub scan_cap: Option<u32>,
    pub readonly: Option<bool>,
    pub client_context_id: Option<String>,
    pub timeout: Option<std::time::Duration>,
}

/// Builds the JSON body for a N1QL query request against the query service
/// (spec §5 `QueryOperation`).
pub fn build_query_request(statement: &str, opts: &QueryOptions) -> HttpRequest {
    let mut body = Map::new();
    body.insert("statement".to_string(), Value::String(statement.to_string()));

    if let Some(consistency) = opts.scan_consistency {
        body.insert(
            "scan_consistency".to_string(),
            Value::String(serde_json::to_value(consistency).unwrap().as_str().unwrap().to_string()),
        );
    }
    if let Some(vectors) = &opts.scan_vectors {
        body.insert("scan_vector".to_string(), Value::Object(vectors.sparse.clone()));
    }
    for (key, value) in &opts.named_params {
        let name = if key.starts_with('$') { key.clone() } else { format!("${key}") };
        body.insert(name, value.clone());
    }
    if !opts.positional_params.is_empty() {
        body.insert("args".to_string(), Value::Array(opts.positional_params.clone()));
    }
    if let Some(profile) = &opts.profile {
        body.insert("profile".to_string(), Value::String(profile.clone()));
    }
    if let Some(v) = opts.max_parallelism {
        body.insert("max_parallelism".to_string(), Value::String(v.to_string()));
    }
    if let Some(v) = opts.pipeline_batch {
        body.insert("pipeline_batch".to_string(), Value::String(v.to_string()));
    }
    if let Some(v) = opts.pipeline_cap {
        body.insert("pipeline_cap".to_string(), Value::String(v.to_string()));
    }
    if let Some(v) = opts.scan_cap {
        body.insert("scan_cap".to_string(), Value::String(v.to_string()));
    }
    if let Some(v) = opts.readonly {
        body.insert("readonly".to_string(), Value::Bool(v));
    }
    if let Some(id) = &opts.client_context_id {
        body.insert("client_context_id".to_string(), Value::String(id.clone()));
    }
    if let Some(timeout) = opts.timeout {
        body.insert("timeout".to_string(), Value::String(format!("{}ms", timeout.as_millis())));
    }

    HttpRequest::new(Method::Post, "/query/service").with_json_body(&Value::Object(body))
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryWarning {
    pub code: i32,
    pub msg: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryErrorDetail {
    pub code: i32,
    pub msg: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryMetrics {
    #[serde(rename = "elapsedTime")]
    pub elapsed_time: Option<String>,
    #[serde(rename = "executionTime")]
    pub execution_time: Option<String>,
    #[serde(rename = "resultCount")]
    pub result_count: Option<u64>,
    #[serde(rename = "resultSize")]
    pub result_size: Option<u64>,
    #[serde(rename = "mutationCount")]
    pub mutation_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResultBody {
    #[serde(default)]
    pub results: Vec<Value>,
    pub status: String,
    #[serde(default)]
    pub signature: Option<Value>,
    #[serde(default)]
    pub profile: Option<Value>,
    #[serde(default)]
    pub metrics: Option<QueryMetrics>,
    #[serde(default)]
    pub warnings: Vec<QueryWarning>,
    #[serde(default)]
    pub errors: Vec<QueryErrorDetail>,
}

pub fn parse_query_response(response: &HttpResponse) -> serde_json::Result<QueryResultBody> {
    response.json().and_then(serde_json::from_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_query_body_with_named_params_and_consistency() {
        let mut opts = QueryOptions::default();
        opts.scan_consistency = Some(ScanConsistency::RequestPlus);
        opts.named_params.insert("name".to_string(), Value::String("alice".to_string()));
        opts.client_context_id = Some("ctx-1".to_string());

        let req = build_query_request("SELECT * FROM `default` WHERE name = $name", &opts);
        let body: Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body["scan_consistency"], "request_plus");
        assert_eq!(body["$name"], "alice");
        assert_eq!(body["client_context_id"], "ctx-1");
    }

    #[test]
    fn parses_success_response_with_results_and_metrics() {
        let raw = r#"{
            "results": [{"a": 1}],
            "status": "success",
            "metrics": {"resultCount": 1, "resultSize": 10}
        }"#;
        let response = HttpResponse { status: 200, headers: vec![], body: raw.as_bytes().to_vec() };
        let parsed = parse_query_response(&response).unwrap();
        assert_eq!(parsed.status, "success");
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.metrics.unwrap().result_count, Some(1));
    }
}
