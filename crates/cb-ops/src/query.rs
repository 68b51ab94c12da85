//! Query operation (spec §4.6): builds the N1QL HTTP request body and
//! decodes the reply into a typed result carrying a single uniform error
//! code, folding in `scan_vectors` derived from a [`MutationState`] when the
//! caller asked for `at_plus` consistency.

use crate::mutation_state::MutationState;
use cb_codec::http::{build_query_request, parse_query_response, HttpRequest, HttpResponse, QueryMetrics, QueryOptions, ScanConsistency};
use cb_core::{CouchbaseError, ErrorKind};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub statement: String,
    pub bucket: String,
    pub options: QueryOptions,
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub rows: Vec<Value>,
    pub status: String,
    pub signature: Option<Value>,
    pub profile: Option<Value>,
    pub metrics: Option<QueryMetrics>,
    pub warnings: Vec<String>,
}

/// Builds the HTTP request, substituting a scan vector derived from
/// `mutation_state` when the request asked for `at_plus` consistency but did
/// not already supply one explicitly.
pub fn encode(request: &QueryRequest, mutation_state: Option<&MutationState>) -> HttpRequest {
    let mut opts = request.options.clone();
    if opts.scan_consistency == Some(ScanConsistency::AtPlus) && opts.scan_vectors.is_none() {
        if let Some(state) = mutation_state {
            opts.scan_vectors = Some(state.to_scan_vector(&request.bucket));
        }
    }
    build_query_request(&request.statement, &opts)
}

pub fn decode(response: &HttpResponse) -> Result<QueryResponse, CouchbaseError> {
    let body = parse_query_response(response)
        .map_err(|e| CouchbaseError::new(ErrorKind::ParsingFailure, e.to_string()))?;

    if let Some(first_error) = body.errors.first() {
        return Err(CouchbaseError::new(error_kind_for_code(first_error.code), first_error.msg.clone()));
    }
    if !response.is_success() {
        return Err(CouchbaseError::new(
            ErrorKind::InternalServerFailure,
            format!("query service returned HTTP {}", response.status),
        ));
    }

    Ok(QueryResponse {
        rows: body.results,
        status: body.status,
        signature: body.signature,
        profile: body.profile,
        metrics: body.metrics,
        warnings: body.warnings.into_iter().map(|w| w.msg).collect(),
    })
}

/// Maps the query service's numeric error codes onto the uniform taxonomy
/// (spec §7); code ranges follow the service's own documented grouping.
fn error_kind_for_code(code: i32) -> ErrorKind {
    match code {
        4000..=4999 => ErrorKind::PlanningFailure,
        5000..=5999 => ErrorKind::IndexFailure,
        1065 | 1080 => ErrorKind::InvalidArgument,
        12000..=12999 => ErrorKind::DmlFailure,
        110 => ErrorKind::TemporaryFailure,
        _ => ErrorKind::InternalServerFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_codec::http::ScanVector;
    use crate::mutation_state::MutationToken;

    #[test]
    fn at_plus_consistency_pulls_a_scan_vector_from_mutation_state() {
        let mut state = MutationState::new();
        state.add("travel-sample", MutationToken { partition_id: 1, partition_uuid: 9, sequence_number: 4 });
        let request = QueryRequest {
            statement: "SELECT 1".to_string(),
            bucket: "travel-sample".to_string(),
            options: QueryOptions { scan_consistency: Some(ScanConsistency::AtPlus), ..QueryOptions::default() },
        };
        let http = encode(&request, Some(&state));
        let body: Value = serde_json::from_slice(&http.body).unwrap();
        assert!(body.get("scan_vector").is_some());
    }

    #[test]
    fn explicit_scan_vector_is_not_overwritten() {
        let request = QueryRequest {
            statement: "SELECT 1".to_string(),
            bucket: "b".to_string(),
            options: QueryOptions {
                scan_consistency: Some(ScanConsistency::AtPlus),
                scan_vectors: Some(ScanVector::default()),
                ..QueryOptions::default()
            },
        };
        let http = encode(&request, None);
        let body: Value = serde_json::from_slice(&http.body).unwrap();
        assert_eq!(body["scan_vector"], serde_json::json!({}));
    }

    #[test]
    fn decode_surfaces_the_first_query_error() {
        let raw = r#"{"status":"errors","errors":[{"code":4010,"msg":"syntax error"}]}"#;
        let response = HttpResponse { status: 200, headers: vec![], body: raw.as_bytes().to_vec() };
        let err = decode(&response).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlanningFailure);
    }
}
