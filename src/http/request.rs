//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4)
//! - Read client fields from the JSON body, then the query string
//! - Strip client identity fields before forwarding
//! - Find and rewrite artifact references in the path or query
//!
//! # Design Decisions
//! - The body is re-serialized only when a field was actually removed
//! - The query string is re-encoded only when it changed
//! - The correlation key is read but never stripped; backends need it

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderValue, Request, Uri};
use http_body_util::LengthLimitError;
use serde_json::{Map, Value};
use tower_http::request_id::{MakeRequestId, RequestId};
use url::form_urlencoded;

use crate::config::FieldConfig;
use crate::error::{ProxyError, ProxyResult};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Path marker of Gradio style file fetches: `/gradio_api/file=<path>`.
const PATH_ARTIFACT_MARKER: &str = "file=";

/// UUID v4 request ids for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Request id set by the request-id layer, or "unknown".
pub fn request_id<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Buffer a request body of at most `limit` bytes.
///
/// Only an exceeded limit is a 413; a body that fails mid-read (client
/// aborted the upload) is a 400.
pub async fn buffer_body(body: Body, limit: usize) -> ProxyResult<Bytes> {
    to_bytes(body, limit).await.map_err(|e| {
        if exceeds_limit(&e) {
            ProxyError::PayloadTooLarge(limit)
        } else {
            ProxyError::ClientInput(format!("failed to read request body: {}", e))
        }
    })
}

fn exceeds_limit(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// Client-supplied values the proxy acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientFields {
    pub fingerprint: Option<String>,
    pub subscription_status: Option<String>,
    pub job_id: Option<String>,
    pub correlation_key: Option<String>,
}

/// Where an artifact reference was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactCarrier {
    /// `.../file=<reference>` in the path; the index is where the reference starts.
    Path(usize),
    /// A query parameter.
    Query(String),
}

/// A buffered inbound request, ready to be inspected and rewritten.
#[derive(Debug)]
pub struct InboundRequest {
    path: String,
    raw_query: Option<String>,
    query: Vec<(String, String)>,
    query_changed: bool,
    body: Bytes,
    json: Option<Map<String, Value>>,
    body_changed: bool,
}

impl InboundRequest {
    pub fn new(uri: &Uri, body: Bytes) -> Self {
        let raw_query = uri.query().map(str::to_string);
        let query = raw_query
            .as_deref()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        let json = if body.is_empty() {
            None
        } else {
            match serde_json::from_slice::<Value>(&body) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            }
        };

        Self {
            path: uri.path().to_string(),
            raw_query,
            query,
            query_changed: false,
            body,
            json,
            body_changed: false,
        }
    }

    /// A field from the JSON body, else from the query string.
    pub fn field(&self, name: &str) -> Option<String> {
        self.json
            .as_ref()
            .and_then(|map| map.get(name))
            .and_then(scalar_to_string)
            .or_else(|| {
                self.query
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.clone())
            })
            .filter(|v| !v.is_empty())
    }

    pub fn client_fields(&self, fields: &FieldConfig) -> ClientFields {
        ClientFields {
            fingerprint: self.field(&fields.fingerprint),
            subscription_status: self.field(&fields.subscription_status),
            job_id: self.field(&fields.job_id),
            correlation_key: fields
                .correlation_keys
                .iter()
                .find_map(|key| self.field(key)),
        }
    }

    /// Remove fields from both the body and the query string.
    pub fn strip_fields(&mut self, names: &[&str]) {
        if let Some(map) = self.json.as_mut() {
            for name in names {
                if map.remove(*name).is_some() {
                    self.body_changed = true;
                }
            }
        }

        let before = self.query.len();
        self.query.retain(|(k, _)| !names.contains(&k.as_str()));
        if self.query.len() != before {
            self.query_changed = true;
        }
    }

    /// The artifact reference carried by this request, if any.
    pub fn artifact_reference(&self, param: &str) -> Option<(ArtifactCarrier, String)> {
        if let Some(pos) = self.path.find(&format!("/{}", PATH_ARTIFACT_MARKER)) {
            let start = pos + 1 + PATH_ARTIFACT_MARKER.len();
            let reference = &self.path[start..];
            if !reference.is_empty() {
                return Some((ArtifactCarrier::Path(start), reference.to_string()));
            }
        }

        self.query
            .iter()
            .find(|(k, v)| k == param && !v.is_empty())
            .map(|(k, v)| (ArtifactCarrier::Query(k.clone()), v.clone()))
    }

    /// Replace the reference in its carrier with the backend-local path.
    pub fn rewrite_artifact(&mut self, carrier: &ArtifactCarrier, local_path: &str) {
        match carrier {
            ArtifactCarrier::Path(start) => {
                self.path.truncate(*start);
                self.path.push_str(local_path);
            }
            ArtifactCarrier::Query(param) => {
                for (k, v) in self.query.iter_mut() {
                    if k == param {
                        *v = local_path.to_string();
                        self.query_changed = true;
                        break;
                    }
                }
            }
        }
    }

    /// Origin-form target for the upstream request.
    pub fn path_and_query(&self) -> String {
        let query = if self.query_changed {
            if self.query.is_empty() {
                None
            } else {
                Some(
                    form_urlencoded::Serializer::new(String::new())
                        .extend_pairs(self.query.iter())
                        .finish(),
                )
            }
        } else {
            self.raw_query.clone()
        };

        match query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    pub fn body_changed(&self) -> bool {
        self.body_changed
    }

    /// Body to forward: re-serialized JSON when a field was removed.
    pub fn into_body(self) -> Bytes {
        match (self.body_changed, self.json) {
            (true, Some(map)) => match serde_json::to_vec(&Value::Object(map)) {
                Ok(bytes) => Bytes::from(bytes),
                Err(_) => self.body,
            },
            _ => self.body,
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(uri: &str, body: &str) -> InboundRequest {
        InboundRequest::new(&uri.parse().unwrap(), Bytes::from(body.to_string()))
    }

    #[test]
    fn test_body_wins_over_query() {
        let req = inbound(
            "/api/generate?fingerprint=from-query&jobId=q-1",
            r#"{"fingerprint":"from-body","text":"salam"}"#,
        );
        let fields = req.client_fields(&FieldConfig::default());
        assert_eq!(fields.fingerprint.as_deref(), Some("from-body"));
        assert_eq!(fields.job_id.as_deref(), Some("q-1"));
        assert_eq!(fields.subscription_status, None);
    }

    #[test]
    fn test_correlation_key_order() {
        let req = inbound("/gradio_api/queue/join", r#"{"jobId":"j-1","session_hash":"s-1"}"#);
        let fields = req.client_fields(&FieldConfig::default());
        assert_eq!(fields.correlation_key.as_deref(), Some("s-1"));

        let req = inbound("/api/generate", r#"{"jobId":"j-1"}"#);
        let fields = req.client_fields(&FieldConfig::default());
        assert_eq!(fields.correlation_key.as_deref(), Some("j-1"));
    }

    #[test]
    fn test_strip_identity_fields() {
        let fields = FieldConfig::default();
        let mut req = inbound(
            "/gradio_api/queue/join?fingerprint=abc&session_hash=s-1",
            r#"{"data":["hi"],"fingerprint":"abc","subscriptionStatus":"paid","jobId":"j","session_hash":"s-1"}"#,
        );
        req.strip_fields(&fields.identity_fields());

        assert_eq!(req.path_and_query(), "/gradio_api/queue/join?session_hash=s-1");
        assert!(req.body_changed());
        let body: Value = serde_json::from_slice(&req.into_body()).unwrap();
        assert_eq!(body, serde_json::json!({"data": ["hi"], "session_hash": "s-1"}));
    }

    #[test]
    fn test_untouched_request_forwarded_verbatim() {
        let raw = "{ \"data\": [1,2] }";
        let mut req = inbound("/gradio_api/queue/data?session_hash=s%201", raw);
        req.strip_fields(&FieldConfig::default().identity_fields());
        assert_eq!(req.path_and_query(), "/gradio_api/queue/data?session_hash=s%201");
        assert_eq!(req.into_body(), Bytes::from(raw));
    }

    #[test]
    fn test_non_json_body() {
        let mut req = inbound("/upload?fingerprint=x", "binary-ish");
        req.strip_fields(&FieldConfig::default().identity_fields());
        assert_eq!(req.path_and_query(), "/upload");
        assert_eq!(req.into_body(), Bytes::from("binary-ish"));
    }

    #[test]
    fn test_path_artifact() {
        let mut req = inbound("/gradio_api/file=backend-2//tmp/gradio/out.wav", "");
        let (carrier, reference) = req.artifact_reference("file").unwrap();
        assert_eq!(reference, "backend-2//tmp/gradio/out.wav");

        req.rewrite_artifact(&carrier, "/tmp/gradio/out.wav");
        assert_eq!(req.path_and_query(), "/gradio_api/file=/tmp/gradio/out.wav");
    }

    #[test]
    fn test_query_artifact() {
        let mut req = inbound("/download?file=backend-1%2Fout.wav&dl=1", "");
        let (carrier, reference) = req.artifact_reference("file").unwrap();
        assert_eq!(carrier, ArtifactCarrier::Query("file".into()));
        assert_eq!(reference, "backend-1/out.wav");

        req.rewrite_artifact(&carrier, "out.wav");
        assert_eq!(req.path_and_query(), "/download?file=out.wav&dl=1");
    }

    #[test]
    fn test_no_artifact() {
        assert!(inbound("/gradio_api/queue/data", "").artifact_reference("file").is_none());
        assert!(inbound("/gradio_api/file=", "").artifact_reference("file").is_none());
    }

    #[tokio::test]
    async fn test_body_over_limit() {
        let err = buffer_body(Body::from("x".repeat(100)), 10).await.unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge(10)));
    }

    #[tokio::test]
    async fn test_aborted_body_is_client_error() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"fingerprint\":")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let body = Body::from_stream(futures_util::stream::iter(chunks));
        let err = buffer_body(body, 1024).await.unwrap_err();
        assert!(matches!(err, ProxyError::ClientInput(_)));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_body_within_limit() {
        let bytes = buffer_body(Body::from("{}"), 10).await.unwrap();
        assert_eq!(bytes, Bytes::from_static(b"{}"));
    }

    #[test]
    fn test_request_id_generated() {
        let request = Request::new(());
        let id = MakeRequestUuid.make_request_id(&request).unwrap();
        assert_eq!(id.header_value().len(), 36);
    }
}
