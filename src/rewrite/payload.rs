//! Completion payload rewriting.
//!
//! A completion event looks like
//! `{"msg": "process_completed", "success": true, "output": {"data": [{"name": "/tmp/x.wav", ...}]}}`.
//! The `name` and `path` of every file object in `output.data` become
//! artifact references naming the backend that produced them. A `url`
//! ending in `file=<local path>` gets the same reference after `file=`.

use serde_json::Value;

use crate::locator;

const FILE_FIELDS: [&str; 2] = ["name", "path"];
const URL_FIELD: &str = "url";
const URL_FILE_MARKER: &str = "file=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadOutcome {
    /// Not JSON. The frame is forwarded as received.
    Malformed,
    /// JSON, but nothing to rewrite.
    Untouched,
    /// Re-serialized payload with `artifacts` file objects rewritten.
    Rewritten { json: String, artifacts: usize },
}

pub fn rewrite_payload(payload: &[u8], backend_id: &str) -> PayloadOutcome {
    let mut value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(_) => return PayloadOutcome::Malformed,
    };

    let artifacts = rewrite_completion(&mut value, backend_id);
    if artifacts == 0 {
        return PayloadOutcome::Untouched;
    }

    match serde_json::to_string(&value) {
        Ok(json) => PayloadOutcome::Rewritten { json, artifacts },
        Err(_) => PayloadOutcome::Untouched,
    }
}

/// Rewrite artifact paths in place; returns how many file objects changed.
pub fn rewrite_completion(value: &mut Value, backend_id: &str) -> usize {
    if value.get("success").and_then(Value::as_bool) != Some(true) {
        return 0;
    }
    let Some(data) = value
        .get_mut("output")
        .and_then(|output| output.get_mut("data"))
        .and_then(Value::as_array_mut)
    else {
        return 0;
    };

    let mut rewritten = 0;
    for item in data.iter_mut() {
        match item {
            Value::Object(_) => rewritten += rewrite_file(item, backend_id),
            // Galleries and multi-file outputs nest one level.
            Value::Array(items) => {
                for nested in items.iter_mut() {
                    rewritten += rewrite_file(nested, backend_id);
                }
            }
            _ => {}
        }
    }
    rewritten
}

fn rewrite_file(item: &mut Value, backend_id: &str) -> usize {
    let Some(object) = item.as_object_mut() else {
        return 0;
    };

    let mut touched = false;
    for field in FILE_FIELDS {
        if let Some(Value::String(path)) = object.get_mut(field) {
            *path = locator::encode(backend_id, path);
            touched = true;
        }
    }
    if let Some(Value::String(url)) = object.get_mut(URL_FIELD) {
        if let Some(rewritten) = rewrite_file_url(url, backend_id) {
            *url = rewritten;
            touched = true;
        }
    }
    usize::from(touched)
}

/// `.../file=<local>` becomes `.../file=<backend>/<local>`.
fn rewrite_file_url(url: &str, backend_id: &str) -> Option<String> {
    let pos = url.rfind(URL_FILE_MARKER)?;
    let start = pos + URL_FILE_MARKER.len();
    let local_path = &url[start..];
    if local_path.is_empty() {
        return None;
    }
    Some(format!("{}{}", &url[..start], locator::encode(backend_id, local_path)))
}
