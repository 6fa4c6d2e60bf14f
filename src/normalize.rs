//! Response normalization
//!
//! Maps the reply shapes produced by the supported backend families onto
//! [`CanonicalResponse`]. Recognized shapes, checked in order:
//!
//! - `{"message": {"content": "..."}}`
//! - `{"choices": [{"message": {"content": "..."}}]}`
//! - `{"response": "..."}`
//! - `{"text": "..."}`
//!
//! Any of these may be wrapped once in `{"result": ...}`.

use crate::error::NormalizeError;
use crate::types::CanonicalResponse;
use serde_json::Value;

/// Normalize a raw backend reply
///
/// `fallback_model` is used when the payload does not name the model that
/// produced it.
pub fn normalize(
    raw: Option<&Value>,
    fallback_model: &str,
) -> Result<CanonicalResponse, NormalizeError> {
    let mut payload = match raw {
        None | Some(Value::Null) => return Err(NormalizeError::NullResponse),
        Some(value) => value,
    };

    if let Some(inner) = payload.get("result") {
        if inner.is_null() {
            return Err(NormalizeError::NullResponse);
        }
        payload = inner;
    }

    let content = extract_content(payload).ok_or(NormalizeError::InvalidResponseShape)?;
    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(fallback_model);

    Ok(CanonicalResponse::assistant(content, model, true))
}

/// First recognized shape whose content is a string
fn extract_content(payload: &Value) -> Option<&str> {
    ["/message/content", "/choices/0/message/content", "/response", "/text"]
        .into_iter()
        .find_map(|pointer| payload.pointer(pointer).and_then(Value::as_str))
}
