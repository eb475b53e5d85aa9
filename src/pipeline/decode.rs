//! Normalization of reasoning output into schema types.
//!
//! The engine may hand back an already-structured JSON value or free text
//! that merely contains one. Both go through [`decode`].

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Raw answer of a reasoning call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StageOutput {
    /// Value already shaped like the requested schema.
    Structured(serde_json::Value),
    /// Text the caller must decode.
    Text(String),
}

impl StageOutput {
    /// Text form of the output, for logging and diagnostics.
    pub fn to_text(&self) -> String {
        match self {
            Self::Structured(value) => value.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Decode a stage output into `T`.
///
/// Text is searched for a JSON object: bare, inside a markdown fence, or
/// embedded in prose. The error string describes why decoding failed.
pub fn decode<T: DeserializeOwned>(output: &StageOutput) -> Result<T, String> {
    match output {
        StageOutput::Structured(value) => {
            serde_json::from_value(value.clone()).map_err(|e| format!("schema mismatch: {e}"))
        }
        StageOutput::Text(text) => {
            let json = extract_json_object(text)
                .ok_or_else(|| "no JSON object found in response".to_string())?;
            serde_json::from_str(json).map_err(|e| format!("schema mismatch: {e}"))
        }
    }
}

/// Locate the first balanced top-level JSON object in `text`.
///
/// Prefers the body of a ```json fence when one exists. Braces inside
/// string literals are skipped.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            if let Some(found) = balanced_object(after[..end].trim()) {
                return Some(found);
            }
        }
    }

    balanced_object(trimmed)
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
