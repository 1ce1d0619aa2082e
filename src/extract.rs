use serde_json::Value;

// ── Constants ────────────────────────────────────────────────────────────────

const FENCE_OPEN: &str = "```json\n";
const FENCE_CLOSE: &str = "\n```";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// The model text was not JSON at all. Counts as zero records.
    #[error("no data extracted")]
    Unparseable,
    /// The model text parsed, but to something other than an array.
    #[error("no data extracted")]
    NotASequence,
}

// ── Parse outcome ────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Parsed {
    Json(Value),
    Unparseable,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Turns raw model output into a sequence of records.
///
/// Lenient about a single ```` ```json ```` fence around the payload, strict
/// about the final shape: only a JSON array is a success. An empty array is
/// a success too.
pub fn extract(raw_text: &str) -> Result<Vec<Value>, ExtractionError> {
    let stripped = strip_fence(raw_text);

    match parse(&stripped) {
        Parsed::Json(Value::Array(records)) => {
            tracing::debug!(records = records.len(), "extracted records from model output");
            Ok(records)
        }
        Parsed::Json(other) => {
            tracing::warn!(kind = json_kind(&other), "model output is not a JSON array");
            Err(ExtractionError::NotASequence)
        }
        Parsed::Unparseable => Err(ExtractionError::Unparseable),
    }
}

// ── Fence stripping ──────────────────────────────────────────────────────────

/// Removes the first opening and the first closing fence marker, nothing else.
fn strip_fence(text: &str) -> String {
    text.replacen(FENCE_OPEN, "", 1).replacen(FENCE_CLOSE, "", 1)
}

// ── JSON parsing ─────────────────────────────────────────────────────────────

fn parse(text: &str) -> Parsed {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Parsed::Json(value),
        Err(e) => {
            tracing::warn!(error = %e, "model response is not valid JSON");
            Parsed::Unparseable
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_array_is_returned_as_is() {
        let records = extract(r#"[{"name": "Ana", "age": 31}, {"name": "Rui"}]"#).unwrap();
        assert_eq!(
            records,
            vec![json!({"name": "Ana", "age": 31}), json!({"name": "Rui"})]
        );
    }

    #[test]
    fn fenced_array_matches_unfenced() {
        let body = r#"[{"invoice": "0042", "total": 19.9}]"#;
        let fenced = format!("```json\n{}\n```", body);

        assert_eq!(extract(&fenced).unwrap(), extract(body).unwrap());
    }

    #[test]
    fn empty_array_is_a_success() {
        assert_eq!(extract("[]").unwrap(), Vec::<Value>::new());
        assert_eq!(extract("```json\n[]\n```").unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn prose_is_a_failure() {
        let err = extract("Sorry, I could not find any table in this image.").unwrap_err();
        assert!(matches!(err, ExtractionError::Unparseable));
        assert_eq!(err.to_string(), "no data extracted");
    }

    #[test]
    fn empty_text_is_a_failure() {
        assert!(matches!(extract(""), Err(ExtractionError::Unparseable)));
    }

    #[test]
    fn object_is_not_a_sequence() {
        let err = extract(r#"{"name": "Ana"}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::NotASequence));

        let fenced = extract("```json\n{\"name\": \"Ana\"}\n```").unwrap_err();
        assert!(matches!(fenced, ExtractionError::NotASequence));
    }

    #[test]
    fn scalars_are_not_sequences() {
        assert!(matches!(extract("42"), Err(ExtractionError::NotASequence)));
        assert!(matches!(extract("\"text\""), Err(ExtractionError::NotASequence)));
        assert!(matches!(extract("null"), Err(ExtractionError::NotASequence)));
    }

    #[test]
    fn only_first_fence_pair_is_stripped() {
        assert_eq!(strip_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(
            strip_fence("```json\n[1]\n```\n```json\n[2]\n```"),
            "[1]\n```json\n[2]\n```"
        );
        // A second block stays in place, so the text no longer parses.
        assert!(extract("```json\n[1]\n```\n```json\n[2]\n```").is_err());
    }

    #[test]
    fn fence_without_language_tag_is_left_alone() {
        assert_eq!(strip_fence("```\n[1]\n```"), "```\n[1]");
        assert!(matches!(extract("```\n[1]\n```"), Err(ExtractionError::Unparseable)));
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        let records = extract("  ```json\n[1, 2]\n```\n").unwrap();
        assert_eq!(records, vec![json!(1), json!(2)]);
    }

    #[test]
    fn records_keep_their_shape() {
        let records = extract(r#"[{"items": [1, {"k": null}]}, "loose", 7]"#).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["items"][1]["k"], Value::Null);
        assert_eq!(records[1], json!("loose"));
    }
}
