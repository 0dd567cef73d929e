// ABOUTME: Structured-output support: parse a run's final text and validate it against a JSON Schema.
// ABOUTME: Failures are soft; callers get None and the raw text is still returned.

use serde_json::Value;

/// Parse `text` as JSON and validate it against `schema`.
///
/// Accepts a bare JSON document or one wrapped in a Markdown code fence. Returns
/// `None` on parse failure, validation failure, or an invalid schema.
pub fn structured_output(text: &str, schema: &Value) -> Option<Value> {
    let candidate = strip_code_fence(text.trim());
    let parsed: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Final text is not JSON, omitting structured output");
            return None;
        }
    };

    let validator = match jsonschema::Validator::new(schema) {
        Ok(validator) => validator,
        Err(e) => {
            tracing::warn!(error = %e, "Output schema is invalid, omitting structured output");
            return None;
        }
    };

    if validator.is_valid(&parsed) {
        Some(parsed)
    } else {
        let errors: Vec<String> = validator.iter_errors(&parsed).map(|e| e.to_string()).collect();
        tracing::debug!(errors = %errors.join("; "), "Final text does not match output schema");
        None
    }
}

/// Instruction appended to prompts for backends without native schema support
pub fn schema_instruction(schema: &Value) -> String {
    format!(
        "\n\nRespond with a single JSON document and nothing else. It must validate against this JSON Schema:\n{}",
        schema
    )
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening fence line
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}
