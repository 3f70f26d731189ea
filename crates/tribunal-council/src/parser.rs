use rust_decimal::Decimal;
use serde_json::Value;
use tribunal_models::AdvisorJudgment;

use crate::error::AdvisorError;

/// Pull the first JSON object out of free-form model output.
///
/// Tried in order: the whole text, the body of a fenced code block, then
/// every balanced `{ ... }` span from left to right until one parses.
pub fn extract_json(text: &str) -> Result<Value, AdvisorError> {
    let trimmed = text.trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(body) = fenced_block(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body) {
            return Ok(value);
        }
    }

    for (start, _) in trimmed.match_indices('{') {
        if let Some(span) = balanced_object(&trimmed[start..]) {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(span) {
                return Ok(value);
            }
        }
    }

    Err(AdvisorError::Parse(format!(
        "no JSON object in advisor output (length={})",
        text.len()
    )))
}

/// Body of the first ``` fence, with an optional language tag stripped.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// The balanced object starting at the first byte of `text`, if it closes.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
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
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse and range-check an advisor judgment from raw CLI output.
pub fn parse_judgment(raw: &str) -> Result<AdvisorJudgment, AdvisorError> {
    let value = extract_json(raw)?;
    let judgment: AdvisorJudgment = serde_json::from_value(value)
        .map_err(|e| AdvisorError::Parse(format!("not an advisor judgment: {e}")))?;
    validate_judgment(&judgment)?;
    Ok(judgment)
}

/// Confidence and risk score must both lie in `[0, 1]`.
pub fn validate_judgment(judgment: &AdvisorJudgment) -> Result<(), AdvisorError> {
    let in_unit = |v: Decimal| v >= Decimal::ZERO && v <= Decimal::ONE;

    if !in_unit(judgment.confidence) {
        return Err(AdvisorError::Malformed(format!(
            "confidence {} outside [0, 1]",
            judgment.confidence
        )));
    }
    if let Some(risk) = judgment.risk_score {
        if !in_unit(risk) {
            return Err(AdvisorError::Malformed(format!(
                "risk_score {risk} outside [0, 1]"
            )));
        }
    }
    Ok(())
}
