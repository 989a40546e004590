//! Structured assessments and response hygiene

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use specmatrix_model::ComplianceStatus;

/// Appended to `comments` when the model left key fields empty
pub const EMPTY_FIELDS_WARNING: &str = "Warning: AI returned empty fields - requires manual completion";

const RAW_EXCERPT_CHARS: usize = 1000;

/// A compliance assessment of one requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Assessment {
    /// Section number and heading in the supplier document
    pub spec_reference: String,
    /// Verbatim quote from the supplier document
    pub supplier_response: String,
    /// Technical justification
    pub justification: String,
    /// Classification
    #[schemars(schema_with = "compliance_schema")]
    pub compliance_status: ComplianceStatus,
    /// Confidence, 0..=100
    #[schemars(range(min = 0, max = 100))]
    pub confidence_score: u8,
    /// Suggested test approach
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_reference: Option<String>,
    /// Risk level and explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<String>,
    /// Additional notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

fn compliance_schema(_gen: &mut SchemaGenerator) -> Schema {
    SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        enum_values: Some(
            ComplianceStatus::ALL
                .iter()
                .map(|s| Value::String(s.as_str().to_string()))
                .collect(),
        ),
        ..SchemaObject::default()
    }
    .into()
}

/// JSON schema handed to backends that support structured output
#[must_use]
pub fn assessment_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(Assessment)).unwrap_or(Value::Null)
}

impl Assessment {
    /// The canonical degraded record
    ///
    /// Identical in shape for every implementation and every failure cause.
    #[must_use]
    pub fn degraded(reason: &str) -> Self {
        Self {
            spec_reference: "AI generation failed".to_string(),
            supplier_response: "Error during AI processing".to_string(),
            justification: format!("AI service error: {reason}"),
            compliance_status: ComplianceStatus::RequiresClarification,
            confidence_score: 0,
            test_reference: None,
            risk_assessment: None,
            comments: Some("Manual review required due to AI processing error".to_string()),
        }
    }
}

/// Provider output plus provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAssessment {
    /// The assessment
    pub assessment: Assessment,
    /// Model that produced it
    pub model: String,
    /// Why the record is degraded, if it is
    pub degraded: Option<String>,
}

impl GeneratedAssessment {
    /// Usable model output
    #[must_use]
    pub fn ok(assessment: Assessment, model: impl Into<String>) -> Self {
        Self {
            assessment,
            model: model.into(),
            degraded: None,
        }
    }

    /// Degraded record for `reason`
    #[must_use]
    pub fn degraded(reason: impl Into<String>, model: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            assessment: Assessment::degraded(&reason),
            model: model.into(),
            degraded: Some(reason),
        }
    }

    /// Whether the record is degraded
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Turn raw model text into an assessment
///
/// Strips Markdown fences, takes the outermost JSON object and reads fields
/// leniently: confidence may be a number or numeric string and is clamped to
/// 0..=100, an unknown classification becomes "Requires Clarification".
/// Empty reference or quote keeps the record but appends a warning comment.
///
/// # Errors
/// Returns a description of the problem when no usable object is present.
pub fn parse_assessment(raw: &str) -> Result<Assessment, String> {
    let body = outermost_object(strip_fences(raw)).ok_or_else(|| "no JSON object in response".to_string())?;
    let value: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let Value::Object(map) = value else {
        return Err("response is not a JSON object".to_string());
    };

    for required in ["spec_reference", "supplier_response", "justification", "compliance_status"] {
        if !map.contains_key(required) {
            return Err(format!("missing field {required}"));
        }
    }

    let compliance_status = map
        .get("compliance_status")
        .and_then(|v| serde_json::from_value::<ComplianceStatus>(v.clone()).ok())
        .unwrap_or(ComplianceStatus::RequiresClarification);

    let mut assessment = Assessment {
        spec_reference: text(&map, "spec_reference").unwrap_or_default(),
        supplier_response: text(&map, "supplier_response").unwrap_or_default(),
        justification: text(&map, "justification").unwrap_or_default(),
        compliance_status,
        confidence_score: confidence(map.get("confidence_score")),
        test_reference: text(&map, "test_reference").filter(|s| !s.is_empty()),
        risk_assessment: text(&map, "risk_assessment").filter(|s| !s.is_empty()),
        comments: text(&map, "comments").filter(|s| !s.is_empty()),
    };

    if assessment.spec_reference.trim().is_empty() || assessment.supplier_response.trim().is_empty() {
        tracing::warn!("provider returned empty reference or supplier response");
        assessment.comments = Some(match assessment.comments.take() {
            Some(existing) => format!("{existing} | {EMPTY_FIELDS_WARNING}"),
            None => EMPTY_FIELDS_WARNING.to_string(),
        });
    }
    Ok(assessment)
}

/// Degraded reason for unparseable output, with a bounded excerpt
#[must_use]
pub fn unparseable_reason(problem: &str, raw: &str) -> String {
    let excerpt: String = raw.chars().take(RAW_EXCERPT_CHARS).collect();
    format!("response could not be parsed ({problem}): {excerpt}")
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn outermost_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                .collect::<Vec<_>>()
                .join("; "),
        ),
        other => Some(other.to_string()),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn confidence(value: Option<&Value>) -> u8 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GOOD: &str = r#"{
        "spec_reference": "Section 3.2 Audit Trail",
        "supplier_response": "All changes are logged with user and timestamp.",
        "justification": "Directly addresses the requirement.",
        "compliance_status": "Compliant",
        "confidence_score": 92
    }"#;

    #[test]
    fn parses_plain_json() {
        let a = parse_assessment(GOOD).unwrap();
        assert_eq!(a.compliance_status, ComplianceStatus::Compliant);
        assert_eq!(a.confidence_score, 92);
        assert_eq!(a.comments, None);
    }

    #[test]
    fn strips_fences_and_chatter() {
        let raw = format!("```json\n{GOOD}\n```");
        assert_eq!(parse_assessment(&raw).unwrap().spec_reference, "Section 3.2 Audit Trail");

        let raw = format!("Here is the result:\n{GOOD}\nThanks.");
        assert!(parse_assessment(&raw).is_ok());
    }

    #[test]
    fn clamps_confidence() {
        let raw = GOOD.replace("92", "140.6");
        assert_eq!(parse_assessment(&raw).unwrap().confidence_score, 100);
        let raw = GOOD.replace("92", "-3");
        assert_eq!(parse_assessment(&raw).unwrap().confidence_score, 0);
        let raw = GOOD.replace("92", "\"75%\"");
        assert_eq!(parse_assessment(&raw).unwrap().confidence_score, 75);
    }

    #[test]
    fn unknown_status_needs_clarification() {
        let raw = GOOD.replace("\"Compliant\"", "\"Mostly fine\"");
        assert_eq!(
            parse_assessment(&raw).unwrap().compliance_status,
            ComplianceStatus::RequiresClarification
        );
    }

    #[test]
    fn empty_quote_adds_warning() {
        let raw = GOOD.replace("All changes are logged with user and timestamp.", "");
        let a = parse_assessment(&raw).unwrap();
        assert_eq!(a.comments.as_deref(), Some(EMPTY_FIELDS_WARNING));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_assessment("I cannot help with that").is_err());
        assert!(parse_assessment(r#"{"spec_reference": "x"}"#).is_err());
    }

    #[test]
    fn degraded_shape_is_canonical() {
        let a = GeneratedAssessment::degraded("timeout", "m");
        assert!(a.is_degraded());
        assert_eq!(a.assessment.compliance_status, ComplianceStatus::RequiresClarification);
        assert_eq!(a.assessment.confidence_score, 0);
        assert!(a.assessment.comments.is_some());
    }

    #[test]
    fn schema_lists_classifications() {
        let schema = assessment_schema().to_string();
        assert!(schema.contains("Requires Clarification"));
        assert!(schema.contains("confidence_score"));
    }
}
