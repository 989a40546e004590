//! Shared prompt rendering
//!
//! Both implementations render the same prompt from the same request.

use crate::AssessmentRequest;

/// Recorded in generation metadata so entries can be traced to the prompt
pub const PROMPT_VERSION: &str = "v1.0";

/// Render the assessment prompt
#[must_use]
pub fn render_prompt(request: &AssessmentRequest) -> String {
    let bundle = serde_json::to_string_pretty(&request.bundle).unwrap_or_default();
    let context = request
        .project_context
        .as_ref()
        .and_then(|c| serde_json::to_string_pretty(c).ok())
        .unwrap_or_else(|| "{}".to_string());
    let statuses = specmatrix_model::ComplianceStatus::ALL
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are creating one traceability matrix entry for GxP validation.\n\
         Respond with a single JSON object and nothing else.\n\n\
         REQUIREMENT\nCategory: {category}\nRequirement: {requirement}\n\n\
         SUPPLIER SPECIFICATION\n{bundle}\n\n\
         PROJECT CONTEXT\n{context}\n\n\
         RULES\n\
         - Cite exact section numbers and quote the supplier text verbatim.\n\
         - Base the assessment only on explicit statements in the specification.\n\
         - If the requirement is not addressed, set spec_reference to \"Not Found\" \
           and compliance_status to \"Requires Clarification\".\n\
         - compliance_status must be one of: {statuses}.\n\
         - confidence_score must be a number between 0 and 100.\n",
        category = request.category,
        requirement = request.requirement,
    )
}
