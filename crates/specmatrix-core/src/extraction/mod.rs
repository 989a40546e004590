//! Extraction state machine
//!
//! ```text
//! pending ──▶ processing ──▶ completed
//!                 │  ▲
//!                 ▼  │ (attempts < max)
//!               failed
//! ```
//!
//! `completed` is terminal. `failed` is terminal once the attempt budget is
//! spent; re-extraction means uploading a new document.
//! A document left `processing` by a delivery that never settled it is
//! claimed again by the job's next delivery.

pub mod extractors;
pub mod worker;

use crate::error::EngineError;
use specmatrix_model::ExtractionStatus;

pub use extractors::{
    Extractor, ExtractorRegistry, JsonExtractor, MarkdownExtractor, PlainTextExtractor,
};
pub use worker::{AttemptOutcome, ExtractionWorker};

/// Successor states ignoring the attempt budget
#[must_use]
pub fn allowed_transitions(from: ExtractionStatus) -> Vec<ExtractionStatus> {
    use ExtractionStatus::{Completed, Failed, Pending, Processing};
    match from {
        Pending => vec![Processing],
        Processing => vec![Completed, Failed],
        Failed => vec![Processing],
        Completed => vec![],
    }
}

/// Check a transition, including the retry budget for `failed → processing`
///
/// # Errors
/// `PreconditionFailed` for illegal transitions.
pub fn validate_transition(
    from: ExtractionStatus,
    to: ExtractionStatus,
    attempts: u32,
    max_attempts: u32,
) -> Result<(), EngineError> {
    if !allowed_transitions(from).contains(&to) {
        return Err(EngineError::PreconditionFailed(format!(
            "illegal extraction transition {from} -> {to}"
        )));
    }
    if from == ExtractionStatus::Failed && attempts >= max_attempts {
        return Err(EngineError::PreconditionFailed(format!(
            "extraction retry budget of {max_attempts} attempt(s) is spent"
        )));
    }
    Ok(())
}

/// Truncate error text on a character boundary
#[must_use]
pub fn truncate_error(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut out: String = message.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExtractionStatus::{Completed, Failed, Pending, Processing};

    #[test]
    fn happy_path() {
        assert!(validate_transition(Pending, Processing, 0, 3).is_ok());
        assert!(validate_transition(Processing, Completed, 1, 3).is_ok());
        assert!(validate_transition(Processing, Failed, 1, 3).is_ok());
    }

    #[test]
    fn settled_states_are_terminal() {
        assert!(allowed_transitions(Completed).is_empty());
        assert!(validate_transition(Completed, Processing, 1, 3).is_err());
        assert!(validate_transition(Failed, Processing, 3, 3).is_err());
        assert!(validate_transition(Failed, Processing, 2, 3).is_ok());
    }

    #[test]
    fn no_skipping_processing() {
        assert!(validate_transition(Pending, Completed, 0, 3).is_err());
        assert!(validate_transition(Failed, Completed, 1, 3).is_err());
        assert!(validate_transition(Processing, Processing, 1, 3).is_err());
    }

    #[test]
    fn truncation_respects_chars() {
        assert_eq!(truncate_error("short", 10), "short");
        let long = "é".repeat(20);
        let cut = truncate_error(&long, 5);
        assert_eq!(cut.chars().count(), 5);
        assert!(cut.ends_with('…'));
    }
}
