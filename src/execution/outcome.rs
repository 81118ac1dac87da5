//! Outcome classification.
//!
//! # Responsibilities
//! - Map a raw invocation failure onto the closed [`OutcomeKind`] taxonomy
//!
//! # Design Decisions
//! - 429 is rate-limited (retryable, flagged separately)
//! - Only malformed requests (400, 422), policy refusals (403) and budget
//!   refusals (402) are fatal: no other backend would accept them
//! - Any other status, such as 401 or 404, belongs to one backend's setup and
//!   advances to the next candidate
//! - The executor never inspects error text; it only sees the kind

use crate::attempts::OutcomeKind;
use crate::execution::invoker::{InvokeError, InvokeErrorKind};

/// Maps an invocation error into the outcome taxonomy.
///
/// Returning [`OutcomeKind::Success`] for an error is treated as retryable.
pub trait Classifier: Send + Sync {
    fn classify(&self, error: &InvokeError) -> OutcomeKind;
}

impl<F> Classifier for F
where
    F: Fn(&InvokeError) -> OutcomeKind + Send + Sync,
{
    fn classify(&self, error: &InvokeError) -> OutcomeKind {
        self(error)
    }
}

/// Kind-based classifier used when the caller supplies none.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl Classifier for DefaultClassifier {
    fn classify(&self, error: &InvokeError) -> OutcomeKind {
        match error.kind() {
            InvokeErrorKind::DeadlineExceeded => OutcomeKind::Timeout,
            InvokeErrorKind::RateLimited | InvokeErrorKind::Status(429) => {
                OutcomeKind::RateLimited
            }
            InvokeErrorKind::Status(400 | 402 | 403 | 422) => OutcomeKind::Fatal,
            InvokeErrorKind::Status(_) => OutcomeKind::Retryable,
            InvokeErrorKind::Transport | InvokeErrorKind::Decode => OutcomeKind::Retryable,
            InvokeErrorKind::InvalidRequest
            | InvokeErrorKind::PolicyViolation
            | InvokeErrorKind::BudgetExceeded => OutcomeKind::Fatal,
        }
    }
}
