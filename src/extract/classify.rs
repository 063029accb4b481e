//! Resolver failure classification
//!
//! Resolver errors arrive as free text. The arbiter only needs to know
//! whether a failure means "needs a signed-in session" (age gate), "the
//! anonymous path is being throttled" (bot check, 429) or anything else.

use serde::Serialize;
use std::fmt;

/// Why an extraction attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AgeRestricted,
    Throttled,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::AgeRestricted => "age_restricted",
            FailureKind::Throttled => "throttled",
            FailureKind::Other => "other",
        })
    }
}

const AGE_PATTERNS: &[&str] = &[
    "confirm your age",
    "age-restricted",
    "age restricted",
    "inappropriate for some users",
    "age verification",
];

const THROTTLE_PATTERNS: &[&str] = &[
    "not a bot",
    "http error 429",
    "too many requests",
    "rate-limited",
    "rate limited",
    "try again later",
    "unusual traffic",
];

/// Classify a resolver error message
///
/// Age-gate wording wins over throttle wording: "Sign in to confirm your
/// age" must never arm the global cooldown.
pub fn classify(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if AGE_PATTERNS.iter().any(|p| lower.contains(p)) {
        FailureKind::AgeRestricted
    } else if THROTTLE_PATTERNS.iter().any(|p| lower.contains(p)) {
        FailureKind::Throttled
    } else {
        FailureKind::Other
    }
}
