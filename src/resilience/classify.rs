//! Failure classification.
//!
//! # Responsibilities
//! - Bucket an operation error by its message text
//! - Keep a fixed priority order so the first matching bucket wins
//!
//! # Design Decisions
//! - Raw error codes (`ECONNREFUSED`, `ETIMEDOUT`) match case-sensitively
//! - Domain keywords match case-insensitively
//! - Classification is informational; it never changes threshold counting

use serde::{Deserialize, Serialize};

/// Bucket assigned to a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Timeout,
    Connection,
    Database,
    Validation,
    AiService,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Connection => "CONNECTION",
            FailureKind::Database => "DATABASE",
            FailureKind::Validation => "VALIDATION",
            FailureKind::AiService => "AI_SERVICE",
            FailureKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matching rule for one bucket.
struct Rule {
    kind: FailureKind,
    /// Matched against the raw message.
    codes: &'static [&'static str],
    /// Matched against the lowercased message.
    keywords: &'static [&'static str],
}

/// Evaluated top to bottom.
const RULES: &[Rule] = &[
    Rule {
        kind: FailureKind::Timeout,
        codes: &["ETIMEDOUT", "ESOCKETTIMEDOUT", "OPERATION_TIMEOUT"],
        keywords: &["timeout", "timed out"],
    },
    Rule {
        kind: FailureKind::Connection,
        codes: &["ECONNREFUSED", "ECONNRESET", "ENOTFOUND", "EPIPE", "EHOSTUNREACH"],
        keywords: &["connection", "network", "socket"],
    },
    Rule {
        kind: FailureKind::Database,
        codes: &["SQLITE_", "ER_"],
        keywords: &["database", "query", "sql", "deadlock", "constraint", "relation"],
    },
    Rule {
        kind: FailureKind::Validation,
        codes: &[],
        keywords: &["validation", "invalid", "required field", "schema"],
    },
    Rule {
        kind: FailureKind::AiService,
        codes: &[],
        keywords: &["openai", "anthropic", "model", "prediction", "rate limit", "token", "ai service"],
    },
];

/// Classify an error message into a [`FailureKind`].
pub fn classify_error(message: &str) -> FailureKind {
    let lowered = message.to_lowercase();

    RULES
        .iter()
        .find(|rule| {
            rule.codes.iter().any(|code| message.contains(code))
                || rule.keywords.iter().any(|kw| lowered.contains(kw))
        })
        .map(|rule| rule.kind)
        .unwrap_or(FailureKind::Unknown)
}
