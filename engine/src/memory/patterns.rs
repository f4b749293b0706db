use super::types::{ErrorType, Experience};
use std::fmt;

/// Lexical pattern used to group experiences for consolidation
///
/// Detectors are tried in declaration order; the first match wins and
/// anything unmatched falls back to its error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LessonPattern {
    PasswordComparison,
    SqlInjection,
    TimingAttack,
    CorsSecurity,
    Other(ErrorType),
}

impl LessonPattern {
    /// Classify by `summary + root_cause`, case-insensitively
    pub fn detect(experience: &Experience) -> Self {
        let text = format!(
            "{} {}",
            experience.record.summary, experience.record.root_cause
        )
        .to_lowercase();

        if text.contains("password") && text.contains("compare") {
            Self::PasswordComparison
        } else if text.contains("sql") && text.contains("injection") {
            Self::SqlInjection
        } else if text.contains("timing") && text.contains("attack") {
            Self::TimingAttack
        } else if text.contains("cors") || text.contains("cross") {
            Self::CorsSecurity
        } else {
            Self::Other(experience.record.error_type)
        }
    }

    pub fn key(&self) -> String {
        match self {
            Self::PasswordComparison => "password_comparison".to_string(),
            Self::SqlInjection => "sql_injection".to_string(),
            Self::TimingAttack => "timing_attack".to_string(),
            Self::CorsSecurity => "cors_security".to_string(),
            Self::Other(error_type) => format!("other_{}", error_type),
        }
    }
}

impl fmt::Display for LessonPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{ExperienceRecord, Severity};

    fn exp(summary: &str, root_cause: &str, error_type: ErrorType) -> Experience {
        Experience::new(ExperienceRecord::new(
            "p",
            "m",
            "s",
            Severity::High,
            error_type,
            summary,
            root_cause,
            "fix",
        ))
    }

    #[test]
    fn test_detector_order() {
        // matches both the password and timing detectors; password wins
        let e = exp(
            "Timing attack on password check",
            "Used == to compare hashes",
            ErrorType::Security,
        );
        assert_eq!(LessonPattern::detect(&e), LessonPattern::PasswordComparison);

        let e = exp("SQL Injection in search", "string concat", ErrorType::Security);
        assert_eq!(LessonPattern::detect(&e), LessonPattern::SqlInjection);

        let e = exp("Timing attack on token", "early return", ErrorType::Security);
        assert_eq!(LessonPattern::detect(&e), LessonPattern::TimingAttack);

        let e = exp("Cross-origin requests blocked", "missing header", ErrorType::Bug);
        assert_eq!(LessonPattern::detect(&e), LessonPattern::CorsSecurity);
    }

    #[test]
    fn test_fallback_groups_by_error_type() {
        let e = exp("Slow list endpoint", "N+1 queries", ErrorType::Performance);
        let pattern = LessonPattern::detect(&e);
        assert_eq!(pattern, LessonPattern::Other(ErrorType::Performance));
        assert_eq!(pattern.key(), "other_performance");
    }
}
