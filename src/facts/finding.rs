//! Finding types: the terminal artifact of an analysis run.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a finding, lowest first so `Ord` ranks `Critical` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// One level up, capped at critical.
    pub fn raised(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

/// How directly a finding's evidence was resolved, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kinds of findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    MissingTimeout,
    FireAndForget,
    MissingRetry,
    RetryWithoutBreaker,
    BlockingInAsync,
    ConsumerWithoutDlq,
    SwallowedException,
    MissingFallback,
    ConfigKeyMissing,
    UnitAmbiguous,
    RetryAmplification,
    BreakerTimeoutMismatch,
    PoolSizing,
    BreakingApiChange,
    ParseError,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::MissingTimeout => "missing_timeout",
            FindingKind::FireAndForget => "fire_and_forget",
            FindingKind::MissingRetry => "missing_retry",
            FindingKind::RetryWithoutBreaker => "retry_without_breaker",
            FindingKind::BlockingInAsync => "blocking_in_async",
            FindingKind::ConsumerWithoutDlq => "consumer_without_dlq",
            FindingKind::SwallowedException => "swallowed_exception",
            FindingKind::MissingFallback => "missing_fallback",
            FindingKind::ConfigKeyMissing => "config_key_missing",
            FindingKind::UnitAmbiguous => "unit_ambiguous",
            FindingKind::RetryAmplification => "retry_amplification",
            FindingKind::BreakerTimeoutMismatch => "breaker_timeout_mismatch",
            FindingKind::PoolSizing => "pool_sizing",
            FindingKind::BreakingApiChange => "breaking_api_change",
            FindingKind::ParseError => "parse_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missing_timeout" => Some(FindingKind::MissingTimeout),
            "fire_and_forget" => Some(FindingKind::FireAndForget),
            "missing_retry" => Some(FindingKind::MissingRetry),
            "retry_without_breaker" => Some(FindingKind::RetryWithoutBreaker),
            "blocking_in_async" => Some(FindingKind::BlockingInAsync),
            "consumer_without_dlq" => Some(FindingKind::ConsumerWithoutDlq),
            "swallowed_exception" => Some(FindingKind::SwallowedException),
            "missing_fallback" => Some(FindingKind::MissingFallback),
            "config_key_missing" => Some(FindingKind::ConfigKeyMissing),
            "unit_ambiguous" => Some(FindingKind::UnitAmbiguous),
            "retry_amplification" => Some(FindingKind::RetryAmplification),
            "breaker_timeout_mismatch" => Some(FindingKind::BreakerTimeoutMismatch),
            "pool_sizing" => Some(FindingKind::PoolSizing),
            "breaking_api_change" => Some(FindingKind::BreakingApiChange),
            "parse_error" => Some(FindingKind::ParseError),
            _ => None,
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fan-in summary for a changed symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastRadius {
    pub direct_callers: usize,
    pub reachable_entry_points: bool,
    /// Up to a few caller chains ending at the changed symbol, entry points first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_paths: Vec<Vec<String>>,
}

/// A single detected resilience risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub file: String,
    pub line: usize,
    /// Ids of the call sites / endpoints backing this finding.
    pub evidence: BTreeSet<String>,
    pub confidence: Confidence,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blast_radius: Option<BlastRadius>,
    /// Qualified name of the function the finding sits in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl Finding {
    pub fn new(kind: FindingKind, severity: Severity, file: &str, line: usize) -> Self {
        Self {
            kind,
            severity,
            file: file.to_string(),
            line,
            evidence: BTreeSet::new(),
            confidence: Confidence::High,
            rationale: String::new(),
            blast_radius: None,
            symbol: None,
        }
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_evidence<S: Into<String>>(mut self, id: S) -> Self {
        self.evidence.insert(id.into());
        self
    }

    pub fn with_rationale<S: Into<String>>(mut self, rationale: S) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_symbol(mut self, symbol: Option<String>) -> Self {
        self.symbol = symbol;
        self
    }

    /// Deduplication key.
    pub fn key(&self) -> (FindingKind, String, usize) {
        (self.kind, self.file.clone(), self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_raised_caps_at_critical() {
        assert_eq!(Severity::Low.raised(), Severity::Medium);
        assert_eq!(Severity::High.raised(), Severity::Critical);
        assert_eq!(Severity::Critical.raised(), Severity::Critical);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert!(Confidence::High > Confidence::Low);
    }

    #[test]
    fn test_kind_roundtrip_names() {
        for kind in [
            FindingKind::MissingTimeout,
            FindingKind::ConsumerWithoutDlq,
            FindingKind::BreakerTimeoutMismatch,
        ] {
            assert_eq!(FindingKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FindingKind::parse("nope"), None);
    }

    #[test]
    fn test_finding_serializes_field_names() {
        let f = Finding::new(FindingKind::MissingTimeout, Severity::High, "A.java", 12)
            .with_evidence("A.java:12:5")
            .with_rationale("no timeout");
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["kind"], "missing_timeout");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["confidence"], "high");
        assert_eq!(json["evidence"][0], "A.java:12:5");
        assert!(json.get("blast_radius").is_none());
    }
}
