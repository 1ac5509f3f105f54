//! The detector rule table.
//!
//! Each rule is a pure predicate over one resolved [`CallSite`] or
//! [`AsyncEndpoint`]. Rules write disjoint finding kinds, so the order they
//! run in never matters.

use crate::facts::{
    AsyncEndpoint, CallSite, Category, Confidence, EndpointOperation, Finding, FindingKind,
    Severity, ValueSource,
};

/// Attempts at which an unguarded retry becomes a retry storm.
pub const RETRY_STORM_ATTEMPTS: u32 = 3;

/// A call-site or endpoint detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorRule {
    MissingTimeout,
    MissingRetry,
    RetryWithoutBreaker,
    BlockingInAsync,
    SwallowedException,
    MissingFallback,
    ConsumerWithoutDlq,
}

impl DetectorRule {
    /// Rules evaluated against every call site.
    pub const CALL_SITE_RULES: &'static [DetectorRule] = &[
        DetectorRule::MissingTimeout,
        DetectorRule::MissingRetry,
        DetectorRule::RetryWithoutBreaker,
        DetectorRule::BlockingInAsync,
        DetectorRule::SwallowedException,
        DetectorRule::MissingFallback,
    ];

    /// Rules evaluated against every merged endpoint.
    pub const ENDPOINT_RULES: &'static [DetectorRule] = &[DetectorRule::ConsumerWithoutDlq];

    pub fn kind(&self) -> FindingKind {
        match self {
            DetectorRule::MissingTimeout => FindingKind::MissingTimeout,
            DetectorRule::MissingRetry => FindingKind::MissingRetry,
            DetectorRule::RetryWithoutBreaker => FindingKind::RetryWithoutBreaker,
            DetectorRule::BlockingInAsync => FindingKind::BlockingInAsync,
            DetectorRule::SwallowedException => FindingKind::SwallowedException,
            DetectorRule::MissingFallback => FindingKind::MissingFallback,
            DetectorRule::ConsumerWithoutDlq => FindingKind::ConsumerWithoutDlq,
        }
    }

    /// Severity before blast-radius and confidence adjustment.
    pub fn default_severity(&self) -> Severity {
        match self {
            DetectorRule::MissingTimeout
            | DetectorRule::RetryWithoutBreaker
            | DetectorRule::BlockingInAsync
            | DetectorRule::ConsumerWithoutDlq => Severity::High,
            DetectorRule::MissingRetry | DetectorRule::SwallowedException => Severity::Medium,
            DetectorRule::MissingFallback => Severity::Low,
        }
    }

    /// Evaluate a call-site rule. Endpoint rules never fire here.
    pub fn evaluate(&self, site: &CallSite) -> Option<Finding> {
        let (sources, rationale) = match self {
            DetectorRule::MissingTimeout => {
                if !(site.category.is_request_response() && site.is_blocking && !site.timeout.present)
                {
                    return None;
                }
                (
                    vec![],
                    format!(
                        "blocking {} call {} has no timeout; a slow dependency holds this thread indefinitely",
                        site.category,
                        site.label()
                    ),
                )
            }
            DetectorRule::MissingRetry => {
                if !(site.category.is_remote_service()
                    && site.is_external
                    && !site.retry.present
                    && !site.has_circuit_breaker)
                {
                    return None;
                }
                (
                    vec![],
                    format!(
                        "{} call {} has neither a retry policy nor a circuit breaker; transient failures surface directly",
                        site.category,
                        site.label()
                    ),
                )
            }
            DetectorRule::RetryWithoutBreaker => {
                if !site.retry.present || site.has_circuit_breaker {
                    return None;
                }
                match site.retry.max_attempts {
                    Some(n) if n >= RETRY_STORM_ATTEMPTS => (
                        vec![site.retry.source],
                        format!(
                            "{} retries up to {} attempts without a circuit breaker; a failing dependency receives a retry storm",
                            site.label(),
                            n
                        ),
                    ),
                    Some(_) => return None,
                    // Unknown attempt counts are reported, never assumed safe.
                    None => (
                        vec![Some(ValueSource::Unresolved)],
                        format!(
                            "{} retries an unknown number of times ({}) without a circuit breaker",
                            site.label(),
                            site.retry
                                .source
                                .map(|s| s.as_str())
                                .unwrap_or("unresolved")
                        ),
                    ),
                }
            }
            DetectorRule::BlockingInAsync => {
                if !(site.in_async_context && site.is_blocking && site.category != Category::Unknown)
                {
                    return None;
                }
                (
                    vec![],
                    format!(
                        "blocking {} call {} runs on an async execution context and stalls its thread",
                        site.category,
                        site.label()
                    ),
                )
            }
            DetectorRule::SwallowedException => {
                let handling = &site.error_handling;
                if !(handling.has_guard
                    && !handling.rethrows
                    && !handling.dead_letters
                    && site.category != Category::Unknown)
                {
                    return None;
                }
                let detail = if handling.logs {
                    "logged and dropped"
                } else {
                    "dropped silently"
                };
                (
                    vec![],
                    format!(
                        "failures of {} are caught and {}; callers never learn the {} call failed",
                        site.label(),
                        detail,
                        site.category
                    ),
                )
            }
            DetectorRule::MissingFallback => {
                if !site.has_circuit_breaker || site.has_fallback {
                    return None;
                }
                (
                    vec![],
                    format!(
                        "circuit breaker{} on {} has no fallback; an open circuit fails every call",
                        site.circuit_breaker_name
                            .as_deref()
                            .map(|n| format!(" '{}'", n))
                            .unwrap_or_default(),
                        site.label()
                    ),
                )
            }
            DetectorRule::ConsumerWithoutDlq => return None,
        };

        Some(
            Finding::new(self.kind(), self.default_severity(), &site.file, site.line)
                .with_confidence(confidence_of(site.classification_confidence, &sources))
                .with_evidence(site.id.clone())
                .with_rationale(rationale)
                .with_symbol(site.enclosing_function.clone()),
        )
    }

    /// Evaluate an endpoint rule. Call-site rules never fire here.
    pub fn evaluate_endpoint(&self, endpoint: &AsyncEndpoint) -> Option<Finding> {
        match self {
            DetectorRule::ConsumerWithoutDlq => {
                if endpoint.key.operation != EndpointOperation::Consume
                    || endpoint.dead_letter.present
                {
                    return None;
                }
                let (file, line) = endpoint
                    .sites
                    .iter()
                    .next()
                    .and_then(|s| split_site(s))
                    .unwrap_or_default();
                let rationale = format!(
                    "{}consumer of {} '{}' has no dead-letter destination; poison messages are retried forever or lost",
                    if endpoint.is_new { "new " } else { "" },
                    endpoint.key.endpoint_type,
                    endpoint.key.name
                );
                Some(
                    Finding::new(self.kind(), self.default_severity(), &file, line)
                        .with_evidence(endpoint.id())
                        .with_rationale(rationale)
                        .with_symbol(endpoint.functions.iter().next().cloned()),
                )
            }
            _ => None,
        }
    }
}

/// Lowest of the classification confidence and the confidence of every
/// value source the finding depends on.
pub fn confidence_of(classification: Confidence, sources: &[Option<ValueSource>]) -> Confidence {
    sources
        .iter()
        .flatten()
        .map(ValueSource::confidence)
        .fold(classification, Confidence::min)
}

/// Split a `file:line` site reference.
pub fn split_site(site: &str) -> Option<(String, usize)> {
    let (file, line) = site.rsplit_once(':')?;
    Some((file.to_string(), line.parse().ok()?))
}
