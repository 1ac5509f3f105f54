//! Cross-file invariants checked once every file is resolved.
//!
//! An invariant whose inputs are only partly known is skipped rather than
//! flagged; the skip is logged and reported so the gap is visible.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detect::confidence_of;
use crate::facts::{
    CallSite, ConfigCategory, ConfigUnit, ConfigValue, Confidence, Finding, FindingKind,
    Severity,
};
use crate::resolve::{canonical_key, ConfigIndex};

/// Reason recorded for skipped checks.
pub const SKIPPED_INSUFFICIENT_DATA: &str = "skipped_insufficient_data";

/// A check that could not run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SkippedCheck {
    /// Finding kind the check would have produced.
    pub check: String,
    /// Call-site id or config scope the check was about.
    pub subject: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Findings and skips from one validation pass.
#[derive(Debug, Clone, Default)]
pub struct InvariantReport {
    pub findings: Vec<Finding>,
    pub skipped: Vec<SkippedCheck>,
}

impl InvariantReport {
    fn skip(&mut self, kind: FindingKind, subject: &str, detail: &str) {
        debug!(
            check = kind.as_str(),
            subject,
            reason = SKIPPED_INSUFFICIENT_DATA,
            detail,
            "invariant skipped"
        );
        self.skipped.push(SkippedCheck {
            check: kind.as_str().to_string(),
            subject: subject.to_string(),
            reason: SKIPPED_INSUFFICIENT_DATA.to_string(),
            detail: Some(detail.to_string()),
        });
    }
}

/// Validates whole-program invariants.
pub struct InvariantValidator<'a> {
    config: &'a ConfigIndex,
    sla_threshold_ms: u64,
}

const BREAKER_WAIT_FRAGMENTS: &[&str] = &["waitduration", "sleepwindow"];

impl<'a> InvariantValidator<'a> {
    pub fn new(config: &'a ConfigIndex, sla_threshold_ms: u64) -> Self {
        Self {
            config,
            sla_threshold_ms,
        }
    }

    /// Run every invariant over all resolved call sites.
    pub fn validate(&self, sites: &[CallSite]) -> InvariantReport {
        let mut report = InvariantReport::default();
        for site in sites {
            self.retry_amplification(site, &mut report);
            self.breaker_timeout(site, &mut report);
        }
        self.pool_sizing(&mut report);
        report
    }

    /// `max_attempts × timeout_ms` must stay within the SLA.
    fn retry_amplification(&self, site: &CallSite, report: &mut InvariantReport) {
        if !site.retry.present || !site.timeout.present {
            return;
        }
        let (Some(attempts), Some(timeout_ms)) = (site.retry.max_attempts, site.timeout.value_ms)
        else {
            report.skip(
                FindingKind::RetryAmplification,
                &site.id,
                "retry attempts or timeout value unresolved",
            );
            return;
        };

        let worst_case = u64::from(attempts).saturating_mul(timeout_ms);
        if worst_case <= self.sla_threshold_ms {
            return;
        }
        report.findings.push(
            Finding::new(
                FindingKind::RetryAmplification,
                Severity::Medium,
                &site.file,
                site.line,
            )
            .with_confidence(confidence_of(
                site.classification_confidence,
                &[site.retry.source, site.timeout.source],
            ))
            .with_evidence(site.id.clone())
            .with_rationale(format!(
                "{} attempts x {} ms timeout = {} ms worst case, above the {} ms SLA",
                attempts, timeout_ms, worst_case, self.sla_threshold_ms
            ))
            .with_symbol(site.enclosing_function.clone()),
        );
    }

    fn breaker_wait(&self, instance: &str) -> Option<&'a ConfigValue> {
        let config = self.config;
        [instance, "default"].into_iter().find_map(|name| {
            BREAKER_WAIT_FRAGMENTS.iter().find_map(|fragment| {
                config
                    .values()
                    .iter()
                    .find(|v| {
                        let canonical = canonical_key(&v.key);
                        v.category == ConfigCategory::CircuitBreaker
                            && v.unit == ConfigUnit::Millis
                            && canonical.contains(&canonical_key(name))
                            && canonical.contains(fragment)
                    })
            })
        })
    }

    /// An open breaker must not close again before the call could time out.
    fn breaker_timeout(&self, site: &CallSite, report: &mut InvariantReport) {
        if !site.has_circuit_breaker {
            return;
        }
        let instance = site.circuit_breaker_name.as_deref().unwrap_or("default");
        let wait = self.breaker_wait(instance);
        let (Some(wait), Some(timeout_ms)) = (wait, site.timeout.value_ms) else {
            report.skip(
                FindingKind::BreakerTimeoutMismatch,
                &site.id,
                "breaker wait duration or call timeout unresolved",
            );
            return;
        };

        if wait.normalized_value >= timeout_ms as f64 {
            return;
        }
        let confidence = confidence_of(
            site.classification_confidence,
            &[site.timeout.source],
        );
        report.findings.push(
            Finding::new(
                FindingKind::BreakerTimeoutMismatch,
                Severity::Medium,
                &site.file,
                site.line,
            )
            .with_confidence(if wait.unit_ambiguous {
                confidence.min(Confidence::Medium)
            } else {
                confidence
            })
            .with_evidence(site.id.clone())
            .with_evidence(format!("config:{}", wait.key))
            .with_rationale(format!(
                "circuit breaker '{}' waits {} ms ({}) but the call times out after {} ms; the breaker half-opens before a slow call has failed",
                instance, wait.normalized_value, wait.key, timeout_ms
            ))
            .with_symbol(site.enclosing_function.clone()),
        );
    }

    fn largest(&self, category: ConfigCategory) -> Option<&'a ConfigValue> {
        self.config
            .values()
            .iter()
            .filter(|v| {
                v.category == category
                    && v.unit == ConfigUnit::Count
                    && canonical_key(&v.key).contains("max")
            })
            .max_by(|a, b| {
                a.normalized_value
                    .total_cmp(&b.normalized_value)
                    .then_with(|| b.key.cmp(&a.key))
            })
    }

    /// Worker threads must not outnumber the connections they compete for.
    fn pool_sizing(&self, report: &mut InvariantReport) {
        let threads = self.largest(ConfigCategory::ThreadPool);
        let connections = self.largest(ConfigCategory::Pool);
        let (threads, connections) = match (threads, connections) {
            (Some(t), Some(c)) => (t, c),
            (None, None) => return,
            (Some(v), None) | (None, Some(v)) => {
                report.skip(
                    FindingKind::PoolSizing,
                    &format!("config:{}", v.key),
                    "only one of thread pool and connection pool maximum is configured",
                );
                return;
            }
        };

        if threads.normalized_value <= connections.normalized_value {
            return;
        }
        report.findings.push(
            Finding::new(
                FindingKind::PoolSizing,
                Severity::High,
                &threads.source_file,
                threads.line,
            )
            .with_confidence(Confidence::High)
            .with_evidence(format!("config:{}", threads.key))
            .with_evidence(format!("config:{}", connections.key))
            .with_rationale(format!(
                "thread pool max {} ({}) exceeds connection pool max {} ({}); threads block waiting for connections",
                threads.normalized_value, threads.key, connections.normalized_value, connections.key
            )),
        );
    }
}
