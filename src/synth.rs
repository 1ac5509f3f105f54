//! Finding synthesis: deduplicate, attach blast radius, adjust severity.

use std::collections::BTreeMap;

use crate::facts::{BlastRadius, Confidence, Finding, FindingKind, Severity};

/// Merge draft findings and produce the final ordered list.
///
/// Drafts sharing `(kind, file, line)` collapse into one: highest severity,
/// highest confidence, union of evidence, distinct rationales joined in
/// order. Severity then moves one level up when the finding's function
/// reaches an entry point, and low-confidence findings are capped at
/// medium.
pub fn synthesize<I>(drafts: I, blast: &BTreeMap<String, BlastRadius>) -> Vec<Finding>
where
    I: IntoIterator<Item = Finding>,
{
    let mut merged: BTreeMap<(FindingKind, String, usize), Finding> = BTreeMap::new();
    for draft in drafts {
        match merged.get_mut(&draft.key()) {
            Some(existing) => absorb(existing, draft),
            None => {
                merged.insert(draft.key(), draft);
            }
        }
    }

    let mut findings: Vec<Finding> = merged
        .into_values()
        .map(|mut f| {
            if let Some(radius) = f.symbol.as_ref().and_then(|s| blast.get(s)) {
                f.blast_radius = Some(radius.clone());
            }
            f.severity = adjusted_severity(&f);
            f
        })
        .collect();

    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.kind.cmp(&b.kind))
    });
    findings
}

fn absorb(existing: &mut Finding, draft: Finding) {
    existing.severity = existing.severity.max(draft.severity);
    existing.confidence = existing.confidence.max(draft.confidence);
    existing.evidence.extend(draft.evidence);
    if !draft.rationale.is_empty() && !existing.rationale.contains(&draft.rationale) {
        if existing.rationale.is_empty() {
            existing.rationale = draft.rationale;
        } else {
            existing.rationale = format!("{}; {}", existing.rationale, draft.rationale);
        }
    }
    if existing.symbol.is_none() {
        existing.symbol = draft.symbol;
    }
}

fn adjusted_severity(finding: &Finding) -> Severity {
    let mut severity = finding.severity;
    if finding
        .blast_radius
        .as_ref()
        .map(|b| b.reachable_entry_points)
        .unwrap_or(false)
    {
        severity = severity.raised();
    }
    if finding.confidence == Confidence::Low {
        severity = severity.min(Severity::Medium);
    }
    severity
}
