//! Breaking public API changes.

use tracing::warn;

use crate::adapter::SyntaxAdapter;
use crate::facts::{ApiChange, Confidence, Finding, FindingKind, Severity, SymbolRef};

/// Report breaking changes, high when in-repo callers still use the symbol.
pub fn detect_breaking_api_changes(
    changes: &[ApiChange],
    adapter: &dyn SyntaxAdapter,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for change in changes.iter().filter(|c| c.kind.is_breaking()) {
        let (callers, confidence) = match adapter.find_usages(&SymbolRef::parse(&change.symbol)) {
            Ok(usages) => (
                usages
                    .into_iter()
                    .filter(|u| !(u.file == change.file && u.line == change.line))
                    .count(),
                Confidence::High,
            ),
            Err(e) => {
                warn!(symbol = %change.symbol, error = %e, "usage lookup failed");
                (0, Confidence::Low)
            }
        };

        let severity = if callers > 0 {
            Severity::High
        } else {
            Severity::Medium
        };
        let mut rationale = format!("public API {} was {}", change.symbol, change.kind.as_str());
        if let Some(detail) = &change.detail {
            rationale.push_str(&format!(" ({})", detail));
        }
        if callers > 0 {
            rationale.push_str(&format!("; {} in-repo call site(s) still depend on it", callers));
        } else {
            rationale.push_str("; no in-repo callers, external clients may still break");
        }

        findings.push(
            Finding::new(FindingKind::BreakingApiChange, severity, &change.file, change.line)
                .with_confidence(confidence)
                .with_evidence(format!("api:{}", change.symbol))
                .with_rationale(rationale)
                .with_symbol(Some(change.symbol.clone())),
        );
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FactsAdapter, FactsFile};
    use crate::facts::{ApiChangeKind, RawCallSite};

    fn adapter_with_caller() -> FactsAdapter {
        let mut call = RawCallSite::new("CheckoutService.java", 40, "getOrder");
        call.receiver_type = Some("OrderController".to_string());
        call.enclosing_function = Some("CheckoutService.checkout".to_string());
        FactsAdapter::new().with_file(FactsFile {
            path: "CheckoutService.java".to_string(),
            calls: vec![call],
            ..Default::default()
        })
    }

    fn change(symbol: &str, kind: ApiChangeKind) -> ApiChange {
        ApiChange {
            symbol: symbol.to_string(),
            file: "OrderController.java".to_string(),
            line: 22,
            kind,
            detail: None,
        }
    }

    #[test]
    fn test_breaking_change_with_callers_is_high() {
        let findings = detect_breaking_api_changes(
            &[change("OrderController.getOrder", ApiChangeKind::SignatureChanged)],
            &adapter_with_caller(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].symbol.as_deref(), Some("OrderController.getOrder"));
        assert!(findings[0].rationale.contains("1 in-repo call site"));
    }

    #[test]
    fn test_breaking_change_without_callers_is_medium() {
        let findings = detect_breaking_api_changes(
            &[change("OrderController.listOrders", ApiChangeKind::Removed)],
            &adapter_with_caller(),
        );
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn test_additive_change_is_ignored() {
        let findings = detect_breaking_api_changes(
            &[change("OrderController.getOrder", ApiChangeKind::Added)],
            &adapter_with_caller(),
        );
        assert!(findings.is_empty());
    }
}
