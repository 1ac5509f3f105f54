//! Findings raised directly from configuration documents.

use crate::facts::{ConfigUnit, ConfigValue, Confidence, Finding, FindingKind, Severity};

/// Flag bare durations whose unit had to be assumed.
pub fn detect_unit_ambiguous(values: &[ConfigValue]) -> Vec<Finding> {
    values
        .iter()
        .filter(|v| v.unit_ambiguous && v.unit == ConfigUnit::Millis)
        .map(|v| {
            Finding::new(FindingKind::UnitAmbiguous, Severity::Low, &v.source_file, v.line)
                .with_confidence(Confidence::Medium)
                .with_evidence(format!("config:{}", v.key))
                .with_rationale(format!(
                    "'{}' is a bare number; it was read as {} ms, add an explicit unit (ms, s) to remove the doubt",
                    v.key, v.normalized_value
                ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::ConfigCategory;

    fn value(key: &str, ambiguous: bool) -> ConfigValue {
        ConfigValue {
            key: key.to_string(),
            category: ConfigCategory::Timeout,
            normalized_value: 30.0,
            unit: ConfigUnit::Millis,
            source_file: "application.yml".to_string(),
            line: 4,
            unit_ambiguous: ambiguous,
        }
    }

    #[test]
    fn test_only_ambiguous_values_flagged() {
        let findings = detect_unit_ambiguous(&[
            value("payments.timeout", true),
            value("orders.timeout", false),
        ]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::UnitAmbiguous);
        assert_eq!(findings[0].line, 4);
        assert!(findings[0].evidence.contains("config:payments.timeout"));
    }
}
