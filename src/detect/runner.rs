//! Per-file detection runner.

use crate::facts::{CallSite, Finding, RawCallSite, RawFunction};

use super::{detect_fire_and_forget, DetectorRule};

/// Runs every call-site detector over one file's resolved facts.
pub struct Runner {
    rules: Vec<DetectorRule>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Create a runner with the full call-site rule table.
    pub fn new() -> Self {
        Self {
            rules: DetectorRule::CALL_SITE_RULES.to_vec(),
        }
    }

    /// Restrict the runner to the given rules.
    pub fn with_rules(mut self, rules: &[DetectorRule]) -> Self {
        self.rules = rules.to_vec();
        self
    }

    /// Run all detection over one file.
    ///
    /// `raw` and `sites` are parallel slices. Findings come back sorted by
    /// line, then kind.
    pub fn run(
        &self,
        raw: &[RawCallSite],
        sites: &[CallSite],
        functions: &[RawFunction],
    ) -> Vec<Finding> {
        let mut findings: Vec<Finding> = sites
            .iter()
            .flat_map(|site| self.rules.iter().filter_map(move |rule| rule.evaluate(site)))
            .collect();

        findings.extend(detect_fire_and_forget(raw, sites, functions));

        findings.sort_by(|a, b| (a.line, a.kind).cmp(&(b.line, b.kind)));
        findings
    }
}
