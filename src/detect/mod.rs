//! Detection of resilience anti-patterns.
//!
//! Per-file detectors ([`Runner`]) run in the map phase over resolved call
//! sites. Endpoint, configuration and API-change detectors run in the
//! reduce phase once the global view exists.

mod api;
mod config;
mod flow;
mod rules;
mod runner;

pub use api::detect_breaking_api_changes;
pub use config::detect_unit_ambiguous;
pub use flow::detect_fire_and_forget;
pub use rules::{confidence_of, split_site, DetectorRule, RETRY_STORM_ATTEMPTS};
pub use runner::Runner;

use crate::facts::{AsyncEndpoint, Finding};

/// Run the endpoint rules over merged endpoints.
pub fn detect_endpoints(endpoints: &[AsyncEndpoint]) -> Vec<Finding> {
    endpoints
        .iter()
        .flat_map(|e| {
            DetectorRule::ENDPOINT_RULES
                .iter()
                .filter_map(move |rule| rule.evaluate_endpoint(e))
        })
        .collect()
}
