//! Fire-and-forget detection.
//!
//! An async call is observed when its handle is awaited, returned, passed
//! on, chained into a completion callback, or bound to a name that is
//! later waited on within the same function. Anything else drops the
//! failure on the floor.

use std::collections::HashMap;

use crate::classify::{is_async_type, is_blocking_wait};
use crate::facts::{
    CallSite, Category, Confidence, Finding, FindingKind, RawCallSite, RawFunction,
    RawHandleUse, ResultUsage, Severity,
};

/// Chain links that attach a completion or error handler.
const OBSERVING_LINK_PREFIXES: &[&str] = &[
    "then",
    "whencomplete",
    "handle",
    "exceptionally",
    "subscribe",
    "addcallback",
    "onerror",
    "doonerror",
    "onsuccess",
    "oncomplete",
    "completable",
];

fn observes(link: &str) -> bool {
    let lower = link.to_lowercase();
    is_blocking_wait(&lower) || OBSERVING_LINK_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Whether the call hands back an async handle at all.
fn returns_handle(raw: &RawCallSite, site: &CallSite) -> bool {
    if site.is_blocking {
        return false;
    }
    match &raw.return_type {
        Some(rt) => is_async_type(rt),
        None => site.category != Category::Unknown || raw.method_name.ends_with("Async"),
    }
}

fn bound_handle_observed(name: &str, after: usize, uses: &[RawHandleUse]) -> bool {
    uses.iter()
        .filter(|u| u.identifier == name && u.line >= after)
        .any(|u| match &u.via {
            None => true,
            Some(via) => observes(via),
        })
}

/// Detect async results that are never awaited, joined or handed on.
///
/// `raw` and `sites` are parallel: `sites[i]` is the classified form of
/// `raw[i]`.
pub fn detect_fire_and_forget(
    raw: &[RawCallSite],
    sites: &[CallSite],
    functions: &[RawFunction],
) -> Vec<Finding> {
    let by_name: HashMap<String, &RawFunction> = functions
        .iter()
        .map(|f| (f.qualified_name(), f))
        .collect();

    let mut findings = Vec::new();
    for (raw, site) in raw.iter().zip(sites) {
        if !returns_handle(raw, site) {
            continue;
        }
        if raw.chained.iter().any(|l| observes(&l.name)) {
            continue;
        }

        let dropped = match &raw.result_usage {
            ResultUsage::Discarded => true,
            ResultUsage::Awaited | ResultUsage::Returned | ResultUsage::Passed => false,
            ResultUsage::Bound(name) => {
                let uses = raw
                    .enclosing_function
                    .as_deref()
                    .and_then(|f| by_name.get(f))
                    .map(|f| f.handle_uses.as_slice())
                    .unwrap_or(&[]);
                !bound_handle_observed(name, raw.line, uses)
            }
        };
        if !dropped {
            continue;
        }

        let confidence = if raw.return_type.is_some() {
            Confidence::High
        } else {
            site.classification_confidence
        };
        let held = match &raw.result_usage {
            ResultUsage::Bound(name) => format!("is stored in '{}' but never awaited", name),
            _ => "is discarded".to_string(),
        };
        findings.push(
            Finding::new(FindingKind::FireAndForget, Severity::High, &site.file, site.line)
                .with_confidence(confidence)
                .with_evidence(site.id.clone())
                .with_rationale(format!(
                    "the async result of {} {}; a failed {} is never observed",
                    site.label(),
                    held,
                    match site.category {
                        Category::Unknown => "call".to_string(),
                        c => format!("{} call", c),
                    }
                ))
                .with_symbol(site.enclosing_function.clone()),
        );
    }
    findings
}
