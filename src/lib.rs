//! Faultline - resilience fact extraction and risk detection.
//!
//! Faultline reads service code through a syntax adapter, turns every
//! outbound call into a classified, resolved [`CallSite`], and reports the
//! resilience risks it finds: missing timeouts, retry storms, async results
//! nobody observes, consumers without dead-letter handling, and timing
//! invariants that cannot hold under the configured values.
//!
//! # Architecture
//!
//! - `adapter`: the [`SyntaxAdapter`] boundary (tree-sitter Java, pre-extracted facts)
//! - `facts`: the shared fact schema
//! - `classify`: call categorization from receiver types and method names
//! - `resolve`: symbol and configuration resolution of timeout/retry values
//! - `detect`: per-call-site and reduce-phase detector rules
//! - `endpoints`: async endpoint extraction and merge
//! - `invariants`: cross-file timing and sizing checks
//! - `blast`: caller reachability from changed symbols
//! - `synth`: finding deduplication and severity adjustment
//! - `engine`: the map/reduce pipeline tying it together
//! - `report`: output formatting (pretty, JSON)
//!
//! # Adding a New Language
//!
//! Implement [`SyntaxAdapter`] for the language's AST provider; see
//! `src/adapter/java.rs` for a reference implementation.

pub mod adapter;
pub mod blast;
pub mod classify;
pub mod cli;
pub mod config;
pub mod detect;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod facts;
pub mod invariants;
pub mod logging;
pub mod report;
pub mod resolve;
pub mod synth;

pub use adapter::{FactsAdapter, FactsFile, SyntaxAdapter};
#[cfg(feature = "tree-sitter")]
pub use adapter::JavaAdapter;
pub use config::RunConfig;
pub use detect::{DetectorRule, Runner};
pub use engine::{AnalysisInput, AnalysisReport, CancellationToken, ChangeSet, Engine};
pub use error::{AdapterError, ConfigError, EngineError};
pub use facts::{CallSite, Finding, FindingKind, Severity};
