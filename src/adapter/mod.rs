//! Syntax adapter boundary.
//!
//! The engine never parses text itself. A [`SyntaxAdapter`] supplies raw
//! facts per file from whatever AST provider is configured:
//!
//! - [`FactsAdapter`] serves facts produced by an external parser service
//!   (JSON), and is what tests use.
//! - `JavaAdapter` (feature `tree-sitter`) extracts facts from Java
//!   sources with tree-sitter.
//!
//! # Adding a New Language
//!
//! Implement [`SyntaxAdapter`] for the language's AST provider; see
//! `java.rs` for a reference implementation.

mod facts;
#[cfg(feature = "tree-sitter")]
mod java;

pub use facts::{FactsAdapter, FactsFile};
#[cfg(feature = "tree-sitter")]
pub use java::JavaAdapter;

use crate::classify::normalize_type;
use crate::error::AdapterError;
use crate::facts::{Location, RawCallSite, SymbolRef, Symbols};

/// Capability boundary to an AST provider.
///
/// # Thread Safety
///
/// The engine calls `get_symbols`/`get_calls` from blocking worker threads
/// concurrently, so implementations must be `Send + Sync`.
pub trait SyntaxAdapter: Send + Sync {
    /// Identifier for diagnostics (`java`, `facts`).
    fn adapter_id(&self) -> &'static str;

    /// Register the files of this run.
    ///
    /// Returns the subset the adapter can serve. An error means the adapter
    /// is unavailable as a whole.
    fn register(&self, files: &[String]) -> Result<Vec<String>, AdapterError>;

    /// Declared bindings and functions of one file.
    fn get_symbols(&self, file: &str) -> Result<Symbols, AdapterError>;

    /// Raw call sites of one file.
    fn get_calls(&self, file: &str) -> Result<Vec<RawCallSite>, AdapterError>;

    /// Every location that invokes `symbol`, with its enclosing function.
    fn find_usages(&self, symbol: &SymbolRef) -> Result<Vec<Location>, AdapterError>;
}

/// Locations among `calls` that invoke `symbol`, sorted and deduplicated.
///
/// A call matches on method name; when both the symbol owner and the
/// receiver type are known they must agree as well.
pub(crate) fn usages_in<'a, I>(calls: I, symbol: &SymbolRef) -> Vec<Location>
where
    I: IntoIterator<Item = &'a RawCallSite>,
{
    let mut usages: Vec<Location> = calls
        .into_iter()
        .filter(|call| call.method_name == symbol.name)
        .filter(|call| match (&symbol.owner, &call.receiver_type) {
            (Some(owner), Some(recv)) => normalize_type(owner).1 == normalize_type(recv).1,
            _ => true,
        })
        .map(|call| Location {
            file: call.file.clone(),
            line: call.line,
            enclosing_function: call.enclosing_function.clone(),
        })
        .collect();

    usages.sort();
    usages.dedup();
    usages
}
