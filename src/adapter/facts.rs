//! Adapter over pre-extracted facts.
//!
//! External parser services hand over their output as JSON:
//!
//! ```json
//! { "files": [ { "path": "src/Orders.java",
//!                "symbols": { "bindings": [], "functions": [] },
//!                "calls": [] } ] }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::facts::{Location, RawCallSite, SymbolRef, Symbols};

use super::{usages_in, SyntaxAdapter};

/// Facts for one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactsFile {
    pub path: String,
    #[serde(default)]
    pub symbols: Symbols,
    #[serde(default)]
    pub calls: Vec<RawCallSite>,
    /// Set when the upstream parser failed on this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FactsDocument {
    #[serde(default)]
    files: Vec<FactsFile>,
}

/// Serves facts that were extracted ahead of time.
#[derive(Debug, Clone, Default)]
pub struct FactsAdapter {
    files: BTreeMap<String, FactsFile>,
}

impl FactsAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) one file's facts.
    pub fn with_file(mut self, file: FactsFile) -> Self {
        self.files.insert(file.path.clone(), file);
        self
    }

    /// Parse a facts document from JSON text.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let doc: FactsDocument = serde_json::from_str(text)?;
        Ok(doc
            .files
            .into_iter()
            .fold(Self::new(), |adapter, file| adapter.with_file(file)))
    }

    /// Load a facts document from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Paths of all files with facts, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    fn file(&self, path: &str) -> Result<&FactsFile, AdapterError> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| AdapterError::Unsupported(path.to_string()))?;
        if let Some(message) = &file.parse_error {
            return Err(AdapterError::Parse {
                path: path.to_string(),
                message: message.clone(),
            });
        }
        Ok(file)
    }
}

impl SyntaxAdapter for FactsAdapter {
    fn adapter_id(&self) -> &'static str {
        "facts"
    }

    fn register(&self, files: &[String]) -> Result<Vec<String>, AdapterError> {
        if self.files.is_empty() {
            return Err(AdapterError::Unavailable("facts document is empty".to_string()));
        }
        Ok(files
            .iter()
            .filter(|f| self.files.contains_key(f.as_str()))
            .cloned()
            .collect())
    }

    fn get_symbols(&self, file: &str) -> Result<Symbols, AdapterError> {
        Ok(self.file(file)?.symbols.clone())
    }

    fn get_calls(&self, file: &str) -> Result<Vec<RawCallSite>, AdapterError> {
        Ok(self.file(file)?.calls.clone())
    }

    fn find_usages(&self, symbol: &SymbolRef) -> Result<Vec<Location>, AdapterError> {
        Ok(usages_in(
            self.files
                .values()
                .filter(|f| f.parse_error.is_none())
                .flat_map(|f| f.calls.iter()),
            symbol,
        ))
    }
}
