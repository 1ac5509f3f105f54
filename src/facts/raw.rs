//! Raw syntax facts as delivered by a syntax adapter.
//!
//! These records describe what the source *says*, not what it *means*.
//! The classifier and resolver turn them into typed [`CallSite`]s and
//! [`Symbol`]s.
//!
//! [`CallSite`]: super::CallSite
//! [`Symbol`]: super::Symbol

use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in a source file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    /// File path, relative to the analysis root.
    pub file: String,
    /// Line (1-indexed).
    pub line: usize,
    /// Qualified name of the function containing this location, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_function: Option<String>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Reference to a declared function, used for usage lookups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolRef {
    /// Simple name (e.g., `placeOrder`).
    pub name: String,
    /// Owning type or module, if any (e.g., `OrderService`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl SymbolRef {
    /// Build a reference from a qualified name such as `OrderService.placeOrder`.
    pub fn parse(qualified: &str) -> Self {
        match qualified.rsplit_once('.') {
            Some((owner, name)) => Self {
                name: name.to_string(),
                owner: Some(owner.to_string()),
            },
            None => Self {
                name: qualified.to_string(),
                owner: None,
            },
        }
    }

    /// Get the fully qualified name (owner.name when an owner is known).
    pub fn qualified_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}.{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

/// The shape of a value expression at a call site or binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RawValue {
    /// A literal (`5000`, `"30s"`, `true`).
    Literal {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        number: Option<f64>,
        /// Unit attached by the adapter, e.g. `s` for `Duration.ofSeconds(5)`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    /// A bare or qualified identifier (`TIMEOUT_MS`, `Config.TIMEOUT`).
    Identifier { name: String },
    /// A nested call (`Duration.ofSeconds(TIMEOUT)`, `System.getenv("X")`).
    Call {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver: Option<String>,
        name: String,
        #[serde(default)]
        arguments: Vec<RawArgument>,
    },
    /// Anything else, kept as source text.
    Expression { text: String },
}

impl RawValue {
    /// Create a literal, parsing a number out of the text when possible.
    pub fn literal(text: &str) -> Self {
        RawValue::Literal {
            text: text.to_string(),
            number: parse_number(text),
            unit: None,
        }
    }

    /// Create an identifier value.
    pub fn identifier(name: &str) -> Self {
        RawValue::Identifier {
            name: name.to_string(),
        }
    }

    /// Literal text with surrounding quotes removed.
    pub fn string_value(&self) -> Option<&str> {
        match self {
            RawValue::Literal { text, .. } => {
                let t = text.trim();
                Some(
                    t.strip_prefix('"')
                        .and_then(|s| s.strip_suffix('"'))
                        .or_else(|| t.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                        .unwrap_or(t),
                )
            }
            _ => None,
        }
    }

    /// Source-ish text for messages.
    pub fn display_text(&self) -> String {
        match self {
            RawValue::Literal { text, .. } => text.clone(),
            RawValue::Identifier { name } => name.clone(),
            RawValue::Call {
                receiver, name, ..
            } => match receiver {
                Some(r) => format!("{}.{}(..)", r, name),
                None => format!("{}(..)", name),
            },
            RawValue::Expression { text } => text.clone(),
        }
    }
}

/// Parse a numeric literal as written in most C-family languages.
///
/// Accepts underscores and `L`/`l`/`f`/`d` suffixes; quoted numbers are
/// accepted too since config-style strings often carry them.
pub fn parse_number(text: &str) -> Option<f64> {
    let t = text.trim().trim_matches('"').trim_matches('\'');
    let t = t
        .trim_end_matches(['L', 'l', 'f', 'F', 'd', 'D'])
        .replace('_', "");
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A positional or named argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArgument {
    /// Keyword / annotation attribute name, if the argument is named.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: RawValue,
}

impl RawArgument {
    pub fn positional(value: RawValue) -> Self {
        Self { name: None, value }
    }

    pub fn named(name: &str, value: RawValue) -> Self {
        Self {
            name: Some(name.to_string()),
            value,
        }
    }
}

/// An annotation / decorator (`@Retryable(maxAttempts = 3)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAnnotation {
    /// Simple name without `@` or package (`Retryable`).
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<RawArgument>,
}

impl RawAnnotation {
    /// Find an argument by attribute name (case-insensitive).
    pub fn argument(&self, name: &str) -> Option<&RawValue> {
        self.arguments
            .iter()
            .find(|a| {
                a.name
                    .as_deref()
                    .map(|n| n.eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            })
            .map(|a| &a.value)
    }

    /// The unnamed (`value`) argument, if any.
    pub fn value_argument(&self) -> Option<&RawValue> {
        self.arguments
            .iter()
            .find(|a| a.name.is_none() || a.name.as_deref() == Some("value"))
            .map(|a| &a.value)
    }
}

/// One link of a fluent chain applied to a call's result
/// (`.timeout(Duration.ofSeconds(3))`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInvocation {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<RawArgument>,
}

/// The nearest error guard (try/catch, except, rescue) around a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawErrorGuard {
    /// Some handler rethrows or raises.
    #[serde(default)]
    pub rethrows: bool,
    /// Some handler logs the error.
    #[serde(default)]
    pub logs: bool,
    /// Some handler forwards the failure to a dead-letter path.
    #[serde(default)]
    pub dead_letters: bool,
    /// Every handler body is empty.
    #[serde(default)]
    pub empty: bool,
}

/// What happens to a call's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "usage", content = "binding", rename_all = "snake_case")]
pub enum ResultUsage {
    /// Expression statement; the result is dropped.
    Discarded,
    /// Assigned to a name.
    Bound(String),
    /// Directly awaited (`await f()`).
    Awaited,
    /// Returned to the caller.
    Returned,
    /// Passed on as an argument or used in a larger expression.
    Passed,
}

impl Default for ResultUsage {
    fn default() -> Self {
        ResultUsage::Passed
    }
}

/// A raw invocation record as extracted from the AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCallSite {
    pub file: String,
    pub line: usize,
    #[serde(default)]
    pub column: usize,
    /// Receiver expression text (`restTemplate`, `this.client`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Declared type of the receiver when the adapter could resolve it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_type: Option<String>,
    pub method_name: String,
    #[serde(default)]
    pub arguments: Vec<RawArgument>,
    /// Declared type of the call result, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// Qualified name of the function containing the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_function: Option<String>,
    #[serde(default)]
    pub result_usage: ResultUsage,
    /// Fluent links applied to the result, in source order.
    #[serde(default)]
    pub chained: Vec<RawInvocation>,
    /// Decorators on the enclosing function (and its type).
    #[serde(default)]
    pub decorators: Vec<RawAnnotation>,
    /// The call runs inside an async function or async callback.
    #[serde(default)]
    pub in_async_context: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_guard: Option<RawErrorGuard>,
}

impl RawCallSite {
    /// Create a minimal call record; adapters fill in the rest.
    pub fn new(file: &str, line: usize, method_name: &str) -> Self {
        Self {
            file: file.to_string(),
            line,
            column: 0,
            receiver: None,
            receiver_type: None,
            method_name: method_name.to_string(),
            arguments: Vec::new(),
            return_type: None,
            enclosing_function: None,
            result_usage: ResultUsage::Passed,
            chained: Vec::new(),
            decorators: Vec::new(),
            in_async_context: false,
            error_guard: None,
        }
    }
}

/// Kind of declared binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawSymbolKind {
    /// `static final`, `const`, module-level constant.
    Constant,
    /// Instance / struct field.
    Field,
    /// Local variable.
    Local,
    /// Function parameter.
    Parameter,
}

/// A declared binding in one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSymbol {
    pub name: String,
    pub kind: RawSymbolKind,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,
    /// Initializer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<RawValue>,
    #[serde(default)]
    pub annotations: Vec<RawAnnotation>,
    /// Qualified function name for locals and parameters; `None` at file scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// A place where a function inspects an async handle (`f.get()`, `return f`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHandleUse {
    pub identifier: String,
    pub line: usize,
    /// Method invoked on the handle; `None` when returned or passed on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
}

/// A declared function or method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub line: usize,
    #[serde(default)]
    pub end_line: usize,
    #[serde(default)]
    pub decorators: Vec<RawAnnotation>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub handle_uses: Vec<RawHandleUse>,
}

impl RawFunction {
    /// Get the fully qualified name (owner.name for methods).
    pub fn qualified_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}.{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

/// Everything `get_symbols` returns for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Symbols {
    #[serde(default)]
    pub bindings: Vec<RawSymbol>,
    #[serde(default)]
    pub functions: Vec<RawFunction>,
}
