//! Resolved facts: symbols, call sites, endpoints and configuration values.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Confidence;

/// Kind of a resolved binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Mutable binding initialised from a literal.
    Literal,
    /// Declared constant with a known value.
    Constant,
    /// Bound from an environment/config accessor or injection annotation.
    ConfigInjected,
    /// Function parameter; only known per call.
    Parameter,
    Unknown,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Literal => "literal",
            SymbolKind::Constant => "constant",
            SymbolKind::ConfigInjected => "config_injected",
            SymbolKind::Parameter => "parameter",
            SymbolKind::Unknown => "unknown",
        }
    }
}

/// A named binding discovered in one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Numeric value as written, or milliseconds when `is_duration` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_value: Option<f64>,
    /// `resolved_value` came from a duration with an explicit unit and is
    /// already in milliseconds.
    #[serde(default)]
    pub is_duration: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_key: Option<String>,
    /// Placeholder default (`${key:5000}`), used when the key is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_default: Option<f64>,
    /// Literal text as written, for string-valued constants such as topic names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub line: usize,
}

/// Semantic category of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Http,
    Grpc,
    Database,
    MqPublish,
    MqConsume,
    BackgroundJob,
    Websocket,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Http => "http",
            Category::Grpc => "grpc",
            Category::Database => "database",
            Category::MqPublish => "mq_publish",
            Category::MqConsume => "mq_consume",
            Category::BackgroundJob => "background_job",
            Category::Websocket => "websocket",
            Category::Unknown => "unknown",
        }
    }

    /// Synchronous request/response I/O that needs a timeout.
    pub fn is_request_response(&self) -> bool {
        matches!(self, Category::Http | Category::Grpc | Category::Database)
    }

    /// Remote service calls that benefit from retries.
    pub fn is_remote_service(&self) -> bool {
        matches!(self, Category::Http | Category::Grpc)
    }

    pub fn is_messaging(&self) -> bool {
        matches!(self, Category::MqPublish | Category::MqConsume)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a call-site parameter value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Literal at the call site.
    Inline,
    /// Same-file constant or literal binding.
    Variable,
    /// Externally injected configuration.
    Config,
    /// Identifier that is probably a constant declared elsewhere.
    Unresolved,
    /// Only known at run time (parameter, computed expression).
    Runtime,
}

impl ValueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueSource::Inline => "inline",
            ValueSource::Variable => "variable",
            ValueSource::Config => "config",
            ValueSource::Unresolved => "unresolved",
            ValueSource::Runtime => "runtime",
        }
    }

    /// Confidence a finding may claim when it depends on a value from this source.
    pub fn confidence(&self) -> Confidence {
        match self {
            ValueSource::Inline | ValueSource::Config => Confidence::High,
            ValueSource::Variable => Confidence::Medium,
            ValueSource::Unresolved | ValueSource::Runtime => Confidence::Low,
        }
    }

    /// Sources that can never carry a concrete value.
    pub fn is_opaque(&self) -> bool {
        matches!(self, ValueSource::Unresolved | ValueSource::Runtime)
    }
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Timeout attached to a call site.
///
/// Invariant: an opaque source never carries a value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSpec {
    pub present: bool,
    pub value_ms: Option<u64>,
    pub source: Option<ValueSource>,
}

impl TimeoutSpec {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn resolved(value_ms: u64, source: ValueSource) -> Self {
        if source.is_opaque() {
            return Self::opaque(source);
        }
        Self {
            present: true,
            value_ms: Some(value_ms),
            source: Some(source),
        }
    }

    pub fn opaque(source: ValueSource) -> Self {
        Self {
            present: true,
            value_ms: None,
            source: Some(source),
        }
    }
}

/// Retry policy attached to a call site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySpec {
    pub present: bool,
    pub max_attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub source: Option<ValueSource>,
}

impl RetrySpec {
    pub fn absent() -> Self {
        Self::default()
    }
}

/// How failures of a call are handled locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandling {
    pub has_guard: bool,
    pub rethrows: bool,
    pub swallows: bool,
    #[serde(default)]
    pub logs: bool,
    #[serde(default)]
    pub dead_letters: bool,
}

/// One classified and resolved invocation of interest.
///
/// `category` is fixed at classification; later stages only append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSite {
    /// `file:line:column`.
    pub id: String,
    pub file: String,
    pub line: usize,
    #[serde(default)]
    pub column: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_type: Option<String>,
    pub method_name: String,
    pub category: Category,
    pub classification_confidence: Confidence,
    pub is_blocking: bool,
    pub in_async_context: bool,
    pub in_transaction: bool,
    pub timeout: TimeoutSpec,
    pub retry: RetrySpec,
    pub has_circuit_breaker: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_name: Option<String>,
    pub has_fallback: bool,
    pub error_handling: ErrorHandling,
    /// Target is outside this process (not loopback).
    pub is_external: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_function: Option<String>,
}

impl CallSite {
    /// Build an identifier for a call position.
    pub fn make_id(file: &str, line: usize, column: usize) -> String {
        format!("{}:{}:{}", file, line, column)
    }

    /// Short human label (`restTemplate.getForObject`).
    pub fn label(&self) -> String {
        match &self.receiver {
            Some(r) => format!("{}.{}", r, self.method_name),
            None => self.method_name.clone(),
        }
    }
}

/// Direction of an endpoint interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointOperation {
    Publish,
    Consume,
}

impl EndpointOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointOperation::Publish => "publish",
            EndpointOperation::Consume => "consume",
        }
    }
}

/// Delivery guarantee of an endpoint, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Dead-letter configuration of an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub present: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Retry policy known for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

/// Identity of a communication channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointKey {
    /// Transport (`kafka`, `rabbitmq`, `sqs`, `webhook`, `queue`...).
    #[serde(rename = "type")]
    pub endpoint_type: String,
    pub name: String,
    pub operation: EndpointOperation,
}

impl EndpointKey {
    pub fn id(&self) -> String {
        format!(
            "endpoint:{}:{}:{}",
            self.endpoint_type,
            self.name,
            self.operation.as_str()
        )
    }
}

/// A topic, queue or webhook shared by one or more call sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncEndpoint {
    #[serde(flatten)]
    pub key: EndpointKey,
    pub fire_and_forget: bool,
    pub delivery_guarantee: DeliveryGuarantee,
    pub dead_letter: DeadLetter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub idempotency_strategy: BTreeSet<String>,
    /// Most restrictive timeout seen among contributing call sites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Introduced by the change under analysis.
    #[serde(default)]
    pub is_new: bool,
    /// Contributing call-site / function locations (`file:line`), sorted.
    #[serde(default)]
    pub sites: BTreeSet<String>,
    /// Qualified names of the functions touching this endpoint.
    #[serde(default)]
    pub functions: BTreeSet<String>,
}

impl AsyncEndpoint {
    pub fn new(key: EndpointKey) -> Self {
        Self {
            key,
            fire_and_forget: false,
            delivery_guarantee: DeliveryGuarantee::AtLeastOnce,
            dead_letter: DeadLetter::default(),
            retry_policy: None,
            idempotency_strategy: BTreeSet::new(),
            timeout_ms: None,
            is_new: false,
            sites: BTreeSet::new(),
            functions: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> String {
        self.key.id()
    }
}

/// Category of a configuration setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigCategory {
    Timeout,
    Retry,
    CircuitBreaker,
    Pool,
    ThreadPool,
}

impl ConfigCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigCategory::Timeout => "timeout",
            ConfigCategory::Retry => "retry",
            ConfigCategory::CircuitBreaker => "circuit_breaker",
            ConfigCategory::Pool => "pool",
            ConfigCategory::ThreadPool => "thread_pool",
        }
    }
}

/// Unit of a normalised configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigUnit {
    Millis,
    Count,
    Percent,
}

/// A resolved setting from a configuration document.
///
/// `normalized_value` is always in the unit named by `unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub key: String,
    pub category: ConfigCategory,
    pub normalized_value: f64,
    pub unit: ConfigUnit,
    pub source_file: String,
    #[serde(default)]
    pub line: usize,
    /// A bare duration whose unit had to be assumed.
    #[serde(default)]
    pub unit_ambiguous: bool,
}

/// Kind of public API change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiChangeKind {
    Removed,
    SignatureChanged,
    ReturnTypeChanged,
    VisibilityReduced,
    /// Additive change; never breaking.
    Added,
}

impl ApiChangeKind {
    pub fn is_breaking(&self) -> bool {
        !matches!(self, ApiChangeKind::Added)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiChangeKind::Removed => "removed",
            ApiChangeKind::SignatureChanged => "signature changed",
            ApiChangeKind::ReturnTypeChanged => "return type changed",
            ApiChangeKind::VisibilityReduced => "visibility reduced",
            ApiChangeKind::Added => "added",
        }
    }
}

/// A change to a public function signature in the analysed change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiChange {
    /// Qualified name (`OrderController.getOrder`).
    pub symbol: String,
    pub file: String,
    pub line: usize,
    pub kind: ApiChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_timeout_has_no_value() {
        let t = TimeoutSpec::resolved(5000, ValueSource::Unresolved);
        assert!(t.present);
        assert_eq!(t.value_ms, None);
        assert_eq!(t.source, Some(ValueSource::Unresolved));

        let t = TimeoutSpec::resolved(5000, ValueSource::Inline);
        assert_eq!(t.value_ms, Some(5000));
    }

    #[test]
    fn test_source_confidence() {
        assert_eq!(ValueSource::Inline.confidence(), Confidence::High);
        assert_eq!(ValueSource::Config.confidence(), Confidence::High);
        assert_eq!(ValueSource::Variable.confidence(), Confidence::Medium);
        assert_eq!(ValueSource::Runtime.confidence(), Confidence::Low);
        assert_eq!(ValueSource::Unresolved.confidence(), Confidence::Low);
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&Category::MqPublish).unwrap();
        assert_eq!(json, "\"mq_publish\"");
    }

    #[test]
    fn test_endpoint_id() {
        let key = EndpointKey {
            endpoint_type: "kafka".to_string(),
            name: "orders".to_string(),
            operation: EndpointOperation::Consume,
        };
        assert_eq!(key.id(), "endpoint:kafka:orders:consume");
    }
}
