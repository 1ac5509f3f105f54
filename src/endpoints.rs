//! Async endpoint extraction and merging.
//!
//! Each file contributes partial [`AsyncEndpoint`]s during the map phase:
//! publishing call sites, consuming call sites and listener-annotated
//! functions. The reduce phase joins contributions that share an
//! [`EndpointKey`]. The join is a semilattice, so the merged result does not
//! depend on file order:
//!
//! - booleans are OR-ed,
//! - the smallest timeout wins,
//! - the weakest delivery guarantee wins,
//! - the largest retry policy wins,
//! - sets are unioned.

use std::collections::{BTreeMap, BTreeSet};

use crate::facts::{
    AsyncEndpoint, CallSite, Category, DeliveryGuarantee, EndpointKey, EndpointOperation,
    RawAnnotation, RawCallSite, RawFunction, RawValue, RetryPolicy, SymbolKind,
};
use crate::facts::parse_number;
use crate::resolve::{
    canonical_key, duration_factory, parse_placeholder, ConfigIndex, SymbolTable,
};

/// Listener annotations, their transport and the attributes naming the channel.
const LISTENERS: &[(&str, &str, &[&str])] = &[
    ("KafkaListener", "kafka", &["topics", "topicPattern", "value"]),
    ("RabbitListener", "rabbitmq", &["queues", "value"]),
    ("JmsListener", "jms", &["destination", "value"]),
    ("SqsListener", "sqs", &["value", "queueNames"]),
    ("StreamListener", "stream", &["value", "target"]),
    ("NatsListener", "nats", &["subject", "value"]),
];

/// Receiver-type fragments and the transport they name.
const TRANSPORTS: &[(&str, &str)] = &[
    ("kafka", "kafka"),
    ("rabbit", "rabbitmq"),
    ("amqp", "rabbitmq"),
    ("jms", "jms"),
    ("sqs", "sqs"),
    ("sns", "sns"),
    ("pubsub", "pubsub"),
    ("nats", "nats"),
    ("pulsar", "pulsar"),
    ("kinesis", "kinesis"),
    ("mqtt", "mqtt"),
];

/// Calls that bind a consumer to its channels before polling.
const SUBSCRIBE_METHODS: &[&str] = &["subscribe", "assign"];

const DEAD_LETTER_FRAGMENTS: &[&str] = &["deadletter", "dlq", "dlt"];
const WEBHOOK_FRAGMENTS: &[&str] = &["webhook", "/hooks/", "callback"];

/// Per-file inputs for endpoint extraction.
pub struct EndpointSource<'a> {
    pub raw: &'a [RawCallSite],
    pub sites: &'a [CallSite],
    pub functions: &'a [RawFunction],
    pub table: &'a SymbolTable,
    pub config: &'a ConfigIndex,
    /// Ids of call sites whose async result is dropped.
    pub dropped: &'a BTreeSet<String>,
}

/// Transport named by a receiver type; `queue` when none matches.
pub(crate) fn transport_of(receiver_type: Option<&str>) -> String {
    let lower = receiver_type.unwrap_or_default().to_lowercase();
    TRANSPORTS
        .iter()
        .find(|(fragment, _)| lower.contains(fragment))
        .map(|(_, transport)| transport.to_string())
        .unwrap_or_else(|| "queue".to_string())
}

/// Numbers and booleans are never channel names.
fn is_channel_text(text: &str) -> bool {
    !text.is_empty()
        && parse_number(text).is_none()
        && !matches!(text, "true" | "false" | "null")
}

fn is_dead_letter_name(name: &str) -> bool {
    let canonical = canonical_key(name);
    DEAD_LETTER_FRAGMENTS.iter().any(|f| canonical.contains(f))
}

impl<'a> EndpointSource<'a> {
    /// Resolve a channel name from an argument or attribute value.
    fn channel_name(&self, value: &RawValue, scope: Option<&str>) -> Option<String> {
        match value {
            RawValue::Literal { .. } => {
                let text = value.string_value()?;
                is_channel_text(text).then(|| self.expand(text))
            }
            RawValue::Identifier { name } => {
                let symbol = self.table.lookup(name, scope)?;
                match symbol.kind {
                    SymbolKind::Constant | SymbolKind::Literal => symbol
                        .text
                        .as_deref()
                        .filter(|t| is_channel_text(t))
                        .map(|t| self.expand(t)),
                    SymbolKind::ConfigInjected => symbol
                        .config_key
                        .as_deref()
                        .map(|k| self.expand(&format!("${{{}}}", k))),
                    _ => None,
                }
            }
            // `Duration.ofMillis(100)` is a poll timeout, not a channel.
            RawValue::Call { receiver, name, .. }
                if duration_factory(receiver.as_deref(), name).is_some() =>
            {
                None
            }
            // `List.of("orders")`, `Collections.singletonList(TOPIC)`
            RawValue::Call { arguments, .. } => arguments
                .iter()
                .find_map(|a| self.channel_name(&a.value, scope)),
            RawValue::Expression { .. } => None,
        }
    }

    /// Substitute a `${key}` placeholder with its configured value.
    fn expand(&self, text: &str) -> String {
        match parse_placeholder(text) {
            Some((key, default)) => match self.config.entry(&key) {
                Some(entry) => entry.raw.trim_matches('"').to_string(),
                None => default.unwrap_or_else(|| format!("${{{}}}", key)),
            },
            None => text.to_string(),
        }
    }

    /// Channel of `consumer.poll(..)` taken from `consumer.subscribe(..)`.
    fn subscribed_channel(&self, raw: &RawCallSite) -> Option<String> {
        let receiver = raw.receiver.as_deref()?;
        self.raw
            .iter()
            .filter(|r| {
                r.receiver.as_deref() == Some(receiver)
                    && SUBSCRIBE_METHODS.contains(&r.method_name.as_str())
            })
            .find_map(|r| {
                let first = r.arguments.first()?;
                self.channel_name(&first.value, r.enclosing_function.as_deref())
            })
    }

    fn from_call(&self, raw: &RawCallSite, site: &CallSite) -> Option<AsyncEndpoint> {
        let scope = raw.enclosing_function.as_deref();
        let first = raw.arguments.first().map(|a| &a.value);

        let (endpoint_type, name, operation) = match site.category {
            Category::MqPublish => {
                let name = first
                    .and_then(|v| self.channel_name(v, scope))
                    .or_else(|| first.map(RawValue::display_text))
                    .or_else(|| raw.receiver.clone())?;
                (
                    transport_of(raw.receiver_type.as_deref()),
                    name,
                    EndpointOperation::Publish,
                )
            }
            Category::MqConsume => {
                let name = first
                    .and_then(|v| self.channel_name(v, scope))
                    .or_else(|| self.subscribed_channel(raw))?;
                (
                    transport_of(raw.receiver_type.as_deref()),
                    name,
                    EndpointOperation::Consume,
                )
            }
            Category::Http => {
                let lower = raw.method_name.to_lowercase();
                if !(lower.contains("post") || lower.contains("exchange")) {
                    return None;
                }
                let url = first.and_then(|v| self.channel_name(v, scope))?;
                let url_lower = url.to_lowercase();
                if !WEBHOOK_FRAGMENTS.iter().any(|f| url_lower.contains(f)) {
                    return None;
                }
                ("webhook".to_string(), url, EndpointOperation::Publish)
            }
            _ => return None,
        };

        let mut endpoint = AsyncEndpoint::new(EndpointKey {
            endpoint_type,
            name,
            operation,
        });
        endpoint.fire_and_forget = self.dropped.contains(&site.id);
        if endpoint.fire_and_forget {
            endpoint.delivery_guarantee = DeliveryGuarantee::AtMostOnce;
        }
        if site.error_handling.dead_letters {
            endpoint.dead_letter.present = true;
        }
        if let Some(max_attempts) = site.retry.max_attempts {
            endpoint.retry_policy = Some(RetryPolicy {
                max_attempts,
                backoff_ms: site.retry.backoff_ms.unwrap_or(0),
            });
        }
        if site.in_transaction {
            endpoint.idempotency_strategy.insert("transactional".to_string());
        }
        endpoint.timeout_ms = site.timeout.value_ms;
        endpoint.sites.insert(format!("{}:{}", site.file, site.line));
        if let Some(f) = &site.enclosing_function {
            endpoint.functions.insert(f.clone());
        }
        Some(endpoint)
    }

    fn from_listener(&self, file: &str, function: &RawFunction) -> Vec<AsyncEndpoint> {
        let Some((decorator, transport, attributes)) = function.decorators.iter().find_map(|d| {
            LISTENERS
                .iter()
                .find(|(name, _, _)| *name == d.name)
                .map(|(_, transport, attrs)| (d, *transport, *attrs))
        }) else {
            return Vec::new();
        };

        let scope = function.qualified_name();
        let name = attributes
            .iter()
            .find_map(|attr| {
                let value = if *attr == "value" {
                    decorator.value_argument()
                } else {
                    decorator.argument(attr)
                };
                value.and_then(|v| self.channel_name(v, Some(&scope)))
            })
            .unwrap_or_else(|| scope.clone());

        let mut endpoint = AsyncEndpoint::new(EndpointKey {
            endpoint_type: transport.to_string(),
            name,
            operation: EndpointOperation::Consume,
        });

        if let Some(target) = dead_letter_attribute(decorator, &scope, self) {
            endpoint.dead_letter.present = true;
            endpoint.dead_letter.target = target;
        }
        for d in &function.decorators {
            let lower = d.name.to_lowercase();
            if lower.contains("idempot") {
                endpoint.idempotency_strategy.insert("idempotent_handler".to_string());
            }
            if d.name == "Transactional" {
                endpoint.idempotency_strategy.insert("transactional".to_string());
            }
            if d.name == "RetryableTopic" {
                let attempts = d
                    .argument("attempts")
                    .and_then(|v| v.string_value().and_then(crate::facts::parse_number))
                    .unwrap_or(3.0);
                endpoint.retry_policy = Some(RetryPolicy {
                    max_attempts: attempts.max(0.0) as u32,
                    backoff_ms: 0,
                });
            }
        }

        endpoint.sites.insert(format!("{}:{}", file, function.line));
        endpoint.functions.insert(scope);
        vec![endpoint]
    }

    /// Every endpoint contribution of this file.
    pub fn extract(&self, file: &str) -> Vec<AsyncEndpoint> {
        let mut out: Vec<AsyncEndpoint> = self
            .raw
            .iter()
            .zip(self.sites)
            .filter_map(|(raw, site)| self.from_call(raw, site))
            .collect();
        for function in self.functions {
            out.extend(self.from_listener(file, function));
        }

        // `@RetryableTopic` or `@DltHandler` give every consumer in the file a DLT.
        let file_has_dlt = self.functions.iter().any(|f| {
            f.decorators
                .iter()
                .any(|d| d.name == "RetryableTopic" || d.name == "DltHandler")
        });
        if file_has_dlt {
            for endpoint in out
                .iter_mut()
                .filter(|e| e.key.operation == EndpointOperation::Consume)
            {
                endpoint.dead_letter.present = true;
                if endpoint.dead_letter.target.is_none() {
                    endpoint.dead_letter.target = Some(format!("{}-dlt", endpoint.key.name));
                }
            }
        }
        out
    }
}

fn dead_letter_attribute(
    decorator: &RawAnnotation,
    scope: &str,
    source: &EndpointSource,
) -> Option<Option<String>> {
    let arg = decorator
        .arguments
        .iter()
        .find(|a| a.name.as_deref().map(is_dead_letter_name).unwrap_or(false))?;
    Some(source.channel_name(&arg.value, Some(scope)))
}

/// Join two contributions to the same endpoint.
///
/// Commutative, associative and idempotent on every field.
pub fn merge(mut a: AsyncEndpoint, b: &AsyncEndpoint) -> AsyncEndpoint {
    debug_assert_eq!(a.key, b.key);
    a.fire_and_forget |= b.fire_and_forget;
    a.is_new |= b.is_new;
    a.delivery_guarantee = a.delivery_guarantee.min(b.delivery_guarantee);
    a.dead_letter.present |= b.dead_letter.present;
    a.dead_letter.target = match (a.dead_letter.target.take(), &b.dead_letter.target) {
        (Some(x), Some(y)) => Some(x.min(y.clone())),
        (x, y) => x.or_else(|| y.clone()),
    };
    a.retry_policy = a.retry_policy.max(b.retry_policy);
    a.timeout_ms = match (a.timeout_ms, b.timeout_ms) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    };
    a.idempotency_strategy
        .extend(b.idempotency_strategy.iter().cloned());
    a.sites.extend(b.sites.iter().cloned());
    a.functions.extend(b.functions.iter().cloned());
    a
}

/// Merge all contributions by key; the result is sorted by key.
pub fn merge_all<I>(contributions: I) -> Vec<AsyncEndpoint>
where
    I: IntoIterator<Item = AsyncEndpoint>,
{
    let mut merged: BTreeMap<EndpointKey, AsyncEndpoint> = BTreeMap::new();
    for endpoint in contributions {
        match merged.remove(&endpoint.key) {
            Some(existing) => {
                merged.insert(endpoint.key.clone(), merge(existing, &endpoint));
            }
            None => {
                merged.insert(endpoint.key.clone(), endpoint);
            }
        }
    }
    merged.into_values().collect()
}

/// Mark consumers whose dead-letter routing lives in configuration
/// (`orders.dlq.topic`, `bindings.orders-in.consumer.dlqName`).
pub fn apply_config_dead_letters(endpoints: &mut [AsyncEndpoint], config: &ConfigIndex) {
    for endpoint in endpoints
        .iter_mut()
        .filter(|e| e.key.operation == EndpointOperation::Consume && !e.dead_letter.present)
    {
        let name = endpoint.key.name.clone();
        let hit = DEAD_LETTER_FRAGMENTS.iter().find_map(|fragment| {
            let fragments = [name.as_str(), *fragment];
            let entry = config.entries_matching(&fragments).next().cloned();
            entry
        });
        if let Some(entry) = hit {
            endpoint.dead_letter.present = true;
            endpoint.dead_letter.target = Some(entry.raw.trim_matches('"').to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_call;
    use crate::config::DurationUnit;
    use crate::facts::{RawArgument, RawSymbol, RawSymbolKind, Symbols};
    use crate::resolve::ConfigDocument;

    fn key(name: &str, operation: EndpointOperation) -> EndpointKey {
        EndpointKey {
            endpoint_type: "kafka".to_string(),
            name: name.to_string(),
            operation,
        }
    }

    fn listener(decorators: Vec<RawAnnotation>) -> RawFunction {
        RawFunction {
            name: "onOrder".to_string(),
            owner: Some("OrderListener".to_string()),
            line: 14,
            end_line: 20,
            decorators,
            parameters: vec!["order".to_string()],
            return_type: Some("void".to_string()),
            is_async: false,
            handle_uses: vec![],
        }
    }

    fn annotation(name: &str, args: Vec<RawArgument>) -> RawAnnotation {
        RawAnnotation {
            name: name.to_string(),
            arguments: args,
        }
    }

    fn extract(
        raw: &[RawCallSite],
        functions: &[RawFunction],
        table: &SymbolTable,
        config: &ConfigIndex,
        dropped: &BTreeSet<String>,
    ) -> Vec<AsyncEndpoint> {
        let sites: Vec<CallSite> = raw.iter().map(classify_call).collect();
        EndpointSource {
            raw,
            sites: &sites,
            functions,
            table,
            config,
            dropped,
        }
        .extract("OrderListener.java")
    }

    #[test]
    fn test_publish_through_constant_topic() {
        let table = SymbolTable::build(&Symbols {
            bindings: vec![RawSymbol {
                name: "TOPIC".to_string(),
                kind: RawSymbolKind::Constant,
                line: 3,
                declared_type: Some("String".to_string()),
                value: Some(RawValue::literal("\"orders\"")),
                annotations: vec![],
                scope: None,
            }],
            functions: vec![],
        });
        let mut send = RawCallSite::new("OrderListener.java", 30, "send");
        send.receiver_type = Some("KafkaTemplate".to_string());
        send.arguments = vec![RawArgument::positional(RawValue::identifier("TOPIC"))];
        let dropped: BTreeSet<String> = [CallSite::make_id("OrderListener.java", 30, 0)].into();

        let endpoints = extract(&[send], &[], &table, &ConfigIndex::default(), &dropped);
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].key, key("orders", EndpointOperation::Publish));
        assert!(endpoints[0].fire_and_forget);
        assert_eq!(endpoints[0].delivery_guarantee, DeliveryGuarantee::AtMostOnce);
    }

    fn consumer_call(line: usize, method: &str, argument: RawValue) -> RawCallSite {
        let mut call = RawCallSite::new("OrderListener.java", line, method);
        call.receiver = Some("consumer".to_string());
        call.receiver_type = Some("KafkaConsumer<String, Order>".to_string());
        call.enclosing_function = Some("OrderListener.run".to_string());
        call.arguments = vec![RawArgument::positional(argument)];
        call
    }

    fn poll_timeout() -> RawValue {
        RawValue::Call {
            receiver: Some("Duration".to_string()),
            name: "ofMillis".to_string(),
            arguments: vec![RawArgument::positional(RawValue::literal("100"))],
        }
    }

    #[test]
    fn test_poll_timeout_is_not_a_channel() {
        let poll = consumer_call(22, "poll", poll_timeout());
        let endpoints = extract(
            &[poll],
            &[],
            &SymbolTable::default(),
            &ConfigIndex::default(),
            &BTreeSet::new(),
        );
        assert!(endpoints.is_empty());

        let numeric = consumer_call(23, "receive", RawValue::literal("5000"));
        let endpoints = extract(
            &[numeric],
            &[],
            &SymbolTable::default(),
            &ConfigIndex::default(),
            &BTreeSet::new(),
        );
        assert!(endpoints.is_empty());
    }

    #[test]
    fn test_poll_takes_channel_from_subscribe() {
        let subscribe = consumer_call(
            18,
            "subscribe",
            RawValue::Call {
                receiver: Some("List".to_string()),
                name: "of".to_string(),
                arguments: vec![RawArgument::positional(RawValue::literal("\"orders\""))],
            },
        );
        let poll = consumer_call(22, "poll", poll_timeout());
        let endpoints = extract(
            &[subscribe, poll],
            &[],
            &SymbolTable::default(),
            &ConfigIndex::default(),
            &BTreeSet::new(),
        );
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].key, key("orders", EndpointOperation::Consume));
        assert!(endpoints[0].sites.contains("OrderListener.java:22"));
    }

    #[test]
    fn test_listener_consumer_with_placeholder_topic() {
        let (config, _) = ConfigIndex::build(
            &[ConfigDocument::new("application.yml", "orders:\n  topic: orders-v2\n")],
            DurationUnit::Millis,
        );
        let function = listener(vec![annotation(
            "KafkaListener",
            vec![RawArgument::named("topics", RawValue::literal("\"${orders.topic}\""))],
        )]);
        let endpoints = extract(
            &[],
            &[function],
            &SymbolTable::default(),
            &config,
            &BTreeSet::new(),
        );
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].key, key("orders-v2", EndpointOperation::Consume));
        assert!(!endpoints[0].dead_letter.present);
        assert!(endpoints[0].functions.contains("OrderListener.onOrder"));
        assert!(endpoints[0].sites.contains("OrderListener.java:14"));
    }

    #[test]
    fn test_listener_dead_letter_sources() {
        let function = listener(vec![annotation(
            "RabbitListener",
            vec![
                RawArgument::named("queues", RawValue::literal("\"payments\"")),
                RawArgument::named("deadLetterQueue", RawValue::literal("\"payments.dlq\"")),
            ],
        )]);
        let endpoints = extract(
            &[],
            &[function],
            &SymbolTable::default(),
            &ConfigIndex::default(),
            &BTreeSet::new(),
        );
        assert!(endpoints[0].dead_letter.present);
        assert_eq!(endpoints[0].dead_letter.target.as_deref(), Some("payments.dlq"));

        let consumer = listener(vec![
            annotation(
                "KafkaListener",
                vec![RawArgument::named("topics", RawValue::literal("\"orders\""))],
            ),
            annotation("RetryableTopic", vec![RawArgument::named("attempts", RawValue::literal("\"4\""))]),
        ]);
        let endpoints = extract(
            &[],
            &[consumer],
            &SymbolTable::default(),
            &ConfigIndex::default(),
            &BTreeSet::new(),
        );
        assert!(endpoints[0].dead_letter.present);
        assert_eq!(endpoints[0].dead_letter.target.as_deref(), Some("orders-dlt"));
        assert_eq!(endpoints[0].retry_policy.map(|p| p.max_attempts), Some(4));
    }

    #[test]
    fn test_webhook_post() {
        let mut post = RawCallSite::new("Notifier.java", 8, "postForEntity");
        post.receiver_type = Some("RestTemplate".to_string());
        post.arguments = vec![RawArgument::positional(RawValue::literal(
            "\"https://partner.example.com/webhook/orders\"",
        ))];
        let mut get = RawCallSite::new("Notifier.java", 9, "getForObject");
        get.receiver_type = Some("RestTemplate".to_string());
        get.arguments = post.arguments.clone();

        let endpoints = extract(
            &[post, get],
            &[],
            &SymbolTable::default(),
            &ConfigIndex::default(),
            &BTreeSet::new(),
        );
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].key.endpoint_type, "webhook");
    }

    #[test]
    fn test_merge_joins_fields() {
        let mut a = AsyncEndpoint::new(key("orders", EndpointOperation::Publish));
        a.timeout_ms = Some(3000);
        a.sites.insert("A.java:1".to_string());
        let mut b = AsyncEndpoint::new(key("orders", EndpointOperation::Publish));
        b.fire_and_forget = true;
        b.delivery_guarantee = DeliveryGuarantee::AtMostOnce;
        b.timeout_ms = Some(1000);
        b.retry_policy = Some(RetryPolicy {
            max_attempts: 3,
            backoff_ms: 100,
        });
        b.sites.insert("B.java:2".to_string());

        let merged = merge(a.clone(), &b);
        assert!(merged.fire_and_forget);
        assert_eq!(merged.delivery_guarantee, DeliveryGuarantee::AtMostOnce);
        assert_eq!(merged.timeout_ms, Some(1000));
        assert_eq!(merged.retry_policy.map(|p| p.max_attempts), Some(3));
        assert_eq!(merged.sites.len(), 2);
        assert_eq!(merge(merged.clone(), &merged), merged);
        assert_eq!(merge(b.clone(), &a), merged);
    }

    #[test]
    fn test_merge_all_keys_by_operation() {
        let endpoints = merge_all(vec![
            AsyncEndpoint::new(key("orders", EndpointOperation::Consume)),
            AsyncEndpoint::new(key("orders", EndpointOperation::Publish)),
            AsyncEndpoint::new(key("orders", EndpointOperation::Consume)),
        ]);
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].key.operation, EndpointOperation::Publish);
    }

    #[test]
    fn test_config_dead_letter() {
        let (config, _) = ConfigIndex::build(
            &[ConfigDocument::new(
                "application.yml",
                "orders:\n  dlq:\n    topic: orders.DLQ\n",
            )],
            DurationUnit::Millis,
        );
        let mut endpoints = vec![AsyncEndpoint::new(key("orders", EndpointOperation::Consume))];
        apply_config_dead_letters(&mut endpoints, &config);
        assert!(endpoints[0].dead_letter.present);
        assert_eq!(endpoints[0].dead_letter.target.as_deref(), Some("orders.DLQ"));
    }
}
