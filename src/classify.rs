//! Call classification.
//!
//! Turns a [`RawCallSite`] into a typed [`CallSite`] using naming and
//! structural rules instead of a framework list. Signals, strongest first:
//!
//! 1. Technology infix in the receiver type (`Kafka`, `Jdbc`, `Rest`...).
//! 2. Method verb (`send`, `query`, `post`...).
//! 3. Receiver-type suffix (`Client`, `Repository`, `Producer`...).
//!
//! A verb that agrees with the receiver wins outright. A verb beats an
//! ambiguous suffix. Anything else that disagrees is a tie and resolves to
//! [`Category::Unknown`] with low confidence rather than a guess.

use phf::phf_set;

use crate::endpoints::transport_of;

use crate::facts::{
    CallSite, Category, Confidence, ErrorHandling, RawCallSite, RawValue, ResultUsage,
    RetrySpec, TimeoutSpec,
};

/// Receiver-type suffixes and the categories they suggest.
static RECEIVER_SUFFIXES: &[(&str, &[Category])] = &[
    ("Client", &[Category::Http, Category::Grpc]),
    (
        "Template",
        &[Category::Http, Category::Database, Category::MqPublish],
    ),
    ("Stub", &[Category::Grpc]),
    ("Repository", &[Category::Database]),
    ("Producer", &[Category::MqPublish]),
    ("Consumer", &[Category::MqConsume]),
    ("Publisher", &[Category::MqPublish]),
    ("Subscriber", &[Category::MqConsume]),
    ("Queue", &[Category::MqPublish, Category::MqConsume]),
    ("Worker", &[Category::BackgroundJob]),
];

/// Technology fragments (matched case-insensitively anywhere in the type).
static TECHNOLOGY_INFIXES: &[(&str, &[Category])] = &[
    ("websocket", &[Category::Websocket]),
    ("stomp", &[Category::Websocket]),
    ("socket", &[Category::Websocket]),
    ("http", &[Category::Http]),
    ("rest", &[Category::Http]),
    ("webclient", &[Category::Http]),
    ("feign", &[Category::Http]),
    ("retrofit", &[Category::Http]),
    ("grpc", &[Category::Grpc]),
    ("stub", &[Category::Grpc]),
    ("kafka", &[Category::MqPublish, Category::MqConsume]),
    ("rabbit", &[Category::MqPublish, Category::MqConsume]),
    ("amqp", &[Category::MqPublish, Category::MqConsume]),
    ("jms", &[Category::MqPublish, Category::MqConsume]),
    ("sqs", &[Category::MqPublish, Category::MqConsume]),
    ("sns", &[Category::MqPublish]),
    ("pubsub", &[Category::MqPublish, Category::MqConsume]),
    ("nats", &[Category::MqPublish, Category::MqConsume]),
    ("pulsar", &[Category::MqPublish, Category::MqConsume]),
    ("kinesis", &[Category::MqPublish, Category::MqConsume]),
    ("mqtt", &[Category::MqPublish, Category::MqConsume]),
    ("jdbc", &[Category::Database]),
    ("jpa", &[Category::Database]),
    ("r2dbc", &[Category::Database]),
    ("sql", &[Category::Database]),
    ("mongo", &[Category::Database]),
    ("redis", &[Category::Database]),
    ("dynamo", &[Category::Database]),
    ("cassandra", &[Category::Database]),
    ("elastic", &[Category::Database]),
    ("entitymanager", &[Category::Database]),
    ("executor", &[Category::BackgroundJob]),
    ("scheduler", &[Category::BackgroundJob]),
    ("jobqueue", &[Category::BackgroundJob]),
    ("celery", &[Category::BackgroundJob]),
];

static HTTP_VERBS: phf::Set<&'static str> = phf_set! {
    "get", "post", "put", "delete", "patch", "head", "options", "exchange",
    "request", "fetch", "retrieve", "call", "invoke",
};

static PUBLISH_VERBS: phf::Set<&'static str> = phf_set! {
    "send", "publish", "emit", "produce", "enqueue", "push",
};

static CONSUME_VERBS: phf::Set<&'static str> = phf_set! {
    "consume", "listen", "poll", "receive", "subscribe",
};

static DATABASE_VERBS: phf::Set<&'static str> = phf_set! {
    "query", "save", "find", "insert", "update", "upsert", "select", "persist",
    "merge", "remove", "delete", "execute", "exec", "count", "exists",
};

static JOB_VERBS: phf::Set<&'static str> = phf_set! {
    "submit", "schedule", "execute", "dispatch", "enqueue",
};

static WEBSOCKET_VERBS: phf::Set<&'static str> = phf_set! {
    "write", "broadcast",
};

/// Leading tokens of methods that never perform I/O themselves.
static NON_IO_TOKENS: phf::Set<&'static str> = phf_set! {
    "new", "builder", "build", "with", "set", "is", "has", "to", "equals",
    "hashcode", "close", "shutdown", "init", "configure", "metrics",
};

/// Async handle types, matched against the whole lowercased simple name.
static ASYNC_RETURN_TYPES: phf::Set<&'static str> = phf_set! {
    "future", "completablefuture", "completionstage", "listenablefuture",
    "mono", "flux", "promise", "deferred", "task", "valuetask", "observable",
    "flowable", "single", "maybe", "completable", "uni", "multi", "awaitable",
    "coroutine", "publisher", "apifuture",
};

/// Trailing name tokens that mark a handle type (`ChannelFuture`, `JsPromise`).
static ASYNC_TYPE_SUFFIXES: phf::Set<&'static str> = phf_set! {
    "future", "promise", "publisher",
};

/// Producer transports whose publish calls hand back a future or callback.
const ASYNC_PRODUCER_TRANSPORTS: &[&str] = &["kafka", "pulsar", "pubsub"];

/// Chain links that block the caller until the async result arrives.
static BLOCKING_WAITS: phf::Set<&'static str> = phf_set! {
    "get", "join", "block", "blockfirst", "blocklast", "blockoptional",
    "await", "result", "toblocking", "getnow",
};

/// Outcome of classifying one raw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub confidence: Confidence,
    pub is_blocking: bool,
}

/// Split an identifier into lowercase words (`getForObject` → get, for, object).
pub fn name_tokens(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in name.chars() {
        if ch == '_' || ch == '-' || ch == '.' || ch == '$' {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Strip generics, pointers and package qualifiers from a type name.
///
/// Returns `(full_lowercase, simple_name)`.
pub fn normalize_type(raw: &str) -> (String, String) {
    let base = raw.split('<').next().unwrap_or(raw);
    let base = base.trim().trim_start_matches(['*', '&']).trim();
    let base = base.trim_end_matches("[]").trim_end_matches('?');
    let simple = base
        .rsplit(['.', ':'])
        .find(|s| !s.is_empty())
        .unwrap_or(base)
        .to_string();
    (base.to_lowercase(), simple)
}

fn push_unique(out: &mut Vec<Category>, cats: &[Category]) {
    for c in cats {
        if !out.contains(c) {
            out.push(*c);
        }
    }
}

fn infix_categories(full_lower: &str) -> Vec<Category> {
    let mut out = Vec::new();
    for (fragment, cats) in TECHNOLOGY_INFIXES {
        if full_lower.contains(fragment) {
            push_unique(&mut out, cats);
        }
    }
    out
}

fn suffix_categories(simple: &str) -> Vec<Category> {
    let mut out = Vec::new();
    for (suffix, cats) in RECEIVER_SUFFIXES {
        if simple.ends_with(suffix) {
            push_unique(&mut out, cats);
        }
    }
    out
}

fn verb_categories(method: &str) -> Vec<Category> {
    let tokens = name_tokens(method);
    let (first, last) = match (tokens.first(), tokens.last()) {
        (Some(f), Some(l)) => (f.as_str(), l.as_str()),
        _ => return Vec::new(),
    };
    let tables: [(&phf::Set<&'static str>, Category); 6] = [
        (&HTTP_VERBS, Category::Http),
        (&PUBLISH_VERBS, Category::MqPublish),
        (&CONSUME_VERBS, Category::MqConsume),
        (&DATABASE_VERBS, Category::Database),
        (&JOB_VERBS, Category::BackgroundJob),
        (&WEBSOCKET_VERBS, Category::Websocket),
    ];
    let mut out = Vec::new();
    for (set, cat) in tables {
        if set.contains(first) || set.contains(last) {
            push_unique(&mut out, &[cat]);
        }
    }
    out
}

fn is_non_io(method: &str) -> bool {
    if method == "getClass" || method == "toString" {
        return true;
    }
    name_tokens(method)
        .first()
        .map(|t| NON_IO_TOKENS.contains(t.as_str()))
        .unwrap_or(true)
}

fn unknown() -> (Category, Confidence) {
    (Category::Unknown, Confidence::Low)
}

/// Decide the category of a call from its receiver type and method name.
pub fn categorize(receiver_type: Option<&str>, method: &str) -> (Category, Confidence) {
    let receiver_type = match receiver_type {
        Some(t) if !t.trim().is_empty() => t,
        _ => return unknown(),
    };
    if is_non_io(method) {
        return unknown();
    }

    let (full, simple) = normalize_type(receiver_type);
    let infix = infix_categories(&full);
    let suffix = suffix_categories(&simple);
    let verbs = verb_categories(method);

    // Infix is the endpoint-level signal; narrow an ambiguous one by suffix.
    let (receiver, strong) = if !infix.is_empty() {
        let narrowed: Vec<Category> = infix
            .iter()
            .copied()
            .filter(|c| suffix.contains(c))
            .collect();
        if infix.len() > 1 && !narrowed.is_empty() {
            (narrowed, true)
        } else {
            (infix, true)
        }
    } else if !suffix.is_empty() {
        (suffix, false)
    } else {
        return unknown();
    };

    let agreeing: Vec<Category> = receiver
        .iter()
        .copied()
        .filter(|c| verbs.contains(c))
        .collect();

    match agreeing.len() {
        1 => return (agreeing[0], Confidence::High),
        n if n > 1 => return unknown(),
        _ => {}
    }

    if receiver.len() == 1 {
        if verbs.is_empty() || strong {
            return (receiver[0], Confidence::Medium);
        }
        // Unambiguous suffix contradicted by the verb.
        return unknown();
    }

    if !strong && verbs.len() == 1 {
        return (verbs[0], Confidence::Medium);
    }

    unknown()
}

/// Whether a declared type is a future/promise/reactive handle.
pub fn is_async_type(return_type: &str) -> bool {
    let (_, simple) = normalize_type(return_type);
    if ASYNC_RETURN_TYPES.contains(simple.to_lowercase().as_str()) {
        return true;
    }
    name_tokens(&simple)
        .last()
        .map(|t| ASYNC_TYPE_SUFFIXES.contains(t.as_str()))
        .unwrap_or(false)
}

/// Whether a chain link waits synchronously for an async result.
pub fn is_blocking_wait(link: &str) -> bool {
    BLOCKING_WAITS.contains(link.to_lowercase().as_str())
}

fn is_blocking(raw: &RawCallSite, category: Category) -> bool {
    if raw.chained.iter().any(|l| is_blocking_wait(&l.name)) {
        return true;
    }
    if raw.result_usage == ResultUsage::Awaited {
        return false;
    }
    if let Some(rt) = &raw.return_type {
        return !is_async_type(rt);
    }
    if name_tokens(&raw.method_name).last().map(String::as_str) == Some("async") {
        return false;
    }
    let chain_is_async = raw.chained.iter().any(|l| {
        let lower = l.name.to_lowercase();
        ["mono", "flux", "future", "async"]
            .iter()
            .any(|t| lower.contains(t))
    });
    if chain_is_async {
        return false;
    }
    // Kafka-style producers hand back a future or callback for publishes.
    !(category == Category::MqPublish
        && ASYNC_PRODUCER_TRANSPORTS.contains(&transport_of(raw.receiver_type.as_deref()).as_str()))
}

/// Classify one raw call.
pub fn classify(raw: &RawCallSite) -> Classification {
    let (category, confidence) = categorize(raw.receiver_type.as_deref(), &raw.method_name);
    Classification {
        category,
        confidence,
        is_blocking: is_blocking(raw, category),
    }
}

fn decorated_with(raw: &RawCallSite, fragment: &str) -> bool {
    raw.decorators
        .iter()
        .any(|d| d.name.to_lowercase().contains(fragment))
}

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]", "0.0.0.0"];

fn targets_loopback(raw: &RawCallSite) -> bool {
    raw.arguments.iter().any(|a| match &a.value {
        RawValue::Literal { .. } => a
            .value
            .string_value()
            .map(|s| {
                let lower = s.to_lowercase();
                LOOPBACK_HOSTS.iter().any(|h| lower.contains(h))
            })
            .unwrap_or(false),
        _ => false,
    })
}

/// Build the base [`CallSite`] for a raw call.
///
/// Timeout, retry, breaker and fallback are left absent; the resolver
/// fills them in.
pub fn classify_call(raw: &RawCallSite) -> CallSite {
    let c = classify(raw);

    let error_handling = match &raw.error_guard {
        Some(guard) => ErrorHandling {
            has_guard: true,
            rethrows: guard.rethrows,
            swallows: !guard.rethrows && !guard.dead_letters,
            logs: guard.logs,
            dead_letters: guard.dead_letters,
        },
        None => ErrorHandling::default(),
    };

    CallSite {
        id: CallSite::make_id(&raw.file, raw.line, raw.column),
        file: raw.file.clone(),
        line: raw.line,
        column: raw.column,
        receiver: raw.receiver.clone(),
        receiver_type: raw.receiver_type.clone(),
        method_name: raw.method_name.clone(),
        category: c.category,
        classification_confidence: c.confidence,
        is_blocking: c.is_blocking,
        in_async_context: raw.in_async_context || decorated_with(raw, "async"),
        in_transaction: decorated_with(raw, "transactional"),
        timeout: TimeoutSpec::absent(),
        retry: RetrySpec::absent(),
        has_circuit_breaker: false,
        circuit_breaker_name: None,
        has_fallback: false,
        error_handling,
        is_external: !targets_loopback(raw),
        enclosing_function: raw.enclosing_function.clone(),
    }
}
