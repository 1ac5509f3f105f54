//! Symbol and configuration resolution.
//!
//! Fills in the timeout, retry, breaker and fallback facts of a classified
//! [`CallSite`] by tracing each parameter back to where its value lives:
//!
//! | Origin | Source | Value |
//! |--------|--------|-------|
//! | literal at the call | `inline` | copied |
//! | same-file constant / literal binding | `variable` | copied |
//! | injected configuration | `config` | looked up in the [`ConfigIndex`] |
//! | constant-looking name declared elsewhere | `unresolved` | none |
//! | parameter or computed expression | `runtime` | none |
//!
//! Parameters are discovered from fluent chain links, named arguments,
//! enclosing decorators and positional identifiers whose names say what
//! they are.

mod config_docs;
mod symbols;

pub use config_docs::{
    canonical_key, categorize_key, parse_duration, parse_placeholder, ConfigDocument,
    ConfigEntry, ConfigIndex,
};
pub use symbols::{config_access, duration_factory, time_unit_factor, SymbolTable};

use crate::config::DurationUnit;
use crate::facts::{
    CallSite, ConfigCategory, Confidence, Finding, FindingKind, RawAnnotation, RawArgument,
    RawCallSite, RawValue, RetrySpec, Severity, SymbolKind, TimeoutSpec, ValueSource,
};

/// Shared read-only inputs for resolving one file.
pub struct ResolveContext<'a> {
    pub table: &'a SymbolTable,
    pub config: &'a ConfigIndex,
    pub default_unit: DurationUnit,
}

/// A resolved parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Outcome {
    value: Option<f64>,
    source: ValueSource,
}

impl Outcome {
    fn known(value: f64, source: ValueSource) -> Self {
        Self {
            value: Some(value),
            source,
        }
    }

    fn opaque(source: ValueSource) -> Self {
        Self {
            value: None,
            source,
        }
    }
}

/// What a resolved value is measured in.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Measure {
    /// Milliseconds; the factor converts a bare number when known.
    Duration(Option<f64>),
    Count,
}

const TIMEOUT_LINK_FRAGMENTS: &[&str] = &["timeout", "deadline"];
const RETRY_LINK_FRAGMENTS: &[&str] = &["retry", "retries", "attempts"];
const FALLBACK_LINKS: &[&str] = &[
    "onErrorResume",
    "onErrorReturn",
    "onErrorMap",
    "exceptionally",
    "exceptionallyCompose",
    "recover",
    "recoverWith",
    "withFallback",
    "fallback",
];
const BREAKER_DECORATORS: &[&str] = &["CircuitBreaker", "HystrixCommand"];

/// Spring Retry's and resilience4j's default attempt count.
const DEFAULT_RETRY_ATTEMPTS: f64 = 3.0;

fn lower_contains_any(text: &str, fragments: &[&str]) -> bool {
    let lower = text.to_lowercase();
    fragments.iter().any(|f| lower.contains(f))
}

fn looks_like_constant(name: &str) -> bool {
    let leaf = name.rsplit('.').next().unwrap_or(name);
    let screaming = !leaf.is_empty()
        && leaf
            .chars()
            .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit());
    let qualified = name.contains('.')
        && name
            .chars()
            .next()
            .map(char::is_uppercase)
            .unwrap_or(false);
    screaming || qualified
}

/// Resolves the parameters of the call sites of one file.
pub struct Resolver<'a> {
    ctx: &'a ResolveContext<'a>,
    findings: Vec<Finding>,
}

impl<'a> Resolver<'a> {
    pub fn new(ctx: &'a ResolveContext<'a>) -> Self {
        Self {
            ctx,
            findings: Vec::new(),
        }
    }

    /// Findings raised while resolving (`config_key_missing`).
    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }

    /// Enrich a classified call site with its resilience parameters.
    pub fn resolve(&mut self, raw: &RawCallSite, mut site: CallSite) -> CallSite {
        let scope = raw.enclosing_function.as_deref();

        if let Some(outcome) = self.timeout(raw, &site, scope) {
            site.timeout = match outcome.value {
                Some(v) => TimeoutSpec::resolved(v.round().max(0.0) as u64, outcome.source),
                None => TimeoutSpec::opaque(outcome.source),
            };
        }

        if let Some((attempts, backoff)) = self.retry(raw, &site, scope) {
            site.retry = RetrySpec {
                present: true,
                max_attempts: attempts.value.map(|v| v.round().max(0.0) as u32),
                backoff_ms: backoff.and_then(|b| b.value).map(|v| v.round().max(0.0) as u64),
                source: Some(attempts.source),
            };
        }

        self.breaker(raw, &mut site);
        site
    }

    fn timeout(&mut self, raw: &RawCallSite, site: &CallSite, scope: Option<&str>) -> Option<Outcome> {
        for link in &raw.chained {
            if lower_contains_any(&link.name, TIMEOUT_LINK_FRAGMENTS) {
                if let Some(first) = link.arguments.first() {
                    let unit = link
                        .arguments
                        .get(1)
                        .and_then(|a| match &a.value {
                            RawValue::Identifier { name } => time_unit_factor(name),
                            _ => None,
                        });
                    return Some(self.value(&first.value, Measure::Duration(unit), site, scope));
                }
            }
        }

        for arg in named(&raw.arguments) {
            if lower_contains_any(arg.0, &["timeout"]) {
                let unit = symbols::name_unit_hint(arg.0);
                return Some(self.value(arg.1, Measure::Duration(unit), site, scope));
            }
        }

        for decorator in &raw.decorators {
            if decorator.name == "TimeLimiter" {
                return Some(self.instance_timeout(decorator));
            }
            if decorator.name == "Transactional" {
                continue;
            }
            for arg in &decorator.arguments {
                let Some(name) = &arg.name else { continue };
                if lower_contains_any(name, &["timeout"]) {
                    let unit = symbols::name_unit_hint(name);
                    return Some(self.value(&arg.value, Measure::Duration(unit), site, scope));
                }
            }
        }

        for arg in raw.arguments.iter().filter(|a| a.name.is_none()) {
            match &arg.value {
                RawValue::Identifier { name } if lower_contains_any(name, &["timeout"]) => {
                    return Some(self.value(&arg.value, Measure::Duration(None), site, scope));
                }
                RawValue::Call { receiver, name, .. }
                    if duration_factory(receiver.as_deref(), name).is_some() =>
                {
                    return Some(self.value(&arg.value, Measure::Duration(None), site, scope));
                }
                _ => {}
            }
        }
        None
    }

    /// `@TimeLimiter(name = "payments")` reads the named instance config.
    fn instance_timeout(&self, decorator: &RawAnnotation) -> Outcome {
        let name = instance_name(decorator).unwrap_or_else(|| "default".to_string());
        let config = self.ctx.config;
        let hit = [name.as_str(), "default"].into_iter().find_map(|instance| {
            let fragments = ["timelimiter", instance];
            let value = config
                .matching(ConfigCategory::Timeout, &fragments)
                .next()
                .map(|v| v.normalized_value);
            value
        });
        match hit {
            Some(v) => Outcome::known(v, ValueSource::Config),
            None => Outcome::opaque(ValueSource::Unresolved),
        }
    }

    fn retry(
        &mut self,
        raw: &RawCallSite,
        site: &CallSite,
        scope: Option<&str>,
    ) -> Option<(Outcome, Option<Outcome>)> {
        for decorator in &raw.decorators {
            match decorator.name.as_str() {
                "Retryable" => {
                    let attempts = match decorator.argument("maxAttempts") {
                        Some(v) => self.value(v, Measure::Count, site, scope),
                        None => match decorator.argument("maxAttemptsExpression") {
                            Some(v) => self.value(v, Measure::Count, site, scope),
                            None => Outcome::known(DEFAULT_RETRY_ATTEMPTS, ValueSource::Inline),
                        },
                    };
                    let backoff = decorator.argument("backoff").and_then(|b| match b {
                        RawValue::Call { arguments, .. } => arguments
                            .iter()
                            .find(|a| {
                                matches!(a.name.as_deref(), Some("delay") | Some("value") | None)
                            })
                            .map(|a| self.value(&a.value, Measure::Duration(Some(1.0)), site, scope)),
                        _ => None,
                    });
                    return Some((attempts, backoff));
                }
                "Retry" => return Some((self.instance_retry(decorator), None)),
                _ => {}
            }
        }

        for link in &raw.chained {
            if !lower_contains_any(&link.name, RETRY_LINK_FRAGMENTS) {
                continue;
            }
            let counts_retries = !link.name.to_lowercase().contains("attempts");
            let Some(first) = link.arguments.first() else {
                return Some((Outcome::opaque(ValueSource::Runtime), None));
            };
            // `retryWhen(Retry.backoff(3, Duration.ofMillis(100)))`
            if let RawValue::Call {
                receiver,
                name,
                arguments,
            } = &first.value
            {
                if duration_factory(receiver.as_deref(), name).is_none() && !arguments.is_empty() {
                    let inner = self.value(&arguments[0].value, Measure::Count, site, scope);
                    let backoff = arguments
                        .get(1)
                        .map(|a| self.value(&a.value, Measure::Duration(None), site, scope));
                    let attempts = if counts_retries { inner.plus_one() } else { inner };
                    return Some((attempts, backoff));
                }
            }
            let outcome = self.value(&first.value, Measure::Count, site, scope);
            let attempts = if counts_retries {
                outcome.plus_one()
            } else {
                outcome
            };
            return Some((attempts, None));
        }

        for (name, value) in named(&raw.arguments) {
            if lower_contains_any(name, &["retr", "attempt"]) {
                let outcome = self.value(value, Measure::Count, site, scope);
                let attempts = if name.to_lowercase().contains("attempt") {
                    outcome
                } else {
                    outcome.plus_one()
                };
                return Some((attempts, None));
            }
        }

        for arg in raw.arguments.iter().filter(|a| a.name.is_none()) {
            if let RawValue::Identifier { name } = &arg.value {
                if lower_contains_any(name, &["retr", "attempt"]) {
                    return Some((self.value(&arg.value, Measure::Count, site, scope), None));
                }
            }
        }
        None
    }

    /// `@Retry(name = "payments")` reads `maxAttempts` of the named instance.
    fn instance_retry(&self, decorator: &RawAnnotation) -> Outcome {
        let name = instance_name(decorator).unwrap_or_else(|| "default".to_string());
        let config = self.ctx.config;
        let hit = [name.as_str(), "default"].into_iter().find_map(|instance| {
            let fragments = ["retry", instance, "maxattempts"];
            let value = config
                .matching(ConfigCategory::Retry, &fragments)
                .next()
                .map(|v| v.normalized_value);
            value
        });
        match hit {
            Some(v) => Outcome::known(v, ValueSource::Config),
            None => Outcome::opaque(ValueSource::Unresolved),
        }
    }

    fn breaker(&self, raw: &RawCallSite, site: &mut CallSite) {
        for decorator in &raw.decorators {
            if BREAKER_DECORATORS.contains(&decorator.name.as_str()) {
                site.has_circuit_breaker = true;
                if site.circuit_breaker_name.is_none() {
                    site.circuit_breaker_name = instance_name(decorator);
                }
                if decorator.argument("fallbackMethod").is_some()
                    || decorator.argument("fallback").is_some()
                {
                    site.has_fallback = true;
                }
            }
            if decorator.name == "Recover" {
                site.has_fallback = true;
            }
        }

        for link in &raw.chained {
            let mentions_breaker = lower_contains_any(&link.name, &["circuitbreaker"])
                || link
                    .arguments
                    .iter()
                    .any(|a| lower_contains_any(&a.value.display_text(), &["circuitbreaker"]));
            if mentions_breaker {
                site.has_circuit_breaker = true;
            }
            if FALLBACK_LINKS.contains(&link.name.as_str()) {
                site.has_fallback = true;
            }
        }
    }

    fn value(
        &mut self,
        value: &RawValue,
        measure: Measure,
        site: &CallSite,
        scope: Option<&str>,
    ) -> Outcome {
        self.value_at(value, measure, site, scope, 0)
    }

    fn value_at(
        &mut self,
        value: &RawValue,
        measure: Measure,
        site: &CallSite,
        scope: Option<&str>,
        depth: usize,
    ) -> Outcome {
        if depth > 8 {
            return Outcome::opaque(ValueSource::Runtime);
        }
        if let Some((key, default)) = config_access(value) {
            return self.config_value(&key, default.as_deref(), measure, site, site.line);
        }

        match value {
            RawValue::Literal { number, unit, .. } => match (number, measure) {
                (Some(n), Measure::Duration(factor)) => {
                    let factor = unit
                        .as_deref()
                        .map(config_docs::unit_factor)
                        .or(factor)
                        .unwrap_or(1.0);
                    Outcome::known(n * factor, ValueSource::Inline)
                }
                (Some(n), Measure::Count) => Outcome::known(*n, ValueSource::Inline),
                (None, Measure::Duration(_)) => match value
                    .string_value()
                    .and_then(|s| parse_duration(s, "", self.ctx.default_unit))
                {
                    Some((ms, _)) => Outcome::known(ms, ValueSource::Inline),
                    None => Outcome::opaque(ValueSource::Runtime),
                },
                (None, Measure::Count) => Outcome::opaque(ValueSource::Runtime),
            },
            RawValue::Identifier { name } => self.identifier(name, measure, site, scope),
            RawValue::Call {
                receiver,
                name,
                arguments,
            } => match duration_factory(receiver.as_deref(), name) {
                Some(factor) => match arguments.first() {
                    Some(arg) => {
                        self.value_at(&arg.value, Measure::Duration(Some(factor)), site, scope, depth + 1)
                    }
                    None => Outcome::opaque(ValueSource::Runtime),
                },
                None => Outcome::opaque(ValueSource::Runtime),
            },
            RawValue::Expression { text } => self.product(text, measure, site, scope, depth),
        }
    }

    fn identifier(
        &mut self,
        name: &str,
        measure: Measure,
        site: &CallSite,
        scope: Option<&str>,
    ) -> Outcome {
        let table = self.ctx.table;
        let factor = |symbol_name: &str| match measure {
            Measure::Duration(f) => f.or_else(|| symbols::name_unit_hint(symbol_name)).unwrap_or(1.0),
            Measure::Count => 1.0,
        };

        match table.lookup(name, scope) {
            Some(symbol) => match symbol.kind {
                SymbolKind::Constant | SymbolKind::Literal => match symbol.resolved_value {
                    Some(v) if symbol.is_duration => Outcome::known(v, ValueSource::Variable),
                    Some(v) => Outcome::known(v * factor(&symbol.name), ValueSource::Variable),
                    None => Outcome::opaque(ValueSource::Unresolved),
                },
                SymbolKind::ConfigInjected => {
                    let key = symbol.config_key.clone().unwrap_or_default();
                    let default = symbol.config_default.map(|d| d.to_string());
                    let measure = match measure {
                        Measure::Duration(None) => {
                            Measure::Duration(symbols::name_unit_hint(&symbol.name))
                        }
                        other => other,
                    };
                    let line = symbol.line;
                    self.config_value(&key, default.as_deref(), measure, site, line)
                }
                SymbolKind::Parameter | SymbolKind::Unknown => {
                    Outcome::opaque(ValueSource::Runtime)
                }
            },
            None if looks_like_constant(name) => Outcome::opaque(ValueSource::Unresolved),
            None => Outcome::opaque(ValueSource::Runtime),
        }
    }

    /// `30 * 1000`, `TIMEOUT_SECONDS * 1000`.
    fn product(
        &mut self,
        text: &str,
        measure: Measure,
        site: &CallSite,
        scope: Option<&str>,
        depth: usize,
    ) -> Outcome {
        let parts: Vec<&str> = text.split('*').map(str::trim).collect();
        if parts.len() < 2 {
            return Outcome::opaque(ValueSource::Runtime);
        }
        let mut product = 1.0;
        let mut source = ValueSource::Inline;
        for part in parts {
            let outcome = match crate::facts::parse_number(part) {
                Some(n) => Outcome::known(n, ValueSource::Inline),
                None => self.value_at(&RawValue::identifier(part), Measure::Count, site, scope, depth + 1),
            };
            match outcome.value {
                Some(v) => {
                    product *= v;
                    source = source.max(outcome.source);
                }
                None => return outcome,
            }
        }
        match measure {
            Measure::Duration(Some(f)) => Outcome::known(product * f, source),
            _ => Outcome::known(product, source),
        }
    }

    fn config_value(
        &mut self,
        key: &str,
        default: Option<&str>,
        measure: Measure,
        site: &CallSite,
        line: usize,
    ) -> Outcome {
        let config = self.ctx.config;
        let default_unit = self.ctx.default_unit;
        let parse = |raw: &str| -> Option<f64> {
            match measure {
                Measure::Duration(Some(f)) => crate::facts::parse_number(raw)
                    .map(|n| n * f)
                    .or_else(|| parse_duration(raw, key, default_unit).map(|(v, _)| v)),
                Measure::Duration(None) => parse_duration(raw, key, default_unit).map(|(v, _)| v),
                Measure::Count => crate::facts::parse_number(raw),
            }
        };

        if let Some(entry) = config.entry(key) {
            return match parse(&entry.raw) {
                Some(v) => Outcome::known(v, ValueSource::Config),
                None => Outcome::opaque(ValueSource::Config),
            };
        }

        let fallback = default.and_then(parse);
        let (severity, rationale) = match (default, fallback) {
            (Some(d), _) => (
                Severity::Low,
                format!(
                    "config key '{}' is not defined in any configuration document; the placeholder default '{}' applies",
                    key, d
                ),
            ),
            (None, _) => (
                Severity::Medium,
                format!(
                    "config key '{}' is not defined in any of the {} configuration document(s); the value is unknown at analysis time",
                    key,
                    config.document_count()
                ),
            ),
        };
        let confidence = if config.document_count() == 0 {
            Confidence::Low
        } else {
            Confidence::High
        };
        self.findings.push(
            Finding::new(FindingKind::ConfigKeyMissing, severity, &site.file, line)
                .with_confidence(confidence)
                .with_evidence(site.id.clone())
                .with_rationale(rationale)
                .with_symbol(site.enclosing_function.clone()),
        );

        match fallback {
            Some(v) => Outcome::known(v, ValueSource::Config),
            None => Outcome::opaque(ValueSource::Config),
        }
    }
}

impl Outcome {
    /// Convert a retry count into an attempt count.
    fn plus_one(self) -> Self {
        Self {
            value: self.value.map(|v| v + 1.0),
            ..self
        }
    }
}

fn named(arguments: &[RawArgument]) -> impl Iterator<Item = (&str, &RawValue)> {
    arguments
        .iter()
        .filter_map(|a| a.name.as_deref().map(|n| (n, &a.value)))
}

fn instance_name(decorator: &RawAnnotation) -> Option<String> {
    decorator
        .argument("name")
        .or_else(|| decorator.argument("commandKey"))
        .or_else(|| decorator.value_argument())
        .and_then(|v| v.string_value())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_call;
    use crate::facts::{RawInvocation, RawSymbol, RawSymbolKind, Symbols};

    fn http_call(args: Vec<RawArgument>) -> RawCallSite {
        let mut raw = RawCallSite::new("Client.java", 20, "getForObject");
        raw.receiver = Some("restTemplate".to_string());
        raw.receiver_type = Some("RestTemplate".to_string());
        raw.enclosing_function = Some("Client.fetch".to_string());
        raw.arguments = args;
        raw
    }

    fn constant(name: &str, value: &str) -> RawSymbol {
        RawSymbol {
            name: name.to_string(),
            kind: RawSymbolKind::Constant,
            line: 3,
            declared_type: None,
            value: Some(RawValue::literal(value)),
            annotations: vec![],
            scope: None,
        }
    }

    fn injected(name: &str, placeholder: &str) -> RawSymbol {
        RawSymbol {
            name: name.to_string(),
            kind: RawSymbolKind::Field,
            line: 7,
            declared_type: Some("long".to_string()),
            value: None,
            annotations: vec![RawAnnotation {
                name: "Value".to_string(),
                arguments: vec![RawArgument::positional(RawValue::literal(&format!(
                    "\"{}\"",
                    placeholder
                )))],
            }],
            scope: None,
        }
    }

    fn run(raw: &RawCallSite, bindings: Vec<RawSymbol>, config: &ConfigIndex) -> (CallSite, Vec<Finding>) {
        let table = SymbolTable::build(&Symbols {
            bindings,
            functions: vec![],
        });
        let ctx = ResolveContext {
            table: &table,
            config,
            default_unit: DurationUnit::Millis,
        };
        let mut resolver = Resolver::new(&ctx);
        let site = resolver.resolve(raw, classify_call(raw));
        (site, resolver.into_findings())
    }

    fn link(name: &str, args: Vec<RawValue>) -> RawInvocation {
        RawInvocation {
            name: name.to_string(),
            arguments: args.into_iter().map(RawArgument::positional).collect(),
        }
    }

    #[test]
    fn test_no_timeout_stays_absent() {
        let (site, findings) = run(&http_call(vec![]), vec![], &ConfigIndex::default());
        assert!(!site.timeout.present);
        assert!(!site.retry.present);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_inline_chain_timeout() {
        let mut raw = http_call(vec![]);
        raw.chained = vec![link(
            "timeout",
            vec![RawValue::Call {
                receiver: Some("Duration".to_string()),
                name: "ofSeconds".to_string(),
                arguments: vec![RawArgument::positional(RawValue::literal("3"))],
            }],
        )];
        let (site, _) = run(&raw, vec![], &ConfigIndex::default());
        assert_eq!(site.timeout.value_ms, Some(3000));
        assert_eq!(site.timeout.source, Some(ValueSource::Inline));
    }

    #[test]
    fn test_time_unit_argument() {
        let mut raw = http_call(vec![]);
        raw.chained = vec![link(
            "withDeadlineAfter",
            vec![
                RawValue::literal("2"),
                RawValue::identifier("TimeUnit.SECONDS"),
            ],
        )];
        let (site, _) = run(&raw, vec![], &ConfigIndex::default());
        assert_eq!(site.timeout.value_ms, Some(2000));
    }

    #[test]
    fn test_variable_timeout_with_name_unit() {
        let raw = http_call(vec![RawArgument::positional(RawValue::identifier(
            "TIMEOUT_SECONDS",
        ))]);
        let (site, _) = run(&raw, vec![constant("TIMEOUT_SECONDS", "5")], &ConfigIndex::default());
        assert_eq!(site.timeout.value_ms, Some(5000));
        assert_eq!(site.timeout.source, Some(ValueSource::Variable));
    }

    #[test]
    fn test_unresolved_versus_runtime() {
        let raw = http_call(vec![RawArgument::positional(RawValue::identifier(
            "Defaults.READ_TIMEOUT",
        ))]);
        let (site, _) = run(&raw, vec![], &ConfigIndex::default());
        assert!(site.timeout.present);
        assert_eq!(site.timeout.value_ms, None);
        assert_eq!(site.timeout.source, Some(ValueSource::Unresolved));

        let raw = http_call(vec![RawArgument::positional(RawValue::identifier(
            "timeoutMs",
        ))]);
        let param = RawSymbol {
            name: "timeoutMs".to_string(),
            kind: RawSymbolKind::Parameter,
            line: 19,
            declared_type: Some("long".to_string()),
            value: None,
            annotations: vec![],
            scope: Some("Client.fetch".to_string()),
        };
        let (site, _) = run(&raw, vec![param], &ConfigIndex::default());
        assert_eq!(site.timeout.source, Some(ValueSource::Runtime));
        assert_eq!(site.timeout.value_ms, None);
    }

    #[test]
    fn test_foreign_constant_shadowing_local_name_is_unresolved() {
        let raw = http_call(vec![RawArgument::positional(RawValue::identifier(
            "Defaults.READ_TIMEOUT",
        ))]);
        let (site, _) = run(
            &raw,
            vec![constant("READ_TIMEOUT", "1000")],
            &ConfigIndex::default(),
        );
        assert!(site.timeout.present);
        assert_eq!(site.timeout.value_ms, None);
        assert_eq!(site.timeout.source, Some(ValueSource::Unresolved));
    }

    #[test]
    fn test_config_injected_timeout() {
        let (config, _) = ConfigIndex::build(
            &[ConfigDocument::new("application.yml", "payments:\n  timeout: 4s\n")],
            DurationUnit::Millis,
        );
        let raw = http_call(vec![RawArgument::positional(RawValue::identifier(
            "paymentTimeout",
        ))]);
        let (site, findings) = run(
            &raw,
            vec![injected("paymentTimeout", "${payments.timeout}")],
            &config,
        );
        assert_eq!(site.timeout.value_ms, Some(4000));
        assert_eq!(site.timeout.source, Some(ValueSource::Config));
        assert!(findings.is_empty());
    }

    #[test]
    fn test_config_key_missing() {
        let (config, _) = ConfigIndex::build(
            &[ConfigDocument::new("application.yml", "other:\n  key: 1\n")],
            DurationUnit::Millis,
        );
        let raw = http_call(vec![RawArgument::positional(RawValue::identifier(
            "paymentTimeout",
        ))]);
        let (site, findings) = run(
            &raw,
            vec![injected("paymentTimeout", "${payments.timeout}")],
            &config,
        );
        assert!(site.timeout.present);
        assert_eq!(site.timeout.value_ms, None);
        assert_eq!(site.timeout.source, Some(ValueSource::Config));

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::ConfigKeyMissing);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].line, 7);
    }

    #[test]
    fn test_config_key_missing_with_default() {
        let raw = http_call(vec![RawArgument::positional(RawValue::identifier(
            "paymentTimeout",
        ))]);
        let (site, findings) = run(
            &raw,
            vec![injected("paymentTimeout", "${payments.timeout:2500}")],
            &ConfigIndex::default(),
        );
        assert_eq!(site.timeout.value_ms, Some(2500));
        assert_eq!(findings[0].severity, Severity::Low);
    }

    #[test]
    fn test_retryable_decorator() {
        let mut raw = http_call(vec![]);
        raw.decorators = vec![RawAnnotation {
            name: "Retryable".to_string(),
            arguments: vec![
                RawArgument::named("maxAttempts", RawValue::literal("5")),
                RawArgument::named(
                    "backoff",
                    RawValue::Call {
                        receiver: None,
                        name: "Backoff".to_string(),
                        arguments: vec![RawArgument::named("delay", RawValue::literal("200"))],
                    },
                ),
            ],
        }];
        let (site, _) = run(&raw, vec![], &ConfigIndex::default());
        assert!(site.retry.present);
        assert_eq!(site.retry.max_attempts, Some(5));
        assert_eq!(site.retry.backoff_ms, Some(200));
        assert_eq!(site.retry.source, Some(ValueSource::Inline));
    }

    #[test]
    fn test_reactor_retry_counts_retries() {
        let mut raw = http_call(vec![]);
        raw.chained = vec![link("retry", vec![RawValue::literal("2")])];
        let (site, _) = run(&raw, vec![], &ConfigIndex::default());
        assert_eq!(site.retry.max_attempts, Some(3));
    }

    #[test]
    fn test_named_retry_instance_from_config() {
        let (config, _) = ConfigIndex::build(
            &[ConfigDocument::new(
                "application.yml",
                "resilience4j:\n  retry:\n    instances:\n      payments:\n        maxAttempts: 6\n",
            )],
            DurationUnit::Millis,
        );
        let mut raw = http_call(vec![]);
        raw.decorators = vec![RawAnnotation {
            name: "Retry".to_string(),
            arguments: vec![RawArgument::named("name", RawValue::literal("\"payments\""))],
        }];
        let (site, _) = run(&raw, vec![], &config);
        assert_eq!(site.retry.max_attempts, Some(6));
        assert_eq!(site.retry.source, Some(ValueSource::Config));
    }

    #[test]
    fn test_named_time_limiter_from_config() {
        let (config, _) = ConfigIndex::build(
            &[ConfigDocument::new(
                "application.yml",
                "resilience4j:\n  timelimiter:\n    instances:\n      payments:\n        timeoutDuration: 2s\n",
            )],
            DurationUnit::Millis,
        );
        let mut raw = http_call(vec![]);
        raw.decorators = vec![RawAnnotation {
            name: "TimeLimiter".to_string(),
            arguments: vec![RawArgument::named("name", RawValue::literal("\"payments\""))],
        }];
        let (site, _) = run(&raw, vec![], &config);
        assert_eq!(site.timeout.value_ms, Some(2000));
        assert_eq!(site.timeout.source, Some(ValueSource::Config));

        let (site, _) = run(&raw, vec![], &ConfigIndex::default());
        assert_eq!(site.timeout.value_ms, None);
        assert_eq!(site.timeout.source, Some(ValueSource::Unresolved));
    }

    #[test]
    fn test_breaker_and_fallback() {
        let mut raw = http_call(vec![]);
        raw.decorators = vec![RawAnnotation {
            name: "CircuitBreaker".to_string(),
            arguments: vec![
                RawArgument::named("name", RawValue::literal("\"payments\"")),
                RawArgument::named("fallbackMethod", RawValue::literal("\"cached\"")),
            ],
        }];
        let (site, _) = run(&raw, vec![], &ConfigIndex::default());
        assert!(site.has_circuit_breaker);
        assert!(site.has_fallback);
        assert_eq!(site.circuit_breaker_name.as_deref(), Some("payments"));
    }

    #[test]
    fn test_looks_like_constant() {
        assert!(looks_like_constant("READ_TIMEOUT"));
        assert!(looks_like_constant("Defaults.readTimeout"));
        assert!(!looks_like_constant("timeout"));
        assert!(!looks_like_constant("this.timeout"));
    }
}
