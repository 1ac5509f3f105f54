//! Per-file symbol tables with partial constant propagation.

use std::collections::{BTreeMap, BTreeSet};

use phf::phf_map;

use crate::facts::{RawSymbol, RawSymbolKind, RawValue, Symbol, SymbolKind, Symbols};

use super::config_docs::{key_unit_hint, parse_placeholder, unit_factor};

/// Duration factories and the factor converting their argument to ms.
static DURATION_FACTORIES: phf::Map<&'static str, f64> = phf_map! {
    "ofNanos" => 1e-6,
    "ofMillis" => 1.0,
    "ofSeconds" => 1000.0,
    "ofMinutes" => 60_000.0,
    "ofHours" => 3_600_000.0,
    "ofDays" => 86_400_000.0,
    "from_millis" => 1.0,
    "from_secs" => 1000.0,
    "from_secs_f64" => 1000.0,
    "milliseconds" => 1.0,
    "seconds" => 1000.0,
    "minutes" => 60_000.0,
    "millis" => 1.0,
};

/// Accessors that read configuration regardless of receiver.
const CONFIG_ACCESSORS: &[&str] = &["getenv", "getProperty", "getRequiredProperty"];

/// Typed accessors that only count when the receiver looks like config.
const TYPED_CONFIG_ACCESSORS: &[&str] = &[
    "get",
    "getOrDefault",
    "getValue",
    "getOptionalValue",
    "getString",
    "getInt",
    "getInteger",
    "getLong",
    "getDouble",
    "getDuration",
    "getBoolean",
];

const CONFIG_RECEIVER_FRAGMENTS: &[&str] =
    &["env", "config", "conf", "prop", "setting", "cfg", "environ"];

/// Annotations that bind a field or parameter to a configuration key.
const INJECTION_ANNOTATIONS: &[&str] = &["Value", "ConfigProperty", "ConfigValue", "Named"];

const MAX_PROPAGATION_PASSES: usize = 4;

/// Factor to milliseconds for a duration factory call.
pub fn duration_factory(receiver: Option<&str>, name: &str) -> Option<f64> {
    if let Some(factor) = DURATION_FACTORIES.get(name) {
        return Some(*factor);
    }
    if name == "toMillis" {
        return receiver.and_then(time_unit_factor);
    }
    if name == "timedelta" {
        return Some(1000.0);
    }
    None
}

/// Factor for `TimeUnit.SECONDS`, `ChronoUnit.MILLIS` and friends.
pub fn time_unit_factor(name: &str) -> Option<f64> {
    let unit = name.rsplit('.').next().unwrap_or(name).to_uppercase();
    match unit.as_str() {
        "NANOSECONDS" | "NANOS" => Some(1e-6),
        "MICROSECONDS" | "MICROS" => Some(1e-3),
        "MILLISECONDS" | "MILLIS" => Some(1.0),
        "SECONDS" => Some(1000.0),
        "MINUTES" => Some(60_000.0),
        "HOURS" => Some(3_600_000.0),
        "DAYS" => Some(86_400_000.0),
        _ => None,
    }
}

/// Unit factor implied by an identifier (`TIMEOUT_SECONDS`, `retryDelayMs`).
pub fn name_unit_hint(name: &str) -> Option<f64> {
    key_unit_hint(name)
}

/// `(key, default)` when `value` reads configuration.
pub fn config_access(value: &RawValue) -> Option<(String, Option<String>)> {
    let (receiver, name, arguments) = match value {
        RawValue::Call {
            receiver,
            name,
            arguments,
        } => (receiver.as_deref().unwrap_or(""), name.as_str(), arguments),
        RawValue::Literal { .. } => {
            let (key, default) = parse_placeholder(value.string_value()?)?;
            return Some((key, default));
        }
        _ => return None,
    };

    let recv = receiver.to_lowercase();
    let accessor = CONFIG_ACCESSORS.contains(&name)
        || (TYPED_CONFIG_ACCESSORS.contains(&name)
            && CONFIG_RECEIVER_FRAGMENTS.iter().any(|f| recv.contains(f)));
    if !accessor {
        return None;
    }

    let key = arguments.first()?.value.string_value()?.to_string();
    let default = arguments
        .get(1)
        .and_then(|a| match &a.value {
            RawValue::Literal { .. } => a.value.string_value().map(str::to_string),
            _ => None,
        });
    Some((key, default))
}

fn injection(raw: &RawSymbol) -> Option<(String, Option<String>)> {
    for annotation in &raw.annotations {
        if !INJECTION_ANNOTATIONS.contains(&annotation.name.as_str()) {
            continue;
        }
        let bound = annotation
            .value_argument()
            .or_else(|| annotation.argument("name"))
            .and_then(|v| v.string_value());
        let Some(text) = bound else { continue };

        if let Some((key, default)) = parse_placeholder(text) {
            return Some((key, default));
        }
        if annotation.name != "Value" {
            let default = annotation
                .argument("defaultValue")
                .and_then(|v| v.string_value())
                .map(str::to_string);
            return Some((text.to_string(), default));
        }
    }
    None
}

/// Outcome of evaluating a bound value.
#[derive(Debug, Clone, PartialEq)]
enum Eval {
    Number { value: f64, ms: bool },
    Config { key: String, default: Option<String> },
    Text(String),
    Opaque,
}

/// Declared bindings of one file, scoped per function.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    /// Keyed by (scope, name); file-level bindings use an empty scope.
    symbols: BTreeMap<(String, String), Symbol>,
    /// Types declared in this file (`OrderService`).
    owners: BTreeSet<String>,
}

impl SymbolTable {
    /// Build the table for one file's symbols.
    pub fn build(symbols: &Symbols) -> Self {
        let mut table = SymbolTable::default();
        table.owners = symbols
            .functions
            .iter()
            .filter_map(|f| f.owner.clone())
            .chain(symbols.bindings.iter().filter_map(|b| {
                let (owner, _) = b.scope.as_deref()?.rsplit_once('.')?;
                Some(owner.to_string())
            }))
            .collect();

        for raw in &symbols.bindings {
            let key = (raw.scope.clone().unwrap_or_default(), raw.name.clone());
            if table.symbols.contains_key(&key) {
                continue;
            }
            let symbol = table.classify(raw);
            table.symbols.insert(key, symbol);
        }

        // Constants defined in terms of other constants.
        for _ in 0..MAX_PROPAGATION_PASSES {
            let mut changed = false;
            for raw in &symbols.bindings {
                let key = (raw.scope.clone().unwrap_or_default(), raw.name.clone());
                let pending = table
                    .symbols
                    .get(&key)
                    .map(|s| s.kind == SymbolKind::Unknown)
                    .unwrap_or(false);
                if !pending || raw.value.is_none() {
                    continue;
                }
                let symbol = table.classify(raw);
                if symbol.kind != SymbolKind::Unknown {
                    table.symbols.insert(key, symbol);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        table
    }

    /// Look a name up in `scope` first, then at file level.
    pub fn lookup(&self, name: &str, scope: Option<&str>) -> Option<&Symbol> {
        if let Some(scope) = scope {
            if let Some(s) = self.symbols.get(&(scope.to_string(), name.to_string())) {
                return Some(s);
            }
        }
        if let Some(s) = self.symbols.get(&(String::new(), name.to_string())) {
            return Some(s);
        }
        // `OrderService.TIMEOUT` referring to a constant of this file. A
        // foreign qualifier names a binding this table cannot see.
        let (qualifier, last) = name.rsplit_once('.')?;
        let owner = qualifier.rsplit('.').next().unwrap_or(qualifier);
        if !self.owners.contains(owner) {
            return None;
        }
        self.symbols
            .get(&(String::new(), last.to_string()))
            .filter(|s| s.kind == SymbolKind::Constant)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn classify(&self, raw: &RawSymbol) -> Symbol {
        let mut symbol = Symbol {
            name: raw.name.clone(),
            kind: SymbolKind::Unknown,
            resolved_value: None,
            is_duration: false,
            config_key: None,
            config_default: None,
            text: None,
            line: raw.line,
        };

        if let Some((key, default)) = injection(raw) {
            symbol.kind = SymbolKind::ConfigInjected;
            symbol.config_default = default.as_deref().and_then(crate::facts::parse_number);
            symbol.config_key = Some(key);
            return symbol;
        }
        if raw.kind == RawSymbolKind::Parameter {
            symbol.kind = SymbolKind::Parameter;
            return symbol;
        }

        let scope = raw.scope.as_deref();
        let eval = match &raw.value {
            Some(value) => self.eval(value, scope, 0),
            None => Eval::Opaque,
        };
        let settled = if raw.kind == RawSymbolKind::Constant {
            SymbolKind::Constant
        } else {
            SymbolKind::Literal
        };

        match eval {
            Eval::Number { value, ms } => {
                symbol.kind = settled;
                symbol.resolved_value = Some(value);
                symbol.is_duration = ms;
            }
            Eval::Config { key, default } => {
                symbol.kind = SymbolKind::ConfigInjected;
                symbol.config_default = default.as_deref().and_then(crate::facts::parse_number);
                symbol.config_key = Some(key);
            }
            Eval::Text(text) => {
                symbol.kind = settled;
                symbol.text = Some(text);
            }
            Eval::Opaque => {}
        }
        symbol
    }

    fn eval(&self, value: &RawValue, scope: Option<&str>, depth: usize) -> Eval {
        if depth > 8 {
            return Eval::Opaque;
        }
        if let Some((key, default)) = config_access(value) {
            return Eval::Config { key, default };
        }

        match value {
            RawValue::Literal { number, unit, .. } => match (number, unit) {
                (Some(n), Some(u)) => Eval::Number {
                    value: n * unit_factor(u),
                    ms: true,
                },
                (Some(n), None) => Eval::Number {
                    value: *n,
                    ms: false,
                },
                (None, _) => match value.string_value() {
                    Some(s) => Eval::Text(s.to_string()),
                    None => Eval::Opaque,
                },
            },
            RawValue::Identifier { name } => match self.lookup(name, scope) {
                Some(s) if matches!(s.kind, SymbolKind::Constant | SymbolKind::Literal) => {
                    match (s.resolved_value, &s.text) {
                        (Some(v), _) => Eval::Number {
                            value: v,
                            ms: s.is_duration,
                        },
                        (None, Some(t)) => Eval::Text(t.clone()),
                        (None, None) => Eval::Opaque,
                    }
                }
                Some(s) if s.kind == SymbolKind::ConfigInjected => match &s.config_key {
                    Some(key) => Eval::Config {
                        key: key.clone(),
                        default: s.config_default.map(|d| d.to_string()),
                    },
                    None => Eval::Opaque,
                },
                _ => Eval::Opaque,
            },
            RawValue::Call {
                receiver,
                name,
                arguments,
            } => {
                let factor = match duration_factory(receiver.as_deref(), name) {
                    Some(f) => f,
                    None => return Eval::Opaque,
                };
                let inner = match arguments.first() {
                    Some(a) => self.eval(&a.value, scope, depth + 1),
                    None => return Eval::Opaque,
                };
                match inner {
                    Eval::Number { value, .. } => Eval::Number {
                        value: value * factor,
                        ms: true,
                    },
                    other @ Eval::Config { .. } => other,
                    _ => Eval::Opaque,
                }
            }
            RawValue::Expression { text } => self.eval_product(text, scope, depth),
        }
    }

    /// `30 * 1000`, `TIMEOUT_SECONDS * 1000`.
    fn eval_product(&self, text: &str, scope: Option<&str>, depth: usize) -> Eval {
        let parts: Vec<&str> = text.split('*').map(str::trim).collect();
        if parts.len() < 2 {
            return Eval::Opaque;
        }
        let mut product = 1.0;
        for part in parts {
            let value = match crate::facts::parse_number(part) {
                Some(n) => n,
                None => match self.eval(&RawValue::identifier(part), scope, depth + 1) {
                    Eval::Number { value, .. } => value,
                    _ => return Eval::Opaque,
                },
            };
            product *= value;
        }
        Eval::Number {
            value: product,
            ms: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{RawAnnotation, RawArgument, RawFunction};

    fn binding(name: &str, kind: RawSymbolKind, value: Option<RawValue>) -> RawSymbol {
        RawSymbol {
            name: name.to_string(),
            kind,
            line: 1,
            declared_type: None,
            value,
            annotations: vec![],
            scope: None,
        }
    }

    fn call(receiver: &str, name: &str, args: Vec<RawValue>) -> RawValue {
        RawValue::Call {
            receiver: Some(receiver.to_string()),
            name: name.to_string(),
            arguments: args.into_iter().map(RawArgument::positional).collect(),
        }
    }

    #[test]
    fn test_constant_and_literal_bindings() {
        let table = SymbolTable::build(&Symbols {
            bindings: vec![
                binding(
                    "TIMEOUT_MS",
                    RawSymbolKind::Constant,
                    Some(RawValue::literal("5000")),
                ),
                binding("attempts", RawSymbolKind::Field, Some(RawValue::literal("3"))),
                binding(
                    "TOPIC",
                    RawSymbolKind::Constant,
                    Some(RawValue::literal("\"orders\"")),
                ),
            ],
            functions: vec![],
        });

        let timeout = table.lookup("TIMEOUT_MS", None).unwrap();
        assert_eq!(timeout.kind, SymbolKind::Constant);
        assert_eq!(timeout.resolved_value, Some(5000.0));

        let attempts = table.lookup("attempts", None).unwrap();
        assert_eq!(attempts.kind, SymbolKind::Literal);

        let topic = table.lookup("TOPIC", None).unwrap();
        assert_eq!(topic.text.as_deref(), Some("orders"));
    }

    #[test]
    fn test_duration_factory_normalizes() {
        let table = SymbolTable::build(&Symbols {
            bindings: vec![binding(
                "READ_TIMEOUT",
                RawSymbolKind::Constant,
                Some(call("Duration", "ofSeconds", vec![RawValue::literal("3")])),
            )],
            functions: vec![],
        });
        let s = table.lookup("READ_TIMEOUT", None).unwrap();
        assert_eq!(s.resolved_value, Some(3000.0));
        assert!(s.is_duration);
    }

    #[test]
    fn test_constant_propagation() {
        let table = SymbolTable::build(&Symbols {
            bindings: vec![
                binding(
                    "TIMEOUT",
                    RawSymbolKind::Constant,
                    Some(RawValue::identifier("BASE_TIMEOUT")),
                ),
                binding(
                    "DOUBLE",
                    RawSymbolKind::Constant,
                    Some(RawValue::Expression {
                        text: "BASE_TIMEOUT * 2".to_string(),
                    }),
                ),
                binding(
                    "BASE_TIMEOUT",
                    RawSymbolKind::Constant,
                    Some(RawValue::literal("2000")),
                ),
            ],
            functions: vec![],
        });
        assert_eq!(
            table.lookup("TIMEOUT", None).unwrap().resolved_value,
            Some(2000.0)
        );
        assert_eq!(
            table.lookup("DOUBLE", None).unwrap().resolved_value,
            Some(4000.0)
        );
    }

    #[test]
    fn test_value_annotation_injection() {
        let mut raw = binding("paymentTimeout", RawSymbolKind::Field, None);
        raw.annotations = vec![RawAnnotation {
            name: "Value".to_string(),
            arguments: vec![RawArgument::positional(RawValue::literal(
                "\"${payments.timeout:5000}\"",
            ))],
        }];
        let table = SymbolTable::build(&Symbols {
            bindings: vec![raw],
            functions: vec![],
        });
        let s = table.lookup("paymentTimeout", None).unwrap();
        assert_eq!(s.kind, SymbolKind::ConfigInjected);
        assert_eq!(s.config_key.as_deref(), Some("payments.timeout"));
        assert_eq!(s.config_default, Some(5000.0));
    }

    #[test]
    fn test_env_accessor_injection() {
        let mut local = binding(
            "timeout",
            RawSymbolKind::Local,
            Some(call(
                "System",
                "getenv",
                vec![RawValue::literal("\"HTTP_TIMEOUT\"")],
            )),
        );
        local.scope = Some("Client.fetch".to_string());
        let table = SymbolTable::build(&Symbols {
            bindings: vec![
                local,
                binding(
                    "name",
                    RawSymbolKind::Field,
                    Some(call("json", "getString", vec![RawValue::literal("\"name\"")])),
                ),
            ],
            functions: vec![],
        });

        let s = table.lookup("timeout", Some("Client.fetch")).unwrap();
        assert_eq!(s.kind, SymbolKind::ConfigInjected);
        assert_eq!(s.config_key.as_deref(), Some("HTTP_TIMEOUT"));
        assert!(table.lookup("timeout", Some("Client.other")).is_none());

        // `json.getString` is not a config read.
        assert_eq!(table.lookup("name", None).unwrap().kind, SymbolKind::Unknown);
    }

    #[test]
    fn test_parameters_and_qualified_lookup() {
        let mut param = binding("timeoutMs", RawSymbolKind::Parameter, None);
        param.scope = Some("Client.call".to_string());
        let table = SymbolTable::build(&Symbols {
            bindings: vec![
                param,
                binding(
                    "TIMEOUT",
                    RawSymbolKind::Constant,
                    Some(RawValue::literal("1000")),
                ),
            ],
            functions: vec![],
        });
        assert_eq!(
            table.lookup("timeoutMs", Some("Client.call")).unwrap().kind,
            SymbolKind::Parameter
        );
        assert_eq!(
            table.lookup("Client.TIMEOUT", None).unwrap().resolved_value,
            Some(1000.0)
        );
        assert!(table.lookup("Other.MISSING", None).is_none());
        assert_eq!(
            table.lookup("com.shop.Client.TIMEOUT", None).unwrap().resolved_value,
            Some(1000.0)
        );
    }

    #[test]
    fn test_foreign_qualifier_is_not_a_local_constant() {
        let table = SymbolTable::build(&Symbols {
            bindings: vec![binding(
                "TIMEOUT",
                RawSymbolKind::Constant,
                Some(RawValue::literal("1000")),
            )],
            functions: vec![RawFunction {
                name: "fetch".to_string(),
                owner: Some("Client".to_string()),
                line: 10,
                end_line: 20,
                decorators: vec![],
                parameters: vec![],
                return_type: None,
                is_async: false,
                handle_uses: vec![],
            }],
        });
        assert!(table.lookup("Defaults.TIMEOUT", None).is_none());
        assert!(table.lookup("Client.TIMEOUT", None).is_some());
        assert!(table.lookup("TIMEOUT", None).is_some());
    }

    #[test]
    fn test_time_unit_factor() {
        assert_eq!(time_unit_factor("TimeUnit.SECONDS"), Some(1000.0));
        assert_eq!(time_unit_factor("ChronoUnit.MILLIS"), Some(1.0));
        assert_eq!(time_unit_factor("Other.THING"), None);
        assert_eq!(duration_factory(Some("TimeUnit.SECONDS"), "toMillis"), Some(1000.0));
    }
}
