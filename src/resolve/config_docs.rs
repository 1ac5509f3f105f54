//! Configuration document parsing and the cross-file config index.
//!
//! Documents are flattened to dotted key paths regardless of syntax, then
//! classified by key fragments and normalised:
//!
//! | Raw value | Normalised |
//! |-----------|------------|
//! | `30s`, `PT30S` | 30000 ms |
//! | `500ms` | 500 ms |
//! | `2m`, `1h` | 120000 ms, 3600000 ms |
//! | `5000` (bare) | 5000 ms |
//! | `30` (bare) | project default unit, flagged ambiguous |
//! | `50%` | 50 percent |

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DurationUnit;
use crate::error::ConfigError;
use crate::facts::{parse_number, ConfigCategory, ConfigUnit, ConfigValue};

lazy_static! {
    static ref DURATION: Regex = Regex::new(
        r"(?i)^(-?\d+(?:\.\d+)?)\s*(ns|us|µs|ms|millis|milliseconds|s|sec|secs|seconds|m|min|mins|minutes|h|hr|hrs|hours|d|days)?$"
    )
    .unwrap();
    static ref ISO_DURATION: Regex = Regex::new(
        r"(?i)^P(?:(\d+(?:\.\d+)?)D)?(?:T(?:(\d+(?:\.\d+)?)H)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)S)?)?$"
    )
    .unwrap();
    static ref PLACEHOLDER: Regex = Regex::new(r"^\$\{([^:}]+)(?::([^}]*))?\}$").unwrap();
}

/// A configuration document supplied to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub path: String,
    pub text: String,
}

impl ConfigDocument {
    pub fn new(path: &str, text: &str) -> Self {
        Self {
            path: path.to_string(),
            text: text.to_string(),
        }
    }
}

/// A flattened key with its raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub raw: String,
    pub file: String,
    pub line: usize,
}

/// Lower-cased key with separators removed, so `payments.read-timeout`,
/// `payments.readTimeout` and `PAYMENTS_READ_TIMEOUT` compare equal.
pub fn canonical_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '.' | '_' | '-' | '[' | ']'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Split `${key:default}` into its key and optional default.
pub fn parse_placeholder(text: &str) -> Option<(String, Option<String>)> {
    let caps = PLACEHOLDER.captures(text.trim())?;
    let key = caps.get(1)?.as_str().trim().to_string();
    let default = caps.get(2).map(|m| m.as_str().trim().to_string());
    Some((key, default))
}

/// Factor to milliseconds for a unit suffix (`s`, `ms`, `min`...); 1 when unknown.
pub fn unit_factor(unit: &str) -> f64 {
    match unit.to_lowercase().as_str() {
        "ns" => 1e-6,
        "us" | "µs" => 1e-3,
        "ms" | "millis" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "seconds" => 1000.0,
        "m" | "min" | "mins" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hours" => 3_600_000.0,
        "d" | "days" => 86_400_000.0,
        _ => 1.0,
    }
}

/// Unit implied by a key name (`connectTimeoutMs`, `keepAliveSeconds`).
pub fn key_unit_hint(key: &str) -> Option<f64> {
    let leaf = key.rsplit(['.', '/']).next().unwrap_or(key);
    let lower = leaf.to_lowercase();
    if lower.contains("millis")
        || leaf.ends_with("Ms")
        || leaf.ends_with("MS")
        || lower.ends_with("_ms")
        || lower.ends_with("-ms")
    {
        return Some(1.0);
    }
    if lower.contains("seconds")
        || lower.ends_with("secs")
        || lower.ends_with("sec")
        || lower.ends_with("_s")
        || lower.ends_with("-s")
    {
        return Some(1000.0);
    }
    if lower.contains("minutes") || lower.ends_with("_min") || lower.ends_with("-min") {
        return Some(60_000.0);
    }
    None
}

/// Parse a duration to milliseconds.
///
/// Returns `(millis, ambiguous)`. A bare number is taken as milliseconds
/// when its magnitude rules out seconds (>= 1000) or it is zero; anything
/// else falls back to `default_unit` and is marked ambiguous.
pub fn parse_duration(raw: &str, key: &str, default_unit: DurationUnit) -> Option<(f64, bool)> {
    let text = raw.trim().trim_matches('"').trim_matches('\'').trim();

    if let Some(caps) = ISO_DURATION.captures(text) {
        if text.len() > 1 && caps.iter().skip(1).any(|c| c.is_some()) {
            let part = |i: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse::<f64>().ok())
                    .unwrap_or(0.0)
            };
            let ms = part(1) * 86_400_000.0
                + part(2) * 3_600_000.0
                + part(3) * 60_000.0
                + part(4) * 1000.0;
            return Some((ms, false));
        }
    }

    let caps = DURATION.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    if let Some(unit) = caps.get(2) {
        return Some((value * unit_factor(unit.as_str()), false));
    }
    if let Some(factor) = key_unit_hint(key) {
        return Some((value * factor, false));
    }
    if value == 0.0 || value >= 1000.0 {
        return Some((value, false));
    }
    Some((value * default_unit.to_millis(), true))
}

const BREAKER_FRAGMENTS: &[&str] = &["circuitbreaker", "breaker", "hystrix"];
const THREAD_POOL_FRAGMENTS: &[&str] = &[
    "threadpool",
    "executor",
    "threads",
    "taskexecution",
    "workerthreads",
    "workers",
];
const POOL_FRAGMENTS: &[&str] = &[
    "pool",
    "hikari",
    "maxconnections",
    "maxtotal",
    "maxidle",
    "minidle",
];
const RETRY_FRAGMENTS: &[&str] = &["retry", "retries", "maxattempts", "backoff"];
const TIMEOUT_FRAGMENTS: &[&str] = &["timeout", "ttl", "deadline"];

const DURATION_FRAGMENTS: &[&str] = &[
    "duration", "wait", "timeout", "delay", "interval", "sleep", "lifetime", "keepalive",
    "backoff", "ttl",
];
const PERCENT_FRAGMENTS: &[&str] = &["rate", "threshold", "percent", "percentage"];

fn any_fragment(canonical: &str, fragments: &[&str]) -> bool {
    fragments.iter().any(|f| canonical.contains(f))
}

/// Classify a key by fragment, highest priority first.
pub fn categorize_key(key: &str) -> Option<ConfigCategory> {
    let canonical = canonical_key(key);
    if any_fragment(&canonical, BREAKER_FRAGMENTS) {
        Some(ConfigCategory::CircuitBreaker)
    } else if any_fragment(&canonical, THREAD_POOL_FRAGMENTS) {
        Some(ConfigCategory::ThreadPool)
    } else if any_fragment(&canonical, POOL_FRAGMENTS) {
        Some(ConfigCategory::Pool)
    } else if any_fragment(&canonical, RETRY_FRAGMENTS) {
        Some(ConfigCategory::Retry)
    } else if any_fragment(&canonical, TIMEOUT_FRAGMENTS) {
        Some(ConfigCategory::Timeout)
    } else {
        None
    }
}

fn unit_for(category: ConfigCategory, key: &str, raw: &str) -> ConfigUnit {
    let leaf = canonical_key(key.rsplit('.').next().unwrap_or(key));
    if raw.trim().ends_with('%') {
        return ConfigUnit::Percent;
    }
    match category {
        ConfigCategory::Timeout => ConfigUnit::Millis,
        _ if any_fragment(&leaf, DURATION_FRAGMENTS) => ConfigUnit::Millis,
        ConfigCategory::CircuitBreaker if any_fragment(&leaf, PERCENT_FRAGMENTS) => {
            ConfigUnit::Percent
        }
        _ => ConfigUnit::Count,
    }
}

/// Normalise one raw value; `None` when it is not numeric.
pub fn normalize(
    entry: &ConfigEntry,
    category: ConfigCategory,
    default_unit: DurationUnit,
) -> Option<ConfigValue> {
    let raw = match parse_placeholder(&entry.raw) {
        Some((_, Some(default))) => default,
        Some((_, None)) => return None,
        None => entry.raw.clone(),
    };
    let unit = unit_for(category, &entry.key, &raw);
    let (value, ambiguous) = match unit {
        ConfigUnit::Millis => parse_duration(&raw, &entry.key, default_unit)?,
        ConfigUnit::Percent => (parse_number(raw.trim().trim_end_matches('%'))?, false),
        ConfigUnit::Count => (parse_number(&raw)?, false),
    };
    Some(ConfigValue {
        key: entry.key.clone(),
        category,
        normalized_value: value,
        unit,
        source_file: entry.file.clone(),
        line: entry.line,
        unit_ambiguous: ambiguous,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
    Toml,
    Lines,
}

fn format_of(path: &str) -> Format {
    let lower = path.to_lowercase();
    if lower.ends_with(".yml") || lower.ends_with(".yaml") {
        Format::Yaml
    } else if lower.ends_with(".json") {
        Format::Json
    } else if lower.ends_with(".toml") {
        Format::Toml
    } else {
        Format::Lines
    }
}

fn join_key(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}

fn flatten_yaml(prefix: &str, value: &serde_yaml::Value, out: &mut Vec<(String, String)>) {
    use serde_yaml::Value;
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let segment = match k {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                flatten_yaml(&join_key(prefix, &segment), v, out);
            }
        }
        Value::Sequence(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_yaml(&format!("{}[{}]", prefix, i), v, out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
        Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        Value::Tagged(tagged) => flatten_yaml(prefix, &tagged.value, out),
        Value::Null => {}
    }
}

fn flatten_json(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_json(&join_key(prefix, k), v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_json(&format!("{}[{}]", prefix, i), v, out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
        Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        Value::Null => {}
    }
}

fn flatten_toml(prefix: &str, value: &toml::Value, out: &mut Vec<(String, String)>) {
    use toml::Value;
    match value {
        Value::Table(table) => {
            for (k, v) in table {
                flatten_toml(&join_key(prefix, k), v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_toml(&format!("{}[{}]", prefix, i), v, out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Integer(n) => out.push((prefix.to_string(), n.to_string())),
        Value::Float(n) => out.push((prefix.to_string(), n.to_string())),
        Value::Boolean(b) => out.push((prefix.to_string(), b.to_string())),
        Value::Datetime(d) => out.push((prefix.to_string(), d.to_string())),
    }
}

/// `.properties`, `.env` and ini-style `key=value` / `key: value` lines.
fn flatten_lines(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut section = String::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(['#', '!', ';']) {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_string();
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let split = line.find(['=', ':']);
        if let Some(idx) = split {
            let key = line[..idx].trim();
            let value = line[idx + 1..].trim().trim_matches('"').trim_matches('\'');
            if !key.is_empty() {
                out.push((join_key(&section, key), value.to_string()));
            }
        }
    }
    out
}

fn flatten(doc: &ConfigDocument) -> Result<Vec<(String, String)>, ConfigError> {
    let malformed = |message: String| ConfigError::Malformed {
        path: doc.path.clone(),
        message,
    };
    let mut out = Vec::new();
    match format_of(&doc.path) {
        Format::Yaml => {
            for document in serde_yaml::Deserializer::from_str(&doc.text) {
                let value = serde_yaml::Value::deserialize(document)
                    .map_err(|e| malformed(e.to_string()))?;
                flatten_yaml("", &value, &mut out);
            }
        }
        Format::Json => {
            let value: serde_json::Value =
                serde_json::from_str(&doc.text).map_err(|e| malformed(e.to_string()))?;
            flatten_json("", &value, &mut out);
        }
        Format::Toml => {
            let table: toml::Table = doc.text.parse().map_err(|e: toml::de::Error| {
                malformed(e.message().to_string())
            })?;
            flatten_toml("", &toml::Value::Table(table), &mut out);
        }
        Format::Lines => out = flatten_lines(&doc.text),
    }
    Ok(out)
}

/// Find the line of a flattened key by walking its segments down the text.
fn locate(text: &str, key: &str) -> usize {
    let lines: Vec<&str> = text.lines().collect();
    if lines.iter().any(|l| l.trim_start().starts_with(key)) {
        if let Some(i) = lines.iter().position(|l| l.trim_start().starts_with(key)) {
            return i + 1;
        }
    }

    let mut from = 0;
    let mut found = None;
    for segment in key.split('.') {
        let segment = segment.split('[').next().unwrap_or(segment);
        if segment.is_empty() {
            continue;
        }
        let quoted = format!("\"{}\"", segment);
        let hit = lines.iter().enumerate().skip(from).find(|(_, l)| {
            let t = l.trim_start().trim_start_matches("- ").trim_start();
            t.starts_with(segment) || t.starts_with(&quoted)
        });
        match hit {
            Some((i, _)) => {
                found = Some(i);
                from = i + 1;
            }
            None => break,
        }
    }
    found.map(|i| i + 1).unwrap_or(1)
}

/// Cross-file configuration index, built once per run and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct ConfigIndex {
    entries: BTreeMap<String, ConfigEntry>,
    values: Vec<ConfigValue>,
    documents: usize,
    default_unit: DurationUnit,
}

impl ConfigIndex {
    /// Parse every document; malformed ones are returned alongside the index.
    pub fn build(docs: &[ConfigDocument], default_unit: DurationUnit) -> (Self, Vec<ConfigError>) {
        let mut index = ConfigIndex {
            default_unit,
            ..Default::default()
        };
        let mut errors = Vec::new();

        let mut sorted: Vec<&ConfigDocument> = docs.iter().collect();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));

        for doc in sorted {
            let pairs = match flatten(doc) {
                Ok(pairs) => pairs,
                Err(e) => {
                    warn!(file = %doc.path, error = %e, "skipping malformed config document");
                    errors.push(e);
                    continue;
                }
            };
            index.documents += 1;

            for (key, raw) in pairs {
                let entry = ConfigEntry {
                    line: locate(&doc.text, &key),
                    key,
                    raw,
                    file: doc.path.clone(),
                };
                if let Some(category) = categorize_key(&entry.key) {
                    if let Some(value) = normalize(&entry, category, default_unit) {
                        index.values.push(value);
                    }
                }
                index
                    .entries
                    .entry(canonical_key(&entry.key))
                    .or_insert(entry);
            }
        }

        index.values.sort_by(|a, b| {
            (&a.source_file, a.line, &a.key).cmp(&(&b.source_file, b.line, &b.key))
        });
        debug!(
            documents = index.documents,
            keys = index.entries.len(),
            values = index.values.len(),
            "built config index"
        );
        (index, errors)
    }

    /// Number of documents that parsed.
    pub fn document_count(&self) -> usize {
        self.documents
    }

    pub fn values(&self) -> &[ConfigValue] {
        &self.values
    }

    pub fn entry(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries.get(&canonical_key(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    /// Value of `key` as milliseconds.
    pub fn duration_ms(&self, key: &str) -> Option<f64> {
        let entry = self.entry(key)?;
        parse_duration(&entry.raw, &entry.key, self.default_unit).map(|(v, _)| v)
    }

    /// Value of `key` as a plain number.
    pub fn number(&self, key: &str) -> Option<f64> {
        parse_number(&self.entry(key)?.raw)
    }

    /// Categorised values whose canonical key contains every fragment.
    pub fn matching<'a>(
        &'a self,
        category: ConfigCategory,
        fragments: &'a [&'a str],
    ) -> impl Iterator<Item = &'a ConfigValue> + 'a {
        self.values.iter().filter(move |v| {
            let canonical = canonical_key(&v.key);
            v.category == category && fragments.iter().all(|f| canonical.contains(&canonical_key(f)))
        })
    }

    /// Raw entries whose canonical key contains every fragment.
    pub fn entries_matching<'a>(
        &'a self,
        fragments: &'a [&'a str],
    ) -> impl Iterator<Item = &'a ConfigEntry> + 'a {
        self.entries.iter().filter_map(move |(canonical, entry)| {
            fragments
                .iter()
                .all(|f| canonical.contains(&canonical_key(f)))
                .then_some(entry)
        })
    }
}
