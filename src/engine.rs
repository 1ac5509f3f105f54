//! Analysis engine.
//!
//! A run has two phases:
//!
//! 1. **Map**: every file is classified, resolved and checked on its own,
//!    in bounded parallel waves on a tokio runtime. Adapter calls run on
//!    blocking worker threads under a per-file timeout. A file whose
//!    extraction fails becomes a degraded bundle rather than aborting the
//!    run.
//! 2. **Reduce**: once every wave has finished, endpoints are merged,
//!    cross-file invariants and blast radius are computed, and the draft
//!    findings are synthesized into the final ordered list.
//!
//! The config index is built once up front and shared read-only with the
//! map phase, so per-file resolution can look up injected keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapter::SyntaxAdapter;
use crate::blast::{entry_points, BlastRadiusAnalyzer};
use crate::classify::classify_call;
use crate::config::{DurationUnit, RunConfig};
use crate::detect::{
    detect_breaking_api_changes, detect_endpoints, detect_unit_ambiguous, Runner,
};
use crate::endpoints::{apply_config_dead_letters, merge_all, EndpointSource};
use crate::error::{AdapterError, ConfigError, EngineError};
use crate::facts::{
    ApiChange, AsyncEndpoint, BlastRadius, CallSite, Confidence, Finding, FindingKind,
    RawFunction, Severity,
};
use crate::invariants::{InvariantValidator, SkippedCheck};
use crate::resolve::{ConfigDocument, ConfigIndex, ResolveContext, Resolver, SymbolTable};
use crate::synth::synthesize;

/// Version stamped into every report.
pub const REPORT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cooperative cancellation flag shared between a caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What changed in the revision under analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Qualified names of changed functions. Empty means "everything".
    #[serde(default)]
    pub changed_symbols: BTreeSet<String>,
    #[serde(default)]
    pub api_changes: Vec<ApiChange>,
}

impl ChangeSet {
    /// Load a change set from a JSON document.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Inputs of one run.
#[derive(Debug, Clone, Default)]
pub struct AnalysisInput {
    /// Source files, as the adapter knows them.
    pub files: Vec<String>,
    pub config_documents: Vec<ConfigDocument>,
    pub changes: ChangeSet,
}

/// A file (or config document) that could not be fully analyzed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DegradedFile {
    pub path: String,
    pub reason: String,
}

/// The complete output of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub version: String,
    pub files_analyzed: usize,
    pub degraded_files: Vec<DegradedFile>,
    pub findings: Vec<Finding>,
    pub endpoints: Vec<AsyncEndpoint>,
    pub blast_radius: BTreeMap<String, BlastRadius>,
    pub skipped_checks: Vec<SkippedCheck>,
}

impl AnalysisReport {
    /// Number of findings at or above `severity`.
    pub fn count_at_or_above(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity >= severity).count()
    }

    pub fn count_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for f in &self.findings {
            *counts.entry(f.severity).or_insert(0) += 1;
        }
        counts
    }
}

/// Everything the map phase produced for one file.
#[derive(Debug, Default)]
struct FileBundle {
    path: String,
    sites: Vec<CallSite>,
    functions: Vec<RawFunction>,
    endpoints: Vec<AsyncEndpoint>,
    findings: Vec<Finding>,
    parse_error: Option<String>,
}

impl FileBundle {
    fn degraded(path: String, reason: String) -> Self {
        Self {
            path,
            parse_error: Some(reason),
            ..Default::default()
        }
    }
}

/// Classify, resolve and check one file.
fn extract_file(
    adapter: &dyn SyntaxAdapter,
    config: &ConfigIndex,
    file: &str,
    default_unit: DurationUnit,
) -> Result<FileBundle, AdapterError> {
    let symbols = adapter.get_symbols(file)?;
    let raw = adapter.get_calls(file)?;

    let table = SymbolTable::build(&symbols);
    let ctx = ResolveContext {
        table: &table,
        config,
        default_unit,
    };
    let mut resolver = Resolver::new(&ctx);
    let sites: Vec<CallSite> = raw
        .iter()
        .map(|r| resolver.resolve(r, classify_call(r)))
        .collect();

    let mut findings = Runner::new().run(&raw, &sites, &symbols.functions);
    let dropped: BTreeSet<String> = findings
        .iter()
        .filter(|f| f.kind == FindingKind::FireAndForget)
        .flat_map(|f| f.evidence.iter().cloned())
        .collect();
    let endpoints = EndpointSource {
        raw: &raw,
        sites: &sites,
        functions: &symbols.functions,
        table: &table,
        config,
        dropped: &dropped,
    }
    .extract(file);
    findings.extend(resolver.into_findings());

    debug!(
        file,
        calls = sites.len(),
        endpoints = endpoints.len(),
        findings = findings.len(),
        "file analyzed"
    );
    Ok(FileBundle {
        path: file.to_string(),
        sites,
        functions: symbols.functions,
        endpoints,
        findings,
        parse_error: None,
    })
}

/// Run [`extract_file`] on a blocking thread, bounded by `timeout`.
async fn map_file(
    adapter: Arc<dyn SyntaxAdapter>,
    config: Arc<ConfigIndex>,
    file: String,
    default_unit: DurationUnit,
    timeout: Duration,
) -> FileBundle {
    let path = file.clone();
    let task = tokio::task::spawn_blocking(move || {
        extract_file(adapter.as_ref(), &config, &file, default_unit)
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(bundle))) => bundle,
        Ok(Ok(Err(e))) => FileBundle::degraded(path, e.to_string()),
        Ok(Err(e)) => FileBundle::degraded(path, format!("worker failed: {}", e)),
        Err(_) => {
            let reason = AdapterError::Timeout(path.clone()).to_string();
            FileBundle::degraded(path, reason)
        }
    }
}

fn parse_error_finding(degraded: &DegradedFile) -> Finding {
    Finding::new(FindingKind::ParseError, Severity::Low, &degraded.path, 1)
        .with_confidence(Confidence::Low)
        .with_evidence(format!("file:{}", degraded.path))
        .with_rationale(format!(
            "{} could not be analyzed ({}); its risks are not reported",
            degraded.path, degraded.reason
        ))
}

/// Runs the analysis pipeline against one syntax adapter.
pub struct Engine {
    adapter: Arc<dyn SyntaxAdapter>,
    config: RunConfig,
}

impl Engine {
    pub fn new(adapter: Arc<dyn SyntaxAdapter>, config: RunConfig) -> Self {
        Self { adapter, config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Analyze `input` and return the report.
    ///
    /// Blocks the calling thread. The map phase always runs on its own
    /// runtime, so this may also be called from inside a tokio runtime.
    ///
    /// Fails only when the adapter cannot serve any file, or when `cancel`
    /// fires before the reduce phase starts. Partial map results are
    /// discarded on cancellation.
    pub fn run(
        &self,
        input: &AnalysisInput,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut degraded = Vec::new();
        let (config, errors) =
            ConfigIndex::build(&input.config_documents, self.config.default_duration_unit);
        for e in errors {
            warn!(error = %e, "configuration document skipped");
            let path = match &e {
                ConfigError::Malformed { path, .. } => path.clone(),
                ConfigError::Invalid(_) => "<config>".to_string(),
            };
            degraded.push(DegradedFile {
                path,
                reason: e.to_string(),
            });
        }

        let files: Vec<String> = input
            .files
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let registered = self.register(&files)?;
        for file in files.iter().filter(|f| !registered.contains(f.as_str())) {
            debug!(file = file.as_str(), adapter = self.adapter.adapter_id(), "file not supported");
            degraded.push(DegradedFile {
                path: file.clone(),
                reason: format!("not supported by the {} adapter", self.adapter.adapter_id()),
            });
        }

        info!(
            files = registered.len(),
            config_documents = config.document_count(),
            adapter = self.adapter.adapter_id(),
            "starting analysis"
        );

        let config = Arc::new(config);
        let bundles = if tokio::runtime::Handle::try_current().is_ok() {
            // A runtime cannot block on another from one of its own threads.
            std::thread::scope(|scope| {
                scope
                    .spawn(|| self.drive_map_phase(&registered, Arc::clone(&config), cancel))
                    .join()
            })
            .map_err(|_| EngineError::Runtime(io::Error::other("map phase worker panicked")))??
        } else {
            self.drive_map_phase(&registered, Arc::clone(&config), cancel)?
        };

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(self.reduce(input, &config, bundles, degraded))
    }

    /// Run the map phase to completion on a dedicated runtime.
    fn drive_map_phase(
        &self,
        files: &BTreeSet<String>,
        config: Arc<ConfigIndex>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileBundle>, EngineError> {
        let runtime = tokio::runtime::Runtime::new()?;
        let mapped = runtime.block_on(self.map_phase(files, config, cancel));
        // Timed-out extractions may still be running; do not wait for them.
        runtime.shutdown_background();
        mapped
    }

    fn register(&self, files: &[String]) -> Result<BTreeSet<String>, EngineError> {
        if files.is_empty() {
            return Ok(BTreeSet::new());
        }
        let registered = self
            .adapter
            .register(files)
            .map_err(|e| EngineError::AdapterUnavailable(e.to_string()))?;
        if registered.is_empty() {
            return Err(EngineError::AdapterUnavailable(format!(
                "the {} adapter accepted none of {} files",
                self.adapter.adapter_id(),
                files.len()
            )));
        }
        Ok(registered.into_iter().collect())
    }

    async fn map_phase(
        &self,
        files: &BTreeSet<String>,
        config: Arc<ConfigIndex>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileBundle>, EngineError> {
        use futures::stream::{self, StreamExt};

        let files: Vec<&String> = files.iter().collect();
        let timeout = Duration::from_millis(self.config.adapter_timeout_ms);
        let default_unit = self.config.default_duration_unit;
        let mut bundles = Vec::with_capacity(files.len());

        for (wave, batch) in files.chunks(self.config.batch_size.max(1)).enumerate() {
            debug!(wave, files = batch.len(), "dispatching map wave");
            let results: Vec<Option<FileBundle>> = stream::iter(batch.iter().map(|f| (*f).clone()))
                .map(|file| {
                    let adapter = Arc::clone(&self.adapter);
                    let config = Arc::clone(&config);
                    async move {
                        if cancel.is_cancelled() {
                            return None;
                        }
                        Some(map_file(adapter, config, file, default_unit, timeout).await)
                    }
                })
                .buffer_unordered(self.config.concurrency_limit.max(1))
                .collect()
                .await;

            if results.iter().any(Option::is_none) {
                info!(wave, "analysis cancelled during map phase");
                return Err(EngineError::Cancelled);
            }
            bundles.extend(results.into_iter().flatten());
        }

        // Completion order is nondeterministic.
        bundles.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(bundles)
    }

    fn reduce(
        &self,
        input: &AnalysisInput,
        config: &ConfigIndex,
        bundles: Vec<FileBundle>,
        mut degraded: Vec<DegradedFile>,
    ) -> AnalysisReport {
        let mut drafts = Vec::new();
        let mut sites = Vec::new();
        let mut functions = Vec::new();
        let mut contributions = Vec::new();
        let mut files_analyzed = 0;

        for bundle in bundles {
            if let Some(reason) = bundle.parse_error {
                warn!(file = bundle.path.as_str(), reason = reason.as_str(), "file degraded");
                let entry = DegradedFile {
                    path: bundle.path,
                    reason,
                };
                drafts.push(parse_error_finding(&entry));
                degraded.push(entry);
                continue;
            }
            files_analyzed += 1;
            drafts.extend(bundle.findings);
            sites.extend(bundle.sites);
            functions.extend(bundle.functions);
            contributions.extend(bundle.endpoints);
        }

        let changed = &input.changes.changed_symbols;
        let mut endpoints = merge_all(contributions);
        apply_config_dead_letters(&mut endpoints, config);
        for endpoint in &mut endpoints {
            if endpoint.functions.iter().any(|f| changed.contains(f)) {
                endpoint.is_new = true;
            }
        }

        drafts.extend(detect_endpoints(&endpoints));
        drafts.extend(detect_unit_ambiguous(config.values()));
        drafts.extend(detect_breaking_api_changes(
            &input.changes.api_changes,
            self.adapter.as_ref(),
        ));

        let invariants = InvariantValidator::new(config, self.config.sla_threshold_ms).validate(&sites);
        drafts.extend(invariants.findings);

        let entries = entry_points(&functions, &self.config.entry_point_annotations);
        let targets: BTreeSet<String> = if changed.is_empty() {
            functions.iter().map(RawFunction::qualified_name).collect()
        } else {
            changed.clone()
        };
        let blast_radius =
            BlastRadiusAnalyzer::new(self.adapter.as_ref(), &entries, self.config.blast_radius_depth)
                .analyze_all(&targets);

        let findings = synthesize(drafts, &blast_radius);

        let mut skipped_checks = invariants.skipped;
        skipped_checks.sort();
        skipped_checks.dedup();
        degraded.sort();
        degraded.dedup();

        info!(
            files = files_analyzed,
            degraded = degraded.len(),
            findings = findings.len(),
            endpoints = endpoints.len(),
            skipped = skipped_checks.len(),
            "analysis complete"
        );

        AnalysisReport {
            version: REPORT_VERSION.to_string(),
            files_analyzed,
            degraded_files: degraded,
            findings,
            endpoints,
            blast_radius,
            skipped_checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FactsAdapter, FactsFile};
    use crate::facts::{
        RawAnnotation, RawArgument, RawCallSite, RawSymbol, RawSymbolKind, RawValue, Symbols,
    };

    fn rest_call(file: &str, line: usize, enclosing: &str) -> RawCallSite {
        let mut raw = RawCallSite::new(file, line, "getForObject");
        raw.column = 9;
        raw.receiver = Some("restTemplate".to_string());
        raw.receiver_type = Some("RestTemplate".to_string());
        raw.return_type = Some("Order".to_string());
        raw.enclosing_function = Some(enclosing.to_string());
        raw
    }

    fn function(owner: &str, name: &str, line: usize, decorators: Vec<RawAnnotation>) -> RawFunction {
        RawFunction {
            name: name.to_string(),
            owner: Some(owner.to_string()),
            line,
            end_line: line + 10,
            decorators,
            parameters: vec![],
            return_type: None,
            is_async: false,
            handle_uses: vec![],
        }
    }

    fn engine(adapter: FactsAdapter) -> Engine {
        let config = RunConfig {
            concurrency_limit: 2,
            batch_size: 2,
            ..RunConfig::default()
        };
        Engine::new(Arc::new(adapter), config)
    }

    fn input(files: &[&str]) -> AnalysisInput {
        AnalysisInput {
            files: files.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_blocking_http_without_timeout() {
        let adapter = FactsAdapter::new().with_file(FactsFile {
            path: "OrderClient.java".to_string(),
            calls: vec![rest_call("OrderClient.java", 10, "OrderClient.fetch")],
            ..Default::default()
        });
        let report = engine(adapter)
            .run(&input(&["OrderClient.java"]), &CancellationToken::new())
            .unwrap();

        let timeouts: Vec<&Finding> = report
            .findings
            .iter()
            .filter(|f| f.kind == FindingKind::MissingTimeout)
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].severity, Severity::High);
        assert_eq!(timeouts[0].confidence, Confidence::High);
        assert_eq!(report.files_analyzed, 1);
    }

    #[test]
    fn test_new_consumer_without_dlq_reachable_is_critical() {
        let listener = function(
            "OrderListener",
            "onOrder",
            14,
            vec![RawAnnotation {
                name: "KafkaListener".to_string(),
                arguments: vec![RawArgument::named("topics", RawValue::literal("\"orders\""))],
            }],
        );
        let adapter = FactsAdapter::new().with_file(FactsFile {
            path: "OrderListener.java".to_string(),
            symbols: Symbols {
                bindings: vec![],
                functions: vec![listener],
            },
            ..Default::default()
        });
        let mut input = input(&["OrderListener.java"]);
        input.changes.changed_symbols = BTreeSet::from(["OrderListener.onOrder".to_string()]);

        let report = engine(adapter).run(&input, &CancellationToken::new()).unwrap();
        assert_eq!(report.endpoints.len(), 1);
        assert!(report.endpoints[0].is_new);

        let finding = report
            .findings
            .iter()
            .find(|f| f.kind == FindingKind::ConsumerWithoutDlq)
            .unwrap();
        assert_eq!(finding.severity, Severity::Critical);
        assert!(finding.blast_radius.as_ref().unwrap().reachable_entry_points);
    }

    #[test]
    fn test_missing_config_key_is_a_finding() {
        let mut call = rest_call("PaymentClient.java", 20, "PaymentClient.charge");
        call.arguments = vec![RawArgument::positional(RawValue::identifier("paymentTimeout"))];
        let binding = RawSymbol {
            name: "paymentTimeout".to_string(),
            kind: RawSymbolKind::Field,
            line: 7,
            declared_type: Some("long".to_string()),
            value: None,
            annotations: vec![RawAnnotation {
                name: "Value".to_string(),
                arguments: vec![RawArgument::positional(RawValue::literal(
                    "\"${payments.timeout}\"",
                ))],
            }],
            scope: None,
        };
        let adapter = FactsAdapter::new().with_file(FactsFile {
            path: "PaymentClient.java".to_string(),
            symbols: Symbols {
                bindings: vec![binding],
                functions: vec![],
            },
            calls: vec![call],
            ..Default::default()
        });
        let mut input = input(&["PaymentClient.java"]);
        input.config_documents = vec![ConfigDocument::new(
            "application.yml",
            "server:\n  port: 8080\n",
        )];

        let report = engine(adapter).run(&input, &CancellationToken::new()).unwrap();
        assert!(report
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::ConfigKeyMissing && f.line == 7));
        assert!(!report
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::MissingTimeout));
    }

    #[test]
    fn test_parse_failure_degrades_file() {
        let adapter = FactsAdapter::new()
            .with_file(FactsFile {
                path: "Broken.java".to_string(),
                parse_error: Some("unexpected token".to_string()),
                ..Default::default()
            })
            .with_file(FactsFile {
                path: "OrderClient.java".to_string(),
                calls: vec![rest_call("OrderClient.java", 10, "OrderClient.fetch")],
                ..Default::default()
            });
        let report = engine(adapter)
            .run(
                &input(&["Broken.java", "OrderClient.java"]),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(report.files_analyzed, 1);
        assert_eq!(report.degraded_files.len(), 1);
        assert_eq!(report.degraded_files[0].path, "Broken.java");
        let parse = report
            .findings
            .iter()
            .find(|f| f.kind == FindingKind::ParseError)
            .unwrap();
        assert_eq!(parse.severity, Severity::Low);
        assert_eq!(parse.confidence, Confidence::Low);
    }

    #[test]
    fn test_unsupported_files_are_recorded() {
        let adapter = FactsAdapter::new().with_file(FactsFile {
            path: "OrderClient.java".to_string(),
            ..Default::default()
        });
        let report = engine(adapter)
            .run(
                &input(&["OrderClient.java", "notes.txt"]),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(report.degraded_files[0].path, "notes.txt");
    }

    #[test]
    fn test_adapter_unavailable_is_fatal() {
        let err = engine(FactsAdapter::new())
            .run(&input(&["A.java"]), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::AdapterUnavailable(_)));

        let adapter = FactsAdapter::new().with_file(FactsFile {
            path: "B.java".to_string(),
            ..Default::default()
        });
        let err = engine(adapter)
            .run(&input(&["A.java"]), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::AdapterUnavailable(_)));
    }

    #[test]
    fn test_cancelled_run() {
        let adapter = FactsAdapter::new().with_file(FactsFile {
            path: "A.java".to_string(),
            ..Default::default()
        });
        let token = CancellationToken::new();
        token.cancel();
        let err = engine(adapter).run(&input(&["A.java"]), &token).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn test_runs_are_byte_identical() {
        let files: Vec<FactsFile> = (0..5)
            .map(|i| {
                let path = format!("Client{}.java", i);
                FactsFile {
                    calls: vec![rest_call(&path, 10 + i, &format!("Client{}.fetch", i))],
                    path,
                    ..Default::default()
                }
            })
            .collect();
        let adapter = files
            .into_iter()
            .fold(FactsAdapter::new(), |a, f| a.with_file(f));
        let engine = engine(adapter);
        let input = input(&[
            "Client3.java",
            "Client0.java",
            "Client4.java",
            "Client1.java",
            "Client2.java",
        ]);

        let first = serde_json::to_string(&engine.run(&input, &CancellationToken::new()).unwrap())
            .unwrap();
        let second = serde_json::to_string(&engine.run(&input, &CancellationToken::new()).unwrap())
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_run_inside_a_runtime() {
        let adapter = FactsAdapter::new().with_file(FactsFile {
            path: "OrderClient.java".to_string(),
            calls: vec![rest_call("OrderClient.java", 10, "OrderClient.fetch")],
            ..Default::default()
        });
        let report = engine(adapter)
            .run(&input(&["OrderClient.java"]), &CancellationToken::new())
            .unwrap();
        assert_eq!(report.files_analyzed, 1);
        assert!(report
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::MissingTimeout));
    }

    #[test]
    fn test_empty_input_is_an_empty_report() {
        let report = engine(FactsAdapter::new())
            .run(&AnalysisInput::default(), &CancellationToken::new())
            .unwrap();
        assert_eq!(report.files_analyzed, 0);
        assert!(report.findings.is_empty());
    }
}
