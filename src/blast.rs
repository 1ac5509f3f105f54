//! Blast-radius analysis: bounded reverse reachability from changed symbols.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tracing::{debug, warn};

use crate::adapter::SyntaxAdapter;
use crate::facts::{BlastRadius, RawFunction, SymbolRef};

/// Decorators that make a function an entry point (request handlers,
/// listeners, schedulers).
pub const ENTRY_POINT_ANNOTATIONS: &[&str] = &[
    "GetMapping",
    "PostMapping",
    "PutMapping",
    "DeleteMapping",
    "PatchMapping",
    "RequestMapping",
    "MessageMapping",
    "GET",
    "POST",
    "PUT",
    "DELETE",
    "PATCH",
    "KafkaListener",
    "RabbitListener",
    "JmsListener",
    "SqsListener",
    "StreamListener",
    "NatsListener",
    "EventListener",
    "Scheduled",
    "GrpcMethod",
];

const MAX_SAMPLE_PATHS: usize = 3;

/// Qualified names of every entry-point function.
pub fn entry_points<'a, I>(functions: I, extra_annotations: &[String]) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a RawFunction>,
{
    functions
        .into_iter()
        .filter(|f| {
            f.name == "main"
                || f.decorators.iter().any(|d| {
                    ENTRY_POINT_ANNOTATIONS.contains(&d.name.as_str())
                        || extra_annotations.iter().any(|e| e == &d.name)
                })
        })
        .map(RawFunction::qualified_name)
        .collect()
}

/// Walks callers through the adapter's usage index.
pub struct BlastRadiusAnalyzer<'a> {
    adapter: &'a dyn SyntaxAdapter,
    entry_points: &'a BTreeSet<String>,
    max_depth: usize,
    callers: HashMap<String, BTreeSet<String>>,
}

impl<'a> BlastRadiusAnalyzer<'a> {
    pub fn new(
        adapter: &'a dyn SyntaxAdapter,
        entry_points: &'a BTreeSet<String>,
        max_depth: usize,
    ) -> Self {
        Self {
            adapter,
            entry_points,
            max_depth,
            callers: HashMap::new(),
        }
    }

    /// Distinct functions calling `symbol`, memoised.
    fn callers_of(&mut self, symbol: &str) -> BTreeSet<String> {
        if let Some(cached) = self.callers.get(symbol) {
            return cached.clone();
        }
        let callers: BTreeSet<String> = match self.adapter.find_usages(&SymbolRef::parse(symbol)) {
            Ok(usages) => usages
                .into_iter()
                .filter_map(|u| u.enclosing_function)
                .filter(|caller| caller != symbol)
                .collect(),
            Err(e) => {
                warn!(symbol, error = %e, "usage lookup failed");
                BTreeSet::new()
            }
        };
        self.callers.insert(symbol.to_string(), callers.clone());
        callers
    }

    /// Blast radius of one changed symbol.
    pub fn analyze(&mut self, symbol: &str) -> BlastRadius {
        let direct = self.callers_of(symbol);
        let mut parent: BTreeMap<String, String> = BTreeMap::new();
        let mut visited: BTreeSet<String> = BTreeSet::from([symbol.to_string()]);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(symbol.to_string(), 0)]);
        let mut reached_entries: BTreeSet<String> = BTreeSet::new();

        if self.entry_points.contains(symbol) {
            reached_entries.insert(symbol.to_string());
        }

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= self.max_depth {
                continue;
            }
            for caller in self.callers_of(&node) {
                if !visited.insert(caller.clone()) {
                    continue;
                }
                parent.insert(caller.clone(), node.clone());
                if self.entry_points.contains(&caller) {
                    reached_entries.insert(caller.clone());
                }
                queue.push_back((caller, depth + 1));
            }
        }

        let path_to = |start: &str| -> Vec<String> {
            let mut path = vec![start.to_string()];
            let mut current = start;
            while let Some(next) = parent.get(current) {
                path.push(next.clone());
                current = next;
            }
            path
        };

        let mut sample_paths: Vec<Vec<String>> = reached_entries
            .iter()
            .take(MAX_SAMPLE_PATHS)
            .map(|e| path_to(e.as_str()))
            .collect();
        for caller in &direct {
            if sample_paths.len() >= MAX_SAMPLE_PATHS {
                break;
            }
            if !reached_entries.contains(caller) {
                sample_paths.push(path_to(caller.as_str()));
            }
        }

        debug!(
            symbol,
            direct_callers = direct.len(),
            visited = visited.len(),
            entry_points = reached_entries.len(),
            "computed blast radius"
        );
        BlastRadius {
            direct_callers: direct.len(),
            reachable_entry_points: !reached_entries.is_empty(),
            sample_paths,
        }
    }

    /// Blast radius of every changed symbol, keyed by qualified name.
    pub fn analyze_all<'s, I>(&mut self, symbols: I) -> BTreeMap<String, BlastRadius>
    where
        I: IntoIterator<Item = &'s String>,
    {
        symbols
            .into_iter()
            .map(|s| (s.clone(), self.analyze(s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FactsAdapter, FactsFile};
    use crate::facts::{RawAnnotation, RawCallSite, Symbols};

    fn call(file: &str, line: usize, method: &str, owner: &str, enclosing: &str) -> RawCallSite {
        let mut c = RawCallSite::new(file, line, method);
        c.receiver_type = Some(owner.to_string());
        c.enclosing_function = Some(enclosing.to_string());
        c
    }

    fn function(owner: &str, name: &str, decorator: Option<&str>) -> RawFunction {
        RawFunction {
            name: name.to_string(),
            owner: Some(owner.to_string()),
            line: 1,
            end_line: 5,
            decorators: decorator
                .map(|d| {
                    vec![RawAnnotation {
                        name: d.to_string(),
                        arguments: vec![],
                    }]
                })
                .unwrap_or_default(),
            parameters: vec![],
            return_type: None,
            is_async: false,
            handle_uses: vec![],
        }
    }

    /// Controller.create -> Service.place -> Repo.save; Job.nightly -> Service.place
    fn adapter() -> FactsAdapter {
        FactsAdapter::new()
            .with_file(FactsFile {
                path: "Controller.java".to_string(),
                calls: vec![call("Controller.java", 12, "place", "Service", "Controller.create")],
                ..Default::default()
            })
            .with_file(FactsFile {
                path: "Service.java".to_string(),
                calls: vec![call("Service.java", 30, "save", "Repo", "Service.place")],
                ..Default::default()
            })
            .with_file(FactsFile {
                path: "Job.java".to_string(),
                calls: vec![call("Job.java", 8, "place", "Service", "Job.nightly")],
                ..Default::default()
            })
    }

    #[test]
    fn test_entry_points() {
        let functions = vec![
            function("Controller", "create", Some("PostMapping")),
            function("Service", "place", None),
            function("Job", "nightly", Some("Nightly")),
        ];
        let entries = entry_points(&functions, &["Nightly".to_string()]);
        assert!(entries.contains("Controller.create"));
        assert!(entries.contains("Job.nightly"));
        assert!(!entries.contains("Service.place"));
    }

    #[test]
    fn test_reaches_entry_point_within_depth() {
        let adapter = adapter();
        let entries = BTreeSet::from(["Controller.create".to_string()]);
        let mut analyzer = BlastRadiusAnalyzer::new(&adapter, &entries, 3);

        let radius = analyzer.analyze("Repo.save");
        assert_eq!(radius.direct_callers, 1);
        assert!(radius.reachable_entry_points);
        assert_eq!(
            radius.sample_paths[0],
            vec!["Controller.create", "Service.place", "Repo.save"]
        );
    }

    #[test]
    fn test_depth_bound() {
        let adapter = adapter();
        let entries = BTreeSet::from(["Controller.create".to_string()]);
        let mut analyzer = BlastRadiusAnalyzer::new(&adapter, &entries, 1);
        let radius = analyzer.analyze("Repo.save");
        assert!(!radius.reachable_entry_points);
        assert_eq!(radius.sample_paths, vec![vec!["Service.place", "Repo.save"]]);
    }

    #[test]
    fn test_direct_callers_are_distinct_functions() {
        let adapter = adapter();
        let entries = BTreeSet::new();
        let mut analyzer = BlastRadiusAnalyzer::new(&adapter, &entries, 3);
        let all = analyzer.analyze_all(&["Service.place".to_string()]);
        let radius = &all["Service.place"];
        assert_eq!(radius.direct_callers, 2);
        assert!(!radius.reachable_entry_points);
        assert_eq!(radius.sample_paths.len(), 2);
    }

    #[test]
    fn test_changed_entry_point_is_reachable() {
        let adapter = FactsAdapter::new().with_file(FactsFile {
            path: "X.java".to_string(),
            symbols: Symbols::default(),
            ..Default::default()
        });
        let entries = BTreeSet::from(["Controller.create".to_string()]);
        let mut analyzer = BlastRadiusAnalyzer::new(&adapter, &entries, 3);
        let radius = analyzer.analyze("Controller.create");
        assert!(radius.reachable_entry_points);
        assert_eq!(radius.direct_callers, 0);
    }
}
