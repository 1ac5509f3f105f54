//! Java syntax adapter using tree-sitter.
//!
//! Each file is parsed once and reduced to [`Symbols`] plus raw call sites;
//! the trees themselves are not kept.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use rayon::prelude::*;
use streaming_iterator::StreamingIterator;
use tracing::debug;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor};

use crate::classify::is_async_type;
use crate::error::AdapterError;
use crate::facts::{
    Location, RawAnnotation, RawArgument, RawCallSite, RawErrorGuard, RawFunction,
    RawHandleUse, RawInvocation, RawSymbol, RawSymbolKind, RawValue, ResultUsage, SymbolRef,
    Symbols,
};

use super::{usages_in, SyntaxAdapter};

/// Every invocation in a file; chain links are filtered afterwards.
const INVOCATION_QUERY: &str = r#"
(method_invocation
  name: (identifier) @name
) @call
"#;

const TYPE_DECLARATIONS: &[&str] = &[
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "record_declaration",
];

const CALLABLE_DECLARATIONS: &[&str] = &["method_declaration", "constructor_declaration"];

/// Methods whose lambda arguments run on another thread or scheduler.
const ASYNC_SPAWNERS: &[&str] = &[
    "supplyAsync",
    "runAsync",
    "whenComplete",
    "whenCompleteAsync",
    "handleAsync",
    "submit",
    "execute",
    "schedule",
    "doOnNext",
    "doOnSuccess",
    "flatMapMany",
    "publishOn",
    "subscribe",
];

#[derive(Debug, Default)]
struct JavaFile {
    symbols: Symbols,
    calls: Vec<RawCallSite>,
}

/// Extracts raw facts from Java sources under a root directory.
pub struct JavaAdapter {
    root: PathBuf,
    language: Language,
    invocations: Query,
    cache: RwLock<HashMap<String, Arc<JavaFile>>>,
    registered: RwLock<Vec<String>>,
}

impl JavaAdapter {
    /// Create an adapter for files relative to `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, AdapterError> {
        let language: Language = tree_sitter_java::LANGUAGE.into();
        let invocations = Query::new(&language, INVOCATION_QUERY)
            .map_err(|e| AdapterError::Unavailable(format!("java query: {}", e)))?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            language,
            invocations,
            cache: RwLock::new(HashMap::new()),
            registered: RwLock::new(Vec::new()),
        })
    }

    /// Extract and cache facts for in-memory source, bypassing the filesystem.
    pub fn add_source(&self, file: &str, source: &str) -> Result<(), AdapterError> {
        let extracted = Arc::new(self.extract(file, source.as_bytes())?);
        self.cache
            .write()
            .map_err(|_| AdapterError::Unavailable("fact cache poisoned".to_string()))?
            .insert(file.to_string(), extracted);
        Ok(())
    }

    fn cached(&self, file: &str) -> Result<Option<Arc<JavaFile>>, AdapterError> {
        let cache = self
            .cache
            .read()
            .map_err(|_| AdapterError::Unavailable("fact cache poisoned".to_string()))?;
        Ok(cache.get(file).cloned())
    }

    fn load(&self, file: &str) -> Result<Arc<JavaFile>, AdapterError> {
        if let Some(hit) = self.cached(file)? {
            return Ok(hit);
        }
        if !file.ends_with(".java") {
            return Err(AdapterError::Unsupported(file.to_string()));
        }

        let source = fs::read(self.root.join(file)).map_err(|source| AdapterError::Io {
            path: file.to_string(),
            source,
        })?;
        let extracted = Arc::new(self.extract(file, &source)?);
        self.cache
            .write()
            .map_err(|_| AdapterError::Unavailable("fact cache poisoned".to_string()))?
            .insert(file.to_string(), Arc::clone(&extracted));
        Ok(extracted)
    }

    fn extract(&self, file: &str, source: &[u8]) -> Result<JavaFile, AdapterError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .map_err(|e| AdapterError::Unavailable(format!("java grammar: {}", e)))?;
        let tree = parser.parse(source, None).ok_or_else(|| AdapterError::Parse {
            path: file.to_string(),
            message: "parser produced no tree".to_string(),
        })?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(AdapterError::Parse {
                path: file.to_string(),
                message: format!("syntax error near line {}", first_error_line(root)),
            });
        }

        let mut symbols = Symbols::default();
        collect_declarations(root, source, &mut Vec::new(), &mut symbols);
        let calls = self.collect_calls(file, root, source, &symbols);

        debug!(
            file,
            bindings = symbols.bindings.len(),
            functions = symbols.functions.len(),
            calls = calls.len(),
            "extracted java facts"
        );
        Ok(JavaFile { symbols, calls })
    }

    fn collect_calls(
        &self,
        file: &str,
        root: Node,
        source: &[u8],
        symbols: &Symbols,
    ) -> Vec<RawCallSite> {
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.invocations, root, source);

        let mut calls = Vec::new();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let name = self.invocations.capture_names()[capture.index as usize];
                if name != "call" || is_chain_link(capture.node) {
                    continue;
                }
                calls.push(call_site(file, capture.node, source, symbols));
            }
        }

        calls.sort_by_key(|c| (c.line, c.column));
        calls.dedup_by_key(|c| (c.line, c.column));
        calls
    }
}

impl SyntaxAdapter for JavaAdapter {
    fn adapter_id(&self) -> &'static str {
        "java"
    }

    fn register(&self, files: &[String]) -> Result<Vec<String>, AdapterError> {
        let mut accepted = Vec::new();
        for file in files {
            if !file.ends_with(".java") {
                continue;
            }
            if self.cached(file)?.is_some() || self.root.join(file).is_file() {
                accepted.push(file.clone());
            }
        }
        *self
            .registered
            .write()
            .map_err(|_| AdapterError::Unavailable("registry poisoned".to_string()))? =
            accepted.clone();
        Ok(accepted)
    }

    fn get_symbols(&self, file: &str) -> Result<Symbols, AdapterError> {
        Ok(self.load(file)?.symbols.clone())
    }

    fn get_calls(&self, file: &str) -> Result<Vec<RawCallSite>, AdapterError> {
        Ok(self.load(file)?.calls.clone())
    }

    fn find_usages(&self, symbol: &SymbolRef) -> Result<Vec<Location>, AdapterError> {
        let files = self
            .registered
            .read()
            .map_err(|_| AdapterError::Unavailable("registry poisoned".to_string()))?
            .clone();

        let loaded: Vec<Arc<JavaFile>> = files
            .par_iter()
            .filter_map(|f| match self.load(f) {
                Ok(facts) => Some(facts),
                Err(e) => {
                    debug!(file = %f, error = %e, "skipping file in usage search");
                    None
                }
            })
            .collect();

        Ok(usages_in(loaded.iter().flat_map(|f| f.calls.iter()), symbol))
    }
}

fn text<'s>(node: Node, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or("")
}

fn field_text<'s>(node: Node, field: &str, source: &'s [u8]) -> &'s str {
    node.child_by_field_name(field)
        .map(|n| text(n, source))
        .unwrap_or("")
}

fn line_of(node: Node) -> usize {
    node.start_position().row + 1
}

fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn descendants<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        out.push(n);
        let mut children = named_children(n);
        children.reverse();
        stack.extend(children);
    }
    out
}

fn first_error_line(root: Node) -> usize {
    descendants(root)
        .into_iter()
        .find(|n| n.is_error() || n.is_missing())
        .map(line_of)
        .unwrap_or(1)
}

fn simple_name(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_string()
}

fn strip_this(name: &str) -> &str {
    name.strip_prefix("this.").unwrap_or(name)
}

fn annotations_of(decl: Node, source: &[u8]) -> Vec<RawAnnotation> {
    named_children(decl)
        .into_iter()
        .filter(|n| n.kind() == "modifiers")
        .flat_map(named_children)
        .filter(|n| matches!(n.kind(), "annotation" | "marker_annotation"))
        .map(|n| parse_annotation(n, source))
        .collect()
}

fn has_modifier(decl: Node, modifier: &str, source: &[u8]) -> bool {
    named_children(decl)
        .into_iter()
        .filter(|n| n.kind() == "modifiers")
        .any(|m| {
            let mut cursor = m.walk();
            let found = m.children(&mut cursor).any(|c| text(c, source) == modifier);
            found
        })
}

fn parse_annotation(node: Node, source: &[u8]) -> RawAnnotation {
    let name = simple_name(field_text(node, "name", source));
    let mut arguments = Vec::new();
    if let Some(list) = node.child_by_field_name("arguments") {
        for child in named_children(list) {
            match child.kind() {
                "element_value_pair" => {
                    let key = field_text(child, "key", source);
                    if let Some(value) = child.child_by_field_name("value") {
                        arguments.push(RawArgument::named(key, value_of(value, source)));
                    }
                }
                "line_comment" | "block_comment" => {}
                _ => arguments.push(RawArgument::positional(value_of(child, source))),
            }
        }
    }
    RawAnnotation { name, arguments }
}

fn arguments_of(invocation: Node, source: &[u8]) -> Vec<RawArgument> {
    invocation
        .child_by_field_name("arguments")
        .map(|list| {
            named_children(list)
                .into_iter()
                .filter(|n| !n.kind().ends_with("comment"))
                .map(|n| RawArgument::positional(value_of(n, source)))
                .collect()
        })
        .unwrap_or_default()
}

/// Reduce an expression node to the value shapes the resolver understands.
fn value_of(node: Node, source: &[u8]) -> RawValue {
    match node.kind() {
        "decimal_integer_literal"
        | "hex_integer_literal"
        | "octal_integer_literal"
        | "binary_integer_literal"
        | "decimal_floating_point_literal"
        | "string_literal"
        | "character_literal"
        | "true"
        | "false"
        | "null_literal" => RawValue::literal(text(node, source)),
        "unary_expression" => {
            let t = text(node, source);
            if t.starts_with('-') && t[1..].trim().chars().all(|c| c.is_ascii_digit()) {
                RawValue::literal(t)
            } else {
                RawValue::Expression {
                    text: t.to_string(),
                }
            }
        }
        "identifier" | "field_access" | "scoped_identifier" => {
            RawValue::identifier(strip_this(text(node, source)))
        }
        "method_invocation" => RawValue::Call {
            receiver: node
                .child_by_field_name("object")
                .map(|o| text(o, source).to_string()),
            name: field_text(node, "name", source).to_string(),
            arguments: arguments_of(node, source),
        },
        "annotation" | "marker_annotation" => {
            let a = parse_annotation(node, source);
            RawValue::Call {
                receiver: None,
                name: a.name,
                arguments: a.arguments,
            }
        }
        "element_value_array_initializer" => match named_children(node).first() {
            Some(first) => value_of(*first, source),
            None => RawValue::Expression {
                text: text(node, source).to_string(),
            },
        },
        "parenthesized_expression" => match named_children(node).first() {
            Some(inner) => value_of(*inner, source),
            None => RawValue::Expression {
                text: text(node, source).to_string(),
            },
        },
        _ => RawValue::Expression {
            text: text(node, source).to_string(),
        },
    }
}

fn declarators<'t>(decl: Node<'t>) -> Vec<Node<'t>> {
    named_children(decl)
        .into_iter()
        .filter(|n| n.kind() == "variable_declarator")
        .collect()
}

fn collect_declarations(
    node: Node,
    source: &[u8],
    owners: &mut Vec<(String, bool)>,
    out: &mut Symbols,
) {
    let kind = node.kind();

    if TYPE_DECLARATIONS.contains(&kind) {
        owners.push((
            field_text(node, "name", source).to_string(),
            kind == "interface_declaration",
        ));
        for child in named_children(node) {
            collect_declarations(child, source, owners, out);
        }
        owners.pop();
        return;
    }

    match kind {
        "field_declaration" | "constant_declaration" => {
            let in_interface = owners.last().map(|(_, i)| *i).unwrap_or(false);
            let constant = in_interface
                || kind == "constant_declaration"
                || (has_modifier(node, "static", source) && has_modifier(node, "final", source));
            let declared_type = node
                .child_by_field_name("type")
                .map(|t| text(t, source).to_string());
            let annotations = annotations_of(node, source);

            for d in declarators(node) {
                out.bindings.push(RawSymbol {
                    name: field_text(d, "name", source).to_string(),
                    kind: if constant {
                        RawSymbolKind::Constant
                    } else {
                        RawSymbolKind::Field
                    },
                    line: line_of(d),
                    declared_type: declared_type.clone(),
                    value: d.child_by_field_name("value").map(|v| value_of(v, source)),
                    annotations: annotations.clone(),
                    scope: None,
                });
            }
        }
        k if CALLABLE_DECLARATIONS.contains(&k) => {
            collect_function(node, source, owners.last().map(|(o, _)| o.clone()), out);
        }
        _ => {
            for child in named_children(node) {
                collect_declarations(child, source, owners, out);
            }
        }
    }
}

fn collect_function(node: Node, source: &[u8], owner: Option<String>, out: &mut Symbols) {
    let name = field_text(node, "name", source).to_string();
    let qualified = match &owner {
        Some(o) => format!("{}.{}", o, name),
        None => name.clone(),
    };
    let decorators = annotations_of(node, source);
    let return_type = node
        .child_by_field_name("type")
        .map(|t| text(t, source).to_string());

    let mut parameters = Vec::new();
    if let Some(params) = node.child_by_field_name("parameters") {
        for p in named_children(params) {
            if !matches!(p.kind(), "formal_parameter" | "spread_parameter") {
                continue;
            }
            let pname = match p.child_by_field_name("name") {
                Some(n) => text(n, source).to_string(),
                None => match named_children(p)
                    .into_iter()
                    .find(|c| c.kind() == "variable_declarator")
                {
                    Some(d) => field_text(d, "name", source).to_string(),
                    None => continue,
                },
            };
            out.bindings.push(RawSymbol {
                name: pname.clone(),
                kind: RawSymbolKind::Parameter,
                line: line_of(p),
                declared_type: p
                    .child_by_field_name("type")
                    .map(|t| text(t, source).to_string()),
                value: None,
                annotations: annotations_of(p, source),
                scope: Some(qualified.clone()),
            });
            parameters.push(pname);
        }
    }

    let mut handle_uses = Vec::new();
    if let Some(body) = node.child_by_field_name("body") {
        for n in descendants(body) {
            match n.kind() {
                "local_variable_declaration" => {
                    let declared_type = n
                        .child_by_field_name("type")
                        .map(|t| text(t, source).to_string());
                    for d in declarators(n) {
                        let value = d.child_by_field_name("value").map(|v| value_of(v, source));
                        out.bindings.push(RawSymbol {
                            name: field_text(d, "name", source).to_string(),
                            kind: RawSymbolKind::Local,
                            line: line_of(d),
                            declared_type: local_type(declared_type.as_deref(), value.as_ref()),
                            value,
                            annotations: annotations_of(n, source),
                            scope: Some(qualified.clone()),
                        });
                    }
                }
                "method_invocation" => {
                    if let Some(obj) = n.child_by_field_name("object") {
                        if obj.kind() == "identifier" {
                            handle_uses.push(RawHandleUse {
                                identifier: text(obj, source).to_string(),
                                line: line_of(n),
                                via: Some(field_text(n, "name", source).to_string()),
                            });
                        }
                    }
                }
                "return_statement" | "argument_list" => {
                    for c in named_children(n) {
                        if c.kind() == "identifier" {
                            handle_uses.push(RawHandleUse {
                                identifier: text(c, source).to_string(),
                                line: line_of(c),
                                via: None,
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let is_async = return_type.as_deref().map(is_async_type).unwrap_or(false)
        || decorators.iter().any(|d| d.name == "Async");

    out.functions.push(RawFunction {
        name,
        owner,
        line: line_of(node),
        end_line: node.end_position().row + 1,
        decorators,
        parameters,
        return_type,
        is_async,
        handle_uses,
    });
}

/// `var x = new Foo()` declares a `Foo`.
fn local_type(declared: Option<&str>, value: Option<&RawValue>) -> Option<String> {
    match (declared, value) {
        (Some("var"), Some(RawValue::Expression { text })) => text
            .strip_prefix("new ")
            .and_then(|rest| rest.split(['(', '<']).next())
            .map(|t| t.trim().to_string()),
        (Some("var"), _) => None,
        (declared, _) => declared.map(str::to_string),
    }
}

fn is_chain_link(node: Node) -> bool {
    match node.parent() {
        Some(parent) if parent.kind() == "method_invocation" => {
            parent.child_by_field_name("object") == Some(node)
        }
        _ => false,
    }
}

fn enclosing<'t>(node: Node<'t>, kinds: &[&str], stop: &[&str]) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(n) = current {
        if kinds.contains(&n.kind()) {
            return Some(n);
        }
        if stop.contains(&n.kind()) {
            return None;
        }
        current = n.parent();
    }
    None
}

fn resolve_receiver_type(receiver: &str, scope: Option<&str>, symbols: &Symbols) -> Option<String> {
    let name = strip_this(receiver);
    if name.is_empty() || name.contains(['.', '(', '[']) {
        return None;
    }

    let scoped = scope.and_then(|s| {
        symbols
            .bindings
            .iter()
            .find(|b| b.name == name && b.scope.as_deref() == Some(s))
    });
    let file_level = || {
        symbols
            .bindings
            .iter()
            .find(|b| b.name == name && b.scope.is_none())
    };
    if let Some(binding) = scoped.or_else(file_level) {
        return binding.declared_type.clone();
    }

    // Static call on a type name.
    let starts_upper = name.chars().next().map(char::is_uppercase).unwrap_or(false);
    let screaming = name.chars().all(|c| c.is_uppercase() || c == '_' || c.is_ascii_digit());
    if starts_upper && !screaming {
        return Some(name.to_string());
    }
    None
}

fn usage_of(outer: Node, source: &[u8]) -> ResultUsage {
    let parent = match outer.parent() {
        Some(p) => p,
        None => return ResultUsage::Passed,
    };
    match parent.kind() {
        "expression_statement" => ResultUsage::Discarded,
        "variable_declarator" => ResultUsage::Bound(field_text(parent, "name", source).to_string()),
        "assignment_expression" if parent.child_by_field_name("right") == Some(outer) => {
            ResultUsage::Bound(strip_this(field_text(parent, "left", source)).to_string())
        }
        "return_statement" | "lambda_expression" => ResultUsage::Returned,
        _ => ResultUsage::Passed,
    }
}

fn spawns_async(invocation: Node, source: &[u8]) -> bool {
    let name = field_text(invocation, "name", source);
    name.starts_with("then") || ASYNC_SPAWNERS.contains(&name)
}

fn in_async_lambda(outer: Node, source: &[u8]) -> bool {
    let mut current = outer.parent();
    while let Some(n) = current {
        if CALLABLE_DECLARATIONS.contains(&n.kind()) {
            return false;
        }
        if n.kind() == "lambda_expression" {
            let spawner = n
                .parent()
                .filter(|p| p.kind() == "argument_list")
                .and_then(|p| p.parent())
                .filter(|g| g.kind() == "method_invocation");
            if let Some(inv) = spawner {
                if spawns_async(inv, source) {
                    return true;
                }
            }
        }
        current = n.parent();
    }
    false
}

const LOG_METHODS: &[&str] = &["printstacktrace", "error", "warn", "info", "debug", "trace"];

fn guard_of(outer: Node, source: &[u8]) -> Option<RawErrorGuard> {
    let mut child = outer;
    while let Some(parent) = child.parent() {
        match parent.kind() {
            "method_declaration" | "constructor_declaration" | "lambda_expression"
            | "class_body" => return None,
            "try_statement" | "try_with_resources_statement"
                if parent.child_by_field_name("body") == Some(child) =>
            {
                let catches: Vec<Node> = named_children(parent)
                    .into_iter()
                    .filter(|n| n.kind() == "catch_clause")
                    .collect();
                if !catches.is_empty() {
                    return Some(guard_from(&catches, source));
                }
            }
            _ => {}
        }
        child = parent;
    }
    None
}

fn guard_from(catches: &[Node], source: &[u8]) -> RawErrorGuard {
    let mut guard = RawErrorGuard {
        empty: true,
        ..Default::default()
    };

    for clause in catches {
        let body = match clause.child_by_field_name("body") {
            Some(b) => b,
            None => continue,
        };
        if named_children(body)
            .iter()
            .any(|n| !n.kind().ends_with("comment"))
        {
            guard.empty = false;
        }

        for n in descendants(body) {
            match n.kind() {
                "throw_statement" => guard.rethrows = true,
                "method_invocation" => {
                    let name = field_text(n, "name", source).to_lowercase();
                    let object = n
                        .child_by_field_name("object")
                        .map(|o| text(o, source).to_lowercase())
                        .unwrap_or_default();
                    if name == "printstacktrace"
                        || (object.contains("log") && LOG_METHODS.contains(&name.as_str()))
                    {
                        guard.logs = true;
                    }
                    let dead_letter = |s: &str| {
                        s.contains("deadletter") || s.contains("dlq") || s.contains("dlt")
                    };
                    if dead_letter(&name) || dead_letter(&object) {
                        guard.dead_letters = true;
                    }
                }
                _ => {}
            }
        }
    }
    guard
}

fn call_site(file: &str, outer: Node, source: &[u8], symbols: &Symbols) -> RawCallSite {
    // Unroll `a.b().c().d()` into root `a.b()` plus links [c, d].
    let mut links = Vec::new();
    let mut root = outer;
    while let Some(obj) = root.child_by_field_name("object") {
        if obj.kind() != "method_invocation" {
            break;
        }
        links.push(root);
        root = obj;
    }
    links.reverse();

    let method_name = field_text(root, "name", source);
    let position = root
        .child_by_field_name("name")
        .unwrap_or(root)
        .start_position();

    let function = enclosing(outer, CALLABLE_DECLARATIONS, &["class_body"]);
    let owner = enclosing(outer, TYPE_DECLARATIONS, &[])
        .map(|c| field_text(c, "name", source).to_string());
    let enclosing_function = function.map(|f| {
        let name = field_text(f, "name", source);
        match &owner {
            Some(o) => format!("{}.{}", o, name),
            None => name.to_string(),
        }
    });

    let receiver = root
        .child_by_field_name("object")
        .map(|o| text(o, source).to_string());
    let receiver_type = receiver
        .as_deref()
        .and_then(|r| resolve_receiver_type(r, enclosing_function.as_deref(), symbols));

    let mut decorators = function
        .map(|f| annotations_of(f, source))
        .unwrap_or_default();
    if let Some(class) = enclosing(outer, TYPE_DECLARATIONS, &[]) {
        decorators.extend(annotations_of(class, source));
    }

    let function_is_async = function
        .and_then(|f| f.child_by_field_name("type"))
        .map(|t| is_async_type(text(t, source)))
        .unwrap_or(false);

    let mut call = RawCallSite::new(file, position.row + 1, method_name);
    call.column = position.column;
    call.receiver = receiver;
    call.receiver_type = receiver_type;
    call.arguments = arguments_of(root, source);
    call.enclosing_function = enclosing_function;
    call.result_usage = usage_of(outer, source);
    call.chained = links
        .iter()
        .map(|l| RawInvocation {
            name: field_text(*l, "name", source).to_string(),
            arguments: arguments_of(*l, source),
        })
        .collect();
    call.in_async_context = function_is_async || in_async_lambda(outer, source);
    call.decorators = decorators;
    call.error_guard = guard_of(outer, source);
    call
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_SERVICE: &str = r#"
package com.example.orders;

@Service
public class OrderService {
    private static final int TIMEOUT_MS = 5000;
    private final RestTemplate restTemplate;
    private final KafkaTemplate<String, Order> kafkaTemplate;
    private final WebClient webClient;

    @Value("${payments.timeout}")
    private long paymentTimeout;

    public Order fetch(String id) {
        return restTemplate.getForObject("http://inventory/items/" + id, Order.class);
    }

    public void publish(Order order) {
        kafkaTemplate.send("orders", order);
    }

    public void notifyCustomer(Order order) {
        CompletableFuture<Void> f = CompletableFuture.runAsync(() -> restTemplate.postForObject("http://mail/send", order, Void.class));
        f.join();
    }

    public void audit(Order order) {
        try {
            restTemplate.postForObject("http://audit/", order, Void.class);
        } catch (Exception e) {
        }
    }

    public String price(String sku) {
        return webClient.get().uri("/prices/" + sku).retrieve().bodyToMono(String.class).block();
    }

    @KafkaListener(topics = "orders", groupId = "billing")
    public void onOrder(Order order) {
        log.info("got {}", order);
    }
}
"#;

    fn adapter() -> JavaAdapter {
        let adapter = JavaAdapter::new(".").unwrap();
        adapter.add_source("OrderService.java", ORDER_SERVICE).unwrap();
        adapter
            .register(&["OrderService.java".to_string()])
            .unwrap();
        adapter
    }

    fn call<'a>(calls: &'a [RawCallSite], method: &str) -> &'a RawCallSite {
        calls
            .iter()
            .find(|c| c.method_name == method)
            .unwrap_or_else(|| panic!("no call to {}", method))
    }

    #[test]
    fn test_field_bindings() {
        let symbols = adapter().get_symbols("OrderService.java").unwrap();

        let timeout = symbols
            .bindings
            .iter()
            .find(|b| b.name == "TIMEOUT_MS")
            .unwrap();
        assert_eq!(timeout.kind, RawSymbolKind::Constant);
        assert_eq!(timeout.value, Some(RawValue::literal("5000")));

        let rest = symbols
            .bindings
            .iter()
            .find(|b| b.name == "restTemplate")
            .unwrap();
        assert_eq!(rest.kind, RawSymbolKind::Field);
        assert_eq!(rest.declared_type.as_deref(), Some("RestTemplate"));

        let injected = symbols
            .bindings
            .iter()
            .find(|b| b.name == "paymentTimeout")
            .unwrap();
        assert_eq!(injected.annotations[0].name, "Value");
        assert_eq!(
            injected.annotations[0]
                .value_argument()
                .and_then(|v| v.string_value()),
            Some("${payments.timeout}")
        );
    }

    #[test]
    fn test_call_receiver_and_usage() {
        let calls = adapter().get_calls("OrderService.java").unwrap();

        let get = call(&calls, "getForObject");
        assert_eq!(get.receiver.as_deref(), Some("restTemplate"));
        assert_eq!(get.receiver_type.as_deref(), Some("RestTemplate"));
        assert_eq!(get.result_usage, ResultUsage::Returned);
        assert_eq!(get.enclosing_function.as_deref(), Some("OrderService.fetch"));
        assert!(get.decorators.iter().any(|d| d.name == "Service"));
        assert!(get.error_guard.is_none());

        let send = call(&calls, "send");
        assert_eq!(send.result_usage, ResultUsage::Discarded);
        assert_eq!(
            send.receiver_type.as_deref(),
            Some("KafkaTemplate<String, Order>")
        );
    }

    #[test]
    fn test_async_lambda_context() {
        let calls = adapter().get_calls("OrderService.java").unwrap();

        let spawn = call(&calls, "runAsync");
        assert_eq!(spawn.result_usage, ResultUsage::Bound("f".to_string()));
        assert_eq!(spawn.receiver_type.as_deref(), Some("CompletableFuture"));

        let inner = calls
            .iter()
            .find(|c| {
                c.method_name == "postForObject"
                    && c.enclosing_function.as_deref() == Some("OrderService.notifyCustomer")
            })
            .unwrap();
        assert!(inner.in_async_context);
        assert_eq!(inner.result_usage, ResultUsage::Returned);
    }

    #[test]
    fn test_empty_catch_guard() {
        let calls = adapter().get_calls("OrderService.java").unwrap();
        let audited = calls
            .iter()
            .find(|c| c.enclosing_function.as_deref() == Some("OrderService.audit"))
            .unwrap();
        let guard = audited.error_guard.as_ref().unwrap();
        assert!(guard.empty);
        assert!(!guard.rethrows);
        assert!(!guard.logs);
    }

    #[test]
    fn test_fluent_chain_unrolled() {
        let calls = adapter().get_calls("OrderService.java").unwrap();
        let get = call(&calls, "get");
        assert_eq!(get.receiver_type.as_deref(), Some("WebClient"));
        let links: Vec<&str> = get.chained.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(links, vec!["uri", "retrieve", "bodyToMono", "block"]);
        assert!(!calls.iter().any(|c| c.method_name == "retrieve"));
    }

    #[test]
    fn test_functions_and_handle_uses() {
        let symbols = adapter().get_symbols("OrderService.java").unwrap();

        let listener = symbols
            .functions
            .iter()
            .find(|f| f.name == "onOrder")
            .unwrap();
        assert_eq!(listener.owner.as_deref(), Some("OrderService"));
        let topics = listener.decorators[0].argument("topics").unwrap();
        assert_eq!(topics.string_value(), Some("orders"));

        let notify = symbols
            .functions
            .iter()
            .find(|f| f.name == "notifyCustomer")
            .unwrap();
        assert!(notify
            .handle_uses
            .iter()
            .any(|u| u.identifier == "f" && u.via.as_deref() == Some("join")));
    }

    #[test]
    fn test_find_usages_across_files() {
        let adapter = JavaAdapter::new(".").unwrap();
        adapter.add_source("OrderService.java", ORDER_SERVICE).unwrap();
        adapter
            .add_source(
                "OrderController.java",
                r#"
@RestController
public class OrderController {
    private final OrderService orderService;

    @GetMapping("/orders/{id}")
    public Order get(String id) {
        return orderService.fetch(id);
    }
}
"#,
            )
            .unwrap();
        adapter
            .register(&[
                "OrderController.java".to_string(),
                "OrderService.java".to_string(),
            ])
            .unwrap();

        let usages = adapter
            .find_usages(&SymbolRef::parse("OrderService.fetch"))
            .unwrap();
        assert_eq!(usages.len(), 1);
        assert_eq!(
            usages[0].enclosing_function.as_deref(),
            Some("OrderController.get")
        );
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let adapter = JavaAdapter::new(".").unwrap();
        let result = adapter.add_source("Broken.java", "public class Broken { void x( { }");
        assert!(matches!(result, Err(AdapterError::Parse { .. })));
    }

    #[test]
    fn test_register_skips_non_java() {
        let adapter = JavaAdapter::new(".").unwrap();
        adapter.add_source("A.java", "class A {}").unwrap();
        let registered = adapter
            .register(&["A.java".to_string(), "notes.txt".to_string()])
            .unwrap();
        assert_eq!(registered, vec!["A.java".to_string()]);
    }
}
