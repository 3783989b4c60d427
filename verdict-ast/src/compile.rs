//! Whole-set module compiler.
//!
//! Every policy mutation recompiles the complete module set: cross-module
//! references mean a single-module change can invalidate an unrelated
//! module, and validating the whole set before commit is what keeps the
//! stored set always-compilable.

use std::collections::BTreeMap;

use crate::error::{AstError, AstErrors};
use crate::module::{Body, ExprKind, Module, Rule, RuleKind};
use crate::ruleindex::{NodeId, RuleIndex, RuleRef};
use crate::term::{Ref, Term, Value, DATA_ROOT, REQUEST_ROOT};

/// An immutable compiled snapshot: the module set plus the
/// virtual-document index.
#[derive(Debug)]
pub struct Compiler {
    modules: BTreeMap<String, Module>,
    index: RuleIndex,
}

impl Compiler {
    /// Compile a module set from scratch. On failure the snapshot is not
    /// produced and the error carries every detected problem.
    pub fn compile(modules: BTreeMap<String, Module>) -> Result<Compiler, AstErrors> {
        let mut errors = Vec::new();
        let mut index = RuleIndex::new();

        for (id, module) in &modules {
            let Some(pkg_keys) = package_keys(module) else {
                errors.push(AstError::new(
                    "package path must be a dotted identifier sequence",
                    module.package.location,
                ));
                continue;
            };
            for (i, rule) in module.rules.iter().enumerate() {
                let mut path: Vec<String> = pkg_keys.iter().map(|s| s.to_string()).collect();
                path.push(rule.name.clone());
                index.insert(
                    &path,
                    RuleRef {
                        module: id.clone(),
                        index: i,
                    },
                );
                check_rule_safety(rule, &mut errors);
            }
        }

        let compiler = Compiler { modules, index };
        compiler.check_rule_conflicts(&mut errors);
        compiler.check_recursion(&mut errors);

        if errors.is_empty() {
            Ok(compiler)
        } else {
            Err(AstErrors(errors))
        }
    }

    /// An empty snapshot (no modules).
    pub fn empty() -> Compiler {
        Compiler {
            modules: BTreeMap::new(),
            index: RuleIndex::new(),
        }
    }

    pub fn modules(&self) -> &BTreeMap<String, Module> {
        &self.modules
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn index(&self) -> &RuleIndex {
        &self.index
    }

    /// Resolve a rule pointer from the index back to its definition.
    pub fn rule(&self, rref: &RuleRef) -> &Rule {
        &self.modules[&rref.module].rules[rref.index]
    }

    /// True iff any rule computes a document at or under the given
    /// `data`-rooted reference, or the reference passes through one.
    pub fn has_virtual_document(&self, r: &Ref) -> bool {
        debug_assert_eq!(r.head_var(), Some(DATA_ROOT));
        let keys = leading_string_keys(r);
        self.index.intersects(&keys)
    }

    /// Validate an ad-hoc query body against this snapshot. Variables that
    /// appear only inside negated expressions can never be bound, so the
    /// query is rejected as unsafe.
    pub fn compile_query(&self, body: &Body) -> Result<Body, AstErrors> {
        let mut positive = Vec::new();
        for expr in &body.0 {
            if !expr.negated {
                expr.walk_vars(&mut |v| {
                    positive.push(v.to_string());
                    true
                });
            }
        }
        let mut errors = Vec::new();
        for expr in &body.0 {
            if !expr.negated {
                continue;
            }
            expr.walk_vars(&mut |v| {
                if v != DATA_ROOT
                    && v != REQUEST_ROOT
                    && !v.starts_with('$')
                    && !positive.iter().any(|p| p == v)
                {
                    errors.push(AstError::new(
                        format!("unsafe variable {} in negated expression", v),
                        expr.location,
                    ));
                }
                true
            });
        }
        if errors.is_empty() {
            Ok(body.clone())
        } else {
            Err(AstErrors(errors))
        }
    }

    fn check_rule_conflicts(&self, errors: &mut Vec<AstError>) {
        for node in self.index.rule_nodes() {
            let rules = self.index.rules(node);

            // All definitions at one path must agree on kind.
            let kinds: Vec<RuleKind> =
                rules.iter().map(|r| self.rule(r).kind()).collect();
            if kinds.windows(2).any(|w| w[0] != w[1]) {
                let rule = self.rule(&rules[0]);
                errors.push(AstError::new(
                    format!(
                        "conflicting rule kinds for data.{}",
                        self.index.path_of(node).join(".")
                    ),
                    rule.location,
                ));
            }

            // A rule must not sit above another rule's document.
            let mut stack: Vec<NodeId> = self.index.children(node).map(|(_, id)| id).collect();
            while let Some(child) = stack.pop() {
                if !self.index.rules(child).is_empty() {
                    let rule = self.rule(&rules[0]);
                    errors.push(AstError::new(
                        format!(
                            "rule data.{} conflicts with rule data.{}",
                            self.index.path_of(node).join("."),
                            self.index.path_of(child).join(".")
                        ),
                        rule.location,
                    ));
                    break;
                }
                stack.extend(self.index.children(child).map(|(_, id)| id));
            }
        }
    }

    fn check_recursion(&self, errors: &mut Vec<AstError>) {
        let nodes = self.index.rule_nodes();
        let mut adjacency: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for &node in &nodes {
            let mut deps = Vec::new();
            for rref in self.index.rules(node) {
                let rule = self.rule(rref);
                for ref_keys in rule_data_refs(rule) {
                    let keys: Vec<&str> = ref_keys.iter().map(|s| s.as_str()).collect();
                    deps.extend(self.index.comparable_rule_nodes(&keys));
                }
            }
            deps.sort_unstable();
            deps.dedup();
            adjacency.insert(node, deps);
        }

        // Depth-first cycle detection over the rule dependency graph.
        let mut state: BTreeMap<NodeId, u8> = BTreeMap::new(); // 1 = visiting, 2 = done
        for &start in &nodes {
            if state.get(&start).copied().unwrap_or(0) != 0 {
                continue;
            }
            let mut stack = vec![(start, 0usize)];
            state.insert(start, 1);
            while let Some(&(node, next)) = stack.last() {
                let deps = &adjacency[&node];
                if next >= deps.len() {
                    state.insert(node, 2);
                    stack.pop();
                    continue;
                }
                stack.last_mut().unwrap().1 += 1;
                let dep = deps[next];
                match state.get(&dep).copied().unwrap_or(0) {
                    0 => {
                        state.insert(dep, 1);
                        stack.push((dep, 0));
                    }
                    1 => {
                        let rule = self.rule(&self.index.rules(dep)[0]);
                        errors.push(AstError::new(
                            format!(
                                "rule data.{} is recursive",
                                self.index.path_of(dep).join(".")
                            ),
                            rule.location,
                        ));
                        state.insert(dep, 2);
                    }
                    _ => {}
                }
            }
        }
    }
}

fn package_keys(module: &Module) -> Option<Vec<&str>> {
    if module.package.path.head_var() != Some(DATA_ROOT) {
        return None;
    }
    module.package.path.string_keys()
}

/// The leading string keys of a `data` ref, stopping at the first
/// non-string element.
fn leading_string_keys(r: &Ref) -> Vec<&str> {
    let mut keys = Vec::new();
    for t in r.tail() {
        match &t.value {
            Value::String(s) => keys.push(s.as_str()),
            _ => break,
        }
    }
    keys
}

/// Collect the `data`-rooted reference prefixes mentioned anywhere in a
/// rule (body, key, and value terms).
fn rule_data_refs(rule: &Rule) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    let mut visit = |t: &Term| collect_data_refs(&t.value, &mut out);
    if let Some(key) = &rule.key {
        visit(key);
    }
    if let Some(value) = &rule.value {
        visit(value);
    }
    for expr in &rule.body.0 {
        match &expr.kind {
            ExprKind::Term(t) => visit(t),
            ExprKind::Infix { lhs, rhs, .. } => {
                visit(lhs);
                visit(rhs);
            }
        }
    }
    out
}

fn collect_data_refs(value: &Value, out: &mut Vec<Vec<String>>) {
    match value {
        Value::Ref(r) => {
            if r.head_var() == Some(DATA_ROOT) {
                out.push(
                    leading_string_keys(r)
                        .into_iter()
                        .map(|s| s.to_string())
                        .collect(),
                );
            }
            for t in r.tail() {
                collect_data_refs(&t.value, out);
            }
        }
        Value::Array(items) | Value::Set(items) => {
            for t in items {
                collect_data_refs(&t.value, out);
            }
        }
        Value::Object(pairs) => {
            for (k, v) in pairs {
                collect_data_refs(&k.value, out);
                collect_data_refs(&v.value, out);
            }
        }
        _ => {}
    }
}

/// Variables used in a rule's key or value must be bindable by the body.
fn check_rule_safety(rule: &Rule, errors: &mut Vec<AstError>) {
    let mut body_vars = Vec::new();
    for expr in &rule.body.0 {
        if !expr.negated {
            expr.walk_vars(&mut |v| {
                body_vars.push(v.to_string());
                true
            });
        }
    }
    let mut check = |term: &Term| {
        term.value.walk_vars(&mut |v| {
            if v != DATA_ROOT
                && v != REQUEST_ROOT
                && !v.starts_with('$')
                && !body_vars.iter().any(|b| b == v)
            {
                errors.push(AstError::new(
                    format!("unsafe variable {} in rule {}", v, rule.name),
                    rule.location,
                ));
            }
            true
        });
    };
    if let Some(key) = &rule.key {
        check(key);
    }
    if let Some(value) = &rule.value {
        check(value);
    }
}
