//! Top-down evaluation over the document tree.
//!
//! Reference resolution overlays virtual documents (computed from the rule
//! index) onto base-store reads. Evaluation is synchronous and recursive:
//! each satisfying solution is signalled through a continuation, and the
//! public entry points drain every solution into a result set.
//!
//! Rule-local variables are renamed per invocation (`x` becomes `x@3`) so
//! a single global environment can carry both rule locals and the free
//! variables of a non-ground request document; the suffix is stripped
//! again wherever values become visible (traces, results).

use std::collections::{BTreeMap, HashMap};

use serde_json::{Number, Value as JsonValue};

use verdict_ast::ruleindex::{NodeId, RuleIndex};
use verdict_ast::{
    BinOp, Body, Compiler, Expr, ExprKind, Location, Ref, Rule, RuleKind, Term, Value, DATA_ROOT,
    REQUEST_ROOT,
};
use verdict_store::{Path, Transaction};

use crate::error::{EvalError, Result};
use crate::request::free_vars;
use crate::trace::{BufferTracer, TraceEvent, TraceNode, TraceOp};

/// Inputs for one data-path evaluation.
pub struct QueryParams<'a> {
    pub compiler: &'a Compiler,
    pub txn: &'a Transaction,
    pub request: Option<Value>,
    /// A `data`-rooted reference.
    pub path: Ref,
}

/// One satisfying solution: the computed value plus the bindings of the
/// request's free variables for this solution.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub result: JsonValue,
    pub bindings: BTreeMap<String, JsonValue>,
}

/// Evaluate a data path under a request document. An empty result set
/// means the document is undefined.
pub fn eval_path<'a>(
    params: &'a QueryParams<'a>,
    tracer: Option<&'a mut BufferTracer>,
) -> Result<Vec<QueryResult>> {
    let free = params
        .request
        .as_ref()
        .map(|r| free_vars(r))
        .unwrap_or_default();
    let mut ev = Evaluator::new(params.compiler, params.txn, params.request.as_ref(), tracer);
    ev.free_vars = free.clone();

    // The implicit query `path = $result`.
    let result_var = "$result";
    let body = Body(vec![Expr {
        kind: ExprKind::Infix {
            op: BinOp::Eq,
            lhs: Term::new(Value::Ref(params.path.clone())),
            rhs: Term::var(result_var),
        },
        negated: false,
        location: Location::default(),
    }]);

    let mut results: Vec<QueryResult> = Vec::new();
    let mut env = Env::default();
    ev.eval_body(&body, &mut env, &mut |_, env| {
        let value = plug(env.get(result_var).cloned().unwrap_or(Value::Null), env);
        let json = value
            .to_json()
            .ok_or_else(|| EvalError::NonGround(value.to_string()))?;
        let mut bindings = BTreeMap::new();
        for name in &free {
            if let Some(v) = env.get(name) {
                let v = plug(v.clone(), env);
                if let Some(j) = v.to_json() {
                    bindings.insert(name.clone(), j);
                }
            }
        }
        let qr = QueryResult {
            result: json,
            bindings,
        };
        if !results.contains(&qr) {
            results.push(qr);
        }
        Ok(())
    })?;
    Ok(results)
}

/// Evaluate an ad-hoc query body. Each solution is the map of its bound,
/// non-wildcard variables; solutions binding nothing are dropped.
pub fn eval_query<'a>(
    compiler: &'a Compiler,
    txn: &'a Transaction,
    body: &Body,
    tracer: Option<&'a mut BufferTracer>,
) -> Result<Vec<BTreeMap<String, JsonValue>>> {
    let mut vars: Vec<String> = Vec::new();
    body.walk_vars(&mut |name| {
        if name != DATA_ROOT
            && name != REQUEST_ROOT
            && !name.starts_with('$')
            && !vars.iter().any(|v| v == name)
        {
            vars.push(name.to_string());
        }
        true
    });

    let mut ev = Evaluator::new(compiler, txn, None, tracer);
    let mut results = Vec::new();
    let mut env = Env::default();
    ev.eval_body(body, &mut env, &mut |_, env| {
        let mut solution = BTreeMap::new();
        for name in &vars {
            if let Some(v) = env.get(name) {
                let v = plug(v.clone(), env);
                if let Some(j) = v.to_json() {
                    solution.insert(name.clone(), j);
                }
            }
        }
        if !solution.is_empty() {
            results.push(solution);
        }
        Ok(())
    })?;
    Ok(results)
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// The global binding environment, shared across the whole evaluation.
#[derive(Debug, Default)]
pub(crate) struct Env {
    vars: HashMap<String, Value>,
}

impl Env {
    fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Follow variable chains until an unbound variable or a non-variable
    /// value.
    fn resolve<'v>(&'v self, mut v: &'v Value) -> &'v Value {
        while let Value::Var(name) = v {
            match self.vars.get(name) {
                Some(bound) => v = bound,
                None => break,
            }
        }
        v
    }

    fn bind(&mut self, name: String, value: Value) {
        self.vars.insert(name, value);
    }

    fn unbind(&mut self, name: &str) {
        self.vars.remove(name);
    }
}

/// Substitute bound variables throughout a value.
fn plug(v: Value, env: &Env) -> Value {
    match v {
        Value::Var(_) => {
            let resolved = env.resolve(&v).clone();
            if matches!(resolved, Value::Var(_)) {
                resolved
            } else {
                plug(resolved, env)
            }
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|t| Term::new(plug(t.value, env))).collect())
        }
        Value::Set(items) => {
            Value::Set(items.into_iter().map(|t| Term::new(plug(t.value, env))).collect())
        }
        Value::Object(pairs) => Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (Term::new(plug(k.value, env)), Term::new(plug(v.value, env))))
                .collect(),
        ),
        Value::Ref(r) => Value::Ref(Ref(r
            .0
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                // The head names a root document, not a bindable variable.
                if i == 0 {
                    t
                } else {
                    Term::new(plug(t.value, env))
                }
            })
            .collect())),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Variable renaming
// ---------------------------------------------------------------------------

fn map_value(v: &Value, f: &dyn Fn(&str) -> String) -> Value {
    match v {
        Value::Var(name) => Value::Var(f(name)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|t| Term::new(map_value(&t.value, f))).collect())
        }
        Value::Set(items) => {
            Value::Set(items.iter().map(|t| Term::new(map_value(&t.value, f))).collect())
        }
        Value::Object(pairs) => Value::Object(
            pairs
                .iter()
                .map(|(k, v)| {
                    (
                        Term::new(map_value(&k.value, f)),
                        Term::new(map_value(&v.value, f)),
                    )
                })
                .collect(),
        ),
        Value::Ref(r) => Value::Ref(Ref(r
            .0
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if i == 0 {
                    t.clone()
                } else {
                    Term::new(map_value(&t.value, f))
                }
            })
            .collect())),
        other => other.clone(),
    }
}

fn map_expr(e: &Expr, f: &dyn Fn(&str) -> String) -> Expr {
    let kind = match &e.kind {
        ExprKind::Term(t) => ExprKind::Term(Term::new(map_value(&t.value, f))),
        ExprKind::Infix { op, lhs, rhs } => ExprKind::Infix {
            op: *op,
            lhs: Term::new(map_value(&lhs.value, f)),
            rhs: Term::new(map_value(&rhs.value, f)),
        },
    };
    Expr {
        kind,
        negated: e.negated,
        location: e.location,
    }
}

fn map_body(b: &Body, f: &dyn Fn(&str) -> String) -> Body {
    Body(b.0.iter().map(|e| map_expr(e, f)).collect())
}

fn map_rule(r: &Rule, f: &dyn Fn(&str) -> String) -> Rule {
    Rule {
        name: r.name.clone(),
        key: r.key.as_ref().map(|t| Term::new(map_value(&t.value, f))),
        value: r.value.as_ref().map(|t| Term::new(map_value(&t.value, f))),
        body: map_body(&r.body, f),
        location: r.location,
    }
}

fn rename_for(invocation: u64) -> impl Fn(&str) -> String {
    move |name: &str| {
        if name == DATA_ROOT || name == REQUEST_ROOT {
            name.to_string()
        } else {
            format!("{}@{}", name, invocation)
        }
    }
}

fn strip_suffix(name: &str) -> String {
    name.split('@').next().unwrap_or(name).to_string()
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

struct Evaluator<'a> {
    compiler: &'a Compiler,
    txn: &'a Transaction,
    request: Option<&'a Value>,
    tracer: Option<&'a mut BufferTracer>,
    free_vars: Vec<String>,
    next_qid: u64,
    cur_qid: u64,
    invocation: u64,
}

type Cont<'k, 'a> = &'k mut dyn FnMut(&mut Evaluator<'a>, &mut Env) -> Result<()>;
type ValCont<'k, 'a> = &'k mut dyn FnMut(&mut Evaluator<'a>, &mut Env, Value) -> Result<()>;
type DocCont<'k, 'a> = &'k mut dyn FnMut(&mut Evaluator<'a>, &mut Env, Option<Value>) -> Result<()>;

/// One collected rule-body solution.
struct RuleSolution {
    snapshot: Vec<(String, Value)>,
    key: Option<Value>,
    value: Value,
}

impl<'a> Evaluator<'a> {
    fn new(
        compiler: &'a Compiler,
        txn: &'a Transaction,
        request: Option<&'a Value>,
        tracer: Option<&'a mut BufferTracer>,
    ) -> Self {
        Evaluator {
            compiler,
            txn,
            request,
            tracer,
            free_vars: Vec::new(),
            next_qid: 0,
            cur_qid: 0,
            invocation: 0,
        }
    }

    fn fresh_qid(&mut self) -> u64 {
        let q = self.next_qid;
        self.next_qid += 1;
        q
    }

    fn fresh_invocation(&mut self) -> u64 {
        self.invocation += 1;
        self.invocation
    }

    fn trace_node(&mut self, op: TraceOp, qid: u64, parent: u64, node: &TraceNode, env: &Env) {
        if self.tracer.is_none() {
            return;
        }
        let mut names: Vec<String> = Vec::new();
        let mut collect = |name: &str| {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
            true
        };
        match node {
            TraceNode::Rule(r) => {
                if let Some(k) = &r.key {
                    k.value.walk_vars(&mut collect);
                }
                if let Some(v) = &r.value {
                    v.value.walk_vars(&mut collect);
                }
                r.body.walk_vars(&mut collect);
            }
            TraceNode::Body(b) => {
                b.walk_vars(&mut collect);
            }
            TraceNode::Expr(e) => {
                e.walk_vars(&mut collect);
            }
        }

        let strip = |name: &str| strip_suffix(name);
        let mut locals: Vec<(Term, Term)> = Vec::new();
        for name in names {
            if name.starts_with('$') || name == DATA_ROOT || name == REQUEST_ROOT {
                continue;
            }
            if let Some(v) = env.get(&name) {
                let v = plug(v.clone(), env);
                let display = strip_suffix(&name);
                if locals
                    .iter()
                    .any(|(k, _)| matches!(&k.value, Value::Var(n) if *n == display))
                {
                    continue;
                }
                locals.push((Term::var(display), Term::new(map_value(&v, &strip))));
            }
        }

        let node = match node {
            TraceNode::Rule(r) => TraceNode::Rule(map_rule(r, &strip)),
            TraceNode::Body(b) => TraceNode::Body(map_body(b, &strip)),
            TraceNode::Expr(e) => TraceNode::Expr(map_expr(e, &strip)),
        };

        if let Some(tracer) = self.tracer.as_mut() {
            tracer.record(TraceEvent {
                op,
                query_id: qid,
                parent_id: parent,
                node,
                locals,
            });
        }
    }

    // -- query evaluation ---------------------------------------------------

    fn eval_body(&mut self, body: &Body, env: &mut Env, k: Cont<'_, 'a>) -> Result<()> {
        let qid = self.fresh_qid();
        self.eval_body_with_qid(body, qid, env, k)
    }

    fn eval_body_with_qid(
        &mut self,
        body: &Body,
        qid: u64,
        env: &mut Env,
        k: Cont<'_, 'a>,
    ) -> Result<()> {
        let parent = self.cur_qid;
        self.trace_node(TraceOp::Enter, qid, parent, &TraceNode::Body(body.clone()), env);
        let saved = self.cur_qid;
        self.cur_qid = qid;
        let result = self.eval_exprs(body, 0, qid, parent, env, &mut |ev, env| {
            ev.trace_node(TraceOp::Exit, qid, parent, &TraceNode::Body(body.clone()), env);
            k(ev, env)
        });
        self.cur_qid = saved;
        result
    }

    fn eval_exprs(
        &mut self,
        body: &Body,
        i: usize,
        qid: u64,
        parent: u64,
        env: &mut Env,
        k: Cont<'_, 'a>,
    ) -> Result<()> {
        if i == body.0.len() {
            return k(self, env);
        }
        let expr = body.0[i].clone();
        self.trace_node(TraceOp::Eval, qid, parent, &TraceNode::Expr(expr.clone()), env);

        if expr.negated {
            let mut found = false;
            self.eval_expr_kind(&expr, env, &mut |_, _| {
                found = true;
                Ok(())
            })?;
            if found {
                self.trace_node(TraceOp::Fail, qid, parent, &TraceNode::Expr(expr.clone()), env);
                Ok(())
            } else {
                self.eval_exprs(body, i + 1, qid, parent, env, k)
            }
        } else {
            let mut count = 0u64;
            self.eval_expr_kind(&expr, env, &mut |ev, env| {
                if count > 0 {
                    ev.trace_node(TraceOp::Redo, qid, parent, &TraceNode::Expr(expr.clone()), env);
                }
                count += 1;
                ev.eval_exprs(body, i + 1, qid, parent, env, &mut *k)
            })?;
            if count == 0 {
                self.trace_node(TraceOp::Fail, qid, parent, &TraceNode::Expr(expr.clone()), env);
            }
            Ok(())
        }
    }

    fn eval_expr_kind(&mut self, expr: &Expr, env: &mut Env, k: Cont<'_, 'a>) -> Result<()> {
        match &expr.kind {
            ExprKind::Term(t) => {
                let v = plug(t.value.clone(), env);
                match v {
                    Value::Ref(r) => self.resolve_ref(&r, env, &mut |ev, env, val| {
                        if val.equal(&Value::Boolean(false)) {
                            Ok(())
                        } else {
                            k(ev, env)
                        }
                    }),
                    Value::Var(name) => Err(EvalError::NonGround(format!(
                        "unbound variable {}",
                        strip_suffix(&name)
                    ))),
                    other => {
                        if other.equal(&Value::Boolean(false)) {
                            Ok(())
                        } else {
                            k(self, env)
                        }
                    }
                }
            }
            ExprKind::Infix {
                op: BinOp::Eq,
                lhs,
                rhs,
            } => {
                let (a, b) = (lhs.value.clone(), rhs.value.clone());
                self.unify(&a, &b, env, k)
            }
            ExprKind::Infix { op, lhs, rhs } => {
                let op = *op;
                let lhs = lhs.value.clone();
                let rhs = rhs.value.clone();
                self.resolve_operand(&lhs, env, &mut |ev, env, a| {
                    ev.resolve_operand(&rhs, env, &mut |ev, env, b| {
                        let ord = a.cmp_value(&b);
                        let holds = match op {
                            BinOp::Eq => unreachable!("handled above"),
                            BinOp::Neq => ord != std::cmp::Ordering::Equal,
                            BinOp::Lt => ord == std::cmp::Ordering::Less,
                            BinOp::Lte => ord != std::cmp::Ordering::Greater,
                            BinOp::Gt => ord == std::cmp::Ordering::Greater,
                            BinOp::Gte => ord != std::cmp::Ordering::Less,
                        };
                        if holds {
                            k(ev, env)
                        } else {
                            Ok(())
                        }
                    })
                })
            }
        }
    }

    fn resolve_operand(&mut self, v: &Value, env: &mut Env, k: ValCont<'_, 'a>) -> Result<()> {
        let v = plug(v.clone(), env);
        match v {
            Value::Ref(r) => self.resolve_ref(&r, env, k),
            Value::Var(name) => Err(EvalError::NonGround(format!(
                "unbound variable {}",
                strip_suffix(&name)
            ))),
            other => {
                if other.is_ground() {
                    k(self, env, other)
                } else {
                    Err(EvalError::NonGround(other.to_string()))
                }
            }
        }
    }

    // -- unification --------------------------------------------------------

    fn unify(&mut self, a: &Value, b: &Value, env: &mut Env, k: Cont<'_, 'a>) -> Result<()> {
        let av = env.resolve(a).clone();
        let bv = env.resolve(b).clone();
        match (av, bv) {
            (Value::Ref(r), other) => {
                self.resolve_ref(&r, env, &mut |ev, env, val| ev.unify(&val, &other, env, &mut *k))
            }
            (other, Value::Ref(r)) => {
                self.resolve_ref(&r, env, &mut |ev, env, val| ev.unify(&other, &val, env, &mut *k))
            }
            (Value::Var(x), Value::Var(y)) if x == y => k(self, env),
            (Value::Var(x), other) => self.bind_and(x, other, env, k),
            (other, Value::Var(y)) => self.bind_and(y, other, env, k),
            (Value::Array(xs), Value::Array(ys)) => {
                if xs.len() != ys.len() {
                    return Ok(());
                }
                self.unify_terms(&xs, &ys, 0, env, k)
            }
            (av @ (Value::Object(_) | Value::Set(_)), bv) => {
                self.unify_ground(av, bv, env, k)
            }
            (av, bv @ (Value::Object(_) | Value::Set(_))) => {
                self.unify_ground(av, bv, env, k)
            }
            (x, y) => {
                if x.equal(&y) {
                    k(self, env)
                } else {
                    Ok(())
                }
            }
        }
    }

    // Objects and sets unify by ground equality only.
    fn unify_ground(&mut self, a: Value, b: Value, env: &mut Env, k: Cont<'_, 'a>) -> Result<()> {
        let a = plug(a, env);
        let b = plug(b, env);
        if !a.is_ground() || !b.is_ground() {
            return Err(EvalError::NonGround(format!("{} = {}", a, b)));
        }
        if a.equal(&b) {
            k(self, env)
        } else {
            Ok(())
        }
    }

    fn unify_terms(
        &mut self,
        xs: &[Term],
        ys: &[Term],
        i: usize,
        env: &mut Env,
        k: Cont<'_, 'a>,
    ) -> Result<()> {
        if i == xs.len() {
            return k(self, env);
        }
        let (a, b) = (xs[i].value.clone(), ys[i].value.clone());
        self.unify(&a, &b, env, &mut |ev, env| {
            ev.unify_terms(xs, ys, i + 1, env, &mut *k)
        })
    }

    fn bind_and(&mut self, name: String, value: Value, env: &mut Env, k: Cont<'_, 'a>) -> Result<()> {
        env.bind(name.clone(), value);
        let result = k(self, env);
        env.unbind(&name);
        result
    }

    // -- reference resolution -----------------------------------------------

    fn resolve_ref(&mut self, r: &Ref, env: &mut Env, k: ValCont<'_, 'a>) -> Result<()> {
        match r.head_var() {
            Some(REQUEST_ROOT) => match self.request {
                None => Ok(()),
                Some(doc) => {
                    let doc = doc.clone();
                    self.walk_value(doc, r.tail(), env, k)
                }
            },
            Some(DATA_ROOT) => self.resolve_data(r.tail(), env, k),
            Some(name) => match env.get(name) {
                // A local variable bound to a composite, indexed in place.
                Some(v) => {
                    let v = v.clone();
                    self.walk_value(v, r.tail(), env, k)
                }
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Walk a concrete value along reference elements, enumerating where
    /// an element is an unbound variable.
    fn walk_value(
        &mut self,
        current: Value,
        elems: &[Term],
        env: &mut Env,
        k: ValCont<'_, 'a>,
    ) -> Result<()> {
        if let Value::Ref(r) = &current {
            let r = r.clone();
            return self.resolve_ref(&r, env, &mut |ev, env, v| {
                ev.walk_value(v, elems, env, &mut *k)
            });
        }
        let Some((first, rest)) = elems.split_first() else {
            return k(self, env, current);
        };
        let elem = plug(first.value.clone(), env);

        match current {
            Value::Object(pairs) => match elem {
                Value::Var(name) => {
                    for (pk, pv) in &pairs {
                        let key = plug(pk.value.clone(), env);
                        env.bind(name.clone(), key);
                        let res = self.walk_value(pv.value.clone(), rest, env, &mut *k);
                        env.unbind(&name);
                        res?;
                    }
                    Ok(())
                }
                elem => {
                    for (pk, pv) in &pairs {
                        if plug(pk.value.clone(), env).equal(&elem) {
                            return self.walk_value(pv.value.clone(), rest, env, k);
                        }
                    }
                    Ok(())
                }
            },
            Value::Array(items) => match elem {
                Value::Var(name) => {
                    for (i, item) in items.iter().enumerate() {
                        env.bind(name.clone(), Value::Number(Number::from(i as u64)));
                        let res = self.walk_value(item.value.clone(), rest, env, &mut *k);
                        env.unbind(&name);
                        res?;
                    }
                    Ok(())
                }
                Value::Number(n) => match n.as_u64() {
                    Some(idx) if (idx as usize) < items.len() => {
                        let item = items[idx as usize].value.clone();
                        self.walk_value(item, rest, env, k)
                    }
                    _ => Ok(()),
                },
                _ => Ok(()),
            },
            Value::Set(items) => match elem {
                Value::Var(name) => {
                    for item in &items {
                        let v = plug(item.value.clone(), env);
                        env.bind(name.clone(), v.clone());
                        let res = self.walk_value(v, rest, env, &mut *k);
                        env.unbind(&name);
                        res?;
                    }
                    Ok(())
                }
                elem => {
                    if items.iter().any(|t| plug(t.value.clone(), env).equal(&elem)) {
                        self.walk_value(elem, rest, env, k)
                    } else {
                        Ok(())
                    }
                }
            },
            _ => Ok(()),
        }
    }

    /// Resolve a `data` reference: materialize the document at the longest
    /// ground prefix, then walk the remaining elements.
    fn resolve_data(&mut self, elems: &[Term], env: &mut Env, k: ValCont<'_, 'a>) -> Result<()> {
        let mut prefix: Vec<Value> = Vec::new();
        for t in elems {
            let v = plug(t.value.clone(), env);
            match v {
                Value::String(_) | Value::Number(_) => prefix.push(v),
                _ => break,
            }
        }
        let rest = &elems[prefix.len()..];
        self.materialize(&prefix, env, &mut |ev, env, doc| match doc {
            Some(doc) => ev.walk_value(doc, rest, env, &mut *k),
            None => Ok(()),
        })
    }

    /// Produce the document at a ground path: a virtual document where the
    /// path meets the rule index, otherwise the base document overlaid
    /// with any virtual children. `None` means undefined.
    fn materialize(&mut self, path: &[Value], env: &mut Env, k: DocCont<'_, 'a>) -> Result<()> {
        let index = self.compiler.index();
        let mut node = RuleIndex::ROOT;
        let mut consumed = 0usize;
        let mut dead = false;
        loop {
            if !index.rules(node).is_empty() {
                // Virtual document at the consumed prefix; project the
                // remaining ground elements into each computed value.
                let rest: Vec<Value> = path[consumed..].to_vec();
                return self.eval_virtual_doc(node, env, &mut |ev, env, doc| {
                    k(ev, env, project(&doc, &rest))
                });
            }
            if consumed == path.len() {
                break;
            }
            let next = match &path[consumed] {
                Value::String(s) => index
                    .children(node)
                    .find(|(name, _)| *name == s.as_str())
                    .map(|(_, id)| id),
                _ => None,
            };
            match next {
                Some(child) => {
                    node = child;
                    consumed += 1;
                }
                None => {
                    dead = true;
                    break;
                }
            }
        }

        let base = self.read_base(path)?;
        if dead {
            return k(self, env, base);
        }
        self.overlay_children(node, path, base, env, k)
    }

    fn read_base(&mut self, path: &[Value]) -> Result<Option<Value>> {
        let mut segments = Vec::with_capacity(path.len());
        for elem in path {
            match elem {
                Value::String(s) => segments.push(s.clone()),
                Value::Number(n) => segments.push(n.to_string()),
                _ => return Ok(None),
            }
        }
        match self.txn.read(&Path::from_segments(segments)) {
            Ok(json) => Ok(Some(Value::from_json(json))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge virtual child documents into a base value at an interior node
    /// of the rule index.
    fn overlay_children(
        &mut self,
        node: NodeId,
        path: &[Value],
        base: Option<Value>,
        env: &mut Env,
        k: DocCont<'_, 'a>,
    ) -> Result<()> {
        let index = self.compiler.index();
        let children: Vec<String> = index
            .children(node)
            .filter(|(_, c)| index.subtree_has_rules(*c))
            .map(|(name, _)| name.to_string())
            .collect();
        if children.is_empty() {
            return k(self, env, base);
        }
        let (pairs, had_base) = match base {
            None => (Vec::new(), false),
            Some(Value::Object(pairs)) => (pairs, true),
            // A non-object base document shadows the virtual subtree.
            Some(other) => return k(self, env, Some(other)),
        };
        self.overlay_rec(&children, 0, pairs, had_base, path, env, k)
    }

    fn overlay_rec(
        &mut self,
        children: &[String],
        i: usize,
        acc: Vec<(Term, Term)>,
        had_base: bool,
        path: &[Value],
        env: &mut Env,
        k: DocCont<'_, 'a>,
    ) -> Result<()> {
        if i == children.len() {
            let out = if acc.is_empty() && !had_base {
                None
            } else {
                Some(Value::Object(acc))
            };
            return k(self, env, out);
        }
        let name = children[i].clone();
        let mut child_path = path.to_vec();
        child_path.push(Value::String(name.clone()));
        self.materialize(&child_path, env, &mut |ev, env, v| {
            let mut acc2 = acc.clone();
            if let Some(v) = v {
                match acc2
                    .iter()
                    .position(|(k2, _)| matches!(&k2.value, Value::String(s) if *s == name))
                {
                    Some(pos) => acc2[pos].1 = Term::new(v),
                    None => acc2.push((Term::string(name.clone()), Term::new(v))),
                }
            }
            ev.overlay_rec(children, i + 1, acc2, had_base, path, env, &mut *k)
        })
    }

    /// Evaluate the rules at a node into document values, one per distinct
    /// assignment of the request's free variables.
    fn eval_virtual_doc(&mut self, node: NodeId, env: &mut Env, k: ValCont<'_, 'a>) -> Result<()> {
        let index = self.compiler.index();
        let rrefs = index.rules(node).to_vec();
        let kind = self.compiler.rule(&rrefs[0]).kind();
        let node_path = index.path_of(node).join(".");
        let parent = self.cur_qid;

        let mut sols: Vec<RuleSolution> = Vec::new();
        for rref in &rrefs {
            let rule = self.compiler.rule(rref).clone();
            let inv = self.fresh_invocation();
            let renamed = map_rule(&rule, &rename_for(inv));
            let qid = self.fresh_qid();
            self.trace_node(TraceOp::Enter, qid, parent, &TraceNode::Rule(renamed.clone()), env);

            let body = renamed.body.clone();
            let key_term = renamed.key.clone();
            let value_term = renamed.value.clone();
            let rule_node = TraceNode::Rule(renamed);
            let free = self.free_vars.clone();
            self.eval_body_with_qid(&body, qid, env, &mut |ev, env| {
                let key = match &key_term {
                    Some(t) => {
                        let v = plug(t.value.clone(), env);
                        if !v.is_ground() {
                            return Err(EvalError::NonGround(v.to_string()));
                        }
                        Some(v)
                    }
                    None => None,
                };
                let value = match &value_term {
                    Some(t) => {
                        let v = plug(t.value.clone(), env);
                        if !v.is_ground() {
                            return Err(EvalError::NonGround(v.to_string()));
                        }
                        v
                    }
                    None => Value::Boolean(true),
                };
                ev.trace_node(TraceOp::Exit, qid, parent, &rule_node, env);
                let snapshot = free
                    .iter()
                    .filter_map(|n| env.get(n).map(|v| (n.clone(), plug(v.clone(), env))))
                    .collect();
                sols.push(RuleSolution {
                    snapshot,
                    key,
                    value,
                });
                Ok(())
            })?;
        }

        // Group solutions by request-variable assignment; each group forms
        // one document value.
        let mut groups: Vec<(Vec<(String, Value)>, Vec<usize>)> = Vec::new();
        for (i, sol) in sols.iter().enumerate() {
            match groups
                .iter_mut()
                .find(|(snap, _)| snapshots_equal(snap, &sol.snapshot))
            {
                Some((_, idxs)) => idxs.push(i),
                None => groups.push((sol.snapshot.clone(), vec![i])),
            }
        }

        for (snapshot, idxs) in groups {
            let doc = match kind {
                RuleKind::Complete => {
                    let first = sols[idxs[0]].value.clone();
                    if idxs.iter().any(|&i| !sols[i].value.equal(&first)) {
                        return Err(EvalError::Conflict(node_path.clone()));
                    }
                    first
                }
                RuleKind::PartialObject => {
                    let mut pairs: Vec<(Term, Term)> = Vec::new();
                    for &i in &idxs {
                        let key = sols[i].key.clone().expect("partial object rule has a key");
                        let value = sols[i].value.clone();
                        match pairs.iter().position(|(k2, _)| k2.value.equal(&key)) {
                            Some(pos) => {
                                if !pairs[pos].1.value.equal(&value) {
                                    return Err(EvalError::Conflict(node_path.clone()));
                                }
                            }
                            None => pairs.push((Term::new(key), Term::new(value))),
                        }
                    }
                    Value::Object(pairs)
                }
                RuleKind::PartialSet => {
                    let mut items: Vec<Term> = Vec::new();
                    for &i in &idxs {
                        let key = sols[i].key.clone().expect("partial set rule has a key");
                        if !items.iter().any(|t| t.value.equal(&key)) {
                            items.push(Term::new(key));
                        }
                    }
                    Value::Set(items)
                }
            };

            let mut newly_bound = Vec::new();
            for (name, value) in &snapshot {
                if env.get(name).is_none() {
                    env.bind(name.clone(), value.clone());
                    newly_bound.push(name.clone());
                }
            }
            let result = k(self, env, doc);
            for name in &newly_bound {
                env.unbind(name);
            }
            result?;
        }
        Ok(())
    }
}

fn snapshots_equal(a: &[(String, Value)], b: &[(String, Value)]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|((n1, v1), (n2, v2))| n1 == n2 && v1.equal(v2))
}

/// Ground projection into an already-computed document.
fn project(doc: &Value, rest: &[Value]) -> Option<Value> {
    let mut cur = doc;
    for elem in rest {
        match (cur, elem) {
            (Value::Object(pairs), key) => {
                cur = pairs
                    .iter()
                    .find(|(k, _)| k.value.equal(key))
                    .map(|(_, v)| &v.value)?;
            }
            (Value::Array(items), Value::Number(n)) => {
                let idx = n.as_u64()? as usize;
                cur = items.get(idx).map(|t| &t.value)?;
            }
            (Value::Set(items), elem) => {
                let found = items.iter().find(|t| t.value.equal(elem))?;
                cur = &found.value;
            }
            _ => return None,
        }
    }
    Some(cur.clone())
}
