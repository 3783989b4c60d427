//! Core term model for the policy language.
//!
//! A [`Value`] is one of the scalar, composite, or symbolic kinds that can
//! appear in a policy document: JSON scalars, arrays, ordered objects, sets,
//! variables, and references. A [`Term`] wraps a value; a [`Ref`] is an
//! ordered element sequence whose head names a root document (`data` or
//! `request`).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

/// Root document name for stored and rule-computed documents.
pub const DATA_ROOT: &str = "data";

/// Root document name for caller-supplied request values.
pub const REQUEST_ROOT: &str = "request";

/// A policy-language value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    Array(Vec<Term>),
    /// Ordered key/value pairs with unique keys.
    Object(Vec<(Term, Term)>),
    Set(Vec<Term>),
    Var(String),
    Ref(Ref),
}

/// A term wraps a value. Kept as a distinct type so positions that are
/// semantically "a term of the language" (rule keys, ref elements, trace
/// locals) read as such.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub value: Value,
}

/// A reference: head variable plus string-key / integer-index elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ref(pub Vec<Term>);

impl Term {
    pub fn new(value: Value) -> Self {
        Term { value }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Term::new(Value::String(s.into()))
    }

    pub fn number(n: i64) -> Self {
        Term::new(Value::Number(Number::from(n)))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Term::new(Value::Var(name.into()))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl Ref {
    pub fn empty() -> Self {
        Ref(Vec::new())
    }

    /// A `data`-rooted reference with the given string keys.
    pub fn data(keys: &[&str]) -> Self {
        let mut elems = vec![Term::var(DATA_ROOT)];
        elems.extend(keys.iter().map(|k| Term::string(*k)));
        Ref(elems)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The head variable name, if the ref is non-empty and var-headed.
    pub fn head_var(&self) -> Option<&str> {
        match self.0.first().map(|t| &t.value) {
            Some(Value::Var(name)) => Some(name),
            _ => None,
        }
    }

    /// Elements after the head.
    pub fn tail(&self) -> &[Term] {
        if self.0.is_empty() {
            &[]
        } else {
            &self.0[1..]
        }
    }

    pub fn push(&mut self, t: Term) {
        self.0.push(t);
    }

    /// The string keys after the head, or `None` if any tail element is not
    /// a string.
    pub fn string_keys(&self) -> Option<Vec<&str>> {
        self.tail()
            .iter()
            .map(|t| match &t.value {
                Value::String(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut elems = self.0.iter();
        match elems.next() {
            Some(head) => write!(f, "{}", head)?,
            None => return Ok(()),
        }
        for elem in elems {
            match &elem.value {
                Value::String(s) if is_ident(s) => write!(f, ".{}", s)?,
                other => write!(f, "[{}]", other)?,
            }
        }
        Ok(())
    }
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Value {
    /// True for variables introduced for `_` placeholders.
    pub fn is_wildcard_var(&self) -> bool {
        matches!(self, Value::Var(name) if name.starts_with('$'))
    }

    /// Total order over values. Numbers compare numerically, so `1` and
    /// `1.0` are equal; distinct kinds order by kind rank.
    pub fn cmp_value(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => cmp_numbers(a, b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => cmp_terms(a, b),
            (Value::Set(a), Value::Set(b)) => cmp_terms(a, b),
            (Value::Object(a), Value::Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    match ka.value.cmp_value(&kb.value) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                    match va.value.cmp_value(&vb.value) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Var(a), Value::Var(b)) => a.cmp(b),
            (Value::Ref(a), Value::Ref(b)) => cmp_terms(&a.0, &b.0),
            _ => kind_rank(self).cmp(&kind_rank(other)),
        }
    }

    pub fn equal(&self, other: &Value) -> bool {
        self.cmp_value(other) == Ordering::Equal
    }

    /// True iff no variable or reference occurs anywhere in the value.
    pub fn is_ground(&self) -> bool {
        match self {
            Value::Null | Value::Boolean(_) | Value::Number(_) | Value::String(_) => true,
            Value::Array(items) | Value::Set(items) => {
                items.iter().all(|t| t.value.is_ground())
            }
            Value::Object(pairs) => pairs
                .iter()
                .all(|(k, v)| k.value.is_ground() && v.value.is_ground()),
            Value::Var(_) | Value::Ref(_) => false,
        }
    }

    /// Visit every variable occurrence, including reference heads and
    /// elements. The walk stops early once `f` returns `false`.
    pub fn walk_vars(&self, f: &mut impl FnMut(&str) -> bool) -> bool {
        match self {
            Value::Var(name) => f(name),
            Value::Array(items) | Value::Set(items) => {
                items.iter().all(|t| t.value.walk_vars(f))
            }
            Value::Object(pairs) => pairs
                .iter()
                .all(|(k, v)| k.value.walk_vars(f) && v.value.walk_vars(f)),
            Value::Ref(r) => r.0.iter().all(|t| t.value.walk_vars(f)),
            _ => true,
        }
    }

    /// Convert a ground value to its JSON representation. Sets become
    /// arrays; object keys must be strings.
    pub fn to_json(&self) -> Option<JsonValue> {
        match self {
            Value::Null => Some(JsonValue::Null),
            Value::Boolean(b) => Some(JsonValue::Bool(*b)),
            Value::Number(n) => Some(JsonValue::Number(n.clone())),
            Value::String(s) => Some(JsonValue::String(s.clone())),
            Value::Array(items) | Value::Set(items) => items
                .iter()
                .map(|t| t.value.to_json())
                .collect::<Option<Vec<_>>>()
                .map(JsonValue::Array),
            Value::Object(pairs) => {
                let mut map = serde_json::Map::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = match &k.value {
                        Value::String(s) => s.clone(),
                        _ => return None,
                    };
                    map.insert(key, v.value.to_json()?);
                }
                Some(JsonValue::Object(map))
            }
            Value::Var(_) | Value::Ref(_) => None,
        }
    }

    /// Build a value from plain JSON.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::Number(n) => Value::Number(n.clone()),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| Term::new(Value::from_json(v)))
                    .collect(),
            ),
            JsonValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (Term::string(k.clone()), Term::new(Value::from_json(v))))
                    .collect(),
            ),
        }
    }
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
        Value::Set(_) => 6,
        Value::Var(_) => 7,
        Value::Ref(_) => 8,
    }
}

fn cmp_terms(a: &[Term], b: &[Term]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.value.cmp_value(&y.value) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

fn cmp_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", JsonValue::String(s.clone())),
            Value::Array(items) => {
                write!(f, "[")?;
                write_joined(f, items)?;
                write!(f, "]")
            }
            Value::Set(items) => {
                write!(f, "{{")?;
                write_joined(f, items)?;
                write!(f, "}}")
            }
            Value::Object(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Var(name) => {
                if self.is_wildcard_var() {
                    write!(f, "_")
                } else {
                    write!(f, "{}", name)
                }
            }
            Value::Ref(r) => write!(f, "{}", r),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Term]) -> fmt::Result {
    for (i, t) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", t)?;
    }
    Ok(())
}
