//! Request-binding constructor.
//!
//! Builds a single hierarchical request document from an ordered list of
//! (ref, value) pairs, detecting structural conflicts. Each ref is either
//! empty (the pair sets the whole document) or `request`-rooted with
//! string keys only.

use thiserror::Error;

use verdict_ast::{Ref, Term, Value, DATA_ROOT, REQUEST_ROOT};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Whole-document collision between pairs.
    #[error("conflicting request values: check request parameters")]
    WholeConflict,

    /// Two pairs place incompatible structure at the named path.
    #[error("conflicting request value {0}: check request parameters")]
    Conflict(String),

    /// A ref contained a non-string element.
    #[error("invalid request path: invalid path {0}: path elements must be strings")]
    InvalidPath(String),
}

/// Merge the pairs in input order into one request value. The later pair
/// is the one that raises a conflict.
pub fn build_request(pairs: &[(Term, Term)]) -> Result<Value, RequestError> {
    let mut result: Option<Value> = None;

    for (key, value) in pairs {
        let r = match &key.value {
            Value::Ref(r) => r,
            other => return Err(RequestError::InvalidPath(other.to_string())),
        };

        let keys = request_keys(r)?;

        // Nest the value under its keys, innermost first.
        let mut nested = value.value.clone();
        for k in keys.iter().rev() {
            nested = Value::Object(vec![(Term::string(k.clone()), Term::new(nested))]);
        }

        result = Some(match result {
            None => nested,
            Some(old) => merge(old, nested, &mut Vec::new())?,
        });
    }

    Ok(result.unwrap_or_else(|| Value::Object(Vec::new())))
}

/// True iff the value mentions any variable other than the `data` root —
/// the non-ground test for request documents.
pub fn has_free_vars(value: &Value) -> bool {
    !value.walk_vars(&mut |name| name == DATA_ROOT)
}

/// The free variable names of a request value, in first-mention order,
/// wildcards excluded.
pub fn free_vars(value: &Value) -> Vec<String> {
    let mut vars = Vec::new();
    value.walk_vars(&mut |name| {
        if name != DATA_ROOT && !name.starts_with('$') && !vars.iter().any(|v| v == name) {
            vars.push(name.to_string());
        }
        true
    });
    vars
}

fn request_keys(r: &Ref) -> Result<Vec<String>, RequestError> {
    if r.is_empty() {
        return Ok(Vec::new());
    }
    if r.head_var() != Some(REQUEST_ROOT) {
        return Err(RequestError::InvalidPath(r.to_string()));
    }
    r.tail()
        .iter()
        .map(|t| match &t.value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(RequestError::InvalidPath(r.to_string())),
        })
        .collect()
}

fn merge(old: Value, new: Value, path: &mut Vec<String>) -> Result<Value, RequestError> {
    match (old, new) {
        (Value::Object(mut a), Value::Object(b)) => {
            for (k, v) in b {
                match a.iter().position(|(ek, _)| ek.value.equal(&k.value)) {
                    Some(pos) => {
                        path.push(key_name(&k));
                        let merged = merge(
                            std::mem::replace(&mut a[pos].1, Term::new(Value::Null)).value,
                            v.value,
                            path,
                        )?;
                        a[pos].1 = Term::new(merged);
                        path.pop();
                    }
                    None => a.push((k, v)),
                }
            }
            Ok(Value::Object(a))
        }
        // A structured pair descending into a non-object names the first
        // colliding key of the incoming side.
        (_, Value::Object(b)) if !path.is_empty() => {
            let mut conflict = path.clone();
            if let Some((k, _)) = b.first() {
                conflict.push(key_name(k));
            }
            Err(conflict_error(&conflict))
        }
        _ => Err(conflict_error(path)),
    }
}

fn key_name(k: &Term) -> String {
    match &k.value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn conflict_error(path: &[String]) -> RequestError {
    if path.is_empty() {
        RequestError::WholeConflict
    } else {
        RequestError::Conflict(format!("request.{}", path.join(".")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_ast::parse_term_str;

    // Mirrors the request builder scenarios: each case is (path, value)
    // pairs where an empty path denotes the whole document.
    fn build(pairs: &[(&str, &str)]) -> Result<Value, RequestError> {
        let terms: Vec<(Term, Term)> = pairs
            .iter()
            .map(|(path, value)| {
                let key = if path.is_empty() {
                    Term::new(Value::Ref(Ref::empty()))
                } else {
                    parse_term_str(&format!("request.{}", path)).unwrap()
                };
                let value = parse_term_str(value).unwrap();
                (key, value)
            })
            .collect();
        build_request(&terms)
    }

    fn expect_value(pairs: &[(&str, &str)], expected: &str) {
        let result = build(pairs).unwrap();
        let expected = parse_term_str(expected).unwrap().value;
        assert!(
            result.equal(&expected),
            "expected {} but got {}",
            expected,
            result
        );
    }

    fn expect_error(pairs: &[(&str, &str)], message: &str) {
        let err = build(pairs).unwrap_err();
        assert_eq!(err.to_string(), message);
    }

    #[test]
    fn single_var() {
        expect_value(&[("hello", "\"world\"")], "{\"hello\": \"world\"}");
    }

    #[test]
    fn multiple_vars() {
        expect_value(
            &[("a", "\"a\""), ("b", "\"b\"")],
            "{\"a\": \"a\", \"b\": \"b\"}",
        );
    }

    #[test]
    fn multiple_overlapping_vars() {
        expect_value(
            &[("a.b.c", "\"c\""), ("a.b.d", "\"d\""), ("x.y", "[]")],
            "{\"a\": {\"b\": {\"c\": \"c\", \"d\": \"d\"}}, \"x\": {\"y\": []}}",
        );
    }

    #[test]
    fn ref_value() {
        expect_value(
            &[("foo.bar", "data.com.example.widgets[i]")],
            "{\"foo\": {\"bar\": data.com.example.widgets[i]}}",
        );
    }

    #[test]
    fn non_object() {
        expect_value(&[("", "[1, 2, 3]")], "[1, 2, 3]");
    }

    #[test]
    fn non_object_conflict() {
        expect_error(
            &[("", "[1, 2, 3]"), ("a.b", "true")],
            "conflicting request values: check request parameters",
        );
    }

    #[test]
    fn conflicting_vars() {
        expect_error(
            &[("a.b", "\"c\""), ("a.b.d", "\"d\"")],
            "conflicting request value request.a.b.d: check request parameters",
        );
    }

    #[test]
    fn conflicting_vars_2() {
        expect_error(
            &[("a.b", "{\"c\": []}"), ("a.b.c", "[\"d\"]")],
            "conflicting request value request.a.b.c: check request parameters",
        );
    }

    #[test]
    fn conflicting_vars_3() {
        expect_error(
            &[("a", "100"), ("a.b", "\"c\"")],
            "conflicting request value request.a.b: check request parameters",
        );
    }

    #[test]
    fn conflicting_vars_4() {
        expect_error(
            &[("a.b", "\"c\""), ("a", "100")],
            "conflicting request value request.a: check request parameters",
        );
    }

    #[test]
    fn bad_path() {
        expect_error(
            &[("a[1]", "1")],
            "invalid request path: invalid path request.a[1]: path elements must be strings",
        );
    }

    #[test]
    fn structural_merge_then_wholesale_conflict() {
        expect_error(
            &[("a.b", "1"), ("", "[1, 2, 3]")],
            "conflicting request values: check request parameters",
        );
    }

    #[test]
    fn free_var_detection() {
        let v = parse_term_str("{\"a\": data.widgets[i]}").unwrap().value;
        assert!(has_free_vars(&v));
        assert_eq!(free_vars(&v), vec!["i"]);

        let ground = parse_term_str("{\"a\": 1}").unwrap().value;
        assert!(!has_free_vars(&ground));
    }
}
