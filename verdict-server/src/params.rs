//! Query-parameter and request-parameter parsing shared by the HTTP and
//! RPC façades.

use verdict_ast::{parse_term_str, Ref, Term, Value};
use verdict_topdown::{build_request, has_free_vars};

use crate::error::{Result, ServerError};

pub const REQUEST_PARAM_FORMAT_MSG: &str =
    "request parameter format is [[<path>]:]<value> where <path> is either var or ref";

/// Explain mode for query responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainMode {
    Off,
    Full,
    Truth,
}

/// Decoded common query parameters.
#[derive(Debug)]
pub struct Params {
    pub pretty: bool,
    pub explain: ExplainMode,
    pub request_items: Vec<String>,
    /// Last `q` occurrence wins.
    pub q: Option<String>,
}

impl Params {
    pub fn parse(pairs: &[(String, String)]) -> Params {
        let mut params = Params {
            pretty: false,
            explain: ExplainMode::Off,
            request_items: Vec::new(),
            q: None,
        };
        for (key, value) in pairs {
            match key.as_str() {
                "pretty" => {
                    if value.eq_ignore_ascii_case("true") {
                        params.pretty = true;
                    }
                }
                "explain" => {
                    if params.explain == ExplainMode::Off {
                        params.explain = match value.as_str() {
                            "full" => ExplainMode::Full,
                            "truth" => ExplainMode::Truth,
                            _ => ExplainMode::Off,
                        };
                    }
                }
                "request" => params.request_items.push(value.clone()),
                "q" => params.q = Some(value.clone()),
                _ => {}
            }
        }
        params
    }
}

/// Parse repeatable `request=<item>` parameters into a request document.
/// Each item is `<path>:<value>`, `:<value>`, or a bare `<value>`; when
/// the whole item parses as a term it is the value with an empty path.
/// Returns the merged document (absent when no items were given) and
/// whether any value contains a free variable.
pub fn parse_request_params(items: &[String]) -> Result<(Option<Value>, bool)> {
    if items.is_empty() {
        return Ok((None, false));
    }

    let mut pairs: Vec<(Term, Term)> = Vec::with_capacity(items.len());
    let mut non_ground = false;

    for item in items {
        let (key, value) = if let Some(rest) = item.strip_prefix(':') {
            let value = parse_term_str(rest)
                .map_err(|e| ServerError::bad_request(e.to_string()))?;
            (Term::new(Value::Ref(Ref::empty())), value)
        } else if let Ok(value) = parse_term_str(item) {
            (Term::new(Value::Ref(Ref::empty())), value)
        } else {
            let Some((path, value)) = item.split_once(':') else {
                return Err(ServerError::bad_request(REQUEST_PARAM_FORMAT_MSG));
            };
            let key = parse_term_str(&format!("request.{}", path))
                .map_err(|_| ServerError::bad_request(REQUEST_PARAM_FORMAT_MSG))?;
            let value = parse_term_str(value)
                .map_err(|e| ServerError::bad_request(e.to_string()))?;
            (key, value)
        };

        if !non_ground {
            non_ground = has_free_vars(&value.value);
        }
        pairs.push((key, value));
    }

    let request = build_request(&pairs).map_err(|e| ServerError::bad_request(e.to_string()))?;
    Ok((Some(request), non_ground))
}

/// Convert a slash-separated URL path into a `data`-rooted reference;
/// numeric segments become integer indices.
pub fn string_path_to_data_ref(s: &str) -> Ref {
    let mut r = Ref(vec![Term::var(verdict_ast::DATA_ROOT)]);
    for seg in s.split('/').filter(|seg| !seg.is_empty()) {
        match seg.parse::<i64>() {
            Ok(n) => r.push(Term::number(n)),
            Err(_) => r.push(Term::string(seg)),
        }
    }
    r
}
