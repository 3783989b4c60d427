//! V1 wire shapes: patches, policies, result sets, trace events.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use verdict_ast::{Body, Expr, Module, Rule, Term};
use verdict_topdown::{QueryResult, TraceEvent, TraceNode};

pub const COMPILE_MOD_ERR_MSG: &str =
    "error(s) occurred while compiling module(s), see Errors";
pub const COMPILE_QUERY_ERR_MSG: &str =
    "error(s) occurred while compiling query, see Errors";

/// One patch operation of a `PATCH /v1/data` body.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchV1 {
    pub op: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub value: JsonValue,
}

/// A policy module in a response body.
#[derive(Debug, Serialize)]
pub struct PolicyV1<'a> {
    #[serde(rename = "ID")]
    pub id: &'a str,
    #[serde(rename = "Module")]
    pub module: &'a Module,
}

/// One entry of a non-ground result set. Serializes as the pair
/// `[result, bindings]`.
#[derive(Debug)]
pub struct QueryResultV1<'a>(pub &'a QueryResult);

impl Serialize for QueryResultV1<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.0.result, &self.0.bindings).serialize(serializer)
    }
}

/// Shape a result set for the wire.
pub fn query_result_set_v1(qrs: &[QueryResult]) -> Vec<QueryResultV1<'_>> {
    qrs.iter().map(QueryResultV1).collect()
}

/// Node kind tag of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeTypeV1 {
    #[serde(rename = "rule")]
    Rule,
    #[serde(rename = "body")]
    Body,
    #[serde(rename = "expr")]
    Expr,
}

/// One term binding of a trace event's locals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingV1 {
    #[serde(rename = "Key")]
    pub key: Term,
    #[serde(rename = "Value")]
    pub value: Term,
}

/// A trace event as shipped to clients. The `Node` payload shape is
/// selected by `Type`; decoding dispatches on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEventV1 {
    #[serde(rename = "Op")]
    pub op: String,
    #[serde(rename = "QueryID")]
    pub query_id: u64,
    #[serde(rename = "ParentID")]
    pub parent_id: u64,
    #[serde(rename = "Type")]
    pub node_type: NodeTypeV1,
    #[serde(rename = "Node")]
    pub node: NodeV1,
    #[serde(rename = "Locals")]
    pub locals: Vec<BindingV1>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeV1 {
    Rule(Rule),
    Body(Body),
    Expr(Expr),
}

impl From<&TraceEvent> for TraceEventV1 {
    fn from(event: &TraceEvent) -> Self {
        let (node_type, node) = match &event.node {
            TraceNode::Rule(r) => (NodeTypeV1::Rule, NodeV1::Rule(r.clone())),
            TraceNode::Body(b) => (NodeTypeV1::Body, NodeV1::Body(b.clone())),
            TraceNode::Expr(e) => (NodeTypeV1::Expr, NodeV1::Expr(e.clone())),
        };
        TraceEventV1 {
            op: event.op.to_string(),
            query_id: event.query_id,
            parent_id: event.parent_id,
            node_type,
            node,
            locals: event
                .locals
                .iter()
                .map(|(key, value)| BindingV1 {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

/// Shape a full trace for the wire.
pub fn trace_v1(events: &[TraceEvent]) -> Vec<TraceEventV1> {
    events.iter().map(TraceEventV1::from).collect()
}

impl<'de> Deserialize<'de> for TraceEventV1 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut keys: BTreeMap<String, JsonValue> = BTreeMap::deserialize(deserializer)?;
        let node_type: NodeTypeV1 = take_field(&mut keys, "Type")?;
        let node_json = keys
            .remove("Node")
            .ok_or_else(|| D::Error::missing_field("Node"))?;
        let node = match node_type {
            NodeTypeV1::Rule => NodeV1::Rule(
                serde_json::from_value(node_json).map_err(D::Error::custom)?,
            ),
            NodeTypeV1::Body => NodeV1::Body(
                serde_json::from_value(node_json).map_err(D::Error::custom)?,
            ),
            NodeTypeV1::Expr => NodeV1::Expr(
                serde_json::from_value(node_json).map_err(D::Error::custom)?,
            ),
        };
        Ok(TraceEventV1 {
            op: take_field(&mut keys, "Op")?,
            query_id: take_field(&mut keys, "QueryID")?,
            parent_id: take_field(&mut keys, "ParentID")?,
            node_type,
            node,
            locals: take_field(&mut keys, "Locals")?,
        })
    }
}

fn take_field<'de, T: serde::de::DeserializeOwned, E: DeError>(
    keys: &mut BTreeMap<String, JsonValue>,
    name: &'static str,
) -> Result<T, E> {
    let value = keys
        .remove(name)
        .ok_or_else(|| E::missing_field(name))?;
    serde_json::from_value(value).map_err(E::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_ast::parse_body;
    use verdict_topdown::TraceOp;

    #[test]
    fn trace_event_round_trip_dispatches_on_type() {
        let body = parse_body("data.a = x").unwrap();
        let event = TraceEvent {
            op: TraceOp::Enter,
            query_id: 3,
            parent_id: 1,
            node: TraceNode::Body(body),
            locals: vec![(Term::var("x"), Term::number(1))],
        };
        let v1 = TraceEventV1::from(&event);
        let json = serde_json::to_string(&v1).unwrap();
        assert!(json.contains("\"Type\":\"body\""), "{}", json);
        assert!(json.contains("\"QueryID\":3"), "{}", json);

        let back: TraceEventV1 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v1);
        assert!(matches!(back.node, NodeV1::Body(_)));
    }

    #[test]
    fn query_result_serializes_as_pair() {
        let qr = QueryResult {
            result: serde_json::json!({"a": 1}),
            bindings: [("x".to_string(), serde_json::json!(2))].into(),
        };
        let json = serde_json::to_string(&QueryResultV1(&qr)).unwrap();
        assert_eq!(json, "[{\"a\":1},{\"x\":2}]");
    }
}
