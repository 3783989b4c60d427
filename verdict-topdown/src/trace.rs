//! Trace events emitted during evaluation.

use std::fmt;

use serde::{Deserialize, Serialize};

use verdict_ast::{Body, Expr, Rule, Term};

/// The operation a trace event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceOp {
    Enter,
    Exit,
    Eval,
    Redo,
    Fail,
}

impl fmt::Display for TraceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TraceOp::Enter => "Enter",
            TraceOp::Exit => "Exit",
            TraceOp::Eval => "Eval",
            TraceOp::Redo => "Redo",
            TraceOp::Fail => "Fail",
        };
        write!(f, "{}", s)
    }
}

/// The AST node under consideration, tagged by shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceNode {
    Rule(Rule),
    Body(Body),
    Expr(Expr),
}

/// One step in the evaluator's execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub op: TraceOp,
    pub query_id: u64,
    pub parent_id: u64,
    pub node: TraceNode,
    /// Local variable bindings visible at this step, as key/value terms.
    pub locals: Vec<(Term, Term)>,
}

/// A tracer that buffers every event, scoped to one evaluation.
#[derive(Debug, Default)]
pub struct BufferTracer {
    events: Vec<TraceEvent>,
}

impl BufferTracer {
    pub fn new() -> Self {
        BufferTracer { events: Vec::new() }
    }

    pub fn record(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}
