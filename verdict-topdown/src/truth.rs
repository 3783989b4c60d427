//! Truth explanations: reduce a full trace to the steps that justify a
//! positive answer.
//!
//! A query justifies truth iff it reached `Exit`. For each such query the
//! filter keeps its `Enter` event plus the `Eval`/`Exit` suffix following
//! its last `Redo` of the query body — the attempt that actually
//! succeeded. Failed queries and abandoned attempts drop out.

use std::collections::{BTreeMap, BTreeSet};

use crate::trace::{TraceEvent, TraceNode, TraceOp};

pub fn truth(events: &[TraceEvent]) -> Vec<TraceEvent> {
    let exited: BTreeSet<u64> = events
        .iter()
        .filter(|e| e.op == TraceOp::Exit)
        .map(|e| e.query_id)
        .collect();

    let mut last_redo: BTreeMap<u64, usize> = BTreeMap::new();
    for (i, e) in events.iter().enumerate() {
        if e.op == TraceOp::Redo && matches!(e.node, TraceNode::Body(_)) {
            last_redo.insert(e.query_id, i);
        }
    }

    events
        .iter()
        .enumerate()
        .filter(|(i, e)| {
            if !exited.contains(&e.query_id) {
                return false;
            }
            match e.op {
                TraceOp::Enter => true,
                TraceOp::Eval | TraceOp::Exit => {
                    *i >= last_redo.get(&e.query_id).copied().unwrap_or(0)
                }
                TraceOp::Redo | TraceOp::Fail => false,
            }
        })
        .map(|(_, e)| e.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_ast::parse_body;

    fn event(op: TraceOp, qid: u64, body: &str) -> TraceEvent {
        TraceEvent {
            op,
            query_id: qid,
            parent_id: 0,
            node: TraceNode::Body(parse_body(body).unwrap()),
            locals: Vec::new(),
        }
    }

    #[test]
    fn keeps_only_exited_queries() {
        let events = vec![
            event(TraceOp::Enter, 0, "true"),
            event(TraceOp::Enter, 1, "false"),
            event(TraceOp::Fail, 1, "false"),
            event(TraceOp::Exit, 0, "true"),
        ];
        let kept = truth(&events);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|e| e.query_id == 0));
    }

    #[test]
    fn keeps_suffix_after_last_redo() {
        let events = vec![
            event(TraceOp::Enter, 0, "true"),
            event(TraceOp::Eval, 0, "true"),
            event(TraceOp::Redo, 0, "true"),
            event(TraceOp::Eval, 0, "true"),
            event(TraceOp::Exit, 0, "true"),
        ];
        let kept = truth(&events);
        let ops: Vec<TraceOp> = kept.iter().map(|e| e.op).collect();
        assert_eq!(ops, vec![TraceOp::Enter, TraceOp::Eval, TraceOp::Exit]);
    }
}
