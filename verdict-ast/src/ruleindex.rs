//! Virtual-document index: a prefix tree over rule paths.
//!
//! Nodes live in an arena (`Vec<Node>`, integer ids, parent links) so the
//! many-to-one rule structure never needs owning back-pointers. The index
//! answers the write-conflict question: does a data path pass through or
//! cover any rule-defined location?

use std::collections::BTreeMap;

/// Arena node id.
pub type NodeId = usize;

/// Pointer to a rule inside a compiled module set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRef {
    pub module: String,
    pub index: usize,
}

#[derive(Debug, Default)]
struct Node {
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
    rules: Vec<RuleRef>,
}

/// Prefix tree over the string keys of rule paths (package path elements
/// plus rule name), rooted just below `data`.
#[derive(Debug, Default)]
pub struct RuleIndex {
    nodes: Vec<Node>,
}

impl RuleIndex {
    pub fn new() -> Self {
        RuleIndex {
            nodes: vec![Node::default()],
        }
    }

    pub const ROOT: NodeId = 0;

    /// Insert a rule at the given path, creating intermediate nodes.
    pub fn insert(&mut self, path: &[String], rule: RuleRef) {
        let mut node = Self::ROOT;
        for key in path {
            node = match self.nodes[node].children.get(key) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(Node {
                        parent: Some(node),
                        ..Node::default()
                    });
                    self.nodes[node].children.insert(key.clone(), child);
                    child
                }
            };
        }
        self.nodes[node].rules.push(rule);
    }

    /// The node at exactly this path, if present.
    pub fn node_at(&self, path: &[&str]) -> Option<NodeId> {
        let mut node = Self::ROOT;
        for key in path {
            node = *self.nodes[node].children.get(*key)?;
        }
        Some(node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].parent
    }

    pub fn rules(&self, node: NodeId) -> &[RuleRef] {
        &self.nodes[node].rules
    }

    /// Child nodes in key order.
    pub fn children(&self, node: NodeId) -> impl Iterator<Item = (&str, NodeId)> {
        self.nodes[node]
            .children
            .iter()
            .map(|(k, &v)| (k.as_str(), v))
    }

    /// True iff the node or any descendant carries rules.
    pub fn subtree_has_rules(&self, node: NodeId) -> bool {
        if !self.nodes[node].rules.is_empty() {
            return true;
        }
        self.nodes[node]
            .children
            .values()
            .any(|&child| self.subtree_has_rules(child))
    }

    /// True iff a document write at `path` would touch a rule-computed
    /// location: rules on a node along the path, or anywhere in the
    /// subtree the path covers.
    pub fn intersects(&self, path: &[&str]) -> bool {
        let mut node = Self::ROOT;
        for key in path {
            if !self.nodes[node].rules.is_empty() {
                return true;
            }
            node = match self.nodes[node].children.get(*key) {
                Some(&child) => child,
                None => return false,
            };
        }
        self.subtree_has_rules(node)
    }

    /// All rule-bearing nodes whose path is comparable with `path` (one is
    /// a prefix of the other). Used for dependency analysis.
    pub fn comparable_rule_nodes(&self, path: &[&str]) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut node = Self::ROOT;
        for key in path {
            if !self.nodes[node].rules.is_empty() {
                out.push(node);
            }
            node = match self.nodes[node].children.get(*key) {
                Some(&child) => child,
                None => return out,
            };
        }
        self.collect_subtree_rule_nodes(node, &mut out);
        out
    }

    fn collect_subtree_rule_nodes(&self, node: NodeId, out: &mut Vec<NodeId>) {
        if !self.nodes[node].rules.is_empty() {
            out.push(node);
        }
        for &child in self.nodes[node].children.values() {
            self.collect_subtree_rule_nodes(child, out);
        }
    }

    /// All node ids that carry at least one rule.
    pub fn rule_nodes(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&id| !self.nodes[id].rules.is_empty())
            .collect()
    }

    /// Reconstruct the string path of a node by following parent links.
    pub fn path_of(&self, node: NodeId) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = node;
        while let Some(parent) = self.nodes[current].parent {
            let key = self.nodes[parent]
                .children
                .iter()
                .find(|(_, &v)| v == current)
                .map(|(k, _)| k.clone())
                .unwrap_or_default();
            segments.push(key);
            current = parent;
        }
        segments.reverse();
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rref(module: &str, index: usize) -> RuleRef {
        RuleRef {
            module: module.to_string(),
            index,
        }
    }

    fn index_with(paths: &[&[&str]]) -> RuleIndex {
        let mut idx = RuleIndex::new();
        for (i, path) in paths.iter().enumerate() {
            let owned: Vec<String> = path.iter().map(|s| s.to_string()).collect();
            idx.insert(&owned, rref("m", i));
        }
        idx
    }

    #[test]
    fn intersects_at_under_and_through() {
        let idx = index_with(&[&["a", "b", "c"]]);
        // Covers the rule from above.
        assert!(idx.intersects(&["a"]));
        assert!(idx.intersects(&["a", "b"]));
        // Exactly at the rule.
        assert!(idx.intersects(&["a", "b", "c"]));
        // Passes through the rule.
        assert!(idx.intersects(&["a", "b", "c", "d"]));
        // Disjoint.
        assert!(!idx.intersects(&["a", "x"]));
        assert!(!idx.intersects(&["z"]));
    }

    #[test]
    fn empty_path_covers_everything() {
        let idx = index_with(&[&["a", "b"]]);
        assert!(idx.intersects(&[]));
        assert!(!index_with(&[]).intersects(&[]));
    }

    #[test]
    fn path_reconstruction() {
        let idx = index_with(&[&["a", "b", "c"]]);
        let node = idx.node_at(&["a", "b", "c"]).unwrap();
        assert_eq!(idx.path_of(node), vec!["a", "b", "c"]);
    }

    #[test]
    fn comparable_nodes() {
        let idx = index_with(&[&["a", "b"], &["a", "b", "c"], &["x"]]);
        let found = idx.comparable_rule_nodes(&["a", "b"]);
        assert_eq!(found.len(), 2);
        let found = idx.comparable_rule_nodes(&["a", "b", "c", "d"]);
        assert_eq!(found.len(), 2);
        let found = idx.comparable_rule_nodes(&[]);
        assert_eq!(found.len(), 3);
    }
}
