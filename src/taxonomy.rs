//! Category taxonomy: parent/child/depth indexing over a flat record list.
//!
//! Nodes live in an arena (`Vec<CategoryNode>`) in input order and every
//! relationship is stored as an index into that arena. Nothing is mutated
//! after construction, so a built tree can be shared freely between readers.
//!
//! A record whose `parent_id` names a node that does not exist keeps the
//! dangling reference but is treated as a root for traversal (depth 0, no
//! parent link). Use [`TaxonomyTree::build_strict`] to reject such input.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// One entry of the flat taxonomy input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl CategoryRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryNode {
    pub id: String,
    pub name: String,
    /// Parent as declared in the input, even when it does not resolve.
    pub parent_id: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
    depth: usize,
}

impl CategoryNode {
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("malformed taxonomy: duplicate category id {id}")]
    DuplicateId { id: String },
    #[error("malformed taxonomy: parent cycle through category {id}")]
    ParentCycle { id: String },
    #[error("category {id} references missing parent {parent_id}")]
    DanglingParent { id: String, parent_id: String },
    #[error("category {id} appears in more than one matrix column")]
    DuplicateColumn { id: String },
    #[error("unknown category id: {id}")]
    UnknownNode { id: String },
    #[error("failed to read taxonomy: {0}")]
    Io(String),
    #[error("failed to parse taxonomy: {0}")]
    Parse(String),
}

/// Traversal direction for [`TaxonomyTree::nodes_by_depth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthDirection {
    /// Roots first.
    RootToLeaves,
    /// Deepest nodes first.
    LeavesToRoot,
}

#[derive(Debug, Clone)]
pub struct TaxonomyTree {
    nodes: Vec<CategoryNode>,
    index: HashMap<String, usize>,
    roots: Vec<usize>,
    dangling: Vec<usize>,
    /// Node indices ordered by ascending depth (stable w.r.t. input order).
    by_depth: Vec<usize>,
}

impl TaxonomyTree {
    /// Build a tree, tolerating parent references that do not resolve.
    pub fn build(records: &[CategoryRecord]) -> Result<Self, TaxonomyError> {
        let tree = Self::build_inner(records)?;
        for &idx in &tree.dangling {
            let node = &tree.nodes[idx];
            warn!(
                category_id = %node.id,
                parent_id = node.parent_id.as_deref().unwrap_or_default(),
                "category references a missing parent; treating it as a root"
            );
        }
        debug!(
            nodes = tree.nodes.len(),
            roots = tree.roots.len(),
            max_depth = tree.max_depth(),
            "taxonomy built"
        );
        Ok(tree)
    }

    /// Build a tree, failing on the first parent reference that does not resolve.
    pub fn build_strict(records: &[CategoryRecord]) -> Result<Self, TaxonomyError> {
        let tree = Self::build_inner(records)?;
        tree.ensure_no_dangling()?;
        Ok(tree)
    }

    /// Fail with the first node whose `parent_id` did not resolve.
    pub fn ensure_no_dangling(&self) -> Result<(), TaxonomyError> {
        match self.dangling_parents().next() {
            Some(node) => Err(TaxonomyError::DanglingParent {
                id: node.id.clone(),
                parent_id: node.parent_id.clone().unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }

    fn build_inner(records: &[CategoryRecord]) -> Result<Self, TaxonomyError> {
        let mut nodes = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());

        for (idx, record) in records.iter().enumerate() {
            if index.insert(record.id.clone(), idx).is_some() {
                return Err(TaxonomyError::DuplicateId {
                    id: record.id.clone(),
                });
            }
            nodes.push(CategoryNode {
                id: record.id.clone(),
                name: record.name.clone(),
                parent_id: record.parent_id.clone(),
                parent: None,
                children: Vec::new(),
                depth: 0,
            });
        }

        let mut roots = Vec::new();
        let mut dangling = Vec::new();
        for idx in 0..nodes.len() {
            let parent = match nodes[idx].parent_id.as_deref() {
                None => None,
                Some(pid) => match index.get(pid) {
                    Some(&p) => Some(p),
                    None => {
                        dangling.push(idx);
                        None
                    }
                },
            };
            match parent {
                Some(p) => {
                    nodes[idx].parent = Some(p);
                    nodes[p].children.push(idx);
                }
                None => roots.push(idx),
            }
        }

        // Iterative DFS from every traversal root; anything left unvisited
        // sits on a parent cycle.
        let mut visited = vec![false; nodes.len()];
        let mut stack: Vec<(usize, usize)> = roots.iter().rev().map(|&r| (r, 0)).collect();
        while let Some((idx, depth)) = stack.pop() {
            visited[idx] = true;
            nodes[idx].depth = depth;
            for &child in nodes[idx].children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        if let Some(idx) = visited.iter().position(|v| !v) {
            return Err(TaxonomyError::ParentCycle {
                id: nodes[idx].id.clone(),
            });
        }

        let mut by_depth: Vec<usize> = (0..nodes.len()).collect();
        by_depth.sort_by_key(|&idx| nodes[idx].depth);

        Ok(Self {
            nodes,
            index,
            roots,
            dangling,
            by_depth,
        })
    }

    /// Read a JSON array of [`CategoryRecord`]s and build a tree from it.
    pub fn from_json_file(path: impl AsRef<Path>, strict: bool) -> Result<Self, TaxonomyError> {
        let raw =
            std::fs::read_to_string(path.as_ref()).map_err(|e| TaxonomyError::Io(e.to_string()))?;
        let records: Vec<CategoryRecord> =
            serde_json::from_str(&raw).map_err(|e| TaxonomyError::Parse(e.to_string()))?;
        if strict {
            Self::build_strict(&records)
        } else {
            Self::build(&records)
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Category ids in input order. This is the canonical column order.
    pub fn ids(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn node(&self, id: &str) -> Result<&CategoryNode, TaxonomyError> {
        self.index_of(id).map(|idx| &self.nodes[idx])
    }

    pub fn node_at(&self, idx: usize) -> Option<&CategoryNode> {
        self.nodes.get(idx)
    }

    pub fn index_of(&self, id: &str) -> Result<usize, TaxonomyError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| TaxonomyError::UnknownNode { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes without a resolvable parent, in input order.
    pub fn roots(&self) -> impl Iterator<Item = &str> + '_ {
        self.roots.iter().map(|&idx| self.nodes[idx].id.as_str())
    }

    /// Nodes whose declared parent is missing from the node set.
    pub fn dangling_parents(&self) -> impl Iterator<Item = &CategoryNode> + '_ {
        self.dangling.iter().map(|&idx| &self.nodes[idx])
    }

    pub fn max_depth(&self) -> usize {
        self.by_depth
            .last()
            .map(|&idx| self.nodes[idx].depth)
            .unwrap_or(0)
    }

    pub fn depth(&self, id: &str) -> Result<usize, TaxonomyError> {
        self.node(id).map(|n| n.depth)
    }

    pub fn parent_of(&self, id: &str) -> Result<Option<&str>, TaxonomyError> {
        let node = self.node(id)?;
        Ok(node.parent.map(|p| self.nodes[p].id.as_str()))
    }

    pub fn children_of(&self, id: &str) -> Result<Vec<&str>, TaxonomyError> {
        let node = self.node(id)?;
        Ok(node
            .children
            .iter()
            .map(|&c| self.nodes[c].id.as_str())
            .collect())
    }

    pub fn is_leaf(&self, id: &str) -> Result<bool, TaxonomyError> {
        self.node(id).map(|n| n.children.is_empty())
    }

    pub(crate) fn parent_index(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].parent
    }

    pub(crate) fn child_indices(&self, idx: usize) -> &[usize] {
        &self.nodes[idx].children
    }

    /// Depth-ordered node ids. Order among nodes of equal depth is unspecified.
    ///
    /// The returned iterator borrows precomputed state, so calling this again
    /// restarts the traversal at no extra cost.
    pub fn nodes_by_depth(&self, direction: DepthDirection) -> DepthIter<'_> {
        DepthIter {
            tree: self,
            order: self.by_depth.iter(),
            direction,
        }
    }

    /// Display names from the root down to `id`.
    pub fn full_path(&self, id: &str) -> Result<Vec<&str>, TaxonomyError> {
        let mut cur = Some(self.index_of(id)?);
        let mut path = Vec::new();
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            path.push(node.name.as_str());
            cur = node.parent;
        }
        path.reverse();
        Ok(path)
    }

    pub fn path_string(&self, id: &str, separator: &str) -> Result<String, TaxonomyError> {
        Ok(self.full_path(id)?.join(separator))
    }
}

/// Iterator returned by [`TaxonomyTree::nodes_by_depth`].
pub struct DepthIter<'a> {
    tree: &'a TaxonomyTree,
    order: std::slice::Iter<'a, usize>,
    direction: DepthDirection,
}

impl<'a> Iterator for DepthIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = match self.direction {
            DepthDirection::RootToLeaves => self.order.next(),
            DepthDirection::LeavesToRoot => self.order.next_back(),
        }?;
        Some(self.tree.nodes[*idx].id.as_str())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.order.size_hint()
    }
}

impl ExactSizeIterator for DepthIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterative_depths_follow_chains() {
        let records = vec![
            CategoryRecord::new("d", "D", Some("c")),
            CategoryRecord::new("c", "C", Some("b")),
            CategoryRecord::new("b", "B", Some("a")),
            CategoryRecord::new("a", "A", None),
        ];
        let tree = TaxonomyTree::build(&records).unwrap();
        assert_eq!(tree.depth("a").unwrap(), 0);
        assert_eq!(tree.depth("d").unwrap(), 3);
        assert_eq!(tree.max_depth(), 3);
        assert_eq!(tree.full_path("d").unwrap(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn parent_cycle_is_rejected() {
        let records = vec![
            CategoryRecord::new("root", "Root", None),
            CategoryRecord::new("x", "X", Some("y")),
            CategoryRecord::new("y", "Y", Some("x")),
        ];
        let err = TaxonomyTree::build(&records).unwrap_err();
        assert!(matches!(err, TaxonomyError::ParentCycle { .. }));
    }

    #[test]
    fn depth_iter_reports_exact_len() {
        let records = vec![
            CategoryRecord::new("a", "A", None),
            CategoryRecord::new("b", "B", Some("a")),
        ];
        let tree = TaxonomyTree::build(&records).unwrap();
        let it = tree.nodes_by_depth(DepthDirection::LeavesToRoot);
        assert_eq!(it.len(), 2);
    }
}
