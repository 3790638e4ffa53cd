//! Reconstruction of the concept forest from flat relation rows.
//!
//! Nodes are kept in an arena addressed by [`NodeId`] with a uri lookup
//! table. Children are stored as ids and every child has at most one parent,
//! so the owned tree is only materialised after the structure has been
//! checked for cycles.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::literal::{display_name, parse_multi_value, LiteralEntry};
use crate::sparql::vars;
use crate::store::QueryRow;

type NodeId = usize;

/// Deepest chain of concepts a read will return. The owned tree is nested, so
/// serializing and dropping it recurse once per level.
pub const MAX_DEPTH: usize = 256;

/// Ordered list of root concepts.
pub type Forest = Vec<ConceptNode>;

/// A concept in the reconstructed taxonomy tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptNode {
    #[serde(rename = "key")]
    pub uri: String,
    pub title: String,
    pub children: Vec<ConceptNode>,
    pub labels: Vec<LiteralEntry>,
    pub definitions: Vec<LiteralEntry>,
}

/// One row of the hierarchy query: a class and optionally one direct subclass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationRow {
    pub class_uri: String,
    pub class_labels: String,
    pub class_definitions: String,
    pub sub_class_uri: Option<String>,
    pub sub_class_labels: String,
    pub sub_class_definitions: String,
}

impl RelationRow {
    /// Convert a store binding row. Rows without a class binding are dropped.
    pub fn from_query_row(row: &QueryRow) -> Option<Self> {
        let class_uri = row.get(vars::CLASS).filter(|c| !c.is_empty())?.clone();
        let text = |var: &str| row.get(var).cloned().unwrap_or_default();

        Some(Self {
            class_uri,
            class_labels: text(vars::CLASS_LABELS),
            class_definitions: text(vars::CLASS_DEFINITIONS),
            sub_class_uri: row.get(vars::SUB_CLASS).filter(|s| !s.is_empty()).cloned(),
            sub_class_labels: text(vars::SUB_CLASS_LABELS),
            sub_class_definitions: text(vars::SUB_CLASS_DEFINITIONS),
        })
    }
}

/// Structural inconsistencies found while assembling the forest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("subclass cycle detected at concept {uri}")]
    Cycle { uri: String },

    #[error("concept {uri} is reachable from more than one parent")]
    SharedNode { uri: String },

    #[error("concept {uri} is nested deeper than {limit} levels")]
    TooDeep { uri: String, limit: usize },
}

#[derive(Debug)]
struct ArenaNode {
    uri: String,
    title: String,
    labels: Vec<LiteralEntry>,
    definitions: Vec<LiteralEntry>,
    children: Vec<NodeId>,
}

/// Single-pass builder for one read snapshot.
#[derive(Debug, Default)]
pub struct HierarchyAssembler {
    nodes: Vec<ArenaNode>,
    index: HashMap<String, NodeId>,
    /// Edge set: child -> parent, last row wins.
    parents: HashMap<NodeId, NodeId>,
}

impl HierarchyAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one relation row into the node table and edge set.
    pub fn push_row(&mut self, row: &RelationRow) {
        let class = self.upsert(&row.class_uri, &row.class_labels, &row.class_definitions);

        if let Some(sub_uri) = row.sub_class_uri.as_deref().filter(|s| !s.is_empty()) {
            let sub = self.upsert(sub_uri, &row.sub_class_labels, &row.sub_class_definitions);
            self.link(sub, class);
        }
    }

    /// Number of distinct concepts seen so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[allow(dead_code)]
    pub fn contains(&self, uri: &str) -> bool {
        self.index.contains_key(uri)
    }

    /// Parent recorded for `uri` in the edge set, if any.
    #[allow(dead_code)]
    pub fn parent_of(&self, uri: &str) -> Option<&str> {
        let id = self.index.get(uri)?;
        self.parents.get(id).map(|&p| self.nodes[p].uri.as_str())
    }

    /// Uris of nodes that never occur as a child in the edge set, in
    /// first-seen order.
    #[allow(dead_code)]
    pub fn root_uris(&self) -> Vec<&str> {
        self.roots()
            .into_iter()
            .map(|id| self.nodes[id].uri.as_str())
            .collect()
    }

    /// Check the structure and materialise the owned forest.
    pub fn finish(self) -> Result<Forest, AssemblyError> {
        let roots = self.roots();
        let post_order = self.check_consistency(&roots)?;

        let forest = self.materialise(&roots, &post_order);
        debug!(
            "Assembled forest: {} roots, {} concepts",
            forest.len(),
            self.len()
        );
        Ok(forest)
    }

    fn upsert(&mut self, uri: &str, labels: &str, definitions: &str) -> NodeId {
        let title = display_name(uri);
        let labels = parse_multi_value(labels);
        let definitions = parse_multi_value(definitions);

        if let Some(&id) = self.index.get(uri) {
            let node = &mut self.nodes[id];
            node.title = title;
            node.labels = labels;
            node.definitions = definitions;
            return id;
        }

        let id = self.nodes.len();
        self.nodes.push(ArenaNode {
            uri: uri.to_string(),
            title,
            labels,
            definitions,
            children: Vec::new(),
        });
        self.index.insert(uri.to_string(), id);
        id
    }

    fn link(&mut self, child: NodeId, parent: NodeId) {
        if let Some(previous) = self.parents.insert(child, parent) {
            if previous != parent {
                warn!(
                    "Concept {} reported under {} and {}; keeping the latter",
                    self.nodes[child].uri, self.nodes[previous].uri, self.nodes[parent].uri
                );
                self.nodes[previous].children.retain(|&c| c != child);
            }
        }

        let children = &mut self.nodes[parent].children;
        if !children.contains(&child) {
            children.push(child);
        }
    }

    fn roots(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|id| !self.parents.contains_key(id))
            .collect()
    }

    /// Every node must be visited exactly once from the roots, no uri may
    /// repeat along a path and no path may exceed [`MAX_DEPTH`].
    ///
    /// Returns the nodes in post-order, children before their parent.
    fn check_consistency(&self, roots: &[NodeId]) -> Result<Vec<NodeId>, AssemblyError> {
        let mut visited = vec![false; self.nodes.len()];
        let mut on_path = vec![false; self.nodes.len()];
        let mut post_order = Vec::with_capacity(self.nodes.len());

        for &root in roots {
            if visited[root] {
                return Err(AssemblyError::SharedNode {
                    uri: self.nodes[root].uri.clone(),
                });
            }
            visited[root] = true;
            on_path[root] = true;

            let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];
            while let Some(&(id, next)) = stack.last() {
                match self.nodes[id].children.get(next) {
                    Some(&child) => {
                        if let Some(top) = stack.last_mut() {
                            top.1 += 1;
                        }
                        if on_path[child] {
                            return Err(AssemblyError::Cycle {
                                uri: self.nodes[child].uri.clone(),
                            });
                        }
                        if visited[child] {
                            return Err(AssemblyError::SharedNode {
                                uri: self.nodes[child].uri.clone(),
                            });
                        }
                        if stack.len() >= MAX_DEPTH {
                            return Err(AssemblyError::TooDeep {
                                uri: self.nodes[child].uri.clone(),
                                limit: MAX_DEPTH,
                            });
                        }
                        visited[child] = true;
                        on_path[child] = true;
                        stack.push((child, 0));
                    }
                    None => {
                        on_path[id] = false;
                        post_order.push(id);
                        stack.pop();
                    }
                }
            }
        }

        // Anything not reached hangs off a parent chain with no root.
        if let Some(orphan) = visited.iter().position(|v| !v) {
            let member = self.cycle_member(orphan);
            return Err(AssemblyError::Cycle {
                uri: self.nodes[member].uri.clone(),
            });
        }

        Ok(post_order)
    }

    fn cycle_member(&self, start: NodeId) -> NodeId {
        let mut seen = HashSet::new();
        let mut current = start;
        while seen.insert(current) {
            match self.parents.get(&current) {
                Some(&parent) => current = parent,
                None => break,
            }
        }
        current
    }

    /// Build the owned trees bottom-up; every child is finished before its
    /// parent takes it.
    fn materialise(&self, roots: &[NodeId], post_order: &[NodeId]) -> Forest {
        let mut built: Vec<Option<ConceptNode>> = Vec::with_capacity(self.nodes.len());
        built.resize_with(self.nodes.len(), || None);

        for &id in post_order {
            let node = &self.nodes[id];
            let children = node
                .children
                .iter()
                .filter_map(|&child| built[child].take())
                .collect();
            built[id] = Some(ConceptNode {
                uri: node.uri.clone(),
                title: node.title.clone(),
                children,
                labels: node.labels.clone(),
                definitions: node.definitions.clone(),
            });
        }

        roots.iter().filter_map(|&root| built[root].take()).collect()
    }
}

/// Assemble the forest for one snapshot of relation rows.
pub fn build_forest<'a, I>(rows: I) -> Result<Forest, AssemblyError>
where
    I: IntoIterator<Item = &'a RelationRow>,
{
    let mut assembler = HierarchyAssembler::new();
    for row in rows {
        assembler.push_row(row);
    }
    assembler.finish()
}
