// SPDX-License-Identifier: BSD-3-Clause
//! Pointer-equivalence graph view of the solved sets. Nodes partition
//! pointees into classes of one category; an edge says "anything here may
//! point to anything there". Nodes are arena-allocated and addressed by
//! index, so the cyclic edge structure needs no ownership gymnastics.

use std::collections::BTreeSet;

use crate::analysis::solve::{Pointee, Pointer, PointsToSet, PointsToSets};

/// Equivalence relation grouping pointees into one node. Elements of a node
/// are pairwise in the same category.
pub trait Category {
    fn same_category(&self, a: &Pointee, b: &Pointee) -> bool;
}

/// The default category: same value handle.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValueCategory;

impl Category for ValueCategory {
    fn same_category(&self, a: &Pointee, b: &Pointee) -> bool {
        a.0 == b.0
    }
}

/// The finest category: the exact `(value, offset)` pair. Every pointee gets
/// its own node.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactCategory;

impl Category for ExactCategory {
    fn same_category(&self, a: &Pointee, b: &Pointee) -> bool {
        a == b
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
struct NodeId(usize);

#[derive(Debug, Default)]
struct Node {
    elements: BTreeSet<Pointee>,
    edges: BTreeSet<NodeId>,
}

pub struct PointsToGraph {
    nodes: Vec<Node>,
    category: Box<dyn Category>,
}

impl PointsToGraph {
    /// The graph adopts the category for its lifetime.
    pub fn new(category: Box<dyn Category>) -> Self {
        PointsToGraph {
            nodes: Vec::new(),
            category,
        }
    }

    /// Populate a graph from solved points-to sets.
    pub fn from_points_to_sets(sets: &PointsToSets, category: Box<dyn Category>) -> Self {
        let mut graph = Self::new(category);
        for (ptr, set) in sets {
            graph.insert_set(*ptr, set);
        }
        graph
    }

    fn find_node(&self, p: &Pointee) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.elements.contains(p))
            .map(NodeId)
    }

    fn add_node(&mut self, p: Pointee) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = Node::default();
        node.elements.insert(p);
        self.nodes.push(node);
        id
    }

    /// Among `root`'s successors, the node `p` belongs into by category, if
    /// any. One element per node suffices for the check since nodes are
    /// category-homogeneous.
    fn should_add_to(&self, root: NodeId, p: &Pointee) -> Option<NodeId> {
        for &succ in &self.nodes[root.0].edges {
            let witness = self.nodes[succ.0]
                .elements
                .iter()
                .next()
                .expect("nodes are never empty");
            if self.category.same_category(witness, p) {
                return Some(succ);
            }
        }
        None
    }

    /// Record that `p` may point to `location`. Returns whether the graph
    /// changed.
    pub fn insert(&mut self, p: Pointer, location: Pointee) -> bool {
        let from = match self.find_node(&p) {
            Some(n) => n,
            None => self.add_node(p),
        };

        if let Some(to) = self.should_add_to(from, &location) {
            self.nodes[to.0].elements.insert(location)
        } else if let Some(to) = self.find_node(&location) {
            self.nodes[from.0].edges.insert(to)
        } else {
            let to = self.add_node(location);
            self.nodes[from.0].edges.insert(to);
            true
        }
    }

    /// Insert a whole set; true iff any element changed the graph.
    pub fn insert_set(&mut self, p: Pointer, locations: &PointsToSet) -> bool {
        let mut changed = false;
        for location in locations {
            changed |= self.insert(p, *location);
        }
        changed
    }

    /// `p` may point to whatever `location` points to: copy `location`'s
    /// outgoing edges onto `p`'s node. Does nothing when `location` has no
    /// node or no successors; in particular it does NOT record `p` pointing
    /// to `location` itself.
    pub fn insert_deref_pointee(&mut self, p: Pointer, location: Pointee) -> bool {
        let Some(location_node) = self.find_node(&location) else {
            return false;
        };
        if self.nodes[location_node.0].edges.is_empty() {
            return false;
        }
        let pointer_node = match self.find_node(&p) {
            Some(n) => n,
            None => self.add_node(p),
        };
        let edges: Vec<NodeId> = self.nodes[location_node.0].edges.iter().copied().collect();
        let mut changed = false;
        for e in edges {
            changed |= self.nodes[pointer_node.0].edges.insert(e);
        }
        changed
    }

    /// Whatever `p` points to may point to `location`: give each of `p`'s
    /// successors an edge to `location`'s node.
    pub fn insert_deref_pointer(&mut self, p: Pointer, location: Pointee) -> bool {
        let Some(pointer_node) = self.find_node(&p) else {
            return false;
        };
        if self.nodes[pointer_node.0].edges.is_empty() {
            return false;
        }
        let location_node = match self.find_node(&location) {
            Some(n) => n,
            None => self.add_node(location),
        };
        let succs: Vec<NodeId> = self.nodes[pointer_node.0].edges.iter().copied().collect();
        let mut changed = false;
        for s in succs {
            changed |= self.nodes[s.0].edges.insert(location_node);
        }
        changed
    }

    /// Flatten back into points-to sets: every element of a node with
    /// successors points to every element of each successor.
    pub fn to_points_to_sets(&self) -> PointsToSets {
        let mut sets = PointsToSets::new();
        for node in &self.nodes {
            if node.edges.is_empty() {
                continue;
            }
            for e in &node.elements {
                let set = sets.entry(*e);
                for succ in &node.edges {
                    set.extend(self.nodes[succ.0].elements.iter().copied());
                }
            }
        }
        sets
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Stable textual dump: each node's elements, then each successor.
    /// `fmt` renders a single pointee (the caller knows how values are
    /// named).
    pub fn dump(
        &self,
        f: &mut impl std::io::Write,
        fmt: impl Fn(&Pointee) -> String,
    ) -> std::io::Result<()> {
        if self.nodes.is_empty() {
            return writeln!(f, "points-to graph is empty");
        }
        let render = |node: &Node| -> String {
            let parts: Vec<String> = node.elements.iter().map(&fmt).collect();
            format!("[{}]", parts.join(", "))
        };
        for node in &self.nodes {
            writeln!(f, "{}", render(node))?;
            for succ in &node.edges {
                writeln!(f, "    --> {}", render(&self.nodes[succ.0]))?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for PointsToGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointsToGraph")
            .field("nodes", &self.nodes)
            .finish()
    }
}
