//! In-memory mirror of the persisted links.
//!
//! Every requirement and node is a vertex; every link row is an edge from its
//! source to its target, weighted with its relation. The `Contains`
//! sub-hierarchy between requirements is kept in a second graph so that cycle
//! checks and depth queries never have to project it out of the full one.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::{
    algo::{self, has_path_connecting, is_cyclic_directed, tarjan_scc},
    graphmap::DiGraphMap,
    unionfind::UnionFind,
    visit::{EdgeFiltered, EdgeRef},
    Direction,
};
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    domain::{CatalogError, Relation, VertexKey},
    storage::entity_store::{LinkKind, LinkRow},
};

/// The catalog graph.
#[derive(Debug, Clone)]
pub struct GraphIndex {
    graph: DiGraphMap<VertexKey, Relation>,
    /// Parent to child, requirements only.
    hierarchy: DiGraphMap<Uuid, ()>,
    acyclic: bool,
}

impl Default for GraphIndex {
    fn default() -> Self {
        Self {
            graph: DiGraphMap::new(),
            hierarchy: DiGraphMap::new(),
            acyclic: true,
        }
    }
}

impl GraphIndex {
    /// Build the index from every vertex and link row in the store.
    #[must_use]
    pub fn build(vertices: impl IntoIterator<Item = VertexKey>, links: &[LinkRow]) -> Self {
        let mut index = Self::default();
        for vertex in vertices {
            index.add_vertex(vertex);
        }
        for link in links {
            index.add_edge(link);
        }
        debug!(
            "Built graph index with {} vertices and {} edges",
            index.graph.node_count(),
            index.graph.edge_count()
        );
        index
    }

    /// Register a vertex. Adding an existing vertex is a no-op.
    pub fn add_vertex(&mut self, vertex: VertexKey) {
        self.graph.add_node(vertex);
        if let VertexKey::Requirement(id) = vertex {
            self.hierarchy.add_node(id);
        }
    }

    /// Whether the vertex is known.
    #[must_use]
    pub fn contains(&self, vertex: VertexKey) -> bool {
        self.graph.contains_node(vertex)
    }

    /// Mirror a persisted link.
    ///
    /// Endpoints are registered if they are not already present. A
    /// hierarchical edge that closes a cycle is still recorded, but marks the
    /// index as no longer acyclic.
    pub fn add_edge(&mut self, link: &LinkRow) {
        let (source, target) = (link.source_vertex(), link.target_vertex());
        self.add_vertex(source);
        self.add_vertex(target);
        self.graph.add_edge(source, target, link.relation);

        if let Some((parent, child)) = hierarchy_edge(link) {
            if self.acyclic
                && (parent == child || has_path_connecting(&self.hierarchy, child, parent, None))
            {
                error!("Hierarchy edge {parent} -> {child} closes a cycle");
                self.acyclic = false;
            }
            self.hierarchy.add_edge(parent, child, ());
        }
    }

    /// Forget a link, in whichever direction it was recorded.
    pub fn remove_edge(&mut self, link: &LinkRow) {
        let (source, target) = (link.source_vertex(), link.target_vertex());
        self.graph.remove_edge(source, target);
        self.graph.remove_edge(target, source);

        if link.kind == LinkKind::Internal {
            self.hierarchy.remove_edge(link.source, link.target);
            self.hierarchy.remove_edge(link.target, link.source);
            if !self.acyclic {
                self.acyclic = !is_cyclic_directed(&self.hierarchy);
            }
        }
    }

    /// Whether the `Contains` hierarchy is free of cycles.
    #[must_use]
    pub const fn is_acyclic(&self) -> bool {
        self.acyclic
    }

    /// A cycle in the `Contains` hierarchy, if there is one.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<VertexKey>> {
        if self.acyclic {
            return None;
        }
        tarjan_scc(&self.hierarchy)
            .into_iter()
            .find(|scc| scc.len() > 1 || self.hierarchy.contains_edge(scc[0], scc[0]))
            .map(|scc| scc.into_iter().map(VertexKey::Requirement).collect())
    }

    /// Whether relating requirement `a` to requirement `b` would close a cycle
    /// in the `Contains` hierarchy.
    ///
    /// Any edge already recorded between `a` and `b` is disregarded, since a
    /// new link between them replaces it. Non-hierarchical relations never
    /// introduce a cycle.
    ///
    /// Returns the would-be cycle, starting and ending at the parent.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::FatalState`] if the hierarchy already contains
    /// a cycle.
    pub fn introduces_cycle(
        &self,
        a: Uuid,
        b: Uuid,
        relation: Relation,
    ) -> Result<Option<Vec<VertexKey>>, CatalogError> {
        if !self.acyclic {
            return Err(CatalogError::FatalState {
                cycle: self.find_cycle().unwrap_or_default(),
            });
        }
        let (parent, child) = match relation {
            Relation::Contains => (a, b),
            Relation::PartOf => (b, a),
            _ => return Ok(None),
        };
        if parent == child {
            return Ok(Some(vec![VertexKey::Requirement(parent); 2]));
        }
        if !self.hierarchy.contains_node(child) || !self.hierarchy.contains_node(parent) {
            return Ok(None);
        }

        let without_pair = EdgeFiltered::from_fn(&self.hierarchy, |edge: (Uuid, Uuid, &())| {
            let (s, t) = (edge.source(), edge.target());
            !((s == a && t == b) || (s == b && t == a))
        });
        let path = algo::astar(&without_pair, child, |n| n == parent, |_| 1usize, |_| 0);

        Ok(path.map(|(_, path)| {
            std::iter::once(parent)
                .chain(path)
                .map(VertexKey::Requirement)
                .collect()
        }))
    }

    /// Whether `a` and `b` are connected when edge direction is ignored.
    #[must_use]
    pub fn has_path(&self, a: VertexKey, b: VertexKey) -> bool {
        if !self.contains(a) || !self.contains(b) {
            return false;
        }
        if a == b {
            return true;
        }
        let mut seen = HashSet::from([a]);
        let mut queue = VecDeque::from([a]);
        while let Some(vertex) = queue.pop_front() {
            for next in self.undirected_neighbors(vertex) {
                if next == b {
                    return true;
                }
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// The shortest downward path from requirement `from` to requirement `to`
    /// along `Contains` edges, inclusive of both ends.
    #[must_use]
    pub fn shortest_path(&self, from: Uuid, to: Uuid) -> Option<Vec<VertexKey>> {
        if !self.hierarchy.contains_node(from) || !self.hierarchy.contains_node(to) {
            return None;
        }
        algo::astar(&self.hierarchy, from, |n| n == to, |_| 1usize, |_| 0)
            .map(|(_, path)| path.into_iter().map(VertexKey::Requirement).collect())
    }

    /// Requirements with no incoming edges other than `Related` ones.
    ///
    /// A `PartOf` edge counts as incoming at its source, the child.
    #[must_use]
    pub fn root_requirements(&self) -> Vec<Uuid> {
        let mut inner = HashSet::new();
        for (source, target, relation) in self.graph.all_edges() {
            match relation {
                Relation::Related => {}
                Relation::PartOf => {
                    inner.insert(source);
                }
                _ => {
                    inner.insert(target);
                }
            }
        }
        self.graph
            .nodes()
            .filter(|vertex| !inner.contains(vertex))
            .filter_map(|vertex| match vertex {
                VertexKey::Requirement(id) => Some(id),
                VertexKey::Node(_) => None,
            })
            .collect()
    }

    /// Number of `Contains` steps from the nearest root down to `id`.
    ///
    /// Zero for roots and for requirements no root reaches.
    #[must_use]
    pub fn hierarchy_depth(&self, id: Uuid) -> usize {
        self.root_requirements()
            .into_iter()
            .filter_map(|root| self.shortest_path(root, id))
            .map(|path| path.len() - 1)
            .min()
            .unwrap_or(0)
    }

    /// Label every vertex with the undirected component it belongs to.
    ///
    /// Two vertices share a label exactly when [`Self::has_path`] holds
    /// between them.
    #[must_use]
    pub fn components(&self) -> HashMap<VertexKey, usize> {
        let index: HashMap<VertexKey, usize> = self
            .graph
            .nodes()
            .enumerate()
            .map(|(i, vertex)| (vertex, i))
            .collect();
        let mut sets = UnionFind::new(index.len());
        for (source, target, _) in self.graph.all_edges() {
            if let (Some(&s), Some(&t)) = (index.get(&source), index.get(&target)) {
                sets.union(s, t);
            }
        }
        index
            .into_iter()
            .map(|(vertex, i)| (vertex, sets.find(i)))
            .collect()
    }

    /// Number of vertices and edges.
    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        (self.graph.node_count(), self.graph.edge_count())
    }

    /// Every edge as `(source, target, relation)`.
    pub fn edges(&self) -> impl Iterator<Item = (VertexKey, VertexKey, Relation)> + '_ {
        self.graph
            .all_edges()
            .map(|(source, target, relation)| (source, target, *relation))
    }

    fn undirected_neighbors(&self, vertex: VertexKey) -> impl Iterator<Item = VertexKey> + '_ {
        self.graph
            .neighbors_directed(vertex, Direction::Outgoing)
            .chain(self.graph.neighbors_directed(vertex, Direction::Incoming))
    }
}

/// The `(parent, child)` pair of a hierarchical internal link.
fn hierarchy_edge(link: &LinkRow) -> Option<(Uuid, Uuid)> {
    if link.kind != LinkKind::Internal {
        return None;
    }
    match link.relation {
        Relation::Contains => Some((link.source, link.target)),
        Relation::PartOf => Some((link.target, link.source)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn ids<const N: usize>() -> [Uuid; N] {
        std::array::from_fn(|_| Uuid::new_v4())
    }

    fn internal(source: Uuid, target: Uuid, relation: Relation) -> LinkRow {
        LinkRow {
            id: Uuid::new_v4(),
            kind: LinkKind::Internal,
            source,
            target,
            relation,
        }
    }

    fn external(source: Uuid, target: Uuid, relation: Relation) -> LinkRow {
        LinkRow {
            kind: LinkKind::External,
            ..internal(source, target, relation)
        }
    }

    fn index_of(requirements: &[Uuid], links: &[LinkRow]) -> GraphIndex {
        GraphIndex::build(
            requirements.iter().copied().map(VertexKey::Requirement),
            links,
        )
    }

    #[test]
    fn roots_ignore_related_edges() {
        let [c0, c1, c2, c3] = ids();
        let index = index_of(
            &[c0, c1, c2, c3],
            &[
                internal(c0, c2, Relation::Contains),
                internal(c1, c2, Relation::Contains),
                internal(c0, c1, Relation::Related),
            ],
        );

        let roots: HashSet<Uuid> = index.root_requirements().into_iter().collect();
        assert_eq!(roots, HashSet::from([c0, c1, c3]));
    }

    #[test]
    fn roots_exclude_nodes() {
        let [c0, n0] = ids();
        let index = index_of(&[c0], &[external(c0, n0, Relation::LinkedTo)]);
        assert_eq!(index.root_requirements(), vec![c0]);
    }

    #[test]
    fn closing_a_chain_is_a_cycle() {
        let [c0, c1, c2] = ids();
        let index = index_of(
            &[c0, c1, c2],
            &[
                internal(c0, c1, Relation::Contains),
                internal(c1, c2, Relation::Contains),
            ],
        );

        let cycle = index
            .introduces_cycle(c2, c0, Relation::Contains)
            .unwrap()
            .unwrap();
        assert_eq!(
            cycle,
            [c2, c0, c1, c2].map(VertexKey::Requirement).to_vec()
        );
        assert!(index.has_path(VertexKey::Requirement(c0), VertexKey::Requirement(c2)));
    }

    #[test]
    fn part_of_is_checked_as_reversed_contains() {
        let [c0, c1] = ids();
        let index = index_of(&[c0, c1], &[internal(c0, c1, Relation::Contains)]);

        // c1 part of c0 restates the existing edge
        assert!(
            index
                .introduces_cycle(c1, c0, Relation::PartOf)
                .unwrap()
                .is_none()
        );
        assert!(
            index
                .introduces_cycle(c0, c1, Relation::PartOf)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn reversing_an_existing_edge_is_not_a_cycle() {
        let [c0, c1] = ids();
        let index = index_of(&[c0, c1], &[internal(c0, c1, Relation::Contains)]);
        assert!(
            index
                .introduces_cycle(c1, c0, Relation::Contains)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn self_containment_is_a_cycle() {
        let [c0] = ids();
        let index = index_of(&[c0], &[]);
        assert!(
            index
                .introduces_cycle(c0, c0, Relation::Contains)
                .unwrap()
                .is_some()
        );
    }

    #[test_case(Relation::Related)]
    #[test_case(Relation::LinkedTo)]
    #[test_case(Relation::Same)]
    fn non_hierarchical_relations_never_cycle(relation: Relation) {
        let [c0, c1] = ids();
        let index = index_of(&[c0, c1], &[internal(c0, c1, Relation::Contains)]);
        assert!(index.introduces_cycle(c1, c0, relation).unwrap().is_none());
    }

    #[test]
    fn existing_cycle_is_fatal() {
        let [c0, c1] = ids();
        let mut index = index_of(&[c0, c1], &[internal(c0, c1, Relation::Contains)]);
        let back = internal(c1, c0, Relation::Contains);
        index.add_edge(&back);
        assert!(!index.is_acyclic());
        assert!(index.find_cycle().is_some());

        let error = index
            .introduces_cycle(c0, c1, Relation::Related)
            .unwrap_err();
        assert!(matches!(error, CatalogError::FatalState { .. }));

        index.remove_edge(&back);
        assert!(index.is_acyclic());
    }

    #[test]
    fn has_path_ignores_direction() {
        let [c0, c1, n0, n1, n2] = ids();
        let index = index_of(
            &[c0, c1],
            &[
                external(c0, n0, Relation::LinkedTo),
                external(c0, n1, Relation::LinkedTo),
                external(c1, n2, Relation::LinkedTo),
            ],
        );
        let (n0, n1, n2) = (
            VertexKey::Node(n0),
            VertexKey::Node(n1),
            VertexKey::Node(n2),
        );

        assert!(index.has_path(n0, n1));
        assert!(index.has_path(n1, n0));
        assert!(!index.has_path(n0, n2));
        assert!(index.has_path(n2, n2));

        let components = index.components();
        assert_eq!(components[&n0], components[&n1]);
        assert_ne!(components[&n0], components[&n2]);
    }

    #[test]
    fn depth_follows_contains_chain() {
        let [c0, c1, c2] = ids();
        let index = index_of(
            &[c0, c1, c2],
            &[
                internal(c0, c1, Relation::Contains),
                internal(c2, c1, Relation::PartOf),
            ],
        );

        assert_eq!(index.hierarchy_depth(c2), 2);
        assert_eq!(index.hierarchy_depth(c1), 1);
        assert_eq!(index.hierarchy_depth(c0), 0);
        assert_eq!(
            index.shortest_path(c0, c0),
            Some(vec![VertexKey::Requirement(c0)])
        );
    }

    #[test]
    fn shortest_path_is_directed() {
        let [c0, c1] = ids();
        let index = index_of(&[c0, c1], &[internal(c0, c1, Relation::Contains)]);
        assert!(index.shortest_path(c1, c0).is_none());
    }
}
