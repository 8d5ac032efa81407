use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::{
    domain::{CatalogError, Document, Link, Node, Relation, VertexKey},
    storage::{Catalog, NodeFilter},
};

impl Catalog {
    /// For every node named `from`, a copy of that node whose links are
    /// extended with a `LinkedTo` entry for every node named `to` connected
    /// to it through the catalog graph.
    ///
    /// Connectivity ignores link direction. Only presence is reported, not
    /// the path.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    #[instrument(skip(self))]
    pub fn gap_analysis(&self, from: &str, to: &str) -> Result<Vec<Node>, CatalogError> {
        let state = self.read();
        if from.is_empty() || to.is_empty() {
            return Ok(Vec::new());
        }
        let (sources, _) = state.store.get_nodes(&NodeFilter::by_name(from), None)?;
        let (targets, _) = state.store.get_nodes(&NodeFilter::by_name(to), None)?;
        let components = state.index.components();

        let component_of = |node: &Node| components.get(&VertexKey::Node(node.id)).copied();
        let targets: Vec<(usize, Node)> = targets
            .into_iter()
            .filter_map(|node| component_of(&node).map(|c| (c, node)))
            .collect();

        let mut result = Vec::with_capacity(sources.len());
        for source in sources {
            let component = component_of(&source);
            let Document::Node(mut node) = state.hydrate(source.into())? else {
                continue;
            };

            let reachable: Vec<Link> = targets
                .par_iter()
                .filter(|(c, target)| Some(*c) == component && target.id != node.id)
                .map(|(_, target)| Link::new(Relation::LinkedTo, target.clone().into()))
                .collect();
            debug!("{} reaches {} {to} nodes", node.label(), reachable.len());

            node.links.extend(reachable);
            result.push(node);
        }
        Ok(result)
    }
}
