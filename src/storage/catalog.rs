//! The write coordinator.
//!
//! A [`Catalog`] owns the [`EntityStore`] and the [`GraphIndex`] behind a
//! single reader-writer lock. Writers hold the lock exclusively for the whole
//! store-then-index sequence, so readers always see a link row together with
//! its index edge or neither.

use std::{
    fmt,
    path::Path,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    domain::{
        error::format_cycle, CatalogError, Config, Document, Link, Node, Relation, Requirement,
        ValidationError, VertexKey,
    },
    storage::{
        entity_store::{LinkKind, LinkRow},
        EntityStore, GraphIndex,
    },
};

/// What a link call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// A new link row was written.
    Created,
    /// An existing link between the same endpoints changed relation.
    Updated,
    /// An identical link already existed.
    Unchanged,
    /// The link would have closed a `Contains` cycle and was dropped.
    CycleDropped(Vec<VertexKey>),
}

/// Tally of a bulk import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Documents processed without error.
    pub documents: usize,
    /// Links written for the first time.
    pub created: usize,
    /// Links whose relation changed.
    pub updated: usize,
    /// Links already present.
    pub unchanged: usize,
    /// Links dropped because they would have closed a cycle.
    pub cycles_dropped: usize,
    /// Documents and links that could not be imported, with the reason.
    pub failures: Vec<(String, String)>,
}

impl ImportReport {
    fn record(&mut self, outcome: &LinkOutcome) {
        match outcome {
            LinkOutcome::Created => self.created += 1,
            LinkOutcome::Updated => self.updated += 1,
            LinkOutcome::Unchanged => self.unchanged += 1,
            LinkOutcome::CycleDropped(_) => self.cycles_dropped += 1,
        }
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} documents imported ({} failed); links: {} created, {} updated, {} unchanged, {} \
             dropped as cycles",
            self.documents,
            self.failures.len(),
            self.created,
            self.updated,
            self.unchanged,
            self.cycles_dropped
        )
    }
}

/// The store and index pair guarded by the catalog lock.
#[derive(Debug)]
pub struct State {
    /// Durable entities and links.
    pub store: EntityStore,
    /// In-memory mirror of the links.
    pub index: GraphIndex,
}

/// A cross-reference catalog.
#[derive(Debug)]
pub struct Catalog {
    state: RwLock<State>,
    items_per_page: usize,
}

impl Catalog {
    /// Open the catalog described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn from_config(config: &Config) -> Result<Self, CatalogError> {
        let mut catalog = Self::open(&config.database, config.wal)?;
        catalog.items_per_page = config.items_per_page();
        Ok(catalog)
    }

    /// Open the catalog database at `path` and build its index.
    ///
    /// A catalog whose stored hierarchy already contains a cycle still opens,
    /// but refuses every write with [`CatalogError::FatalState`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or scanned.
    pub fn open(path: &Path, wal: bool) -> Result<Self, CatalogError> {
        Self::with_store(EntityStore::open(path, wal)?)
    }

    /// A fresh catalog backed by an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        Self::with_store(EntityStore::open_in_memory()?)
    }

    fn with_store(store: EntityStore) -> Result<Self, CatalogError> {
        let vertices = store
            .all_requirements()?
            .into_iter()
            .map(|r| VertexKey::Requirement(r.internal_id))
            .chain(store.all_nodes()?.into_iter().map(|n| VertexKey::Node(n.id)))
            .collect::<Vec<_>>();
        let index = GraphIndex::build(vertices, &store.all_links()?);

        if let Some(cycle) = index.find_cycle() {
            tracing::error!(
                "Stored hierarchy contains a cycle ({}); catalog is read-only",
                format_cycle(&cycle)
            );
        }

        Ok(Self {
            state: RwLock::new(State { store, index }),
            items_per_page: Config::default().items_per_page(),
        })
    }

    /// The default page size.
    #[must_use]
    pub const fn items_per_page(&self) -> usize {
        self.items_per_page
    }

    /// Shared access to the store and index.
    pub fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, CatalogError> {
        let state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(cycle) = state.index.find_cycle() {
            return Err(CatalogError::FatalState { cycle });
        }
        Ok(state)
    }

    /// Insert or enrich a requirement.
    ///
    /// # Errors
    ///
    /// See [`EntityStore::put_requirement`]. Also fails with
    /// [`CatalogError::FatalState`] if the catalog is read-only.
    pub fn put_requirement(&self, requirement: &Requirement) -> Result<Requirement, CatalogError> {
        self.write()?.put_requirement(requirement)
    }

    /// Insert or enrich a node.
    ///
    /// # Errors
    ///
    /// See [`EntityStore::put_node`]. Also fails with
    /// [`CatalogError::FatalState`] if the catalog is read-only.
    pub fn put_node(&self, node: &Node) -> Result<Node, CatalogError> {
        self.write()?.put_node(node)
    }

    /// Link two stored requirements.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::NotFound`] if either requirement is missing.
    /// - [`CatalogError::FatalState`] if the catalog is read-only.
    /// - [`CatalogError::Storage`] if the write fails, in which case neither
    ///   the store nor the index changed.
    pub fn link_requirements(
        &self,
        a: Uuid,
        b: Uuid,
        relation: Relation,
    ) -> Result<LinkOutcome, CatalogError> {
        self.write()?.link_requirements(a, b, relation)
    }

    /// Link a stored requirement to a stored node.
    ///
    /// # Errors
    ///
    /// As for [`Self::link_requirements`].
    pub fn link_requirement_to_node(
        &self,
        requirement: Uuid,
        node: Uuid,
        relation: Relation,
    ) -> Result<LinkOutcome, CatalogError> {
        self.write()?
            .link_requirement_to_node(requirement, node, relation)
    }

    /// Store every document and its links.
    ///
    /// Each document is imported on its own: a failure is recorded in the
    /// report and the next document is attempted. The catalog lock is held
    /// for the whole import.
    ///
    /// # Errors
    ///
    /// Only fails if the catalog is read-only.
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    pub fn import(&self, documents: &[Document]) -> Result<ImportReport, CatalogError> {
        let mut state = self.write()?;
        let mut report = ImportReport::default();

        for document in documents {
            match state.import_document(document, &mut report) {
                Ok(()) => report.documents += 1,
                Err(e @ CatalogError::FatalState { .. }) => return Err(e),
                Err(e) => {
                    warn!("Skipping {}: {e}", document.label());
                    report.failures.push((document.label(), e.to_string()));
                }
            }
        }

        info!("{report}");
        Ok(report)
    }

    /// Every requirement hydrated with its links, followed by every node that
    /// no requirement links to.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn export(&self) -> Result<Vec<Document>, CatalogError> {
        let state = self.read();
        let mut documents = Vec::new();

        for requirement in state.store.all_requirements()? {
            documents.push(state.hydrate(requirement.into())?);
        }
        for node in state.store.all_nodes()? {
            let vertex = VertexKey::Node(node.id);
            if state.store.get_links_of(vertex)?.is_empty() {
                documents.push(node.into());
            }
        }
        Ok(documents)
    }

    /// Verify that the index mirrors the store and that the hierarchy is
    /// acyclic.
    ///
    /// Returns a description of every discrepancy found.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn check(&self) -> Result<Vec<String>, CatalogError> {
        let state = self.read();
        let mut problems = Vec::new();

        let links = state.store.all_links()?;
        let (requirements, nodes, rows) = state.store.counts()?;
        let (vertices, edges) = state.index.size();

        if vertices != requirements + nodes {
            problems.push(format!(
                "index has {vertices} vertices for {} stored entities",
                requirements + nodes
            ));
        }
        if edges != rows {
            problems.push(format!("index has {edges} edges for {rows} stored links"));
        }
        for link in &links {
            let (source, target) = (link.source_vertex(), link.target_vertex());
            if state.store.document(source)?.is_none() || state.store.document(target)?.is_none()
            {
                problems.push(format!("link {} has a dangling endpoint", link.id));
            }
            let indexed = state
                .index
                .edges()
                .any(|(s, t, r)| s == source && t == target && r == link.relation);
            if !indexed {
                problems.push(format!("link {} is missing from the index", link.id));
            }
        }
        if let Some(cycle) = state.index.find_cycle() {
            problems.push(format!("hierarchy cycle: {}", format_cycle(&cycle)));
        }

        Ok(problems)
    }
}

impl State {
    fn put_requirement(&mut self, requirement: &Requirement) -> Result<Requirement, CatalogError> {
        let stored = self.store.put_requirement(requirement)?;
        self.index
            .add_vertex(VertexKey::Requirement(stored.internal_id));
        Ok(stored)
    }

    fn put_node(&mut self, node: &Node) -> Result<Node, CatalogError> {
        let stored = self.store.put_node(node)?;
        self.index.add_vertex(VertexKey::Node(stored.id));
        Ok(stored)
    }

    #[instrument(level = "debug", skip(self))]
    fn link_requirements(
        &mut self,
        a: Uuid,
        b: Uuid,
        relation: Relation,
    ) -> Result<LinkOutcome, CatalogError> {
        for id in [a, b] {
            if self.store.requirement(id)?.is_none() {
                return Err(CatalogError::NotFound(VertexKey::Requirement(id).to_string()));
            }
        }

        // one orientation per hierarchical pair
        let (source, target, relation) = match relation {
            Relation::PartOf => (b, a, Relation::Contains),
            relation => (a, b, relation),
        };

        let existing = self.store.find_link(LinkKind::Internal, source, target)?;
        if let Some(row) = &existing {
            let same = (row.source == source && row.relation == relation)
                || (row.source == target && row.relation == relation.inverse());
            if same {
                return Ok(LinkOutcome::Unchanged);
            }
        }

        if let Some(cycle) = self.index.introduces_cycle(source, target, relation)? {
            warn!(
                "Dropping {relation} link that would close a cycle: {}",
                format_cycle(&cycle)
            );
            return Ok(LinkOutcome::CycleDropped(cycle));
        }

        let row = LinkRow {
            id: existing.map_or_else(Uuid::new_v4, |row| row.id),
            kind: LinkKind::Internal,
            source,
            target,
            relation,
        };
        self.write_link(row, existing)
    }

    #[instrument(level = "debug", skip(self))]
    fn link_requirement_to_node(
        &mut self,
        requirement: Uuid,
        node: Uuid,
        relation: Relation,
    ) -> Result<LinkOutcome, CatalogError> {
        if self.store.requirement(requirement)?.is_none() {
            return Err(CatalogError::NotFound(
                VertexKey::Requirement(requirement).to_string(),
            ));
        }
        if self.store.node(node)?.is_none() {
            return Err(CatalogError::NotFound(VertexKey::Node(node).to_string()));
        }

        let existing = self.store.find_link(LinkKind::External, requirement, node)?;
        if existing.is_some_and(|row| row.relation == relation) {
            return Ok(LinkOutcome::Unchanged);
        }

        // nodes sit outside the hierarchy, so this only fails on fatal state
        if let Some(cycle) = self.index.introduces_cycle(requirement, node, relation)? {
            return Ok(LinkOutcome::CycleDropped(cycle));
        }

        let row = LinkRow {
            id: existing.map_or_else(Uuid::new_v4, |row| row.id),
            kind: LinkKind::External,
            source: requirement,
            target: node,
            relation,
        };
        self.write_link(row, existing)
    }

    /// Store first, then index, then commit; undo the index change if the
    /// commit fails.
    fn write_link(
        &mut self,
        row: LinkRow,
        existing: Option<LinkRow>,
    ) -> Result<LinkOutcome, CatalogError> {
        let Self { store, index } = self;
        let tx = store.begin()?;

        let outcome = if let Some(old) = existing {
            tx.update_link(&row)?;
            index.remove_edge(&old);
            LinkOutcome::Updated
        } else {
            tx.insert_link(&row)?;
            LinkOutcome::Created
        };
        index.add_edge(&row);

        if let Err(e) = tx.commit() {
            index.remove_edge(&row);
            if let Some(old) = existing {
                index.add_edge(&old);
            }
            return Err(e);
        }

        debug!(
            "{outcome:?} link {} -[{}]-> {}",
            row.source_vertex(),
            row.relation,
            row.target_vertex()
        );
        Ok(outcome)
    }

    fn put_document(&mut self, document: &Document) -> Result<Document, CatalogError> {
        Ok(match document {
            Document::Requirement(r) => self.put_requirement(r)?.into(),
            Document::Node(n) => self.put_node(n)?.into(),
        })
    }

    /// Put a document, then each of its links. A link that fails is
    /// reported and skipped; only a failure to put the document itself
    /// fails the document.
    fn import_document(
        &mut self,
        document: &Document,
        report: &mut ImportReport,
    ) -> Result<(), CatalogError> {
        let stored = self.put_document(document)?;

        for Link { relation, document: peer } in document.links() {
            match self.import_link(&stored, *relation, peer) {
                Ok(outcome) => report.record(&outcome),
                Err(e @ CatalogError::FatalState { .. }) => return Err(e),
                Err(e) => {
                    let label = format!("{} {relation} {}", document.label(), peer.label());
                    warn!("Skipping link {label}: {e}");
                    report.failures.push((label, e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn import_link(
        &mut self,
        stored: &Document,
        relation: Relation,
        peer: &Document,
    ) -> Result<LinkOutcome, CatalogError> {
        let peer = self.put_document(peer)?;
        match (stored, &peer) {
            (Document::Requirement(a), Document::Requirement(b)) => {
                self.link_requirements(a.internal_id, b.internal_id, relation)
            }
            (Document::Requirement(r), Document::Node(n)) => {
                self.link_requirement_to_node(r.internal_id, n.id, relation)
            }
            (Document::Node(n), Document::Requirement(r)) => {
                self.link_requirement_to_node(r.internal_id, n.id, relation.inverse())
            }
            (Document::Node(_), Document::Node(_)) => Err(ValidationError::NodeToNode.into()),
        }
    }

    /// Attach the one-hop link closure to a stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn hydrate(&self, mut document: Document) -> Result<Document, CatalogError> {
        let links = self.store.get_links_of(document.vertex())?;
        *document.links_mut() = links
            .into_iter()
            .map(|(peer, relation)| Link::new(relation, peer))
            .collect();
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExternalId, ToolType};

    fn requirement(catalog: &Catalog, name: &str) -> Uuid {
        catalog
            .put_requirement(&Requirement::new(name))
            .unwrap()
            .internal_id
    }

    fn links_of(catalog: &Catalog, id: Uuid) -> Vec<(String, Relation)> {
        catalog
            .read()
            .store
            .get_links_of(VertexKey::Requirement(id))
            .unwrap()
            .into_iter()
            .map(|(doc, rel)| (doc.name().to_string(), rel))
            .collect()
    }

    #[test]
    fn cycle_closing_link_is_dropped() {
        let catalog = Catalog::open_in_memory().unwrap();
        let [c0, c1, c2] = ["C0", "C1", "C2"].map(|name| requirement(&catalog, name));

        assert_eq!(
            catalog
                .link_requirements(c0, c1, Relation::Contains)
                .unwrap(),
            LinkOutcome::Created
        );
        catalog
            .link_requirements(c1, c2, Relation::Contains)
            .unwrap();
        let outcome = catalog
            .link_requirements(c2, c0, Relation::Contains)
            .unwrap();

        assert!(matches!(outcome, LinkOutcome::CycleDropped(_)));
        assert!(
            !links_of(&catalog, c2).contains(&("C0".to_string(), Relation::Contains))
        );
        assert!(catalog.read().index.is_acyclic());
        assert!(catalog.check().unwrap().is_empty());
    }

    #[test]
    fn part_of_is_stored_as_contains() {
        let catalog = Catalog::open_in_memory().unwrap();
        let [parent, child] = ["Parent", "Child"].map(|name| requirement(&catalog, name));

        catalog
            .link_requirements(child, parent, Relation::PartOf)
            .unwrap();
        assert_eq!(
            catalog
                .link_requirements(parent, child, Relation::Contains)
                .unwrap(),
            LinkOutcome::Unchanged
        );

        let rows = catalog.read().store.all_links().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source, parent);
        assert_eq!(rows[0].relation, Relation::Contains);
        assert_eq!(
            links_of(&catalog, child),
            vec![("Parent".to_string(), Relation::PartOf)]
        );
    }

    #[test]
    fn relinking_a_pair_updates_in_place() {
        let catalog = Catalog::open_in_memory().unwrap();
        let [a, b] = ["A", "B"].map(|name| requirement(&catalog, name));

        catalog.link_requirements(a, b, Relation::Related).unwrap();
        assert_eq!(
            catalog.link_requirements(b, a, Relation::Contains).unwrap(),
            LinkOutcome::Updated
        );

        assert_eq!(catalog.read().store.all_links().unwrap().len(), 1);
        assert_eq!(
            links_of(&catalog, a),
            vec![("B".to_string(), Relation::PartOf)]
        );
        assert!(catalog.check().unwrap().is_empty());
    }

    #[test]
    fn missing_endpoint_is_not_found() {
        let catalog = Catalog::open_in_memory().unwrap();
        let a = requirement(&catalog, "A");

        let error = catalog
            .link_requirements(a, Uuid::new_v4(), Relation::Related)
            .unwrap_err();
        assert!(matches!(error, CatalogError::NotFound(_)));

        let error = catalog
            .link_requirement_to_node(a, Uuid::new_v4(), Relation::LinkedTo)
            .unwrap_err();
        assert!(matches!(error, CatalogError::NotFound(_)));
        assert!(catalog.read().store.all_links().unwrap().is_empty());
    }

    #[test]
    fn node_links_are_idempotent() {
        let catalog = Catalog::open_in_memory().unwrap();
        let a = requirement(&catalog, "A");
        let node = catalog
            .put_node(&Node::tool("ZAP", "10020", ToolType::Offensive))
            .unwrap();

        for expected in [LinkOutcome::Created, LinkOutcome::Unchanged] {
            assert_eq!(
                catalog
                    .link_requirement_to_node(a, node.id, Relation::LinkedTo)
                    .unwrap(),
                expected
            );
        }
        assert_eq!(
            catalog
                .link_requirement_to_node(a, node.id, Relation::TestedBy)
                .unwrap(),
            LinkOutcome::Updated
        );
    }

    #[test]
    fn import_continues_past_conflicts() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .put_requirement(
                &Requirement::new("A").with_external_id(ExternalId::new("111-111").unwrap()),
            )
            .unwrap();

        let mut conflicting: Document = Requirement::new("A")
            .with_external_id(ExternalId::new("222-222").unwrap())
            .into();
        conflicting.add_link(Link::new(
            Relation::LinkedTo,
            Node::standard("ASVS", "V1", "").into(),
        ));
        let mut fine: Document = Requirement::new("B").into();
        fine.add_link(Link::new(
            Relation::Contains,
            Requirement::new("C").into(),
        ));
        fine.add_link(Link::new(
            Relation::LinkedTo,
            Node::standard("ASVS", "V1", "").into(),
        ));

        let report = catalog.import(&[conflicting, fine]).unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.created, 2);

        let again = catalog.import(&catalog.export().unwrap()).unwrap();
        assert_eq!(again.created, 0);
        assert!(again.failures.is_empty());
    }

    #[test]
    fn node_documents_link_back_with_inverse_relation() {
        let catalog = Catalog::open_in_memory().unwrap();
        let mut node: Document = Node::standard("ASVS", "V1", "").into();
        node.add_link(Link::new(
            Relation::Remediates,
            Requirement::new("A").into(),
        ));

        catalog.import(&[node]).unwrap();
        let exported = catalog.export().unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].links()[0].relation, Relation::RemediatedBy);
    }

    #[test]
    fn node_to_node_links_are_rejected() {
        let catalog = Catalog::open_in_memory().unwrap();
        let mut node: Document = Node::standard("ASVS", "V1", "").into();
        node.add_link(Link::new(
            Relation::LinkedTo,
            Node::standard("NIST", "AC-1", "").into(),
        ));

        let report = catalog.import(&[node]).unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].1.contains("node"));
    }

    #[test]
    fn a_failing_link_skips_only_that_link() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .put_requirement(
                &Requirement::new("CB").with_external_id(ExternalId::new("222-222").unwrap()),
            )
            .unwrap();

        let mut ca: Document = Requirement::new("CA").into();
        ca.add_link(Link::new(
            Relation::Related,
            Requirement::new("CB")
                .with_external_id(ExternalId::new("333-333").unwrap())
                .into(),
        ));
        ca.add_link(Link::new(
            Relation::LinkedTo,
            Node::standard("ASVS", "V1", "").into(),
        ));

        let report = catalog.import(&[ca]).unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].0.contains("CB"));

        assert_eq!(
            links_of(&catalog, requirement(&catalog, "CA")),
            vec![("ASVS".to_string(), Relation::LinkedTo)]
        );
    }

    #[test]
    fn readers_never_see_a_half_written_link() {
        use std::{
            sync::atomic::{AtomicBool, Ordering},
            thread,
        };

        const CHAIN: usize = 30;
        let catalog = Catalog::open_in_memory().unwrap();
        let done = AtomicBool::new(false);

        thread::scope(|scope| {
            scope.spawn(|| {
                let mut previous: Option<Requirement> = None;
                for i in 0..CHAIN {
                    let requirement = Requirement::new(format!("R{i}"));
                    let mut document: Document = requirement.clone().into();
                    document.add_link(Link::new(
                        Relation::LinkedTo,
                        Node::standard("ASVS", format!("V{i}"), "").into(),
                    ));
                    if let Some(parent) = previous.replace(requirement) {
                        document.add_link(Link::new(Relation::PartOf, parent.into()));
                    }
                    let report = catalog.import(&[document]).unwrap();
                    assert!(report.failures.is_empty());
                }

                let first = requirement(&catalog, "R0");
                let last = requirement(&catalog, &format!("R{}", CHAIN - 1));
                let outcome = catalog
                    .link_requirements(last, first, Relation::Contains)
                    .unwrap();
                assert!(matches!(outcome, LinkOutcome::CycleDropped(_)));
                done.store(true, Ordering::Release);
            });

            for _ in 0..3 {
                scope.spawn(|| {
                    let mut rounds = 0;
                    while !done.load(Ordering::Acquire) || rounds == 0 {
                        assert_eq!(catalog.check().unwrap(), Vec::<String>::new());
                        rounds += 1;
                    }
                });
            }
        });

        let rows = catalog.read().store.all_links().unwrap();
        let hierarchy = rows
            .iter()
            .filter(|row| row.relation == Relation::Contains)
            .count();
        assert_eq!(hierarchy, CHAIN - 1);
        assert_eq!(rows.len(), 2 * CHAIN - 1);
        assert!(catalog.check().unwrap().is_empty());
    }

    #[test]
    fn stored_cycle_makes_catalog_read_only() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("catalog.sqlite");
        let (a, b) = {
            let catalog = Catalog::open(&path, false).unwrap();
            let [a, b] = ["A", "B"].map(|name| requirement(&catalog, name));
            catalog.link_requirements(a, b, Relation::Contains).unwrap();
            (a, b)
        };

        // a second hierarchy edge in the other direction can only appear
        // through a tampered database
        {
            let store = EntityStore::open(&path, false).unwrap();
            let other = store.put_requirement(&Requirement::new("C")).unwrap();
            let tx = store.begin().unwrap();
            tx.insert_link(&LinkRow {
                id: Uuid::new_v4(),
                kind: LinkKind::Internal,
                source: b,
                target: other.internal_id,
                relation: Relation::Contains,
            })
            .unwrap();
            tx.insert_link(&LinkRow {
                id: Uuid::new_v4(),
                kind: LinkKind::Internal,
                source: other.internal_id,
                target: a,
                relation: Relation::Contains,
            })
            .unwrap();
            tx.commit().unwrap();
        }

        let catalog = Catalog::open(&path, false).unwrap();
        assert!(!catalog.check().unwrap().is_empty());
        let error = catalog.put_requirement(&Requirement::new("D")).unwrap_err();
        assert!(matches!(error, CatalogError::FatalState { .. }));
        assert_eq!(catalog.export().unwrap().len(), 3);
    }
}
