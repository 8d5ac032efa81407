//! Durable storage of requirements, nodes and links.
//!
//! The [`EntityStore`] is the authority on uniqueness: every `put_*` call
//! resolves the incoming entity against the stored one by its natural key and
//! either enriches the stored entity or inserts a new one.

use std::{
    collections::BTreeSet,
    path::Path,
    str::FromStr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use rusqlite::{params, params_from_iter, types::Type, Connection, OptionalExtension, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{
    CatalogError, Document, ExternalId, Node, NodeDetail, NodeKind, Relation, Requirement,
    ToolType, ValidationError, VertexKey,
};

const REQUIREMENT_COLUMNS: &str = "r.id, r.external_id, r.name, r.description, r.tags";

const NODE_COLUMNS: &str = "n.id, n.kind, n.name, n.section, n.subsection, n.section_id, \
                            n.version, n.description, n.tool_type, n.hyperlink, n.tags";

/// Lookup keys for requirements.
///
/// Empty or absent keys are ignored. With `partial` set, each key matches as
/// a case-insensitive substring; otherwise matches are exact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementFilter {
    /// The `NNN-NNN` identifier.
    pub external_id: Option<String>,
    /// The internal UUID.
    pub internal_id: Option<String>,
    /// The requirement name.
    pub name: Option<String>,
    /// The requirement description.
    pub description: Option<String>,
    /// Switch between exact and substring matching.
    pub partial: bool,
}

impl RequirementFilter {
    /// Filter on external id.
    #[must_use]
    pub fn by_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Self::default()
        }
    }

    /// Filter on name.
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Filter on internal id.
    #[must_use]
    pub fn by_internal_id(internal_id: Uuid) -> Self {
        Self {
            internal_id: Some(internal_id.to_string()),
            ..Self::default()
        }
    }
}

/// Lookup keys for nodes.
///
/// At least one key must be non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    /// Document name.
    pub name: Option<String>,
    /// Section, or rule id for tools.
    pub section: Option<String>,
    /// Subsection.
    pub subsection: Option<String>,
    /// Section id.
    pub section_id: Option<String>,
    /// Version.
    pub version: Option<String>,
    /// Hyperlink.
    pub hyperlink: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Node kind. Always matched exactly.
    pub kind: Option<NodeKind>,
    /// Switch between exact and substring matching.
    pub partial: bool,
}

impl NodeFilter {
    /// Filter on document name.
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Whether no key is set. Empty strings count as unset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && [
                &self.name,
                &self.section,
                &self.subsection,
                &self.section_id,
                &self.version,
                &self.hyperlink,
                &self.description,
            ]
            .into_iter()
            .all(|key| key.as_deref().is_none_or(str::is_empty))
    }
}

/// A 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Page number, starting at 1. Zero is treated as 1.
    pub page: usize,
    /// Items per page. Zero is treated as 1.
    pub per_page: usize,
}

/// The two logical link tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// Requirement to requirement.
    Internal,
    /// Requirement to node.
    External,
}

impl LinkKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

/// A persisted link.
///
/// The source is always a requirement; the target is a requirement for
/// [`LinkKind::Internal`] links and a node for [`LinkKind::External`] ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRow {
    /// Row identity.
    pub id: Uuid,
    /// Which logical table the row belongs to.
    pub kind: LinkKind,
    /// Source requirement.
    pub source: Uuid,
    /// Target entity.
    pub target: Uuid,
    /// Relation from source to target.
    pub relation: Relation,
}

impl LinkRow {
    /// The source vertex.
    #[must_use]
    pub const fn source_vertex(&self) -> VertexKey {
        VertexKey::Requirement(self.source)
    }

    /// The target vertex.
    #[must_use]
    pub const fn target_vertex(&self) -> VertexKey {
        match self.kind {
            LinkKind::Internal => VertexKey::Requirement(self.target),
            LinkKind::External => VertexKey::Node(self.target),
        }
    }
}

/// SQLite-backed store of catalog entities.
#[derive(Debug)]
pub struct EntityStore {
    conn: Mutex<Connection>,
}

impl EntityStore {
    /// Opens (creating if necessary) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be
    /// created.
    pub fn open(path: &Path, wal: bool) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        if wal {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        debug!("Opened catalog database at {}", path.display());
        Self::init(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CatalogError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begins a write transaction for link rows.
    ///
    /// The transaction is rolled back when dropped without
    /// [`StoreTx::commit`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database refuses the transaction.
    pub fn begin(&self) -> Result<StoreTx<'_>, CatalogError> {
        let conn = self.conn();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(StoreTx {
            conn,
            finished: false,
        })
    }

    /// Insert a requirement, or return the stored one it matches.
    ///
    /// A stored requirement matches on `(name, external_id)`; failing that on
    /// `name` where the stored external id is empty; or, when the incoming
    /// external id is empty, on `(name, description)` and then on `name`
    /// alone. Empty fields of the match are filled from `requirement`.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyName`] if the name is blank.
    /// - [`CatalogError::Conflict`] if a populated field would change.
    #[instrument(level = "debug", skip(self, requirement), fields(name = %requirement.name))]
    pub fn put_requirement(&self, requirement: &Requirement) -> Result<Requirement, CatalogError> {
        if requirement.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let conn = self.conn();

        if let Some(mut stored) = match_requirement(&conn, requirement)? {
            if stored.enrich(requirement)? {
                conn.execute(
                    "UPDATE requirement SET external_id = ?2, description = ?3, tags = ?4 \
                     WHERE id = ?1",
                    params![
                        stored.internal_id.to_string(),
                        stored.external_id_str(),
                        stored.description,
                        tags_to_sql(&stored.tags),
                    ],
                )?;
                debug!("Enriched {}", stored.label());
            }
            return Ok(stored);
        }

        let mut inserted = Requirement {
            internal_id: Uuid::new_v4(),
            links: Vec::new(),
            ..requirement.clone()
        };
        inserted.name = inserted.name.trim().to_string();
        conn.execute(
            "INSERT INTO requirement (id, external_id, name, description, tags) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                inserted.internal_id.to_string(),
                inserted.external_id_str(),
                inserted.name,
                inserted.description,
                tags_to_sql(&inserted.tags),
            ],
        )?;
        debug!("Inserted {}", inserted.label());
        Ok(inserted)
    }

    /// Insert a node, or return the stored one with the same uniqueness
    /// tuple.
    ///
    /// The hyperlink of a matched node is overwritten; other attributes are
    /// only filled when empty.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyName`] if the name is blank.
    /// - [`CatalogError::Conflict`] if a populated field would change.
    #[instrument(level = "debug", skip(self, node), fields(name = %node.name))]
    pub fn put_node(&self, node: &Node) -> Result<Node, CatalogError> {
        if node.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let conn = self.conn();
        let key = node.key();

        let stored = conn
            .query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM node n WHERE n.name = ?1 AND n.section = ?2 \
                     AND n.subsection = ?3 AND n.kind = ?4 AND n.description = ?5 \
                     AND n.version = ?6"
                ),
                params![
                    key.name.trim(),
                    key.section,
                    key.subsection,
                    key.kind.as_str(),
                    key.description,
                    key.version
                ],
                |row| node_from_row(row),
            )
            .optional()?;

        if let Some(mut stored) = stored {
            if stored.enrich(node)? {
                conn.execute(
                    "UPDATE node SET section_id = ?2, tool_type = ?3, hyperlink = ?4, tags = ?5 \
                     WHERE id = ?1",
                    params![
                        stored.id.to_string(),
                        stored.section_id(),
                        tool_type_to_sql(&stored),
                        stored.hyperlink,
                        tags_to_sql(&stored.tags),
                    ],
                )?;
                debug!("Enriched {}", stored.label());
            }
            return Ok(stored);
        }

        let mut inserted = Node {
            id: Uuid::new_v4(),
            links: Vec::new(),
            ..node.clone()
        };
        inserted.name = inserted.name.trim().to_string();
        conn.execute(
            "INSERT INTO node (id, kind, name, section, subsection, section_id, version, \
             description, tool_type, hyperlink, tags) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                inserted.id.to_string(),
                inserted.kind().as_str(),
                inserted.name,
                inserted.section(),
                inserted.subsection(),
                inserted.section_id(),
                inserted.version(),
                inserted.description(),
                tool_type_to_sql(&inserted),
                inserted.hyperlink,
                tags_to_sql(&inserted.tags),
            ],
        )?;
        debug!("Inserted {}", inserted.label());
        Ok(inserted)
    }

    /// Look up requirements by any subset of their keys.
    ///
    /// A filter with no keys returns nothing rather than every requirement.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_requirements(
        &self,
        filter: &RequirementFilter,
    ) -> Result<Vec<Requirement>, CatalogError> {
        let mut conditions = Conditions::new(filter.partial);
        conditions.push("r.external_id", filter.external_id.as_deref());
        conditions.push("r.id", filter.internal_id.as_deref());
        conditions.push("r.name", filter.name.as_deref());
        conditions.push("r.description", filter.description.as_deref());

        if conditions.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {REQUIREMENT_COLUMNS} FROM requirement r WHERE {} \
             ORDER BY r.external_id, r.name",
            conditions.sql()
        );
        self.query_requirements(&sql, &conditions.params)
    }

    /// Look up nodes by any non-empty subset of their keys.
    ///
    /// With a [`PageRequest`], returns that page and the total number of
    /// pages; pages past the end are empty.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyFilter`] if no key is set.
    /// - [`CatalogError::Storage`] if the database query fails.
    pub fn get_nodes(
        &self,
        filter: &NodeFilter,
        page: Option<PageRequest>,
    ) -> Result<(Vec<Node>, Option<usize>), CatalogError> {
        if filter.is_empty() {
            return Err(ValidationError::EmptyFilter.into());
        }

        let mut conditions = Conditions::new(filter.partial);
        conditions.push("n.name", filter.name.as_deref());
        conditions.push("n.section", filter.section.as_deref());
        conditions.push("n.subsection", filter.subsection.as_deref());
        conditions.push("n.section_id", filter.section_id.as_deref());
        conditions.push("n.version", filter.version.as_deref());
        conditions.push("n.hyperlink", filter.hyperlink.as_deref());
        conditions.push("n.description", filter.description.as_deref());
        if let Some(kind) = filter.kind {
            conditions.push_exact("n.kind", kind.as_str());
        }

        let order = "ORDER BY n.name, n.section, n.subsection, n.section_id, n.description";
        let Some(page) = page else {
            let sql = format!(
                "SELECT {NODE_COLUMNS} FROM node n WHERE {} {order}",
                conditions.sql()
            );
            return Ok((self.query_nodes(&sql, &conditions.params)?, None));
        };

        let per_page = page.per_page.max(1);
        let page_number = page.page.max(1);
        let total: usize = {
            let conn = self.conn();
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM node n WHERE {}", conditions.sql()),
                params_from_iter(conditions.params.iter()),
                |row| row.get(0),
            )?;
            usize::try_from(count).unwrap_or_default()
        };
        let total_pages = total.div_ceil(per_page);

        let limit = sql_integer(per_page);
        let offset = sql_integer((page_number - 1).saturating_mul(per_page));
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM node n WHERE {} {order} LIMIT {limit} OFFSET {offset}",
            conditions.sql(),
        );
        Ok((
            self.query_nodes(&sql, &conditions.params)?,
            Some(total_pages),
        ))
    }

    /// Fetch a requirement by internal id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn requirement(&self, id: Uuid) -> Result<Option<Requirement>, CatalogError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                &format!("SELECT {REQUIREMENT_COLUMNS} FROM requirement r WHERE r.id = ?1"),
                [id.to_string()],
                |row| requirement_from_row(row, 0),
            )
            .optional()?)
    }

    /// Fetch a node by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn node(&self, id: Uuid) -> Result<Option<Node>, CatalogError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM node n WHERE n.id = ?1"),
                [id.to_string()],
                node_from_row,
            )
            .optional()?)
    }

    /// Fetch the entity behind a vertex, without links.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn document(&self, vertex: VertexKey) -> Result<Option<Document>, CatalogError> {
        Ok(match vertex {
            VertexKey::Requirement(id) => self.requirement(id)?.map(Document::from),
            VertexKey::Node(id) => self.node(id)?.map(Document::from),
        })
    }

    /// Every link touching `vertex`, normalized so that `vertex` is the
    /// source.
    ///
    /// Incoming links are reported with the inverse relation, so a parent's
    /// `Contains` is seen from the child as `PartOf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_links_of(&self, vertex: VertexKey) -> Result<Vec<(Document, Relation)>, CatalogError> {
        let conn = self.conn();
        let id = vertex.uuid().to_string();
        let mut links: Vec<(Document, Relation)> = Vec::new();

        match vertex {
            VertexKey::Requirement(_) => {
                let outgoing = format!(
                    "SELECT l.relation, {REQUIREMENT_COLUMNS} FROM link l \
                     JOIN requirement r ON r.id = l.target \
                     WHERE l.kind = 'internal' AND l.source = ?1 ORDER BY r.external_id, r.name"
                );
                let incoming = format!(
                    "SELECT l.relation, {REQUIREMENT_COLUMNS} FROM link l \
                     JOIN requirement r ON r.id = l.source \
                     WHERE l.kind = 'internal' AND l.target = ?1 ORDER BY r.external_id, r.name"
                );
                let nodes = format!(
                    "SELECT l.relation, {NODE_COLUMNS} FROM link l \
                     JOIN node n ON n.id = l.target \
                     WHERE l.kind = 'external' AND l.source = ?1 \
                     ORDER BY n.name, n.section, n.subsection"
                );

                let mut stmt = conn.prepare(&outgoing)?;
                for row in stmt.query_map([&id], |row| {
                    Ok((Document::from(requirement_from_row(row, 1)?), relation_from_row(row, 0)?))
                })? {
                    links.push(row?);
                }

                let mut stmt = conn.prepare(&incoming)?;
                for row in stmt.query_map([&id], |row| {
                    Ok((
                        Document::from(requirement_from_row(row, 1)?),
                        relation_from_row(row, 0)?.inverse(),
                    ))
                })? {
                    links.push(row?);
                }

                let mut stmt = conn.prepare(&nodes)?;
                for row in stmt.query_map([&id], |row| {
                    Ok((
                        Document::from(node_from_row_at(row, 1)?),
                        relation_from_row(row, 0)?,
                    ))
                })? {
                    links.push(row?);
                }
            }
            VertexKey::Node(_) => {
                let incoming = format!(
                    "SELECT l.relation, {REQUIREMENT_COLUMNS} FROM link l \
                     JOIN requirement r ON r.id = l.source \
                     WHERE l.kind = 'external' AND l.target = ?1 ORDER BY r.external_id, r.name"
                );
                let mut stmt = conn.prepare(&incoming)?;
                for row in stmt.query_map([&id], |row| {
                    Ok((
                        Document::from(requirement_from_row(row, 1)?),
                        relation_from_row(row, 0)?.inverse(),
                    ))
                })? {
                    links.push(row?);
                }
            }
        }

        Ok(links)
    }

    /// Find the link between two entities.
    ///
    /// Internal links match regardless of orientation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_link(
        &self,
        kind: LinkKind,
        source: Uuid,
        target: Uuid,
    ) -> Result<Option<LinkRow>, CatalogError> {
        let conn = self.conn();
        let sql = match kind {
            LinkKind::Internal => {
                "SELECT id, kind, source, target, relation FROM link WHERE kind = 'internal' \
                 AND ((source = ?1 AND target = ?2) OR (source = ?2 AND target = ?1))"
            }
            LinkKind::External => {
                "SELECT id, kind, source, target, relation FROM link WHERE kind = 'external' \
                 AND source = ?1 AND target = ?2"
            }
        };
        Ok(conn
            .query_row(sql, [source.to_string(), target.to_string()], link_from_row)
            .optional()?)
    }

    /// Every persisted link, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn all_links(&self) -> Result<Vec<LinkRow>, CatalogError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, kind, source, target, relation FROM link ORDER BY rowid")?;
        let rows = stmt.query_map([], link_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Every requirement, ordered by external id then name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn all_requirements(&self) -> Result<Vec<Requirement>, CatalogError> {
        self.query_requirements(
            &format!(
                "SELECT {REQUIREMENT_COLUMNS} FROM requirement r ORDER BY r.external_id, r.name"
            ),
            &[],
        )
    }

    /// Every node, ordered by kind, name and section.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn all_nodes(&self) -> Result<Vec<Node>, CatalogError> {
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM node n \
                 ORDER BY n.kind, n.name, n.section, n.subsection, n.description"
            ),
            &[],
        )
    }

    /// Requirements with `text` as a case-insensitive substring of any field.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn search_requirements(&self, text: &str) -> Result<Vec<Requirement>, CatalogError> {
        let sql = format!(
            "SELECT {REQUIREMENT_COLUMNS} FROM requirement r WHERE {} \
             ORDER BY r.external_id, r.name",
            any_column_contains(&["r.external_id", "r.name", "r.description", "r.tags"])
        );
        self.query_requirements(&sql, &[text.to_string()])
    }

    /// Nodes with `text` as a case-insensitive substring of any field.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn search_nodes(&self, text: &str) -> Result<Vec<Node>, CatalogError> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM node n WHERE {} \
             ORDER BY n.name, n.section, n.subsection",
            any_column_contains(&[
                "n.kind",
                "n.name",
                "n.section",
                "n.subsection",
                "n.section_id",
                "n.version",
                "n.description",
                "n.tool_type",
                "n.hyperlink",
                "n.tags",
            ])
        );
        self.query_nodes(&sql, &[text.to_string()])
    }

    /// Entities where every tag in `tags` is a case-sensitive substring of at
    /// least one of the entity's tags.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn tagged(&self, tags: &[String]) -> Result<Vec<Document>, CatalogError> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let prefilter = (1..=tags.len())
            .map(|i| format!("instr({{table}}.tags, ?{i}) > 0"))
            .collect::<Vec<_>>()
            .join(" AND ");

        let requirements = self.query_requirements(
            &format!(
                "SELECT {REQUIREMENT_COLUMNS} FROM requirement r WHERE {} \
                 ORDER BY r.external_id, r.name",
                prefilter.replace("{table}", "r")
            ),
            tags,
        )?;
        let nodes = self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM node n WHERE {} ORDER BY n.name, n.section",
                prefilter.replace("{table}", "n")
            ),
            tags,
        )?;

        Ok(requirements
            .into_iter()
            .map(Document::from)
            .chain(nodes.into_iter().map(Document::from))
            .filter(|doc| {
                tags.iter()
                    .all(|wanted| doc.tags().iter().any(|tag| tag.contains(wanted.as_str())))
            })
            .collect())
    }

    /// Number of stored requirements, nodes and links.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn counts(&self) -> Result<(usize, usize, usize), CatalogError> {
        let conn = self.conn();
        let count = |table: &str| -> Result<usize, CatalogError> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(usize::try_from(n).unwrap_or_default())
        };
        Ok((count("requirement")?, count("node")?, count("link")?))
    }

    fn query_requirements(
        &self,
        sql: &str,
        params: &[String],
    ) -> Result<Vec<Requirement>, CatalogError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            requirement_from_row(row, 0)
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn query_nodes(&self, sql: &str, params: &[String]) -> Result<Vec<Node>, CatalogError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), node_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

/// An open write transaction over link rows.
///
/// Rolled back on drop unless committed.
#[derive(Debug)]
pub struct StoreTx<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl StoreTx<'_> {
    /// Insert a new link row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row violates a constraint or the write fails.
    pub fn insert_link(&self, row: &LinkRow) -> Result<(), CatalogError> {
        self.conn.execute(
            "INSERT INTO link (id, kind, source, target, relation) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id.to_string(),
                row.kind.as_str(),
                row.source.to_string(),
                row.target.to_string(),
                row.relation.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Rewrite the endpoints and relation of an existing link row in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn update_link(&self, row: &LinkRow) -> Result<(), CatalogError> {
        self.conn.execute(
            "UPDATE link SET source = ?2, target = ?3, relation = ?4 WHERE id = ?1",
            params![
                row.id.to_string(),
                row.source.to_string(),
                row.target.to_string(),
                row.relation.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails, in which case the transaction is
    /// rolled back.
    pub fn commit(mut self) -> Result<(), CatalogError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for StoreTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!("Failed to roll back link transaction: {e}");
            }
        }
    }
}

fn match_requirement(
    conn: &Connection,
    requirement: &Requirement,
) -> Result<Option<Requirement>, CatalogError> {
    let name = requirement.name.trim();
    let select = |condition: &str, params: &[&str]| -> Result<Option<Requirement>, CatalogError> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {REQUIREMENT_COLUMNS} FROM requirement r WHERE {condition} \
                     ORDER BY r.rowid LIMIT 1"
                ),
                params_from_iter(params.iter()),
                |row| requirement_from_row(row, 0),
            )
            .optional()?)
    };

    let found = if let Some(external_id) = &requirement.external_id {
        let by_pair = select("r.name = ?1 AND r.external_id = ?2", &[name, external_id.as_str()])?;
        match by_pair {
            Some(found) => Some(found),
            None => match select("r.name = ?1 AND r.external_id = ''", &[name])? {
                Some(found) => Some(found),
                None => select("r.name = ?1", &[name])?,
            },
        }
    } else {
        match select(
            "r.name = ?1 AND r.description = ?2",
            &[name, requirement.description.as_str()],
        )? {
            Some(found) => Some(found),
            None => select("r.name = ?1", &[name])?,
        }
    };

    debug!(
        "{} {}",
        if found.is_some() { "Matched" } else { "No match for" },
        requirement.label()
    );
    Ok(found)
}

/// Accumulates `WHERE` conditions and their positional parameters.
/// SQLite integers are `i64`; larger counts saturate.
fn sql_integer(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

struct Conditions {
    partial: bool,
    clauses: Vec<String>,
    params: Vec<String>,
}

impl Conditions {
    const fn new(partial: bool) -> Self {
        Self {
            partial,
            clauses: Vec::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, column: &str, value: Option<&str>) {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            return;
        };
        if self.partial {
            self.params.push(value.to_string());
            self.clauses.push(format!(
                "instr(lower({column}), lower(?{})) > 0",
                self.params.len()
            ));
        } else {
            self.push_exact(column, value);
        }
    }

    fn push_exact(&mut self, column: &str, value: &str) {
        self.params.push(value.to_string());
        self.clauses
            .push(format!("{column} = ?{}", self.params.len()));
    }

    const fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    fn sql(&self) -> String {
        self.clauses.join(" AND ")
    }
}

fn any_column_contains(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| format!("instr(lower({column}), lower(?1)) > 0"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn conversion_error<E>(index: usize, error: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}

fn uuid_from_row(row: &Row, index: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(index)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(index, e))
}

fn relation_from_row(row: &Row, index: usize) -> rusqlite::Result<Relation> {
    let text: String = row.get(index)?;
    Relation::from_str(&text).map_err(|e| conversion_error(index, e))
}

fn tags_from_row(row: &Row, index: usize) -> rusqlite::Result<BTreeSet<String>> {
    let text: String = row.get(index)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(index, e))
}

fn tags_to_sql(tags: &BTreeSet<String>) -> String {
    serde_json::Value::from(tags.iter().cloned().collect::<Vec<_>>()).to_string()
}

fn tool_type_to_sql(node: &Node) -> &'static str {
    node.tool_type().map_or("", ToolType::as_str)
}

fn requirement_from_row(row: &Row, offset: usize) -> rusqlite::Result<Requirement> {
    let external_id: String = row.get(offset + 1)?;
    let external_id = if external_id.is_empty() {
        None
    } else {
        Some(ExternalId::new(&external_id).map_err(|e| conversion_error(offset + 1, e))?)
    };

    Ok(Requirement {
        internal_id: uuid_from_row(row, offset)?,
        external_id,
        name: row.get(offset + 2)?,
        description: row.get(offset + 3)?,
        tags: tags_from_row(row, offset + 4)?,
        links: Vec::new(),
    })
}

fn node_from_row(row: &Row) -> rusqlite::Result<Node> {
    node_from_row_at(row, 0)
}

fn node_from_row_at(row: &Row, offset: usize) -> rusqlite::Result<Node> {
    let kind: String = row.get(offset + 1)?;
    let kind = NodeKind::from_str(&kind).map_err(|e| conversion_error(offset + 1, e))?;
    let section: String = row.get(offset + 3)?;
    let description: String = row.get(offset + 7)?;

    let detail = match kind {
        NodeKind::Standard => NodeDetail::Standard {
            section,
            subsection: row.get(offset + 4)?,
            section_id: row.get(offset + 5)?,
            version: row.get(offset + 6)?,
        },
        NodeKind::Tool => {
            let tool_type: String = row.get(offset + 8)?;
            NodeDetail::Tool {
                rule_id: section,
                tool_type: ToolType::from_str(&tool_type)
                    .map_err(|e| conversion_error(offset + 8, e))?,
                description,
            }
        }
        NodeKind::Code => NodeDetail::Code { description },
    };

    Ok(Node {
        id: uuid_from_row(row, offset)?,
        name: row.get(offset + 2)?,
        hyperlink: row.get(offset + 9)?,
        tags: tags_from_row(row, offset + 10)?,
        detail,
        links: Vec::new(),
    })
}

fn link_from_row(row: &Row) -> rusqlite::Result<LinkRow> {
    let kind: String = row.get(1)?;
    let kind = if kind == LinkKind::Internal.as_str() {
        LinkKind::Internal
    } else {
        LinkKind::External
    };
    Ok(LinkRow {
        id: uuid_from_row(row, 0)?,
        kind,
        source: uuid_from_row(row, 2)?,
        target: uuid_from_row(row, 3)?,
        relation: relation_from_row(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(s: &str) -> ExternalId {
        ExternalId::new(s).unwrap()
    }

    fn link(store: &EntityStore, kind: LinkKind, source: Uuid, target: Uuid, relation: Relation) {
        let tx = store.begin().unwrap();
        tx.insert_link(&LinkRow {
            id: Uuid::new_v4(),
            kind,
            source,
            target,
            relation,
        })
        .unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn put_requirement_is_idempotent() {
        let store = EntityStore::open_in_memory().unwrap();
        let first = store
            .put_requirement(&Requirement::new("CA").with_external_id(ext("111-111")))
            .unwrap();
        let second = store
            .put_requirement(&Requirement::new("CA").with_external_id(ext("111-111")))
            .unwrap();

        assert_eq!(first.internal_id, second.internal_id);
        assert_eq!(store.counts().unwrap().0, 1);
    }

    #[test]
    fn put_requirement_generates_fresh_id() {
        let store = EntityStore::open_in_memory().unwrap();
        let incoming = Requirement::new("CA");
        let stored = store.put_requirement(&incoming).unwrap();
        assert_ne!(stored.internal_id, incoming.internal_id);
    }

    #[test]
    fn put_requirement_enriches_empty_external_id() {
        let store = EntityStore::open_in_memory().unwrap();
        let first = store.put_requirement(&Requirement::new("CA")).unwrap();
        let second = store
            .put_requirement(&Requirement::new("CA").with_external_id(ext("111-111")))
            .unwrap();

        assert_eq!(first.internal_id, second.internal_id);
        let stored = store.requirement(first.internal_id).unwrap().unwrap();
        assert_eq!(stored.external_id, Some(ext("111-111")));
    }

    #[test]
    fn put_requirement_rejects_external_id_overwrite() {
        let store = EntityStore::open_in_memory().unwrap();
        store
            .put_requirement(&Requirement::new("CA").with_external_id(ext("111-111")))
            .unwrap();
        let error = store
            .put_requirement(&Requirement::new("CA").with_external_id(ext("222-222")))
            .unwrap_err();
        assert!(matches!(error, CatalogError::Conflict(_)));
    }

    #[test]
    fn monotone_enrichment_survives_empty_put() {
        let store = EntityStore::open_in_memory().unwrap();
        let stored = store
            .put_requirement(&Requirement::new("CA").with_description("validate"))
            .unwrap();
        store.put_requirement(&Requirement::new("CA")).unwrap();

        let reloaded = store.requirement(stored.internal_id).unwrap().unwrap();
        assert_eq!(reloaded.description, "validate");
    }

    #[test]
    fn put_requirement_rejects_blank_name() {
        let store = EntityStore::open_in_memory().unwrap();
        let error = store.put_requirement(&Requirement::new("  ")).unwrap_err();
        assert!(matches!(
            error,
            CatalogError::Validation(ValidationError::EmptyName)
        ));
    }

    #[test]
    fn put_node_overwrites_hyperlink_only() {
        let store = EntityStore::open_in_memory().unwrap();
        let first = store
            .put_node(&Node::standard("ASVS", "V5", "V5.1").with_hyperlink("https://a"))
            .unwrap();
        let second = store
            .put_node(&Node::standard("ASVS", "V5", "V5.1").with_hyperlink("https://b"))
            .unwrap();

        assert_eq!(first.id, second.id);
        let reloaded = store.node(first.id).unwrap().unwrap();
        assert_eq!(reloaded.hyperlink, "https://b");
        assert_eq!(store.counts().unwrap().1, 1);
    }

    #[test]
    fn put_node_distinguishes_kinds() {
        let store = EntityStore::open_in_memory().unwrap();
        let standard = store.put_node(&Node::standard("ZAP", "", "")).unwrap();
        let tool = store
            .put_node(&Node::tool("ZAP", "", ToolType::Offensive))
            .unwrap();
        assert_ne!(standard.id, tool.id);

        let reloaded = store.node(tool.id).unwrap().unwrap();
        assert_eq!(reloaded.tool_type(), Some(ToolType::Offensive));
    }

    #[test]
    fn get_requirements_without_keys_is_empty() {
        let store = EntityStore::open_in_memory().unwrap();
        store.put_requirement(&Requirement::new("CA")).unwrap();
        assert!(
            store
                .get_requirements(&RequirementFilter::default())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn get_requirements_partial_is_case_insensitive() {
        let store = EntityStore::open_in_memory().unwrap();
        store
            .put_requirement(&Requirement::new("Input Validation"))
            .unwrap();
        store.put_requirement(&Requirement::new("Logging")).unwrap();

        let exact = store
            .get_requirements(&RequirementFilter::by_name("validation"))
            .unwrap();
        assert!(exact.is_empty());

        let partial = store
            .get_requirements(&RequirementFilter {
                partial: true,
                ..RequirementFilter::by_name("validation")
            })
            .unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].name, "Input Validation");
    }

    #[test]
    fn get_nodes_requires_a_key() {
        let store = EntityStore::open_in_memory().unwrap();
        let error = store.get_nodes(&NodeFilter::default(), None).unwrap_err();
        assert!(matches!(
            error,
            CatalogError::Validation(ValidationError::EmptyFilter)
        ));

        let blank = NodeFilter {
            name: Some(String::new()),
            ..NodeFilter::default()
        };
        assert!(store.get_nodes(&blank, None).is_err());
    }

    #[test]
    fn get_nodes_paginates() {
        let store = EntityStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .put_node(&Node::standard("ASVS", format!("V{i}"), ""))
                .unwrap();
        }
        let filter = NodeFilter::by_name("ASVS");

        let (items, total) = store
            .get_nodes(&filter, Some(PageRequest { page: 2, per_page: 2 }))
            .unwrap();
        assert_eq!(total, Some(3));
        assert_eq!(
            items.iter().map(Node::section).collect::<Vec<_>>(),
            vec!["V2", "V3"]
        );

        let (items, total) = store
            .get_nodes(&filter, Some(PageRequest { page: 9, per_page: 2 }))
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(total, Some(3));
    }

    #[test]
    fn oversized_pages_saturate() {
        let store = EntityStore::open_in_memory().unwrap();
        for i in 0..3 {
            store
                .put_node(&Node::standard("ASVS", format!("V{i}"), ""))
                .unwrap();
        }
        let filter = NodeFilter::by_name("ASVS");

        let (items, total) = store
            .get_nodes(
                &filter,
                Some(PageRequest {
                    page: 1,
                    per_page: usize::MAX,
                }),
            )
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(total, Some(1));

        let (items, total) = store
            .get_nodes(
                &filter,
                Some(PageRequest {
                    page: 2,
                    per_page: usize::MAX,
                }),
            )
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(total, Some(1));
    }

    #[test]
    fn links_are_normalized_to_the_caller() {
        let store = EntityStore::open_in_memory().unwrap();
        let parent = store.put_requirement(&Requirement::new("Parent")).unwrap();
        let child = store.put_requirement(&Requirement::new("Child")).unwrap();
        let node = store.put_node(&Node::standard("ASVS", "V1", "")).unwrap();

        link(
            &store,
            LinkKind::Internal,
            parent.internal_id,
            child.internal_id,
            Relation::Contains,
        );
        link(
            &store,
            LinkKind::External,
            child.internal_id,
            node.id,
            Relation::RemediatedBy,
        );

        let from_child = store
            .get_links_of(VertexKey::Requirement(child.internal_id))
            .unwrap();
        assert_eq!(from_child.len(), 2);
        assert!(
            from_child
                .iter()
                .any(|(doc, rel)| doc.name() == "Parent" && *rel == Relation::PartOf)
        );
        assert!(
            from_child
                .iter()
                .any(|(doc, rel)| doc.name() == "ASVS" && *rel == Relation::RemediatedBy)
        );

        let from_node = store.get_links_of(VertexKey::Node(node.id)).unwrap();
        assert_eq!(from_node.len(), 1);
        assert_eq!(from_node[0].1, Relation::Remediates);
    }

    #[test]
    fn internal_links_are_unique_on_unordered_pair() {
        let store = EntityStore::open_in_memory().unwrap();
        let a = store.put_requirement(&Requirement::new("A")).unwrap();
        let b = store.put_requirement(&Requirement::new("B")).unwrap();
        link(
            &store,
            LinkKind::Internal,
            a.internal_id,
            b.internal_id,
            Relation::Related,
        );

        let tx = store.begin().unwrap();
        let result = tx.insert_link(&LinkRow {
            id: Uuid::new_v4(),
            kind: LinkKind::Internal,
            source: b.internal_id,
            target: a.internal_id,
            relation: Relation::Related,
        });
        assert!(result.is_err());
        drop(tx);

        assert!(
            store
                .find_link(LinkKind::Internal, b.internal_id, a.internal_id)
                .unwrap()
                .is_some()
        );
        assert_eq!(store.counts().unwrap().2, 1);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = EntityStore::open_in_memory().unwrap();
        let a = store.put_requirement(&Requirement::new("A")).unwrap();
        let b = store.put_requirement(&Requirement::new("B")).unwrap();

        let tx = store.begin().unwrap();
        tx.insert_link(&LinkRow {
            id: Uuid::new_v4(),
            kind: LinkKind::Internal,
            source: a.internal_id,
            target: b.internal_id,
            relation: Relation::Contains,
        })
        .unwrap();
        drop(tx);

        assert!(store.all_links().unwrap().is_empty());
    }

    #[test]
    fn tagged_requires_every_tag_as_substring() {
        let store = EntityStore::open_in_memory().unwrap();
        store
            .put_requirement(&Requirement::new("A").with_tags(["authentication", "web"]))
            .unwrap();
        store
            .put_requirement(&Requirement::new("B").with_tags(["authentication"]))
            .unwrap();
        store
            .put_node(&Node::standard("ASVS", "V2", "").with_tags(["web-auth"]))
            .unwrap();

        let names = |tags: &[&str]| -> Vec<String> {
            let tags: Vec<String> = tags.iter().map(ToString::to_string).collect();
            store
                .tagged(&tags)
                .unwrap()
                .iter()
                .map(|d| d.name().to_string())
                .collect()
        };

        assert_eq!(names(&["auth", "web"]), vec!["A", "ASVS"]);
        assert_eq!(names(&["authentication"]), vec!["A", "B"]);
        assert!(names(&["Auth"]).is_empty());
    }

    #[test]
    fn search_matches_any_field() {
        let store = EntityStore::open_in_memory().unwrap();
        store
            .put_requirement(&Requirement::new("CA").with_description("Session Tokens"))
            .unwrap();
        store
            .put_node(&Node::standard("SB", "sa", "sbb").with_hyperlink("https://tokens.example"))
            .unwrap();

        assert_eq!(store.search_requirements("session").unwrap().len(), 1);
        assert_eq!(store.search_nodes("TOKENS").unwrap().len(), 1);
        assert!(store.search_nodes("nothing").unwrap().is_empty());
    }

    #[test]
    fn reopens_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("catalog.sqlite");

        let id = {
            let store = EntityStore::open(&path, true).unwrap();
            store
                .put_requirement(&Requirement::new("CA").with_external_id(ext("111-111")))
                .unwrap()
                .internal_id
        };

        let store = EntityStore::open(&path, true).unwrap();
        let found = store
            .get_requirements(&RequirementFilter::by_external_id("111-111"))
            .unwrap();
        assert_eq!(found[0].internal_id, id);
    }
}
