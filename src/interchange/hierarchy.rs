//! The indented-outline format.
//!
//! Requirement names sit in `CRE hierarchy 1..N` columns, one level per
//! column. A row's requirement is its deepest non-empty hierarchy cell; its
//! parent is the next shallower non-empty cell on the same row, or failing
//! that the last requirement seen at a shallower level on an earlier row.

use tracing::{instrument, warn};

use crate::{
    domain::{
        CatalogError, Document, ExternalId, Link, Node, Relation, Requirement, ValidationError,
    },
    interchange::{build_node, link_type, node_groups, Attribute, Decoded, Merged, Table},
};

const HIERARCHY_PREFIX: &str = "CRE hierarchy ";
const CRE_ID: &str = "CRE ID";
const CRE_TAGS: &str = "CRE Tags";
const LINK_TO_OTHER: &str = "Link to other CRE";

/// Hierarchy column positions, shallowest first.
fn hierarchy_columns(table: &Table) -> Vec<usize> {
    let mut levels: Vec<(usize, usize)> = table
        .headers()
        .iter()
        .enumerate()
        .filter_map(|(position, header)| {
            header
                .strip_prefix(HIERARCHY_PREFIX)
                .and_then(|level| level.trim().parse::<usize>().ok())
                .map(|level| (level, position))
        })
        .collect();
    levels.sort_unstable();
    levels.into_iter().map(|(_, position)| position).collect()
}

fn split_list(cell: &str) -> impl Iterator<Item = &str> {
    cell.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Decode an outline table into documents.
///
/// Parents are linked to their children with `Contains`. Columns other than
/// the hierarchy, `CRE ID`, `CRE Tags`, `Link to other CRE` and
/// `<kind>:<name>:<attribute>` ones are ignored. A row with a malformed
/// cell, or one that disagrees with an earlier row on a requirement's
/// fields, is skipped and listed in [`Decoded::failures`]; its name still
/// counts as the parent of the rows below it.
///
/// # Errors
///
/// Returns [`CatalogError::Validation`] if the table has no hierarchy
/// column or a `<kind>:<name>:<attribute>` header is malformed.
#[instrument(skip(table), fields(rows = table.rows().len()))]
pub fn decode_hierarchy(table: &Table) -> Result<Decoded, CatalogError> {
    let levels = hierarchy_columns(table);
    if levels.is_empty() {
        return Err(
            ValidationError::Table(format!("no '{HIERARCHY_PREFIX}<n>' columns")).into(),
        );
    }
    node_groups(table.headers())?;

    let mut ancestors: Vec<Option<String>> = vec![None; levels.len()];
    let mut merged = Merged::default();

    for (index, row) in table.rows().iter().enumerate() {
        let number = index + 1;
        let names: Vec<&str> = levels
            .iter()
            .map(|&i| row.get(i).map_or("", |cell| cell.trim()))
            .collect();
        let Some(depth) = names.iter().rposition(|name| !name.is_empty()) else {
            match parse_standards(table, row) {
                Ok(nodes) if !nodes.is_empty() => {
                    warn!("Row {number} links standards to no requirement");
                }
                Ok(_) => {}
                Err(e) => merged.fail(number, e.into()),
            }
            continue;
        };
        let name = names[depth];

        let parent = names[..depth]
            .iter()
            .rev()
            .find(|n| !n.is_empty())
            .map(ToString::to_string)
            .or_else(|| ancestors[..depth].iter().rev().flatten().next().cloned());
        ancestors[depth] = Some(name.to_string());
        for deeper in &mut ancestors[depth + 1..] {
            *deeper = None;
        }

        merged.row(
            number,
            decode_row(table, row, name, parent).map_err(CatalogError::from),
        );
    }

    Ok(merged.into_decoded())
}

/// The row's requirement, then its parent containing it.
fn decode_row(
    table: &Table,
    row: &[String],
    name: &str,
    parent: Option<String>,
) -> Result<Vec<Document>, ValidationError> {
    let mut requirement =
        Requirement::new(name).with_tags(split_list(table.cell(row, CRE_TAGS)));
    let id = table.cell(row, CRE_ID);
    if !id.is_empty() {
        requirement = requirement.with_external_id(ExternalId::new(id)?);
    }
    let shallow = requirement.clone();

    for (relation, node) in parse_standards(table, row)? {
        requirement.links.push(Link::new(relation, node.into()));
    }
    for other in split_list(table.cell(row, LINK_TO_OTHER)) {
        requirement
            .links
            .push(Link::new(Relation::Related, Requirement::new(other).into()));
    }

    let mut documents = vec![requirement.into()];
    if let Some(parent) = parent {
        let mut parent = Requirement::new(parent);
        parent.links.push(Link::new(Relation::Contains, shallow.into()));
        documents.push(parent.into());
    }
    Ok(documents)
}

/// Decode the `<kind>:<name>:<attribute>` cells of a row into linked nodes.
///
/// A cell may hold several newline-separated entries; the n-th entries of
/// each attribute of one group describe the n-th node. The relation comes
/// from the `link_type` attribute and defaults to `LinkedTo`.
///
/// # Errors
///
/// Returns [`ValidationError`] for malformed headers, link types or tool
/// types.
pub fn parse_standards(
    table: &Table,
    row: &[String],
) -> Result<Vec<(Relation, Node)>, ValidationError> {
    let mut nodes = Vec::new();
    for ((kind, name), columns) in node_groups(table.headers())? {
        let entries: Vec<(Attribute, Vec<&str>)> = columns
            .iter()
            .map(|(&attribute, &i)| {
                let lines = row
                    .get(i)
                    .map(|cell| cell.lines().map(str::trim).collect())
                    .unwrap_or_default();
                (attribute, lines)
            })
            .collect();
        let count = entries.iter().map(|(_, lines)| lines.len()).max().unwrap_or(0);

        for index in 0..count {
            let value = |attribute: Attribute| {
                entries
                    .iter()
                    .find(|(a, _)| *a == attribute)
                    .and_then(|(_, lines)| lines.get(index).copied())
                    .unwrap_or("")
            };
            if entries.iter().all(|(a, _)| value(*a).is_empty()) {
                continue;
            }
            let relation = link_type(value(Attribute::LinkType), Relation::LinkedTo)?;
            nodes.push((relation, build_node(kind, &name, value)?));
        }
    }
    Ok(nodes)
}
