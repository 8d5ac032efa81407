//! The flat export format.
//!
//! Columns are the three requirement columns, `Linked_CRE_<i>:<attribute>`
//! groups for requirement peers, then one group of
//! `<kind>:<name>:<attribute>` columns per external document. A row with an
//! empty `CRE:name` describes a standalone node.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::{
    domain::{
        CatalogError, Document, ExternalId, Link, Node, Relation, Requirement, ValidationError,
    },
    interchange::{
        build_node, link_type, node_groups, node_header, parse_node_header, Attribute, Decoded,
        GroupKey, Merged, Table,
    },
};

const CRE_ID: &str = "CRE:id";
const CRE_NAME: &str = "CRE:name";
const CRE_DESCRIPTION: &str = "CRE:description";
const LINKED_PREFIX: &str = "Linked_CRE_";
const LINKED_ATTRIBUTES: [&str; 3] = ["id", "name", "link_type"];

fn linked_header(index: usize, attribute: &str) -> String {
    format!("{LINKED_PREFIX}{index}:{attribute}")
}

/// Number of `Linked_CRE_<i>` groups, checking every header is recognised.
fn linked_groups(headers: &[String]) -> Result<usize, ValidationError> {
    let mut count = 0;
    for header in headers {
        if header.is_empty()
            || [CRE_ID, CRE_NAME, CRE_DESCRIPTION].contains(&header.as_str())
            || parse_node_header(header)?.is_some()
        {
            continue;
        }
        let linked = header
            .strip_prefix(LINKED_PREFIX)
            .and_then(|rest| rest.split_once(':'))
            .filter(|(_, attribute)| LINKED_ATTRIBUTES.contains(attribute))
            .and_then(|(index, _)| index.parse::<usize>().ok());
        match linked {
            Some(index) => count = count.max(index + 1),
            None => {
                return Err(ValidationError::Table(format!(
                    "unrecognised column '{header}'"
                )));
            }
        }
    }
    Ok(count)
}

/// Decode an export table into documents.
///
/// Rows sharing a requirement are merged, their links unioned. A `Contains`
/// link also yields the peer with a `PartOf` link back. A row with a
/// malformed cell, or one that disagrees with an earlier row on a
/// requirement's own fields, is skipped and listed in
/// [`Decoded::failures`].
///
/// # Errors
///
/// Returns [`CatalogError::Validation`] for unrecognised columns.
#[instrument(skip(table), fields(rows = table.rows().len()))]
pub fn decode(table: &Table) -> Result<Decoded, CatalogError> {
    let groups = node_groups(table.headers())?;
    let linked = linked_groups(table.headers())?;

    let rows: Vec<_> = table
        .rows()
        .par_iter()
        .map(|row| decode_row(table, &groups, linked, row).map_err(CatalogError::from))
        .collect();

    let mut merged = Merged::default();
    for (index, row) in rows.into_iter().enumerate() {
        merged.row(index + 1, row);
    }
    let decoded = merged.into_decoded();
    debug!(
        "Decoded {} documents, skipped {} rows",
        decoded.documents.len(),
        decoded.failures.len()
    );
    Ok(decoded)
}

fn decode_row(
    table: &Table,
    groups: &BTreeMap<GroupKey, BTreeMap<Attribute, usize>>,
    linked: usize,
    row: &[String],
) -> Result<Vec<Document>, ValidationError> {
    let mut documents = Vec::new();
    let mut nodes = Vec::new();

    for ((kind, name), columns) in groups {
        let value = |attribute: Attribute| {
            columns
                .get(&attribute)
                .and_then(|&i| row.get(i))
                .map_or("", |cell| cell.trim())
        };
        if columns.keys().all(|&attribute| value(attribute).is_empty()) {
            continue;
        }
        let relation = link_type(value(Attribute::LinkType), Relation::LinkedTo)?;
        nodes.push((relation, build_node(*kind, name, value)?));
    }

    let name = table.cell(row, CRE_NAME);
    if name.is_empty() {
        documents.extend(nodes.into_iter().map(|(_, node)| Document::from(node)));
        return Ok(documents);
    }

    let mut requirement =
        Requirement::new(name).with_description(table.cell(row, CRE_DESCRIPTION));
    let id = table.cell(row, CRE_ID);
    if !id.is_empty() {
        requirement = requirement.with_external_id(ExternalId::new(id)?);
    }
    let this = Document::from(requirement.clone());

    let mut links = Vec::new();
    for (relation, node) in nodes {
        links.push(Link::new(relation, node.into()));
    }
    for i in 0..linked {
        let peer_name = table.cell(row, &linked_header(i, "name"));
        let peer_id = table.cell(row, &linked_header(i, "id"));
        if peer_name.is_empty() && peer_id.is_empty() {
            continue;
        }
        if peer_name.is_empty() {
            return Err(ValidationError::Table(format!(
                "{} has an id but no name",
                linked_header(i, "name")
            )));
        }
        let mut peer = Requirement::new(peer_name);
        if !peer_id.is_empty() {
            peer = peer.with_external_id(ExternalId::new(peer_id)?);
        }
        let relation = link_type(
            table.cell(row, &linked_header(i, "link_type")),
            Relation::Related,
        )?;
        links.push(Link::new(relation, peer.into()));
    }

    for link in &links {
        if link.relation == Relation::Contains {
            let mut peer = link.document.clone();
            peer.add_link(Link::new(Relation::PartOf, this.clone()));
            documents.push(peer);
        }
    }

    requirement.links = links;
    documents.insert(0, requirement.into());
    Ok(documents)
}

/// Encode documents as an export table.
///
/// Each requirement gets as many rows as its largest group of links to one
/// external document. The requirement columns repeat on every row; peer
/// requirements and single links fill the first row. Nodes are written as
/// standalone rows only when they carry no links.
#[must_use]
pub fn encode(documents: &[Document]) -> Table {
    let requirements: Vec<&Requirement> = documents
        .iter()
        .filter_map(Document::as_requirement)
        .collect();
    let standalone: Vec<&Node> = documents
        .iter()
        .filter_map(Document::as_node)
        .filter(|node| node.links.is_empty())
        .collect();

    let mut groups: BTreeSet<GroupKey> = standalone
        .iter()
        .map(|node| (node.kind(), node.name.clone()))
        .collect();
    for requirement in &requirements {
        for link in &requirement.links {
            if let Some(node) = link.document.as_node() {
                groups.insert((node.kind(), node.name.clone()));
            }
        }
    }
    let linked = requirements
        .iter()
        .map(|r| {
            r.links
                .iter()
                .filter(|l| l.document.as_requirement().is_some())
                .count()
        })
        .max()
        .unwrap_or(0);

    let mut headers: Vec<String> = [CRE_ID, CRE_NAME, CRE_DESCRIPTION]
        .into_iter()
        .map(String::from)
        .collect();
    for i in 0..linked {
        headers.extend(LINKED_ATTRIBUTES.iter().map(|a| linked_header(i, a)));
    }
    for (kind, name) in &groups {
        headers.extend(
            Attribute::for_kind(*kind)
                .iter()
                .map(|&attribute| node_header(*kind, name, attribute)),
        );
    }

    let mut table = Table::new(headers);
    let width = table.headers().len();

    let mut rows = Vec::new();
    for requirement in requirements {
        let mut by_group: BTreeMap<GroupKey, Vec<(Relation, &Node)>> = BTreeMap::new();
        let mut peers = Vec::new();
        for link in &requirement.links {
            match &link.document {
                Document::Node(node) => by_group
                    .entry((node.kind(), node.name.clone()))
                    .or_default()
                    .push((link.relation, node)),
                Document::Requirement(peer) => peers.push((link.relation, peer)),
            }
        }

        let count = by_group.values().map(Vec::len).max().unwrap_or(0).max(1);
        for index in 0..count {
            let mut row = vec![String::new(); width];
            set(&table, &mut row, CRE_ID, requirement.external_id_str());
            set(&table, &mut row, CRE_NAME, &requirement.name);
            set(&table, &mut row, CRE_DESCRIPTION, &requirement.description);

            if index == 0 {
                for (i, (relation, peer)) in peers.iter().enumerate() {
                    set(&table, &mut row, &linked_header(i, "id"), peer.external_id_str());
                    set(&table, &mut row, &linked_header(i, "name"), &peer.name);
                    set(&table, &mut row, &linked_header(i, "link_type"), relation.as_str());
                }
            }
            for entries in by_group.values() {
                if let Some((relation, node)) = entries.get(index) {
                    write_node(&table, &mut row, node, relation.as_str());
                }
            }
            rows.push(row);
        }
    }

    for node in standalone {
        let mut row = vec![String::new(); width];
        write_node(&table, &mut row, node, "");
        rows.push(row);
    }

    for row in rows {
        table.push_fitted(row);
    }
    table
}

fn set(table: &Table, row: &mut [String], header: &str, value: &str) {
    if let Some(i) = table.position(header) {
        value.clone_into(&mut row[i]);
    }
}

fn write_node(table: &Table, row: &mut [String], node: &Node, link_type: &str) {
    let kind = node.kind();
    for &attribute in Attribute::for_kind(kind) {
        let value = if attribute == Attribute::LinkType {
            link_type
        } else {
            attribute.of(node)
        };
        set(table, row, &node_header(kind, &node.name, attribute), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Catalog;

    const TWO_SUBSECTIONS: &str = "\
CRE:id,CRE:name,CRE:description,Standard:ASVS:section,Standard:ASVS:subsection,Standard:ASVS:section_id,Standard:ASVS:hyperlink,Standard:ASVS:link_type
111-111,CA,Validate input,V5,V5.1,V5.1.1,https://asvs.example/5.1,Linked To
111-111,CA,Validate input,V5,V5.2,V5.2.1,https://asvs.example/5.2,Linked To
";

    #[test]
    fn two_subsections_encode_to_two_rows() {
        let table = Table::parse(TWO_SUBSECTIONS).unwrap();
        let documents = decode(&table).unwrap().documents;

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].links().len(), 2);

        let encoded = encode(&documents);
        assert_eq!(encoded.rows().len(), 2);
        assert_eq!(encoded.to_csv(), TWO_SUBSECTIONS);
    }

    #[test]
    fn other_columns_fill_the_first_row() {
        let mut ca = Requirement::new("CA")
            .with_external_id(ExternalId::new("111-111").unwrap());
        ca.links = vec![
            Link::new(Relation::LinkedTo, Node::standard("ASVS", "V5", "V5.1").into()),
            Link::new(Relation::LinkedTo, Node::standard("ASVS", "V5", "V5.2").into()),
            Link::new(Relation::LinkedTo, Node::code("Lib", "sanitizer").into()),
            Link::new(Relation::Related, Requirement::new("CB").into()),
        ];

        let table = encode(&[ca.into()]);
        let rows = table.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(table.cell(&rows[0], "Code:Lib:description"), "sanitizer");
        assert_eq!(table.cell(&rows[1], "Code:Lib:description"), "");
        assert_eq!(table.cell(&rows[0], "Linked_CRE_0:name"), "CB");
        assert_eq!(table.cell(&rows[1], "Linked_CRE_0:name"), "");
        assert_eq!(table.cell(&rows[1], "CRE:name"), "CA");
        assert_eq!(table.cell(&rows[1], "Standard:ASVS:subsection"), "V5.2");
    }

    #[test]
    fn contains_synthesizes_part_of_on_peer() {
        let table = Table::parse(
            "CRE:id,CRE:name,CRE:description,Linked_CRE_0:id,Linked_CRE_0:name,Linked_CRE_0:link_type\n\
             111-111,CA,,222-222,CB,Contains\n",
        )
        .unwrap();
        let documents = decode(&table).unwrap().documents;

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1].name(), "CB");
        assert_eq!(documents[1].links()[0].relation, Relation::PartOf);
        assert_eq!(documents[1].links()[0].document.name(), "CA");
    }

    #[test]
    fn empty_name_is_a_standalone_node() {
        let table = Table::parse(
            "CRE:id,CRE:name,Tool:ZAP:section,Tool:ZAP:tool_type\n\
             ,,10020,Offensive\n",
        )
        .unwrap();
        let documents = decode(&table).unwrap().documents;

        let node = documents[0].as_node().unwrap();
        assert_eq!(node.section(), "10020");
        assert!(node.links.is_empty());
        assert_eq!(encode(&documents).rows().len(), 1);
    }

    #[test]
    fn bad_rows_are_skipped() {
        let table = Table::parse(
            "CRE:id,CRE:name,CRE:description\n\
             111-111,Good,fine\n\
             12-34,Bad,malformed id\n\
             111-111,Good,changed\n\
             222-222,Other,\n",
        )
        .unwrap();
        let decoded = decode(&table).unwrap();

        let names: Vec<&str> = decoded.documents.iter().map(Document::name).collect();
        assert_eq!(names, ["Good", "Other"]);
        assert_eq!(
            decoded.documents[0].as_requirement().unwrap().description,
            "fine"
        );

        assert_eq!(decoded.failures.len(), 2);
        assert_eq!(decoded.failures[0].0, 2);
        assert!(matches!(decoded.failures[0].1, CatalogError::Validation(_)));
        assert_eq!(decoded.failures[1].0, 3);
        assert!(matches!(decoded.failures[1].1, CatalogError::Conflict(_)));
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let table = Table::parse("CRE:id,CRE:name,Colour\n").unwrap();
        assert!(decode(&table).is_err());

        let table = Table::parse("CRE:name,Linked_CRE_x:name\n").unwrap();
        assert!(decode(&table).is_err());
    }

    #[test]
    fn bad_link_type_skips_the_row() {
        let table = Table::parse(
            "CRE:name,Standard:ASVS:section,Standard:ASVS:link_type\nCA,V1,Sort Of\n",
        )
        .unwrap();
        let decoded = decode(&table).unwrap();
        assert!(decoded.documents.is_empty());
        assert!(matches!(
            decoded.failures[..],
            [(1, CatalogError::Validation(ValidationError::Relation(_)))]
        ));
    }

    #[test]
    fn catalog_export_round_trips() {
        let source = Table::parse(
            "CRE:id,CRE:name,CRE:description,Linked_CRE_0:id,Linked_CRE_0:name,Linked_CRE_0:link_type,Standard:ASVS:section,Standard:ASVS:subsection,Standard:ASVS:section_id,Standard:ASVS:hyperlink,Standard:ASVS:link_type\n\
             111-111,CA,Top,222-222,CB,Contains,V5,V5.1,,,Linked To\n\
             222-222,CB,Child,111-111,CA,Is Part Of,,,,,\n\
             ,,,,,,V9,,,https://asvs.example/9,\n",
        )
        .unwrap();

        let catalog = Catalog::open_in_memory().unwrap();
        let report = catalog.import(&decode(&source).unwrap().documents).unwrap();
        assert!(report.failures.is_empty());

        let exported = encode(&catalog.export().unwrap());
        let mut expected: Vec<_> = source.rows().to_vec();
        let mut actual: Vec<_> = exported.rows().to_vec();
        expected.sort();
        actual.sort();
        assert_eq!(exported.headers(), source.headers());
        assert_eq!(actual, expected);
    }
}
