//! Pretty rendering of catalog entities.

use std::collections::BTreeSet;

use cre_catalog::{Document, Link, Node, Requirement};

use super::terminal::{is_narrow, Colorize};

pub fn requirement(requirement: &Requirement) {
    println!("{}", requirement.label().info());
    if !requirement.description.is_empty() {
        println!("  {}", requirement.description);
    }
    tags(&requirement.tags);
    links(&requirement.links);
}

pub fn node(node: &Node) {
    println!("{}", node.label().info());
    if !node.hyperlink.is_empty() {
        println!("  {}", node.hyperlink.dim());
    }
    tags(&node.tags);
    links(&node.links);
}

pub fn document(document: &Document) {
    match document {
        Document::Requirement(r) => requirement(r),
        Document::Node(n) => node(n),
    }
}

pub fn documents(documents: &[Document]) {
    if documents.is_empty() {
        println!("{}", "No matches".dim());
    }
    for document in documents {
        self::document(document);
    }
}

fn tags(tags: &BTreeSet<String>) {
    if !tags.is_empty() {
        let joined = tags.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
        println!("  {} {joined}", "tags:".dim());
    }
}

fn links(links: &[Link]) {
    let narrow = is_narrow();
    for link in links {
        let relation = link.relation.as_str();
        if narrow {
            println!("  {}", relation.dim());
            println!("    {}", link.document.label());
        } else {
            println!("  {} {}", format!("{relation:<24}").dim(), link.document.label());
        }
    }
}
