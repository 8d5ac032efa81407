//! This bench test maps one standard onto another across a catalog whose
//! requirements form a few wide hierarchies.

#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, Criterion};
use cre_catalog::{Catalog, Document, Link, Node, Relation, Requirement};

const TREES: usize = 10;
const CHILDREN: usize = 50;

/// Seeds an in-memory catalog with `TREES` roots, each containing `CHILDREN`
/// requirements linked to one ASVS and one NIST section.
fn preseed_catalog() -> Catalog {
    let catalog = Catalog::open_in_memory().unwrap();
    let mut documents: Vec<Document> = Vec::new();
    for tree in 0..TREES {
        let mut root = Requirement::new(format!("Root {tree}"));
        for child in 0..CHILDREN {
            let name = format!("Child {tree}.{child}");
            root.links
                .push(Link::new(Relation::Contains, Requirement::new(&name).into()));

            let mut requirement = Requirement::new(name);
            for standard in ["ASVS", "NIST"] {
                requirement.links.push(Link::new(
                    Relation::LinkedTo,
                    Node::standard(standard, format!("{tree}.{child}"), "").into(),
                ));
            }
            documents.push(requirement.into());
        }
        documents.push(root.into());
    }
    catalog.import(&documents).unwrap();
    catalog
}

fn gap_analysis(c: &mut Criterion) {
    let catalog = preseed_catalog();
    c.bench_function("gap analysis", |b| {
        b.iter(|| catalog.gap_analysis("ASVS", "NIST").unwrap());
    });
}

criterion_group!(benches, gap_analysis);
criterion_main!(benches);
