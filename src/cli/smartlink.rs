use std::process;

use clap::Parser;
use cre_catalog::{Catalog, NodeKind};
use tracing::instrument;

#[derive(Debug, Parser)]
#[command(about = "Resolve a section of an external document to its hyperlink")]
pub struct Smartlink {
    /// Node kind: standard, tool or code
    kind: NodeKind,

    /// Name of the external document
    name: String,

    /// Section id, or failing that section, of the entry
    selector: String,
}

impl Smartlink {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let Some(hyperlink) = catalog.smartlink(self.kind, &self.name, &self.selector)? else {
            eprintln!(
                "No hyperlink for {}:{}:{}",
                self.kind, self.name, self.selector
            );
            process::exit(1);
        };
        println!("{hyperlink}");
        Ok(())
    }
}
