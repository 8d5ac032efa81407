use clap::Parser;
use cre_catalog::{storage::NodeFilter, Catalog, NodeKind};
use tracing::instrument;

use super::{print_json, render, terminal::Colorize, OutputFormat};

#[derive(Debug, Parser)]
#[command(about = "Look up external document entries")]
pub struct Nodes {
    /// Node kind: standard, tool or code
    kind: NodeKind,

    /// Name of the external document, e.g. `ASVS`
    name: String,

    /// Section, or rule id for tools
    #[arg(long)]
    section: Option<String>,

    /// Subsection
    #[arg(long)]
    subsection: Option<String>,

    /// Section id
    #[arg(long)]
    section_id: Option<String>,

    /// Version
    #[arg(long)]
    version: Option<String>,

    /// Hyperlink
    #[arg(long)]
    hyperlink: Option<String>,

    /// Description
    #[arg(long)]
    description: Option<String>,

    /// Match attributes as case-insensitive substrings
    #[arg(long)]
    partial: bool,

    /// Page to show, starting at 1
    #[arg(long)]
    page: Option<usize>,

    /// Entries per page, defaulting to the configured page size
    #[arg(long)]
    per_page: Option<usize>,

    /// Only show links to these peers, by name or external id
    #[arg(long, value_delimiter = ',', value_name = "PEER")]
    include_only: Vec<String>,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    output: OutputFormat,
}

impl Nodes {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let filter = NodeFilter {
            name: Some(self.name),
            section: self.section,
            subsection: self.subsection,
            section_id: self.section_id,
            version: self.version,
            hyperlink: self.hyperlink,
            description: self.description,
            kind: None,
            partial: self.partial,
        };
        let page = catalog.find_nodes(
            self.kind,
            filter,
            self.page,
            self.per_page,
            &self.include_only,
        )?;

        match self.output {
            OutputFormat::Json => print_json(&page)?,
            OutputFormat::Pretty => {
                if page.items.is_empty() {
                    println!("{}", "No matches".dim());
                }
                for node in &page.items {
                    render::node(node);
                }
                if page.total_pages > 1 {
                    println!(
                        "{}",
                        format!("Page {} of {}", page.page, page.total_pages).dim()
                    );
                }
            }
        }
        Ok(())
    }
}
