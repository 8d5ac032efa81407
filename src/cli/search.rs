use clap::Parser;
use cre_catalog::Catalog;
use tracing::instrument;

use super::{print_json, render, OutputFormat};

#[derive(Debug, Parser)]
#[command(about = "Free-text search over requirements and nodes")]
pub struct Search {
    /// The query. Several words are joined with spaces.
    #[arg(required = true)]
    query: Vec<String>,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    output: OutputFormat,
}

impl Search {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let documents = catalog.text_search(&self.query.join(" "))?;
        match self.output {
            OutputFormat::Pretty => render::documents(&documents),
            OutputFormat::Json => print_json(&documents)?,
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
#[command(about = "Find requirements and nodes carrying every given tag")]
pub struct Tags {
    /// Tags to match (comma-separated or repeated). Each matches as a
    /// substring of one of the entity's tags.
    #[arg(required = true, value_delimiter = ',')]
    tags: Vec<String>,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    output: OutputFormat,
}

impl Tags {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let documents = catalog.find_by_tags(&self.tags)?;
        match self.output {
            OutputFormat::Pretty => render::documents(&documents),
            OutputFormat::Json => print_json(&documents)?,
        }
        Ok(())
    }
}
