use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use cre_catalog::{interchange, Catalog};
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Export the whole catalog as a CSV table")]
pub struct Export {
    /// Write the table to this file instead of standard output
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl Export {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let documents = catalog.export()?;
        let table = interchange::encode(&documents);

        match self.output {
            Some(path) => {
                table
                    .write(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                eprintln!(
                    "{}",
                    format!(
                        "Exported {} documents in {} rows to {}",
                        documents.len(),
                        table.rows().len(),
                        path.display()
                    )
                    .success()
                );
            }
            None => print!("{}", table.to_csv()),
        }
        Ok(())
    }
}
