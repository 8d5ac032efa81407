use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use cre_catalog::{
    interchange,
    interchange::{Decoded, Table},
    Catalog,
};
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Import CSV files into the catalog")]
pub struct Import {
    /// Files or directories to import. Directories are searched for `*.csv`.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Layout of the input tables
    #[arg(long, value_enum, default_value_t)]
    format: Format,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum Format {
    /// One row per requirement with `CRE:*`, `Linked_CRE_*` and node columns
    #[default]
    Export,
    /// `CRE hierarchy N` outline columns
    Hierarchy,
}

impl Import {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let files = self.files()?;
        if files.is_empty() {
            anyhow::bail!("No CSV files found");
        }

        let mut failures = 0;
        for file in &files {
            let label = format!("{}:", file.display());
            let decoded = match self.decode(file) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Skipping {}: {e:#}", file.display());
                    println!("{} {} {e:#}", label.info(), "✗".failure());
                    failures += 1;
                    continue;
                }
            };
            for (row, reason) in &decoded.failures {
                println!("  {} row {row}: {reason}", "✗".failure());
            }
            failures += decoded.failures.len();

            let report = catalog
                .import(&decoded.documents)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            info!("{}: {report}", file.display());

            println!("{} {report}", label.info());
            for (document, reason) in &report.failures {
                println!("  {} {document}: {reason}", "✗".failure());
            }
            failures += report.failures.len();
        }

        if failures == 0 {
            println!("{}", "Import complete ✅".success());
        } else {
            println!(
                "{}",
                format!("Import complete, {failures} files, rows or documents skipped").warning()
            );
        }
        Ok(())
    }

    fn decode(&self, file: &Path) -> anyhow::Result<Decoded> {
        let table = Table::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        let decoded = match self.format {
            Format::Export => interchange::decode(&table),
            Format::Hierarchy => interchange::decode_hierarchy(&table),
        };
        decoded.with_context(|| format!("Failed to decode {}", file.display()))
    }

    fn files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for path in &self.paths {
            if !path.is_dir() {
                files.push(path.clone());
                continue;
            }
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                let is_csv = entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
                if entry.file_type().is_file() && is_csv {
                    files.push(entry.into_path());
                }
            }
        }
        Ok(files)
    }
}
