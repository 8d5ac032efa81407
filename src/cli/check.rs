use std::process;

use clap::Parser;
use cre_catalog::Catalog;
use serde::Serialize;
use tracing::instrument;

use super::{print_json, terminal::Colorize, OutputFormat};

#[derive(Debug, Parser)]
#[command(about = "Verify that the stored links and the graph index agree")]
pub struct Check {
    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    output: OutputFormat,
}

#[derive(Debug, Serialize)]
struct Summary {
    requirements: usize,
    nodes: usize,
    links: usize,
    problems: Vec<String>,
}

impl Check {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let (requirements, nodes, links) = catalog.read().store.counts()?;
        let summary = Summary {
            requirements,
            nodes,
            links,
            problems: catalog.check()?,
        };

        match self.output {
            OutputFormat::Json => print_json(&summary)?,
            OutputFormat::Pretty => Self::output_pretty(&summary),
        }

        if !summary.problems.is_empty() {
            process::exit(3);
        }
        Ok(())
    }

    fn output_pretty(summary: &Summary) {
        const MAX_DISPLAY: usize = 20;

        println!("{:<14} {}", "Requirements", summary.requirements);
        println!("{:<14} {}", "Nodes", summary.nodes);
        println!("{:<14} {}", "Links", summary.links);
        println!();

        if summary.problems.is_empty() {
            println!("Problems: {} ✅", "0".success());
            return;
        }
        println!(
            "Problems: {} ⚠️",
            summary.problems.len().to_string().failure()
        );
        for problem in summary.problems.iter().take(MAX_DISPLAY) {
            println!("  - {problem}");
        }
        if summary.problems.len() > MAX_DISPLAY {
            println!(
                "  - ... and {} more",
                summary.problems.len() - MAX_DISPLAY
            );
        }
    }
}
