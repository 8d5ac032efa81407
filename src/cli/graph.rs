use std::process;

use clap::Parser;
use cre_catalog::{domain::ExternalId, Catalog, RequirementSelector};
use serde_json::json;
use tracing::instrument;

use super::{print_json, render, terminal::Colorize, OutputFormat};

#[derive(Debug, Parser)]
#[command(about = "List the requirements at the top of the hierarchy")]
pub struct Roots {
    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    output: OutputFormat,
}

impl Roots {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let roots = catalog.root_requirements()?;
        match self.output {
            OutputFormat::Json => print_json(&roots)?,
            OutputFormat::Pretty => {
                for requirement in &roots {
                    render::requirement(requirement);
                }
                println!("{}", format!("{} root requirements", roots.len()).dim());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
#[command(about = "Show the distance from a requirement to its nearest root")]
pub struct Depth {
    /// External id or exact name of the requirement
    requirement: String,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    output: OutputFormat,
}

impl Depth {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let selector = ExternalId::new(self.requirement.trim()).map_or_else(
            |_| RequirementSelector::Name(self.requirement.clone()),
            RequirementSelector::ExternalId,
        );
        let Some(requirement) = catalog.find_requirement(&selector, &[])? else {
            eprintln!("Requirement {selector} not found");
            process::exit(1);
        };

        let depth = catalog.hierarchy_depth(requirement.internal_id);
        match self.output {
            OutputFormat::Json => print_json(&json!({
                "requirement": requirement.label(),
                "depth": depth,
            }))?,
            OutputFormat::Pretty => println!("{}: {depth}", requirement.label().info()),
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
#[command(about = "Map the entries of one standard onto another")]
pub struct Gap {
    /// Name of the standard to map from
    from: String,

    /// Name of the standard to map to
    to: String,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    output: OutputFormat,
}

impl Gap {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let nodes = catalog.gap_analysis(&self.from, &self.to)?;
        match self.output {
            OutputFormat::Json => print_json(&nodes)?,
            OutputFormat::Pretty => {
                for node in &nodes {
                    let reached: Vec<String> = node
                        .links
                        .iter()
                        .filter(|link| link.document.name() == self.to)
                        .map(|link| link.document.label())
                        .collect();
                    println!("{}", node.label().info());
                    if reached.is_empty() {
                        println!("  {}", format!("no {} entries", self.to).warning());
                    }
                    for label in reached {
                        println!("  {label}");
                    }
                }
            }
        }
        Ok(())
    }
}
