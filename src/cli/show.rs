use std::process;

use clap::Parser;
use cre_catalog::{Catalog, RequirementSelector};
use tracing::instrument;
use uuid::Uuid;

use super::{print_json, render, OutputFormat};

#[derive(Debug, Parser)]
#[command(about = "Show a requirement and its links")]
pub struct Show {
    #[command(flatten)]
    selector: Selector,

    /// Only show links to these peers, by name or external id
    #[arg(long, value_delimiter = ',', value_name = "PEER")]
    include_only: Vec<String>,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    output: OutputFormat,
}

#[derive(Debug, clap::Args)]
#[group(required = true, multiple = false)]
struct Selector {
    /// External id, e.g. `616-305`
    #[arg(long)]
    id: Option<String>,

    /// Exact requirement name
    #[arg(long)]
    name: Option<String>,

    /// Internal id
    #[arg(long)]
    uuid: Option<Uuid>,
}

impl Selector {
    fn resolve(self) -> anyhow::Result<RequirementSelector> {
        let selector = match (self.id, self.name, self.uuid) {
            (Some(id), _, _) => RequirementSelector::ExternalId(id.trim().parse()?),
            (_, Some(name), _) => RequirementSelector::Name(name),
            (_, _, Some(uuid)) => RequirementSelector::InternalId(uuid),
            (None, None, None) => anyhow::bail!("One of --id, --name or --uuid is required"),
        };
        Ok(selector)
    }
}

impl Show {
    #[instrument(level = "debug", skip(self, catalog))]
    pub fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        let selector = self.selector.resolve()?;
        let Some(requirement) = catalog.find_requirement(&selector, &self.include_only)? else {
            eprintln!("Requirement {selector} not found");
            process::exit(1);
        };

        match self.output {
            OutputFormat::Pretty => render::requirement(&requirement),
            OutputFormat::Json => print_json(&requirement)?,
        }
        Ok(())
    }
}
