use std::{io::Write, path::PathBuf};

mod check;
mod export;
mod graph;
mod import;
mod nodes;
mod render;
mod search;
mod show;
mod smartlink;
mod terminal;

use anyhow::Context;
use check::Check;
use clap::ArgAction;
use cre_catalog::{Catalog, Config};
use export::Export;
use graph::{Depth, Gap, Roots};
use import::Import;
use nodes::Nodes;
use search::{Search, Tags};
use serde::Serialize;
use show::Show;
use smartlink::Smartlink;
use tracing::debug;

#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path of the configuration file
    #[arg(short, long, default_value = "cre.toml", global = true)]
    config: PathBuf,

    /// Path of the catalog database, overriding the configuration file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        Self::setup_logging(self.verbose);

        let mut config = Config::load_or_default(&self.config);
        if let Some(database) = self.database {
            config.database = database;
        }
        debug!("Opening catalog at {}", config.database.display());
        let catalog = Catalog::from_config(&config).with_context(|| {
            format!("Failed to open catalog at {}", config.database.display())
        })?;

        self.command.run(&catalog)
    }

    fn setup_logging(verbosity: u8) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let level = match verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };

        let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Import CSV files into the catalog
    Import(Import),

    /// Export the whole catalog as a CSV table
    Export(Export),

    /// Show a requirement and its links
    Show(Show),

    /// Look up external document entries
    Nodes(Nodes),

    /// Find entities by tag
    Tags(Tags),

    /// Free-text search
    ///
    /// Queries of the form `NNN-NNN`, `CRE:<name>` and `<kind>:<name>:...`
    /// are matched against ids, requirement names and node attributes
    /// before falling back to substring search.
    Search(Search),

    /// List the top-level requirements
    Roots(Roots),

    /// Show how deep a requirement sits in the hierarchy
    Depth(Depth),

    /// Map the entries of one standard onto another
    Gap(Gap),

    /// Resolve a section of an external document to its hyperlink
    Smartlink(Smartlink),

    /// Verify that the stored links and the graph index agree
    Check(Check),
}

impl Command {
    fn run(self, catalog: &Catalog) -> anyhow::Result<()> {
        match self {
            Self::Import(command) => command.run(catalog)?,
            Self::Export(command) => command.run(catalog)?,
            Self::Show(command) => command.run(catalog)?,
            Self::Nodes(command) => command.run(catalog)?,
            Self::Tags(command) => command.run(catalog)?,
            Self::Search(command) => command.run(catalog)?,
            Self::Roots(command) => command.run(catalog)?,
            Self::Depth(command) => command.run(catalog)?,
            Self::Gap(command) => command.run(catalog)?,
            Self::Smartlink(command) => command.run(catalog)?,
            Self::Check(command) => command.run(catalog)?,
        }
        Ok(())
    }
}

/// Output format of the query commands.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Pretty,
    Json,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("Failed to write JSON output")?;
    writeln!(stdout)?;
    Ok(())
}
