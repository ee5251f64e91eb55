//! xmlmelt-infer: Print the table plan discovered for an XML corpus
//!
//! Runs only the discovery pass: record kinds, their columns, array flags and
//! inferred types, as JSON on stdout.
//!
//! Usage:
//!   xmlmelt-infer dblp.xml dblp.dtd
//!
//!   # Exclude the author field from the tables, as a relation would
//!   xmlmelt-infer dblp.xml dblp.dtd --relation author:authored_by --compact

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use xmlmelt::melt::{Converter, RelationMapping};
use xmlmelt::{ConvertConfig, SchemaCatalog};

#[derive(Parser, Debug)]
#[command(name = "xmlmelt-infer")]
#[command(about = "Discover the tables an XML corpus would produce", long_about = None)]
struct Args {
    /// XML corpus
    #[arg(value_name = "XML")]
    xml: PathBuf,

    /// DTD describing the corpus
    #[arg(value_name = "DTD")]
    dtd: PathBuf,

    /// Fields routed into relation files, as field:label
    #[arg(long = "relation", short = 'r', value_name = "FIELD:LABEL")]
    relations: Vec<RelationMapping>,

    /// Compact output (no pretty-printing)
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = args
        .relations
        .into_iter()
        .fold(ConvertConfig::default(), ConvertConfig::with_relation);

    let catalog = SchemaCatalog::load(&args.dtd)
        .with_context(|| format!("Failed to load grammar {}", args.dtd.display()))?;
    let converter = Converter::new(catalog, config)?;
    let plan = converter
        .discover(args.xml.as_path())
        .with_context(|| format!("Failed to scan {}", args.xml.display()))?;

    let output = if args.compact {
        serde_json::to_string(&plan)?
    } else {
        serde_json::to_string_pretty(&plan)?
    };
    println!("{}", output);

    Ok(())
}
