//! Offline document checker
//!
//! Runs the validation pipeline of one application over XML files, the same
//! way a whole-document PUT would.
//!
//! ```text
//! xcap-check --auid resource-lists index.xml other.xml
//! xcap-check --config server.toml --auid pres-rules rules.xml
//! xcap-check --schema-dir /etc/xcap/schemas --auid rls-services services.xml
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use xcap_appusage::{Application, SchemaCatalog, ServerConfig, UsageContext};

#[derive(Parser, Debug)]
#[command(name = "xcap-check")]
#[command(about = "Validate XML documents against an XCAP application's rules")]
struct Args {
    /// Application unique ID (resource-lists, pres-rules, ...)
    #[arg(short = 'a', long)]
    auid: String,

    /// Server configuration file (TOML); supplies the validation switch
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Skip schema validation regardless of configuration
    #[arg(long)]
    no_schema: bool,

    /// Directory with the XSD files (defaults to the ones shipped with the crate)
    #[arg(long)]
    schema_dir: Option<PathBuf>,

    /// Documents to check
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn parse_application(auid: &str) -> Result<Application> {
    match Application::from_auid(auid) {
        Some(app) => Ok(app),
        None => bail!("unknown application: {}", auid),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let application = parse_application(&args.auid)?;

    let config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    let document_validation = config.document_validation && !args.no_schema;
    info!(
        "Checking {} file(s) as {} (schema validation {})",
        args.files.len(),
        application,
        if document_validation { "on" } else { "off" }
    );

    let schemas = match &args.schema_dir {
        Some(dir) => SchemaCatalog::from_directory(dir)
            .with_context(|| format!("loading schemas from {}", dir.display()))?,
        None => SchemaCatalog::with_defaults(),
    };
    let context = UsageContext::new(document_validation, schemas, &[application]);

    for path in &args.files {
        let body = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if let Err(e) = xcap_appusage::appusage::validate_document(&body, application, &context) {
            error!("{}: {}", path.display(), e);
            bail!("{} is not a valid {} document: {}", path.display(), application, e);
        }
        info!("{}: ok", path.display());
    }

    Ok(())
}
