use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_data_registrar::app::{App, ProgressSink};
use kira_data_registrar::catalog::{CatalogClient, RetryingCatalog, SolrCatalogClient};
use kira_data_registrar::config::{ConfigLoader, ResolvedConfig};
use kira_data_registrar::domain::{DatasetIdentifier, FolderId, OwnerId, parse_data_map};
use kira_data_registrar::error::RegistrarError;
use kira_data_registrar::output::{JsonOutput, LogProgress};
use kira_data_registrar::providers::AdapterRegistry;
use kira_data_registrar::providers::dataone::DataOneResolver;
use kira_data_registrar::storage::FsStorage;

#[derive(Parser)]
#[command(name = "kira-dr")]
#[command(about = "Resolve repository dataset identifiers and register them as local folder trees")]
#[command(version, author)]
struct Cli {
    /// Path to a kira-dr.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Report progress on stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve identifiers into a data map")]
    Lookup(LookupArgs),
    #[command(about = "Register a data map for an owner")]
    Register(RegisterArgs),
    #[command(about = "List registered dataset roots of an owner")]
    Registered(OwnerArgs),
    #[command(about = "List items of a registered folder")]
    Items(ItemsArgs),
}

#[derive(Args)]
struct LookupArgs {
    identifiers: Vec<String>,

    /// Identifiers as a JSON array, e.g. '["urn:uuid:..."]'.
    #[arg(long, conflicts_with = "identifiers")]
    json: Option<String>,

    /// Repository adapter to resolve with.
    #[arg(long)]
    repository: Option<String>,
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long)]
    owner: String,

    /// Data map file produced by `lookup`; `-` or absent reads stdin.
    #[arg(long)]
    data_map: Option<String>,
}

#[derive(Args)]
struct OwnerArgs {
    #[arg(long)]
    owner: String,
}

#[derive(Args)]
struct ItemsArgs {
    #[arg(long)]
    owner: String,

    #[arg(long)]
    folder: String,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<RegistrarError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &RegistrarError) -> u8 {
    match error {
        RegistrarError::NotFound(_)
        | RegistrarError::ConfigRead(_)
        | RegistrarError::ConfigParse(_)
        | RegistrarError::ConfigurationError(_) => 2,
        RegistrarError::CatalogUnavailable(_) | RegistrarError::CatalogStatus { .. } => 3,
        RegistrarError::StorageFailure(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = build_app(&config)?;
    let sink: &dyn ProgressSink = if cli.verbose {
        &LogProgress
    } else {
        &JsonOutput
    };

    match cli.command {
        Commands::Lookup(args) => run_lookup(args, &app, sink),
        Commands::Register(args) => run_register(args, &app, sink),
        Commands::Registered(args) => {
            let owner: OwnerId = args.owner.parse()?;
            let list = app.list_registered(&owner, sink)?;
            JsonOutput::print_registered(&list).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Items(args) => {
            let owner: OwnerId = args.owner.parse()?;
            let list = app.list_items(&owner, &FolderId::new(args.folder))?;
            JsonOutput::print_items(&list).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `RUST_LOG` wins when set; otherwise `--verbose` raises the level to info.
fn log_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("warn")
        }
    })
}

fn build_app(config: &ResolvedConfig) -> Result<App<FsStorage>, RegistrarError> {
    let solr = SolrCatalogClient::new(&config.catalog)?;
    let adapters = if config.catalog.retries > 0 {
        registry_with(RetryingCatalog::new(solr, config.catalog.retries), config)
    } else {
        registry_with(solr, config)
    };
    let storage = FsStorage::new(config.store.root.clone());
    storage.ensure_root()?;
    Ok(App::new(storage, adapters, &config.store))
}

fn registry_with<C: CatalogClient + 'static>(
    catalog: C,
    config: &ResolvedConfig,
) -> AdapterRegistry {
    AdapterRegistry::new().with(DataOneResolver::new(catalog).with_rows(config.catalog.rows))
}

fn run_lookup(
    args: LookupArgs,
    app: &App<FsStorage>,
    sink: &dyn ProgressSink,
) -> miette::Result<ExitCode> {
    let raw = match args.json {
        Some(json) => serde_json::from_str::<Vec<String>>(&json)
            .map_err(|err| RegistrarError::InvalidIdentifier(err.to_string()))?,
        None => args.identifiers,
    };
    if raw.is_empty() {
        return Err(miette::Report::msg("at least one identifier is required"));
    }
    let identifiers = raw
        .iter()
        .map(|value| value.parse::<DatasetIdentifier>())
        .collect::<Result<Vec<_>, _>>()?;

    let entries = match &args.repository {
        Some(repository) => app.lookup_in(repository, &identifiers, sink)?,
        None => app.lookup(&identifiers, sink)?,
    };
    JsonOutput::print_lookup(&entries).into_diagnostic()?;
    Ok(ExitCode::SUCCESS)
}

fn run_register(
    args: RegisterArgs,
    app: &App<FsStorage>,
    sink: &dyn ProgressSink,
) -> miette::Result<ExitCode> {
    let owner: OwnerId = args.owner.parse()?;
    let content = match args.data_map.as_deref() {
        None | Some("-") => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).into_diagnostic()?;
            buf
        }
        Some(path) => fs::read_to_string(path)
            .map_err(|err| RegistrarError::InvalidDataMap(format!("{path}: {err}")))?,
    };
    let entries = parse_data_map(&content)?;

    let report = app.register_data_map(&entries, &owner, sink)?;
    JsonOutput::print_register(&report).into_diagnostic()?;

    let failed = report.failures().len();
    if failed > 0 {
        eprintln!("{failed} of {} entries failed to register", report.entries.len());
        return Ok(ExitCode::from(4));
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    #[test]
    fn verbose_raises_default_level_to_info() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(log_filter(true).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(false).max_level_hint(), Some(LevelFilter::WARN));
    }
}
