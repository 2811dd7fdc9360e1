//! Command-line access to the scope hierarchy core.
//!
//! # Responsibility
//! - Validate scope-model configuration files.
//! - Run read-only hierarchy queries against a database file.

use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use studyscope_core::{
    default_log_level, init_logging, open_db, Scope, ScopeModelCatalog, ScopeRelationService,
    ScopeRepository, SqliteRelationRepository, SqliteScopeRepository,
};

type CliResult<T> = Result<T, Box<dyn Error>>;
type Service<'a> = ScopeRelationService<'a, SqliteScopeRepository<'a>, SqliteRelationRepository<'a>>;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "studyscope: temporal scope hierarchy tools",
    long_about = None
)]
struct Cli {
    /// Write rotating log files into this absolute directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Validate a scope-model configuration file",
        after_help = "EXAMPLES:\n    studyscope validate-config scope_models.json"
    )]
    ValidateConfig { path: PathBuf },

    #[command(
        about = "List the default lineage of a scope, nearest first",
        after_help = "EXAMPLES:\n    studyscope ancestors --db study.db --config scope_models.json AT-01-001"
    )]
    Ancestors {
        #[command(flatten)]
        store: StoreArgs,
        code: String,
    },

    #[command(
        about = "List descendants of a scope",
        after_help = "EXAMPLES:\n    # Patients currently enrolled under a country\n    studyscope descendants --db study.db --config scope_models.json AT --model PATIENT --enabled"
    )]
    Descendants {
        #[command(flatten)]
        store: StoreArgs,
        code: String,
        /// Keep only scopes of this model.
        #[arg(long)]
        model: Option<String>,
        /// Follow only relations enabled now.
        #[arg(long)]
        enabled: bool,
    },

    #[command(
        about = "Print the shortest hop count between two scopes",
        after_help = "EXAMPLES:\n    studyscope distance --db study.db --config scope_models.json AT-01-001 STUDY"
    )]
    Distance {
        #[command(flatten)]
        store: StoreArgs,
        from: String,
        to: String,
    },
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// SQLite database file.
    #[arg(long)]
    db: PathBuf,

    /// Scope-model configuration file.
    #[arg(long)]
    config: PathBuf,
}

#[derive(Serialize)]
struct ModelSummary<'a> {
    id: &'a str,
    parents: &'a [String],
    depth: Option<usize>,
    leaf: bool,
    #[serde(rename = "virtual")]
    is_virtual: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> CliResult<()> {
    if let Some(log_dir) = &cli.log_dir {
        init_logging(default_log_level(), &log_dir.to_string_lossy())?;
    }

    match &cli.command {
        Commands::ValidateConfig { path } => validate_config(path, cli.json),
        Commands::Ancestors { store, code } => with_service(store, |service| {
            let scope = find_scope(service, code)?;
            print_scopes(&service.get_ancestors(&scope)?, cli.json)
        }),
        Commands::Descendants {
            store,
            code,
            model,
            enabled,
        } => with_service(store, |service| {
            let scope = find_scope(service, code)?;
            let descendants = if *enabled {
                service.get_enabled_descendants(&scope, model.as_deref())?
            } else {
                service.get_descendants(&scope, model.as_deref())?
            };
            print_scopes(&descendants, cli.json)
        }),
        Commands::Distance { store, from, to } => with_service(store, |service| {
            let from = find_scope(service, from)?;
            let to = find_scope(service, to)?;
            let distance = service.get_shortest_distance_between(&from, &to)?;
            if cli.json {
                println!("{}", serde_json::json!({ "from": from.code, "to": to.code, "distance": distance }));
            } else {
                println!("{distance}");
            }
            Ok(())
        }),
    }
}

fn validate_config(path: &Path, json: bool) -> CliResult<()> {
    let catalog = ScopeModelCatalog::from_path(path)?;
    info!(
        "event=config_validate module=cli status=ok models={}",
        catalog.models().len()
    );
    let summaries: Vec<ModelSummary<'_>> = catalog
        .models()
        .iter()
        .map(|model| ModelSummary {
            id: &model.id,
            parents: &model.parent_ids,
            depth: catalog.depth(&model.id),
            leaf: catalog.is_leaf(&model.id),
            is_virtual: model.is_virtual,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    for summary in &summaries {
        println!(
            "{}\tdepth={}\tparents={}{}{}",
            summary.id,
            summary.depth.map_or_else(|| "?".to_string(), |depth| depth.to_string()),
            summary.parents.join(","),
            if summary.leaf { "\tleaf" } else { "" },
            if summary.is_virtual { "\tvirtual" } else { "" },
        );
    }
    println!("{} scope models ok", summaries.len());
    Ok(())
}

fn with_service<T>(store: &StoreArgs, op: impl FnOnce(&Service<'_>) -> CliResult<T>) -> CliResult<T> {
    let catalog = ScopeModelCatalog::from_path(&store.config)?;
    let conn = open_db(&store.db)?;
    let service = ScopeRelationService::new(
        SqliteScopeRepository::try_new(&conn)?,
        SqliteRelationRepository::try_new(&conn)?,
        &catalog,
    );
    op(&service)
}

fn find_scope(service: &Service<'_>, code: &str) -> CliResult<Scope> {
    service
        .scopes()
        .get_scope_by_code(code)?
        .ok_or_else(|| format!("unknown scope code `{code}`").into())
}

fn print_scopes(scopes: &[Scope], json: bool) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(scopes)?);
        return Ok(());
    }
    for scope in scopes {
        let deleted = if scope.is_deleted { "\tdeleted" } else { "" };
        println!("{}\t{}{deleted}", scope.code, scope.scope_model_id);
    }
    Ok(())
}
