mod atomic;
mod config;
mod logging;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use config::{ConfigError, Overrides, Settings, load_config};
use logging::{LoggingError, init_logging};
use schemaforge_core::{CompiledDomain, Domain, Error as CoreError, new_domain, resolve_registry};
use schemaforge_db::{DbError, PostgresExecutor, provision};
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Parser, Debug)]
#[command(name = "schemaforge", version, about = "Compile data domain specifications into PostgreSQL DDL")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Configuration file (defaults to ./schemaforge.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Name of the domain to work with.
    #[arg(long, global = true)]
    domain: Option<String>,
    /// Registry file, or a directory containing <domain>.yaml.
    #[arg(long, global = true)]
    registry: Option<PathBuf>,
    /// Directory searched recursively for <domain>.yaml.
    #[arg(long = "search-path", value_name = "DIR", global = true)]
    search_paths: Vec<PathBuf>,
    /// Database connection string.
    #[arg(long, value_name = "CONNECTION_STRING", global = true)]
    conn: Option<String>,
    /// Guard every CREATE so provisioning can be re-run.
    #[arg(long, global = true)]
    sloppy: bool,
    /// Commit each statement on its own.
    #[arg(long, global = true)]
    autocommit: bool,
    /// Build indices with CREATE INDEX CONCURRENTLY.
    #[arg(long, global = true)]
    concurrent_indices: bool,
    /// Append JSON log events to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

impl GlobalArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            domain: self.domain.clone(),
            registry: self.registry.clone(),
            search_paths: self.search_paths.clone(),
            connection: self.conn.clone(),
            sloppy: self.sloppy,
            autocommit: self.autocommit,
            concurrent_indices: self.concurrent_indices,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the generated statements.
    Ddl(DdlArgs),
    /// Create the domain, or only the given tables.
    Create(TablesArgs),
    /// Drop a table and everything depending on it.
    Drop(DropArgs),
    /// Build deferred indices.
    Index(IndexArgs),
    /// Write a skeleton registry for the domain.
    Init,
}

#[derive(Args, Debug)]
struct DdlArgs {
    /// Only these tables (plus schema creation).
    #[arg(long = "table", value_name = "TABLE")]
    tables: Vec<String>,
    /// Also print deferred index statements.
    #[arg(long, default_value_t = false)]
    indices: bool,
    /// Print the compiled statement set as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct TablesArgs {
    #[arg(long = "table", value_name = "TABLE")]
    tables: Vec<String>,
}

#[derive(Args, Debug)]
struct DropArgs {
    #[arg(long)]
    table: String,
}

#[derive(Args, Debug)]
struct IndexArgs {
    /// Only the indices of this table.
    #[arg(long)]
    table: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging(cli.global.log_file.as_deref())?;

    let file = load_config(cli.global.config.as_deref())?;
    let settings = Settings::resolve(file, cli.global.overrides())?;
    tracing::debug!(event = "settings_resolved", domain = %settings.domain, sloppy = settings.sloppy);

    match cli.command {
        Command::Ddl(args) => run_ddl(&settings, args),
        Command::Create(args) => run_create(&settings, args).await,
        Command::Drop(args) => run_drop(&settings, args).await,
        Command::Index(args) => run_index(&settings, args).await,
        Command::Init => run_init(&settings),
    }
}

fn load_domain(settings: &Settings) -> Result<Domain, CliError> {
    let path = resolve_registry(
        &settings.domain,
        settings.registry.as_deref(),
        &settings.search_paths,
    )?;
    tracing::info!(event = "registry_resolved", domain = %settings.domain, path = %path.display());
    Ok(Domain::from_path(&path, &settings.domain)?)
}

fn compile(settings: &Settings) -> Result<(Domain, CompiledDomain), CliError> {
    let domain = load_domain(settings)?;
    let compiled = domain.compile(settings.compile_options())?;
    Ok((domain, compiled))
}

fn run_ddl(settings: &Settings, args: DdlArgs) -> Result<(), CliError> {
    let (_, compiled) = compile(settings)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&compiled)?);
        return Ok(());
    }

    let tables: Vec<&str> = args.tables.iter().map(String::as_str).collect();
    let statements = if tables.is_empty() {
        compiled.statements().to_vec()
    } else {
        compiled.statements_for(&tables)?
    };
    for statement in &statements {
        println!("{statement}\n");
    }

    if args.indices {
        let indices: Vec<&String> = if tables.is_empty() {
            compiled.indices().iter().collect()
        } else {
            tables
                .iter()
                .flat_map(|table| compiled.indices_for(table))
                .collect()
        };
        for index in indices {
            println!("{index}");
        }
    }
    Ok(())
}

async fn connect(settings: &Settings, autocommit: bool) -> Result<PostgresExecutor, CliError> {
    Ok(PostgresExecutor::connect(settings.connection()?, autocommit).await?)
}

async fn run_create(settings: &Settings, args: TablesArgs) -> Result<(), CliError> {
    let (_, compiled) = compile(settings)?;
    let executor = connect(settings, settings.autocommit).await?;
    let tables: Vec<&str> = args.tables.iter().map(String::as_str).collect();
    let executed = provision::create(&executor, &compiled, &tables).await?;
    tracing::info!(event = "domain_created", domain = %settings.domain, statements = executed);
    Ok(())
}

async fn run_drop(settings: &Settings, args: DropArgs) -> Result<(), CliError> {
    let domain = load_domain(settings)?;
    let executor = connect(settings, settings.autocommit).await?;
    let dropped = provision::drop(&executor, &domain, &args.table).await?;
    for table in &dropped {
        tracing::info!(event = "table_dropped", table = %table);
    }
    Ok(())
}

async fn run_index(settings: &Settings, args: IndexArgs) -> Result<(), CliError> {
    let (_, compiled) = compile(settings)?;
    // Concurrent index builds cannot run inside a transaction block.
    let executor = connect(settings, true).await?;
    let built = provision::build_indices(&executor, &compiled, args.table.as_deref()).await?;
    tracing::info!(event = "indices_built", domain = %settings.domain, indices = built);
    Ok(())
}

fn run_init(settings: &Settings) -> Result<(), CliError> {
    let file_name = format!("{}.yaml", settings.domain);
    let path = match &settings.registry {
        Some(registry) if registry.is_dir() => registry.join(&file_name),
        Some(registry) => registry.clone(),
        None => PathBuf::from(&file_name),
    };
    if path.exists() {
        return Err(CliError::InvalidConfig(format!(
            "registry {} already exists",
            path.display()
        )));
    }

    atomic::write_yaml_atomic(&path, &new_domain(&settings.domain))?;
    tracing::info!(event = "registry_written", domain = %settings.domain, path = %path.display());
    Ok(())
}
