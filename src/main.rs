use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli_style;
use cli_style::{get_styles, print_empty_list, print_error, print_success, print_warning};

use schema_migrate::config::{AppConfig, CliConfig, FileConfig};
use schema_migrate::migration::{create_migration, load_dir, MigrationId};
use schema_migrate::runner::{
    DownTarget, MigrationStatus, RunError, RunOutcome, Runner, StatusEntry,
};
use schema_migrate::store::SqliteBackend;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("MIGRATE_GIT_HASH"), ")");

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

/// Applies and reverts collection schema migrations.
#[derive(Parser, Debug)]
#[command(name = "migrate", version = VERSION, styles = get_styles())]
struct CliArgs {
    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, global = true, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database holding collections and the migrations ledger.
    #[clap(long, global = true, value_parser = parse_path)]
    pub db: Option<PathBuf>,

    /// Directory containing the `<id>_<name>.json` migration files.
    #[clap(long, global = true, value_parser = parse_path)]
    pub migrations_dir: Option<PathBuf>,

    /// How long to wait for another process holding the database lock.
    #[clap(long, global = true)]
    pub busy_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Applies pending migrations in ascending id order.
    Up {
        /// Apply at most this many migrations.
        #[clap(long)]
        limit: Option<usize>,
    },

    /// Reverts applied migrations, newest first. Reverts one by default.
    Down {
        /// Revert the N most recently applied migrations.
        #[clap(long, conflicts_with_all = ["to", "all"])]
        limit: Option<usize>,

        /// Revert every applied migration newer than this id.
        #[clap(long, conflicts_with = "all")]
        to: Option<MigrationId>,

        /// Revert every applied migration.
        #[clap(long)]
        all: bool,
    },

    /// Lists every known migration and whether it's applied.
    Status,

    /// Creates an empty migration file named after NAME.
    Create { name: String },

    /// Drops ledger entries of migrations that no longer exist.
    HistorySync,
}

impl Command {
    fn down_target(limit: Option<usize>, to: Option<MigrationId>, all: bool) -> DownTarget {
        match (all, to) {
            (true, _) => DownTarget::All,
            (false, Some(id)) => DownTarget::To(id),
            (false, None) => DownTarget::Count(limit.unwrap_or(1)),
        }
    }
}

fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init();

    match run(cli_args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli_args: CliArgs) -> Result<()> {
    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_path: cli_args.db,
        migrations_dir: cli_args.migrations_dir,
        busy_timeout_ms: cli_args.busy_timeout_ms,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    let migrations = load_dir(&config.migrations_dir)
        .with_context(|| format!("Failed to load migrations from {:?}", config.migrations_dir))?;

    if let Command::Create { name } = &cli_args.command {
        let (migration, path) = create_migration(&config.migrations_dir, name, &migrations)?;
        print_success(&format!("Created migration {} at {}", migration, path.display()));
        return Ok(());
    }

    info!("Opening schema database at {:?}...", config.db_path);
    let backend = SqliteBackend::new(&config.db_path, config.busy_timeout)?;
    let runner = Runner::new(backend, migrations);

    match cli_args.command {
        Command::Up { limit } => {
            let outcome = runner.up(limit)?;
            print_outcome(&runner, &outcome, "Applied", "No pending migrations");
        }
        Command::Down { limit, to, all } => {
            let outcome = runner.down(Command::down_target(limit, to, all))?;
            print_outcome(&runner, &outcome, "Reverted", "No migrations to revert");
        }
        Command::Status => print_status(&runner.status()?),
        Command::HistorySync => {
            let removed = runner.sync_history()?;
            if removed.is_empty() {
                print_success("Migrations history is already in sync");
            } else {
                for id in &removed {
                    print_success(&format!("Removed unknown migration {} from the ledger", id));
                }
            }
        }
        Command::Create { .. } => {}
    }
    Ok(())
}

fn print_outcome(
    runner: &Runner<SqliteBackend>,
    outcome: &RunOutcome,
    verb: &str,
    nothing_to_do: &str,
) {
    if outcome.is_noop() {
        print_success(nothing_to_do);
        return;
    }
    for id in outcome.migrations() {
        match runner.migrations().get(*id) {
            Some(migration) => print_success(&format!("{} {}", verb, migration)),
            None => print_success(&format!("{} {}", verb, id)),
        }
    }
}

fn print_status(entries: &[StatusEntry]) {
    if entries.is_empty() {
        print_empty_list("No migrations found");
        return;
    }

    let mut table = cli_style::TableBuilder::new(vec!["ID", "NAME", "STATUS", "APPLIED AT"]);
    for entry in entries {
        let applied_at = match &entry.status {
            MigrationStatus::Applied { at } | MigrationStatus::Unknown { at } => at.to_rfc3339(),
            MigrationStatus::Pending | MigrationStatus::Skipped => String::new(),
        };
        table.add_row_styled(
            vec![
                entry.id.to_string(),
                entry.name.clone().unwrap_or_else(|| "?".to_string()),
                entry.status.label().to_string(),
                applied_at,
            ],
            cli_style::status_color(&entry.status),
        );
    }
    table.print();

    let count = |label: &str| entries.iter().filter(|e| e.status.label() == label).count();
    println!(
        "{} applied, {} pending, {} skipped, {} unknown",
        count("applied"),
        count("pending"),
        count("skipped"),
        count("unknown")
    );
}

fn report_error(error: &anyhow::Error) {
    match error.downcast_ref::<RunError>() {
        Some(RunError::Failed(failure)) => {
            print_error(&failure.to_string());
            if !failure.completed.is_empty() {
                let completed: Vec<String> =
                    failure.completed.iter().map(|id| id.to_string()).collect();
                print_warning(&format!(
                    "Completed before the failure, left in place: {}",
                    completed.join(", ")
                ));
            }
        }
        _ => print_error(&format!("{:#}", error)),
    }
}
