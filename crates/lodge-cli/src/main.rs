mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lodge_common::{MigrationError, VersionKey};
use lodge_config::{AppConfig, ConfigLoader, LogConfig};
use lodge_db::{
    Database, MigrationRunner, MigrationUnit, OpenOptions, UnitStatus, load_migrations,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "migrate", version)]
#[command(about = "Apply and roll back versioned schema migrations")]
struct Cli {
    /// Config file (default: lodge.toml / lodge.yml in the working directory)
    #[arg(long, global = true, env = "LODGE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, env = "LODGE_DATABASE")]
    database: Option<PathBuf>,

    /// Migration directory or set file
    #[arg(long, global = true, env = "LODGE_MIGRATIONS")]
    migrations: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `lodge_db=trace`
    #[arg(long, global = true, env = "LODGE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LODGE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations
    Up {
        /// Stop after this version (inclusive)
        #[arg(long)]
        to: Option<String>,
        /// Print the SQL instead of executing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Roll back the most recently applied migrations
    Down {
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
    /// Show applied and pending migrations
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print the SQL for pending migrations
    Script {
        #[arg(long)]
        to: Option<String>,
    },
    /// Remove a lock left behind by a crashed run
    Unlock,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", error_line(&err));
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (config, source) = ConfigLoader::new()
        .load(cli.config.as_deref())
        .context("failed to load configuration")?;
    let config = apply_overrides(config, &cli);
    init_tracing(&config.log);
    if let Some(path) = &source {
        info!("using config {}", path.display());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let command = cli.command;
    let flag = Arc::clone(&cancel);
    let mut job = tokio::task::spawn_blocking(move || execute(command, &config, flag));

    tokio::select! {
        joined = &mut job => joined.context("migration task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, stopping after the current migration");
            cancel.store(true, Ordering::SeqCst);
            job.await.context("migration task panicked")?
        }
    }
}

fn apply_overrides(mut config: AppConfig, cli: &Cli) -> AppConfig {
    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }
    if let Some(path) = &cli.migrations {
        config.migrations.path = path.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if cli.log_json {
        config.log.json = true;
    }
    config
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn execute(command: Command, config: &AppConfig, cancel: Arc<AtomicBool>) -> Result<()> {
    let db = Database::open(
        &config.database.path,
        &OpenOptions {
            create_if_missing: config.database.create_if_missing,
            busy_timeout: Duration::from_millis(config.database.busy_timeout_ms),
        },
    )?;
    let runner = MigrationRunner::new()
        .with_tables(&config.ledger.table, &config.ledger.lock_table)
        .with_cancel_flag(cancel);

    match command {
        Command::Up { to, dry_run } => {
            let units = load_units(config)?;
            let target = to.map(VersionKey::from_string);
            if dry_run {
                let plan = runner.script(&db, &units, target.as_ref())?;
                report::print_script(&plan, runner.dialect_name());
                return Ok(());
            }
            let applied = runner.apply_to(&db, &units, target.as_ref())?;
            println!("Applied {applied} migration(s)");
        }
        Command::Down { steps } => {
            let units = load_units(config)?;
            let rolled_back = runner.rollback(&db, &units, steps)?;
            println!("Rolled back {rolled_back} migration(s)");
        }
        Command::Status { json } => {
            let units = load_units(config)?;
            if let Err(e) = runner.verify(&db, &units) {
                warn!("ledger does not match the migration list: {e}");
            }
            let rows: Vec<_> = runner.status(&db, &units)?.collect();
            if json {
                println!("{}", status_json(&rows)?);
            } else {
                report::print_status(&rows, db.path());
            }
        }
        Command::Script { to } => {
            let units = load_units(config)?;
            let target = to.map(VersionKey::from_string);
            let plan = runner.script(&db, &units, target.as_ref())?;
            report::print_script(&plan, runner.dialect_name());
        }
        Command::Unlock => {
            if runner.force_unlock(&db)? {
                println!("Migration lock released");
            } else {
                println!("Migration lock was not held");
            }
        }
    }
    Ok(())
}

fn load_units(config: &AppConfig) -> Result<Vec<MigrationUnit>> {
    let path = &config.migrations.path;
    load_migrations(path)
        .with_context(|| format!("failed to load migrations from {}", path.display()))
}

fn status_json(rows: &[UnitStatus]) -> lodge_common::Result<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

fn migration_error(err: &anyhow::Error) -> Option<&MigrationError> {
    err.chain().find_map(|e| e.downcast_ref::<MigrationError>())
}

/// `error[code] (version): message`, with the parts that are known.
fn error_line(err: &anyhow::Error) -> String {
    match migration_error(err) {
        Some(cause) => match cause.version() {
            Some(version) => format!("error[{}] ({version}): {err:#}", cause.code()),
            None => format!("error[{}]: {err:#}", cause.code()),
        },
        None => format!("error: {err:#}"),
    }
}

/// Exit status for a failed run, taken from the first `MigrationError` in the chain.
fn exit_code(err: &anyhow::Error) -> u8 {
    migration_error(err).map_or(1, MigrationError::exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_follows_the_wrapped_error() {
        let err = anyhow::Error::new(MigrationError::IrreversibleUnit {
            version: VersionKey::from("3"),
        })
        .context("rollback failed");
        assert_eq!(exit_code(&err), 6);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(exit_code(&plain), 1);
    }

    #[test]
    fn error_line_names_code_and_version() {
        let err = anyhow::Error::new(MigrationError::SchemaConflict {
            version: VersionKey::from("20240104000000"),
            operation: "add_column Rooms.MaxGuests".into(),
            message: "duplicate column name: MaxGuests".into(),
        })
        .context("migration run failed");
        let line = error_line(&err);
        assert!(line.starts_with("error[schema_conflict] (20240104000000): migration run failed"));

        let err = anyhow::Error::new(MigrationError::OutOfOrder("gap".into()));
        assert!(error_line(&err).starts_with("error[out_of_order]: "));
        assert!(error_line(&anyhow::anyhow!("boom")).starts_with("error: boom"));
    }

    #[test]
    fn status_json_lists_rows_in_order() {
        let rows = vec![
            UnitStatus {
                version: VersionKey::from("001"),
                name: "create_roles".into(),
                applied: true,
                applied_at: Some(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH),
            },
            UnitStatus {
                version: VersionKey::from("002"),
                name: "create_users".into(),
                applied: false,
                applied_at: None,
            },
        ];
        let json = status_json(&rows).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["version"], "001");
        assert_eq!(parsed[0]["applied"], true);
        assert_eq!(parsed[1]["applied_at"], serde_json::Value::Null);
    }

    #[test]
    fn flags_override_config_values() {
        let cli = Cli::parse_from([
            "migrate",
            "--database",
            "/tmp/hotel.db",
            "--log-level",
            "debug",
            "down",
            "--steps",
            "2",
        ]);
        let config = apply_overrides(AppConfig::default(), &cli);
        assert_eq!(config.database.path, PathBuf::from("/tmp/hotel.db"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.migrations.path, PathBuf::from("migrations"));
        assert!(matches!(cli.command, Command::Down { steps: 2 }));
    }

    #[test]
    fn status_defaults_to_the_table_view() {
        let cli = Cli::parse_from(["migrate", "status"]);
        assert!(matches!(cli.command, Command::Status { json: false }));
    }
}
