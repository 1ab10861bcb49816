//! Command-line runner for scriptlog change scripts.
//!
//! Applies the `<id>_<description>.sql` files in a scripts directory to a SQLite database
//! and records each one in a changelog table.

use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use scriptlog::sqlite::{
    SqliteChangelog, SqliteConnectionProvider, SqliteMigrator, SqliteScriptRunner,
};
use scriptlog::{DirectorySource, MigrationSource, Migrator, ScriptHook};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scriptlog", version)]
#[command(about = "Apply numbered SQL change scripts and track them in a changelog table")]
struct Cli {
    /// SQLite database the scripts run against
    #[arg(long, env = "SCRIPTLOG_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Keep the changelog in this database instead of the target database.
    /// `up` creates the changelog table there; `pending` and `status` need it to exist.
    #[arg(long, env = "SCRIPTLOG_CHANGELOG_DATABASE", global = true)]
    changelog_database: Option<PathBuf>,

    /// Directory holding the change scripts
    #[arg(long, env = "SCRIPTLOG_SCRIPTS", default_value = "scripts", global = true)]
    scripts: PathBuf,

    /// Name of the changelog table
    #[arg(
        long,
        env = "SCRIPTLOG_CHANGELOG_TABLE",
        default_value = "CHANGELOG",
        global = true
    )]
    changelog_table: String,

    /// Token that ends a statement
    #[arg(long, default_value = ";", global = true)]
    delimiter: String,

    /// Only end a statement at a line holding nothing but the delimiter
    #[arg(long, global = true)]
    full_line_delimiter: bool,

    /// SQL file run before the first change of a batch
    #[arg(long, global = true)]
    before_hook: Option<PathBuf>,

    /// SQL file run before each change
    #[arg(long, global = true)]
    before_each_hook: Option<PathBuf>,

    /// SQL file run after each change
    #[arg(long, global = true)]
    after_each_hook: Option<PathBuf>,

    /// SQL file run after the last change of a batch
    #[arg(long, global = true)]
    after_hook: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
enum Commands {
    /// Apply every script without a changelog entry, including ones older than the latest applied
    Pending,
    /// Apply the scripts newer than the latest applied one, creating the changelog if needed
    Up {
        /// Stop after this many scripts
        #[arg(long)]
        steps: Option<usize>,
    },
    /// Show which scripts are applied and which are pending
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the scripts in the scripts directory (no database required)
    List,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse(), &mut std::io::stdout()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli, out: &mut dyn Write) -> Result<(), Box<dyn Error>> {
    let source = DirectorySource::new(&cli.scripts);

    match cli.command {
        Commands::List => list(&source, out),
        Commands::Pending => {
            let applied = build_migrator(&cli, source)?.pending(out)?;
            tracing::info!(count = applied.len(), "Applied pending changes");
            Ok(())
        }
        Commands::Up { steps } => {
            let applied = build_migrator(&cli, source)?.up(steps, out)?;
            tracing::info!(count = applied.len(), "Applied new changes");
            Ok(())
        }
        Commands::Status { json } => {
            let report = build_migrator(&cli, source)?.status()?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            } else {
                write!(out, "{}", report)?;
            }
            Ok(())
        }
    }
}

fn build_migrator(cli: &Cli, source: DirectorySource) -> Result<SqliteMigrator, Box<dyn Error>> {
    let database = cli
        .database
        .clone()
        .ok_or("No database given. Pass --database or set SCRIPTLOG_DATABASE.")?;

    let runner = SqliteScriptRunner::new()
        .with_delimiter(cli.delimiter.clone())
        .with_full_line_delimiter(cli.full_line_delimiter);
    let changelog = SqliteChangelog::new().with_table_name(cli.changelog_table.clone());

    let mut migrator = Migrator::new(
        SqliteConnectionProvider::new(database),
        source,
        changelog,
        runner,
    );
    if let Some(path) = &cli.changelog_database {
        migrator =
            migrator.with_changelog_connection_provider(SqliteConnectionProvider::new(path.clone()));
    }
    if let Some(hook) = script_hook(cli)? {
        migrator = migrator.with_hook(hook);
    }
    Ok(migrator)
}

/// Assemble a [ScriptHook] from the hook files given on the command line, if any.
fn script_hook(cli: &Cli) -> Result<Option<ScriptHook>, std::io::Error> {
    let read = |path: &Option<PathBuf>| path.as_ref().map(fs::read_to_string).transpose();
    let before = read(&cli.before_hook)?;
    let before_each = read(&cli.before_each_hook)?;
    let after_each = read(&cli.after_each_hook)?;
    let after = read(&cli.after_hook)?;

    if before.is_none() && before_each.is_none() && after_each.is_none() && after.is_none() {
        return Ok(None);
    }

    let mut hook = ScriptHook::new();
    if let Some(sql) = before {
        hook = hook.with_before(sql);
    }
    if let Some(sql) = before_each {
        hook = hook.with_before_each(sql);
    }
    if let Some(sql) = after_each {
        hook = hook.with_after_each(sql);
    }
    if let Some(sql) = after {
        hook = hook.with_after(sql);
    }
    Ok(Some(hook))
}

fn list(source: &dyn MigrationSource, out: &mut dyn Write) -> Result<(), Box<dyn Error>> {
    let changes = source.list_all()?;
    if changes.is_empty() {
        writeln!(out, "No change scripts found.")?;
        return Ok(());
    }
    writeln!(out, "Change scripts ({}):", changes.len())?;
    for change in changes {
        writeln!(out, "  {:<14} {}", change.id, change.description)?;
    }
    Ok(())
}
