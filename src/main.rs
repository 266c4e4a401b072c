//! kiln - operator CLI for the kiln relational mapper.

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use kiln_config::Config;
use kiln_orm::{AdminUser, Core, Event, Policy, StdinConfirm, USERS_TABLE};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kiln")]
#[command(about = "Inspect and administer kiln databases")]
#[command(version)]
struct Cli {
    /// TOML configuration file [default: kiln.toml in the user config directory]
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    config: Option<PathBuf>,

    /// Registered database to operate on [default: the configured one]
    #[arg(long, global = true, default_value = "")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List registered databases
    Databases,

    /// List the tables of a database
    Tables,

    /// List the columns of a table with their types
    Columns { table: String },

    /// Create an operator account in the users table
    CreateUser {
        email: String,

        /// Grant administrator rights
        #[arg(long)]
        admin: bool,

        /// Password; prompted for when omitted
        #[arg(long, env = "KILN_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Apply schema changes to the users table without asking
        #[arg(long, short)]
        yes: bool,
    },

    /// Flush every cached result and lookup
    Sweep {
        /// Keep sweeping on the regular interval until interrupted
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::from(err.exit_code())
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let core = Core::new();
    config.database.register(&core).await.or_raise(|| ErrorKind::Config)?;

    let outcome = execute(&core, &cli.db, cli.command).await;
    core.shutdown(&[]).await.or_raise(|| ErrorKind::Database)?;
    outcome
}

async fn execute(core: &Core, db: &str, command: Commands) -> Result<()> {
    match command {
        Commands::Databases => {
            for name in core.list_databases() {
                println!("{name}");
            }
        },
        Commands::Tables => {
            for table in core.list_tables(db).await.or_raise(|| ErrorKind::Database)? {
                println!("{table}");
            }
        },
        Commands::Columns { table } => {
            let columns = core.list_columns(&table, db).await.or_raise(|| ErrorKind::Database)?;
            let width = columns.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
            for (name, kind) in columns {
                println!("{name:<width$}  {kind}");
            }
        },
        Commands::CreateUser { email, admin, password, yes } => {
            let password = match password {
                Some(password) => password,
                None => read_password().await?,
            };
            let policy = if yes { Policy::Apply } else { Policy::Prompt(Box::new(StdinConfirm)) };
            core.migrate_into::<AdminUser>(db, USERS_TABLE, policy)
                .await
                .or_raise(|| ErrorKind::Database)?;
            let id = core
                .create_user(&email, &password, admin, db)
                .await
                .or_raise(|| ErrorKind::Database)?;
            println!("{id}");
        },
        Commands::Sweep { watch: false } => {
            let delivered = core.publish(Event::clean()).await;
            tracing::info!(delivered, "Published clean event");
        },
        Commands::Sweep { watch: true } => {
            let sweeper = core.spawn_sweeper(kiln_orm::SWEEP_INTERVAL);
            tracing::info!(every = ?kiln_orm::SWEEP_INTERVAL, "Sweeping until interrupted");
            tokio::signal::ctrl_c().await.or_raise(|| ErrorKind::Terminal)?;
            sweeper.stop().await;
        },
    }
    Ok(())
}

async fn read_password() -> Result<String> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(b"Password: ").await.or_raise(|| ErrorKind::Terminal)?;
    stderr.flush().await.or_raise(|| ErrorKind::Terminal)?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .or_raise(|| ErrorKind::Terminal)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        exn::bail!(ErrorKind::Terminal);
    }
    Ok(password)
}
