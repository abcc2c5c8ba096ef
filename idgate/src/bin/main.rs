//! idgate server and administration CLI

#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;

use idgate::config::IdgateConfig;
use idgate::state::IdgateState;
use idgate::whitelist::{PgWhitelistStore, WhitelistOracle};

#[derive(Parser)]
#[command(name = "idgate")]
#[command(version)]
#[command(about = "OAuth identity gateway", long_about = None)]
struct Cli {
    /// Configuration file; the default search path is used when omitted
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve,
    /// Manage the email whitelist
    Whitelist {
        #[command(subcommand)]
        command: WhitelistCommands,
    },
}

#[derive(Subcommand)]
enum WhitelistCommands {
    /// Add addresses
    Add {
        /// Addresses, separated by spaces, commas or semicolons
        #[arg(required = true)]
        emails: Vec<String>,
    },
    /// Remove addresses
    Remove {
        /// Addresses, separated by spaces, commas or semicolons
        #[arg(required = true)]
        emails: Vec<String>,
    },
    /// List addresses
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = IdgateConfig::load(cli.config.as_deref()).context("loading configuration")?;
    idgate::observability::init(&config.logging)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Whitelist { command } => whitelist(&config, command).await,
    }
}

async fn serve(config: IdgateConfig) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = IdgateState::from_config(config).await?;
    let app = idgate::handlers::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "idgate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

async fn whitelist(config: &IdgateConfig, command: WhitelistCommands) -> Result<()> {
    let Some(url) = config.database.url.as_deref() else {
        bail!("whitelist commands need database.url (IDGATE_DATABASE__URL)");
    };
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
        .context("connecting to database")?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    let oracle = WhitelistOracle::new(Arc::new(PgWhitelistStore::new(pool)));

    match command {
        WhitelistCommands::Add { emails } => {
            let report = oracle.add(emails.join(",").as_str()).await?;
            for email in &report.added {
                println!("added    {email}");
            }
            for skipped in &report.skipped {
                println!("skipped  {} ({:?})", skipped.email, skipped.reason);
            }
        }
        WhitelistCommands::Remove { emails } => {
            let report = oracle.remove(emails.join(",").as_str()).await?;
            for email in &report.removed {
                println!("removed  {email}");
            }
            for email in &report.not_found {
                println!("missing  {email}");
            }
        }
        WhitelistCommands::List => {
            for email in oracle.list().await? {
                println!("{email}");
            }
        }
    }
    Ok(())
}
