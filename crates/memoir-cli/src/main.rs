use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use memoir_core::app::{App, AppBuilder};
use memoir_core::config::MemoirConfig;
use memoir_core::domain::{CapsuleId, CapsulePatch, NewCapsule, OwnerId};

/// Scheduled time-capsule email delivery.
#[derive(Parser, Debug)]
#[command(name = "memoir", version, about)]
struct Cli {
    /// TOML config file (missing file = defaults + MEMOIR_* env)
    #[arg(long, global = true, default_value = "memoir.toml")]
    config: PathBuf,

    /// Log emails instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Run a single delivery cycle and print its report
    Tick,
    /// Print store counts
    Status,
    /// Print a fresh owner id
    NewOwner,
    /// Schedule a new capsule
    Schedule {
        #[arg(long)]
        owner: OwnerId,
        #[arg(long)]
        to: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        message: String,
        /// Storage locator of an attachment (repeatable)
        #[arg(long = "media")]
        media: Vec<String>,
        /// Delivery time, RFC 3339 (e.g. 2030-01-01T09:00:00Z)
        #[arg(long)]
        at: DateTime<Utc>,
    },
    /// List an owner's capsules, newest first
    List {
        #[arg(long)]
        owner: OwnerId,
    },
    /// Show one capsule
    Show {
        #[arg(long)]
        owner: OwnerId,
        id: CapsuleId,
    },
    /// Edit a pending capsule
    Edit {
        #[arg(long)]
        owner: OwnerId,
        id: CapsuleId,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Delete a capsule (any status)
    Cancel {
        #[arg(long)]
        owner: OwnerId,
        id: CapsuleId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout は JSON 出力用、ログは stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memoir=info,memoir_core=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Command::NewOwner = cli.command {
        println!("{}", OwnerId::generate());
        return Ok(());
    }

    let config = MemoirConfig::load(Some(&cli.config))
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let app = AppBuilder::new(config)
        .dry_run(cli.dry_run)
        .build()
        .context("building app")?;

    execute(&app, cli.command).await
}

async fn execute(app: &App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run => {
            let handle = app.scheduler().spawn();
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            tracing::info!("shutdown requested, waiting for the running cycle");
            handle.shutdown_and_join().await;
        }
        Command::Tick => {
            let report = app.coordinator.run_cycle().await?;
            print_json(&report)?;
        }
        Command::Status => {
            print_json(&app.status().await?)?;
        }
        Command::NewOwner => println!("{}", OwnerId::generate()),
        Command::Schedule {
            owner,
            to,
            title,
            subject,
            message,
            media,
            at,
        } => {
            let draft = NewCapsule {
                title,
                recipient: to,
                subject,
                message,
                media,
                deliver_at: at,
            };
            print_json(&app.capsules.create(owner, draft).await?)?;
        }
        Command::List { owner } => {
            print_json(&app.capsules.list(owner).await?)?;
        }
        Command::Show { owner, id } => {
            print_json(&app.capsules.get(owner, id).await?)?;
        }
        Command::Edit {
            owner,
            id,
            to,
            title,
            subject,
            message,
            at,
        } => {
            let patch = CapsulePatch {
                title,
                recipient: to,
                subject,
                message,
                media: None,
                deliver_at: at,
            };
            print_json(&app.capsules.update(owner, id, patch).await?)?;
        }
        Command::Cancel { owner, id } => {
            app.capsules.delete(owner, id).await?;
            println!("deleted {id}");
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
