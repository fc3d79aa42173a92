use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::progress::{BackupEvent, RunState};
use crate::provider::RemoteDirectory;
use crate::session::SharePointSessionManager;
use crate::types::{BackupConfig, BackupMode, BackupOutcome, SharePointClientConfig};
use crate::{CancellationToken, run_backup};

/// CLI for sp-backup: copy every document library of a SharePoint tenant to disk.
#[derive(Parser, Debug)]
#[command(
    name = "sp-backup",
    version,
    about = "Back up the document libraries of every site in a SharePoint Online tenant"
)]
pub struct Cli {
    /// Log diagnostics at debug level (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every site's document libraries into a local directory
    Backup {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Local directory receiving one folder per site
        #[arg(long, env = "SP_BACKUP_ROOT")]
        dest: PathBuf,

        /// Backup mode; `update` currently downloads everything like `full`
        #[arg(long, default_value = "full")]
        mode: BackupMode,

        /// Seconds between progress lines
        #[arg(long, default_value_t = 5)]
        progress_interval: u64,
    },
    /// List the URLs of every site in the tenant
    Sites {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// URL of the tenant admin site, e.g. https://contoso-admin.sharepoint.com
    #[arg(long, env = "SP_ADMIN_URL")]
    pub admin_url: String,

    #[arg(long, short, env = "SP_USERNAME")]
    pub username: String,

    /// Prompted for when not given
    #[arg(long, env = "SP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl ConnectionArgs {
    async fn connect(self) -> Result<SharePointSessionManager> {
        let password = match self.password {
            Some(password) => password,
            None => rpassword::prompt_password(format!("Password for {}: ", self.username))
                .context("failed to read password")?,
        };
        SharePointSessionManager::connect(
            &self.admin_url,
            &self.username,
            &password,
            SharePointClientConfig::default(),
        )
        .await
            .with_context(|| format!("failed to sign in to {}", self.admin_url))
    }
}

/// Diagnostics shown when `RUST_LOG` is unset. Progress lines are printed
/// as events, so only warnings and errors reach stderr by default.
const DEFAULT_LOG_FILTER: &str = "warn";

/// Installs the tracing subscriber used for diagnostics on stderr
pub fn init_tracing(verbose: bool) {
    let directives = log_directives(verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter =
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn log_directives(verbose: bool, rust_log: Option<String>) -> String {
    if verbose {
        return "sharepoint_backup=debug".to_string();
    }
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Backup {
            connection,
            dest,
            mode,
            progress_interval,
        } => backup(connection, BackupConfig::new(dest, mode), progress_interval).await,
        Commands::Sites { connection } => sites(connection).await,
    }
}

async fn backup(
    connection: ConnectionArgs,
    config: BackupConfig,
    progress_interval: u64,
) -> Result<()> {
    let (state, mut events) = RunState::with_events(CancellationToken::new());
    print_event(&BackupEvent::Connecting);

    let mut manager = connection.connect().await?;
    let client = manager.create_client()?;

    let worker_state = state.clone();
    let mut worker = tokio::spawn(async move {
        let result = run_backup(&client, &config, &worker_state).await;
        (client, result)
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(progress_interval.max(1)));
    ticker.tick().await;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let (client, result) = loop {
        tokio::select! {
            Some(event) = events.recv() => print_event(&event),
            _ = ticker.tick() => println!("{}", state.snapshot()),
            _ = &mut ctrl_c, if !state.is_cancelled() => {
                warn!("Cancellation requested, stopping before the next site");
                state.cancel();
            }
            joined = &mut worker => break joined?,
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    drop(client);
    if let Err(e) = manager.close().await {
        warn!("Failed to close session: {e}");
    }

    let report = result?;
    println!("{}", state.snapshot());
    println!("Report:\n{:#?}", report);
    if report.outcome == BackupOutcome::Cancelled {
        info!("Backup stopped after {} sites", report.sites_processed);
    }
    Ok(())
}

async fn sites(connection: ConnectionArgs) -> Result<()> {
    let mut manager = connection.connect().await?;
    let client = manager.create_client()?;
    let sites = client
        .list_sites()
        .await
        .map_err(|e| anyhow!("failed to enumerate tenant sites: {e}"))?;
    for site in &sites {
        match &site.title {
            Some(title) => println!("{}\t{}", site.url, title),
            None => println!("{}", site.url),
        }
    }
    drop(client);
    manager.close().await?;
    Ok(())
}

fn print_event(event: &BackupEvent) {
    let Some(line) = console_line(event) else {
        return;
    };
    if event.is_error() {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }
}

/// Fatal errors end the run with `Err` and are reported once by `main`
fn console_line(event: &BackupEvent) -> Option<String> {
    match event {
        BackupEvent::Fatal { .. } => None,
        other => Some(other.to_string()),
    }
}
