//! Command-line interface

use clap::{Parser, Subcommand, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info};

use crate::auth::{self, MailboxConnector, OAuthConnector, SCOPE_READONLY};
use crate::composer::ReplyComposer;
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::label_resolver::LabelResolver;
use crate::models::TriageReport;
use crate::scheduler::{IntervalBounds, Scheduler};
use crate::server::{self, Responder};
use crate::triage::TriageLoop;

#[derive(Parser, Debug)]
#[command(name = "vacation-responder")]
#[command(version)]
#[command(about = "Replies to unanswered Gmail messages while you are away", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".vacation-responder/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve the HTTP trigger that starts the responder (default)
    Serve {
        /// Port to listen on, overrides [server].port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Authorize and run the responder until interrupted
    Run,

    /// Authorize and process the current unreplied messages once
    Once,

    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Subcommand to run, `serve` when none was given
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::Serve { port: None })
    }

    fn connector(&self, config: &Config) -> OAuthConnector {
        OAuthConnector {
            credentials_path: self.credentials.clone(),
            token_cache_path: self.token_cache.clone(),
            max_retries: config.client.max_retries,
            request_timeout: config.client.request_timeout(),
        }
    }
}

/// Serve the trigger until Ctrl-C or a fatal error
///
/// The credential file is parsed before binding so a broken setup never
/// reaches the point of accepting requests.
pub async fn serve(cli: &Cli, port: Option<u16>) -> Result<()> {
    let mut config = Config::load(&cli.config).await?;
    if let Some(port) = port {
        config.server.port = port;
        config.validate()?;
    }

    auth::load_application_secret(&cli.credentials).await?;

    let host: IpAddr = config
        .server
        .host
        .parse()
        .map_err(|_| GmailError::ConfigError(format!("Invalid server.host: {}", config.server.host)))?;
    let addr = SocketAddr::new(host, config.server.port);

    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    let connector: Arc<dyn MailboxConnector> = Arc::new(cli.connector(&config));
    let responder = Arc::new(Responder::new(config, connector, fatal_tx)?);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server_task = tokio::spawn(server::serve(responder, addr, async move {
        let _ = stop_rx.await;
    }));

    let fatal = tokio::select! {
        result = &mut server_task => {
            // the server ended without being asked to, e.g. bind failure
            return result.map_err(|e| GmailError::Unknown(format!("Server task failed: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            None
        }
        Some(err) = fatal_rx.recv() => {
            error!("Fatal error, shutting down: {}", err);
            Some(err)
        }
    };

    let _ = stop_tx.send(());
    server_task
        .await
        .map_err(|e| GmailError::Unknown(format!("Server task failed: {}", e)))??;

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Authorize, resolve the label and build the triage loop
async fn prepare(cli: &Cli, config: &Config) -> Result<TriageLoop> {
    let client = cli.connector(config).connect().await?;

    let resolver = LabelResolver::new(Arc::clone(&client), config.label.visibility());
    let label_id = resolver.resolve_label(&config.label.name).await?.into_id();

    let composer = ReplyComposer::new(&config.reply.from, &config.reply.body);
    Ok(TriageLoop::new(client, composer, label_id))
}

/// Run the scheduler in the foreground until Ctrl-C
pub async fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.config).await?;
    let bounds = IntervalBounds::new(
        config.schedule.min_interval_secs,
        config.schedule.max_interval_secs,
    )?;
    let triage = Arc::new(prepare(cli, &config).await?);

    let mut handle = Scheduler::new(triage, bounds, config.schedule.shutdown_grace()).start();

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, stopping after the current message");
    handle.stop().await;
    info!("Completed {} ticks", handle.ticks());
    Ok(())
}

/// Process the current candidates once; Ctrl-C stops between messages
pub async fn once(cli: &Cli) -> Result<TriageReport> {
    let config = Config::load(&cli.config).await?;
    let triage = prepare(cli, &config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, finishing the current message");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = triage.run(&shutdown_rx).await;
    interrupt.abort();
    result
}

/// Run the OAuth flow and report which account was authorized
pub async fn authenticate(cli: &Cli, force: bool) -> Result<String> {
    if force && cli.token_cache.exists() {
        tokio::fs::remove_file(&cli.token_cache).await?;
        info!("Removed existing token cache");
    }

    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;

    // explicit scope keeps the cached token valid, no second consent prompt
    let (_, profile) = hub
        .users()
        .get_profile("me")
        .add_scope(SCOPE_READONLY)
        .doit()
        .await?;
    Ok(profile.email_address.unwrap_or_default())
}

pub async fn init_config(output: &std::path::Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(GmailError::ConfigError(format!(
            "Configuration file already exists at {:?}. Use --force to overwrite.",
            output
        )));
    }
    Config::create_example(output).await
}

/// Human-readable summary of a triage run
pub fn format_report(report: &TriageReport) -> String {
    let mut out = format!(
        "Run {} started {}\n  candidates: {}\n  replied:    {}\n  failed:     {}\n",
        report.run_id,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.candidates,
        report.replied.len(),
        report.failures.len(),
    );
    if report.interrupted {
        out.push_str(&format!("  skipped:    {} (interrupted)\n", report.skipped()));
    }
    for failure in &report.failures {
        out.push_str(&format!(
            "  - {} ({}): {}\n",
            failure.message_id, failure.stage, failure.error
        ));
    }
    out
}
