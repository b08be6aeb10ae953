use anyhow::Result;
use clap::Parser;
use gmail_vacation_responder::cli::{self, Cli, Commands, LogFormat};
use gmail_vacation_responder::error::GmailError;
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        tracing::error!("{:#}", e);
        display_error(&e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // On non-Windows platforms, use aws-lc-rs; on Windows, use ring
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_vacation_responder=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_vacation_responder=info,warn"))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    // Anything that panics outside a handled path is fatal
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("Unexpected failure: {}", info);
        process::exit(1);
    }));

    match cli.command() {
        Commands::Serve { port } => {
            tracing::info!("Starting vacation responder trigger");
            cli::serve(&cli, port).await?;
            Ok(())
        }

        Commands::Run => {
            tracing::info!("Starting vacation responder");
            cli::run(&cli).await?;
            Ok(())
        }

        Commands::Once => {
            let report = cli::once(&cli).await?;
            print!("{}", cli::format_report(&report));
            Ok(())
        }

        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");
            let account = cli::authenticate(&cli, force).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);
            println!("Connected to account: {}", account);
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            cli::init_config(&output, force).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - label.name: Label applied to every answered message");
            println!("  - reply.body: Text of the automatic reply");
            println!("  - schedule.min_interval_secs / max_interval_secs: Polling window");
            println!("  - server.port: Port of the HTTP trigger");
            Ok(())
        }
    }
}

/// Print hints for the errors a user can fix
fn display_error(error: &anyhow::Error) {
    if let Some(gmail_err) = error.downcast_ref::<GmailError>() {
        match gmail_err {
            GmailError::AuthError(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is valid.");
                eprintln!("      You can download it from Google Cloud Console.");
                eprintln!("      Try running: vacation-responder auth --force");
            }
            GmailError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: vacation-responder init-config --force");
            }
            GmailError::Forbidden(_) => {
                eprintln!("\nHint: The cached token may lack a required scope.");
                eprintln!("      Try running: vacation-responder auth --force");
            }
            _ => {}
        }
    }
}
