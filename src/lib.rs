//! Gmail Vacation Responder
//!
//! Answers unreplied mail while the account owner is away. Every tick queries
//! the inbox for messages that are not chats, were not sent by the owner and
//! carry no user label yet, sends each sender a fixed reply, and then marks
//! the message with a dedicated label and moves it out of the inbox. The
//! label is the only state: a message carrying it is never answered twice.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gmail_vacation_responder::{auth, client::ProductionGmailClient, config::Config};
//! use gmail_vacation_responder::{LabelResolver, ReplyComposer, TriageLoop};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".vacation-responder/token.json".as_ref(),
//!     ).await?;
//!     let client = Arc::new(ProductionGmailClient::new(
//!         hub,
//!         config.client.max_retries,
//!         config.client.request_timeout(),
//!     ));
//!
//!     let label_id = LabelResolver::new(Arc::clone(&client), config.label.visibility())
//!         .resolve_label(&config.label.name)
//!         .await?
//!         .into_id();
//!
//!     let composer = ReplyComposer::new(&config.reply.from, &config.reply.body);
//!     let report = TriageLoop::new(client, composer, label_id).run_once().await?;
//!     println!("replied to {} messages", report.replied.len());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Gmail API facade with retry logic and pagination
//! - [`label_resolver`] - Create-or-get of the "handled" label
//! - [`composer`] - Reply construction and wire encoding
//! - [`triage`] - One pass over unreplied messages
//! - [`scheduler`] - Randomized repetition of the triage pass
//! - [`server`] - HTTP trigger
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod auth;
pub mod cli;
pub mod client;
pub mod composer;
pub mod config;
pub mod error;
pub mod label_resolver;
pub mod models;
pub mod scheduler;
pub mod server;
pub mod triage;

// Re-export commonly used types for convenience
pub use error::{GmailError, Result};

// Core data models
pub use models::{
    LabelResolution, LabelVisibility, MessageFailure, MessageHeaders, Reply, TriageReport,
    TriageStage,
};

// Config types
pub use config::Config;

// Client traits
pub use auth::{MailboxConnector, OAuthConnector};
pub use client::{GmailClient, LabelInfo, ProductionGmailClient};

// Pipeline components
pub use composer::ReplyComposer;
pub use label_resolver::LabelResolver;
pub use scheduler::{IntervalBounds, Scheduler, SchedulerHandle};
pub use server::{Responder, TriggerStatus};
pub use triage::TriageLoop;

// CLI types (for binary usage)
pub use cli::{Cli, Commands};
