//! One pass over unreplied mail: query, reply, re-label
//!
//! Each run takes a fresh snapshot of candidate ids and handles them one at
//! a time. A message is labeled only after its reply was sent, so a crash
//! between the two steps costs at most a duplicate reply on the next run.
//! A failure on one message is recorded in the [`TriageReport`] and the run
//! moves on to the next candidate.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::GmailClient;
use crate::composer::{ReplyComposer, REQUIRED_HEADERS};
use crate::error::{GmailError, Result};
use crate::models::{MessageFailure, TriageReport, TriageStage};

/// Not a chat, not sent by the account owner, no user label yet
pub const CANDIDATE_QUERY: &str = "-in:chats -from:me -has:userlabels";

/// System label removed once a message is handled
pub const INBOX_LABEL: &str = "INBOX";

pub struct TriageLoop {
    client: Arc<dyn GmailClient>,
    composer: ReplyComposer,
    label_id: String,
    header_names: Vec<String>,
}

impl TriageLoop {
    pub fn new(
        client: Arc<dyn GmailClient>,
        composer: ReplyComposer,
        label_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            composer,
            label_id: label_id.into(),
            header_names: REQUIRED_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }

    pub fn label_id(&self) -> &str {
        &self.label_id
    }

    /// Run one tick with no way to interrupt it
    pub async fn run_once(&self) -> Result<TriageReport> {
        let (_keep_open, shutdown) = watch::channel(false);
        self.run(&shutdown).await
    }

    /// Run one tick, starting no new candidate once `shutdown` reads true
    ///
    /// Only a failed candidate query is returned as an error.
    pub async fn run(&self, shutdown: &watch::Receiver<bool>) -> Result<TriageReport> {
        let mut report = TriageReport::new();

        let candidates = self.client.list_message_ids(CANDIDATE_QUERY).await?;
        report.candidates = candidates.len();
        info!(
            run_id = %report.run_id,
            "Found {} unreplied messages",
            candidates.len()
        );

        for id in candidates {
            if *shutdown.borrow() {
                info!(
                    run_id = %report.run_id,
                    "Shutdown requested, leaving {} candidates for a later run",
                    report.skipped()
                );
                report.interrupted = true;
                break;
            }

            match self.process_message(&id).await {
                Ok(()) => report.replied.push(id),
                Err((stage, e)) => {
                    warn!(
                        run_id = %report.run_id,
                        "Skipping message {} ({} failed): {}",
                        id, stage, e
                    );
                    report.failures.push(MessageFailure {
                        message_id: id,
                        stage,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            run_id = %report.run_id,
            "Triage run finished: {} replied, {} failed, {} skipped",
            report.replied.len(),
            report.failures.len(),
            report.skipped()
        );
        Ok(report)
    }

    /// Fetch headers, compose, send, then label a single message
    async fn process_message(&self, id: &str) -> std::result::Result<(), (TriageStage, GmailError)> {
        let headers = self
            .client
            .get_message_headers(id, &self.header_names)
            .await
            .map_err(|e| (TriageStage::FetchHeaders, e))?;

        let reply = self
            .composer
            .compose(&headers)
            .map_err(|e| (TriageStage::Compose, e))?;

        let sent_id = self
            .client
            .send_message(&reply.encode())
            .await
            .map_err(|e| (TriageStage::Send, e))?;
        match sent_id {
            Some(sent_id) => info!("Sent reply to message with id {} (reply id {})", id, sent_id),
            None => info!("Sent reply to message with id {} (reply id unknown)", id),
        }

        self.client
            .modify_labels(
                id,
                std::slice::from_ref(&self.label_id),
                &[INBOX_LABEL.to_string()],
            )
            .await
            .map_err(|e| (TriageStage::Label, e))?;
        debug!("Added label {} to message with id {}", self.label_id, id);

        Ok(())
    }
}
