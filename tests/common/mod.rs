//! Common test utilities and fixtures
//!
//! `FakeMailbox` keeps labels and messages in memory and answers the
//! candidate query the way Gmail would for this crate's purposes: chats,
//! the owner's own mail and anything with a user label are excluded.

#![allow(dead_code)]

use async_trait::async_trait;
use gmail_vacation_responder::auth::MailboxConnector;
use gmail_vacation_responder::client::{GmailClient, LabelInfo};
use gmail_vacation_responder::composer::decode_raw;
use gmail_vacation_responder::error::{GmailError, Result};
use gmail_vacation_responder::models::{LabelVisibility, MessageHeaders};
use gmail_vacation_responder::triage::CANDIDATE_QUERY;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Prefix Gmail uses for user label ids
const USER_LABEL_PREFIX: &str = "Label_";

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub id: String,
    pub from: String,
    pub subject: Option<String>,
    pub labels: BTreeSet<String>,
    pub from_me: bool,
    pub in_chats: bool,
}

impl FakeMessage {
    pub fn inbox(id: &str, from: &str, subject: &str) -> Self {
        Self {
            id: id.to_string(),
            from: from.to_string(),
            subject: Some(subject.to_string()),
            labels: ["INBOX", "UNREAD"].iter().map(|s| s.to_string()).collect(),
            from_me: false,
            in_chats: false,
        }
    }

    pub fn sent_by_me(mut self) -> Self {
        self.from_me = true;
        self
    }

    pub fn chat(mut self) -> Self {
        self.in_chats = true;
        self
    }

    pub fn without_subject(mut self) -> Self {
        self.subject = None;
        self
    }

    pub fn with_label(mut self, label_id: &str) -> Self {
        self.labels.insert(label_id.to_string());
        self
    }

    fn is_candidate(&self) -> bool {
        !self.in_chats
            && !self.from_me
            && !self.labels.iter().any(|l| l.starts_with(USER_LABEL_PREFIX))
    }
}

#[derive(Default)]
struct MailboxState {
    labels: Vec<LabelInfo>,
    messages: Vec<FakeMessage>,
    sent: Vec<String>,
    failing_recipients: BTreeSet<String>,
    next_label: usize,
}

/// In-memory mailbox implementing `GmailClient`
#[derive(Default)]
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
    query_delay: Option<Duration>,
    send_delay: Option<Duration>,
    queries: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeMailbox {
    pub fn new(messages: Vec<FakeMessage>) -> Self {
        let mailbox = Self::default();
        {
            let mut state = mailbox.state.lock().unwrap();
            for system in ["INBOX", "UNREAD", "SENT", "CHAT"] {
                state.labels.push(LabelInfo {
                    id: system.to_string(),
                    name: system.to_string(),
                });
            }
            state.messages = messages;
            state.next_label = 1;
        }
        mailbox
    }

    /// Every candidate query takes this long on the paused clock
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub fn with_existing_label(self, name: &str) -> Self {
        self.add_user_label(name);
        self
    }

    pub fn add_user_label(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = format!("{}{}", USER_LABEL_PREFIX, state.next_label);
        state.next_label += 1;
        state.labels.push(LabelInfo {
            id: id.clone(),
            name: name.to_string(),
        });
        id
    }

    pub fn deliver(&self, message: FakeMessage) {
        self.state.lock().unwrap().messages.push(message);
    }

    /// Sends addressed to `address` fail with a server error
    pub fn fail_sends_to(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_recipients
            .insert(address.to_string());
    }

    pub fn heal_sends_to(&self, address: &str) {
        self.state.lock().unwrap().failing_recipients.remove(address);
    }

    /// Decoded RFC-822 text of every reply sent so far
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn message(&self, id: &str) -> FakeMessage {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no message {}", id))
    }

    pub fn label_id(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.id.clone())
    }

    pub fn label_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .labels
            .iter()
            .filter(|l| l.name == name)
            .count()
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Highest number of candidate queries ever running at once
    pub fn max_concurrent_queries(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GmailClient for FakeMailbox {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(self.state.lock().unwrap().labels.clone())
    }

    async fn create_label(&self, name: &str, _visibility: &LabelVisibility) -> Result<String> {
        if self.label_id(name).is_some() {
            return Err(GmailError::Conflict(format!(
                "Label name exists or conflicts: {}",
                name
            )));
        }
        Ok(self.add_user_label(name))
    }

    async fn list_message_ids(&self, query: &str) -> Result<Vec<String>> {
        if query != CANDIDATE_QUERY {
            return Err(GmailError::BadRequest(format!("unsupported query: {}", query)));
        }

        self.queries.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }

        let ids = self
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.is_candidate())
            .map(|m| m.id.clone())
            .collect();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ids)
    }

    async fn get_message_headers(&self, id: &str, names: &[String]) -> Result<MessageHeaders> {
        let state = self.state.lock().unwrap();
        let message = state
            .messages
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| GmailError::MessageNotFound(id.to_string()))?;

        let mut headers = MessageHeaders::new(id);
        for name in names {
            match name.to_ascii_lowercase().as_str() {
                "from" => headers.insert("From", &message.from),
                "subject" => {
                    if let Some(subject) = &message.subject {
                        headers.insert("Subject", subject);
                    }
                }
                _ => {}
            }
        }
        Ok(headers)
    }

    async fn send_message(&self, raw: &str) -> Result<Option<String>> {
        let text = decode_raw(raw)?;

        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        let failing = state
            .failing_recipients
            .iter()
            .any(|address| text.contains(&format!("To: {}\r\n", address)));
        if failing {
            return Err(GmailError::ServerError {
                status: 500,
                message: "backend error".to_string(),
            });
        }

        state.sent.push(text);
        Ok(Some(format!("sent-{}", state.sent.len())))
    }

    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| GmailError::MessageNotFound(id.to_string()))?;

        for label in remove {
            message.labels.remove(label);
        }
        for label in add {
            message.labels.insert(label.clone());
        }
        Ok(())
    }
}

/// Connector handing out a shared fake mailbox
pub struct FakeConnector {
    pub mailbox: Arc<FakeMailbox>,
    pub reject: bool,
    /// Consent never arrives
    pub never_answers: bool,
}

impl FakeConnector {
    pub fn new(mailbox: Arc<FakeMailbox>) -> Self {
        Self {
            mailbox,
            reject: false,
            never_answers: false,
        }
    }

    pub fn rejecting(mailbox: Arc<FakeMailbox>) -> Self {
        Self {
            reject: true,
            ..Self::new(mailbox)
        }
    }

    pub fn unanswered(mailbox: Arc<FakeMailbox>) -> Self {
        Self {
            never_answers: true,
            ..Self::new(mailbox)
        }
    }
}

#[async_trait]
impl MailboxConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn GmailClient>> {
        if self.never_answers {
            std::future::pending::<()>().await;
        }
        if self.reject {
            return Err(GmailError::AuthError("user declined consent".to_string()));
        }
        let client: Arc<dyn GmailClient> = self.mailbox.clone();
        Ok(client)
    }
}

/// The three-message inbox used across tests
pub fn vacation_inbox() -> Vec<FakeMessage> {
    vec![
        FakeMessage::inbox("m1", "Alice Example <alice@example.com>", "Lunch on Friday?"),
        FakeMessage::inbox("m2", "\"Bob, Jr.\" <bob@example.org>", "Re: Budget"),
        FakeMessage::inbox("m3", "Carol <carol@example.net>", "Contract draft"),
    ]
}

/// Value of a header line in a decoded reply
pub fn header<'a>(message: &'a str, name: &str) -> Option<&'a str> {
    let head = message.split("\r\n\r\n").next()?;
    head.split("\r\n")
        .find_map(|line| line.strip_prefix(&format!("{}: ", name)))
}

pub fn body(message: &str) -> &str {
    message.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}
