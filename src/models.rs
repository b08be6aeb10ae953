use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{GmailError, Result};

/// Headers fetched for one message, keyed by header name
///
/// Lookups are case-insensitive; Gmail echoes header names as the sender
/// wrote them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub message_id: String,
    headers: HashMap<String, String>,
}

impl MessageHeaders {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            headers: HashMap::new(),
        }
    }

    /// Insert a header; the first occurrence of a name wins
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .entry(name.into().to_ascii_lowercase())
            .or_insert_with(|| value.into());
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Like [`get`](Self::get) but a missing header is a `MissingHeader` error
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| GmailError::MissingHeader {
            message_id: self.message_id.clone(),
            header: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// A composed auto-reply, alive only until it is encoded and sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub in_reply_to: String,
    pub references: String,
    pub body: String,
}

/// Label visibility flags sent when the label is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelVisibility {
    pub label_list_visibility: String,
    pub message_list_visibility: String,
}

impl Default for LabelVisibility {
    fn default() -> Self {
        Self {
            label_list_visibility: "labelShow".to_string(),
            message_list_visibility: "show".to_string(),
        }
    }
}

/// Outcome of an idempotent create-or-get on a label name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelResolution {
    /// The label did not exist and was created
    Created(String),
    /// A label with that name already existed
    Found(String),
}

impl LabelResolution {
    pub fn id(&self) -> &str {
        match self {
            LabelResolution::Created(id) | LabelResolution::Found(id) => id,
        }
    }

    pub fn into_id(self) -> String {
        match self {
            LabelResolution::Created(id) | LabelResolution::Found(id) => id,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, LabelResolution::Created(_))
    }
}

/// Per-candidate step of a triage run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriageStage {
    FetchHeaders,
    Compose,
    Send,
    Label,
}

impl fmt::Display for TriageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriageStage::FetchHeaders => "fetch headers",
            TriageStage::Compose => "compose",
            TriageStage::Send => "send",
            TriageStage::Label => "label",
        };
        f.write_str(name)
    }
}

/// A candidate that could not be handled in this run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFailure {
    pub message_id: String,
    pub stage: TriageStage,
    pub error: String,
}

/// Summary of one triage run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub candidates: usize,
    pub replied: Vec<String>,
    pub failures: Vec<MessageFailure>,
    /// Set when a shutdown request stopped the run before all candidates
    pub interrupted: bool,
}

impl TriageReport {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            candidates: 0,
            replied: Vec::new(),
            failures: Vec::new(),
            interrupted: false,
        }
    }

    /// Candidates neither replied to nor failed (skipped by a shutdown)
    pub fn skipped(&self) -> usize {
        self.candidates
            .saturating_sub(self.replied.len() + self.failures.len())
    }
}

impl Default for TriageReport {
    fn default() -> Self {
        Self::new()
    }
}
