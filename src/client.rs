//! Gmail API client with retry logic

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use google_gmail1::api::{Label, Message, ModifyMessageRequest};
use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{GmailHub, SCOPE_LABELS, SCOPE_MODIFY, SCOPE_READONLY, SCOPE_SEND};
use crate::error::{GmailError, Result};
use crate::models::{LabelVisibility, MessageHeaders};

/// Page size requested from `messages.list`
const LIST_PAGE_SIZE: u32 = 100;

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Mailbox operations the responder consumes
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a label; fails with `GmailError::Conflict` if the name is taken
    async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<String>;

    /// List every message id matching a query, across all result pages
    async fn list_message_ids(&self, query: &str) -> Result<Vec<String>>;

    /// Fetch the named headers of one message
    async fn get_message_headers(&self, id: &str, names: &[String]) -> Result<MessageHeaders>;

    /// Send a base64url-encoded RFC-822 message, returning the new message id
    /// when Gmail reports one
    async fn send_message(&self, raw: &str) -> Result<Option<String>>;

    /// Add and remove label ids on one message
    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;
}

#[async_trait]
impl<C> GmailClient for Arc<C>
where
    C: GmailClient + ?Sized,
{
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        (**self).list_labels().await
    }

    async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<String> {
        (**self).create_label(name, visibility).await
    }

    async fn list_message_ids(&self, query: &str) -> Result<Vec<String>> {
        (**self).list_message_ids(query).await
    }

    async fn get_message_headers(&self, id: &str, names: &[String]) -> Result<MessageHeaders> {
        (**self).get_message_headers(id, names).await
    }

    async fn send_message(&self, raw: &str) -> Result<Option<String>> {
        (**self).send_message(raw).await
    }

    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        (**self).modify_labels(id, add, remove).await
    }
}

/// Follow `nextPageToken` until the provider reports no further page
///
/// `fetch_page` receives the token of the page to load (None for the first)
/// and returns that page's items plus the next token.
pub async fn collect_pages<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<String>)>>,
{
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let (items, next_page_token) = fetch_page(page_token.take()).await?;
        all_items.extend(items);

        match next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    Ok(all_items)
}

/// Production Gmail client backed by the `google-gmail1` hub
///
/// Idempotent calls are retried with exponential backoff on transient
/// errors and every call is bounded by a timeout. Sending is attempted
/// exactly once.
pub struct ProductionGmailClient {
    hub: GmailHub,
    max_retries: u32,
    request_timeout: Duration,
}

impl ProductionGmailClient {
    /// Create a new production Gmail client
    ///
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `max_retries` - Retries after the first attempt for idempotent calls
    /// * `request_timeout` - Upper bound on a single API call
    pub fn new(hub: GmailHub, max_retries: u32, request_timeout: Duration) -> Self {
        Self {
            hub,
            max_retries,
            request_timeout,
        }
    }

    /// Check if an error is retryable
    fn should_retry(error: &GmailError) -> bool {
        error.is_transient()
    }

    /// Bound an API call with the configured timeout
    async fn with_timeout<T, Fut>(&self, operation_name: &str, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Gmail API {} call timed out after {:?}",
                    operation_name, self.request_timeout
                );
                Err(GmailError::NetworkError(format!(
                    "API call timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    let wait = match &e {
                        GmailError::RateLimitExceeded { retry_after } => {
                            delay.max(Duration::from_secs(*retry_after))
                        }
                        _ => delay,
                    };
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn list_page(
        &self,
        query: &str,
        page_token: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)> {
        let mut call = self
            .hub
            .users()
            .messages_list("me")
            .q(query)
            .max_results(LIST_PAGE_SIZE);

        if let Some(token) = page_token.as_deref() {
            call = call.page_token(token);
        }

        let (_, response) = self
            .with_timeout("messages.list", async {
                call.add_scope(SCOPE_READONLY)
                    .doit()
                    .await
                    .map_err(GmailError::from)
            })
            .await?;

        let ids = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|msg_ref| msg_ref.id)
            .collect();

        Ok((ids, response.next_page_token))
    }
}

/// Id of a message returned by `messages.send`.
/// The send already happened, so a missing id is only worth a warning.
fn sent_message_id(sent: Message) -> Option<String> {
    let id = sent.id.filter(|id| !id.is_empty());
    if id.is_none() {
        warn!("messages.send succeeded but returned no message id");
    }
    id
}

/// Convert a fetched Gmail message into our header map
fn parse_message_headers(id: &str, msg: Message) -> Result<MessageHeaders> {
    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .ok_or_else(|| GmailError::InvalidMessageFormat(format!("Message {} has no headers", id)))?;

    let mut parsed = MessageHeaders::new(msg.id.unwrap_or_else(|| id.to_string()));
    for header in headers {
        if let (Some(name), Some(value)) = (header.name, header.value) {
            parsed.insert(name, value);
        }
    }
    Ok(parsed)
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Self::with_retry("list_labels", self.max_retries, || async {
            debug!("Calling Gmail API to list labels...");
            let (_, response) = self
                .with_timeout("labels.list", async {
                    self.hub
                        .users()
                        .labels_list("me")
                        .add_scope(SCOPE_LABELS)
                        .doit()
                        .await
                        .map_err(GmailError::from)
                })
                .await?;

            let labels: Vec<LabelInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect();

            debug!("Successfully parsed {} labels", labels.len());
            Ok(labels)
        })
        .await
    }

    async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<String> {
        Self::with_retry("create_label", self.max_retries, || async {
            let label = Label {
                name: Some(name.to_string()),
                label_list_visibility: Some(visibility.label_list_visibility.clone()),
                message_list_visibility: Some(visibility.message_list_visibility.clone()),
                ..Default::default()
            };

            let (_, created_label) = self
                .with_timeout("labels.create", async {
                    self.hub
                        .users()
                        .labels_create(label, "me")
                        .add_scope(SCOPE_LABELS)
                        .doit()
                        .await
                        .map_err(GmailError::from)
                })
                .await?;

            created_label
                .id
                .ok_or_else(|| GmailError::LabelError("Created label has no ID".to_string()))
        })
        .await
    }

    async fn list_message_ids(&self, query: &str) -> Result<Vec<String>> {
        let ids = collect_pages(|page_token| {
            Self::with_retry("list_message_ids", self.max_retries, move || {
                let page_token = page_token.clone();
                async move { self.list_page(query, page_token).await }
            })
        })
        .await?;

        debug!("Query '{}' matched {} messages", query, ids.len());
        Ok(ids)
    }

    async fn get_message_headers(&self, id: &str, names: &[String]) -> Result<MessageHeaders> {
        Self::with_retry("get_message_headers", self.max_retries, || async {
            let mut call = self.hub.users().messages_get("me", id).format("metadata");
            for name in names {
                call = call.add_metadata_headers(name);
            }

            let (_, msg) = self
                .with_timeout("messages.get", async {
                    call.add_scope(SCOPE_READONLY)
                        .doit()
                        .await
                        .map_err(GmailError::from)
                })
                .await?;

            parse_message_headers(id, msg)
        })
        .await
    }

    async fn send_message(&self, raw: &str) -> Result<Option<String>> {
        let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|e| {
            GmailError::InvalidMessageFormat(format!("Raw message is not base64url: {}", e))
        })?;
        let mime_type: mime::Mime = "message/rfc822"
            .parse()
            .map_err(|e| GmailError::Unknown(format!("Invalid MIME type: {}", e)))?;

        let (_, sent) = self
            .with_timeout("messages.send", async {
                self.hub
                    .users()
                    .messages_send(Message::default(), "me")
                    .add_scope(SCOPE_SEND)
                    .upload(Cursor::new(bytes), mime_type)
                    .await
                    .map_err(GmailError::from)
            })
            .await?;

        Ok(sent_message_id(sent))
    }

    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        Self::with_retry("modify_labels", self.max_retries, || async {
            let modify_request = ModifyMessageRequest {
                add_label_ids: (!add.is_empty()).then(|| add.to_vec()),
                remove_label_ids: (!remove.is_empty()).then(|| remove.to_vec()),
            };

            self.with_timeout("messages.modify", async {
                self.hub
                    .users()
                    .messages_modify(modify_request, "me", id)
                    .add_scope(SCOPE_MODIFY)
                    .doit()
                    .await
                    .map_err(GmailError::from)
            })
            .await?;

            Ok(())
        })
        .await
    }
}
