//! OAuth2 authentication management for Gmail API

use async_trait::async_trait;
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use yup_oauth2::ApplicationSecret;

use crate::client::{GmailClient, ProductionGmailClient};
use crate::error::{GmailError, Result};

pub const SCOPE_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";
pub const SCOPE_SEND: &str = "https://www.googleapis.com/auth/gmail.send";
pub const SCOPE_LABELS: &str = "https://www.googleapis.com/auth/gmail.labels";
pub const SCOPE_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Gmail API scopes required by the responder
///
/// These scopes provide:
/// - gmail.readonly: candidate queries and header fetches
/// - gmail.send: sending the auto-reply
/// - gmail.labels: creating and listing labels
/// - gmail.modify: re-labeling handled messages
pub const REQUIRED_SCOPES: &[&str] = &[SCOPE_READONLY, SCOPE_SEND, SCOPE_LABELS, SCOPE_MODIFY];

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Read and parse the OAuth2 client secret file
///
/// Called before anything is served so a missing or malformed file
/// stops the process at startup.
pub async fn load_application_secret(credentials_path: &Path) -> Result<ApplicationSecret> {
    yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| {
            GmailError::AuthError(format!(
                "Failed to read credentials from {:?}: {}",
                credentials_path, e
            ))
        })
}

/// Initialize Gmail API hub with OAuth2 authentication
///
/// This function sets up the complete Gmail API client with:
/// - OAuth2 authentication using InstalledFlow (desktop app flow)
/// - Token persistence to disk for automatic refresh
/// - HTTP/1 client with TLS support
///
/// # Arguments
/// * `credentials_path` - Path to the OAuth2 credentials JSON file
/// * `token_cache_path` - Path where access tokens will be cached
pub async fn initialize_gmail_hub(
    credentials_path: &Path,
    token_cache_path: &Path,
) -> Result<GmailHub> {
    let secret = load_application_secret(credentials_path).await?;

    if let Some(parent) = token_cache_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    // HTTPRedirect opens a browser for user authorization
    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Pre-authenticate with every required scope so the cached token covers
    // all later calls and no second consent prompt is triggered
    let _token = auth
        .token(REQUIRED_SCOPES)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to obtain token: {}", e)))?;

    if token_cache_path.exists() {
        if let Err(e) = secure_token_file(token_cache_path).await {
            warn!("Could not restrict permissions on {:?}: {}", token_cache_path, e);
        }
    }

    // HTTP/1 works better with google-gmail1 than the HTTP/2 default
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| {
                    GmailError::AuthError(format!("Failed to load TLS roots: {}", e))
                })?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}

/// Secure token file permissions on Unix systems
///
/// Sets file permissions to 0600 (read/write for owner only)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Windows relies on the profile directory ACLs
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}

/// Produces an authorized mailbox client
///
/// The trigger endpoint calls this once to perform its authorization check.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn GmailClient>>;
}

/// Connector backed by the OAuth2 installed-app flow
#[derive(Debug, Clone)]
pub struct OAuthConnector {
    pub credentials_path: PathBuf,
    pub token_cache_path: PathBuf,
    pub max_retries: u32,
    pub request_timeout: Duration,
}

#[async_trait]
impl MailboxConnector for OAuthConnector {
    async fn connect(&self) -> Result<Arc<dyn GmailClient>> {
        let hub = initialize_gmail_hub(&self.credentials_path, &self.token_cache_path).await?;
        info!("Authorized Gmail access (token cache {:?})", self.token_cache_path);
        Ok(Arc::new(ProductionGmailClient::new(
            hub,
            self.max_retries,
            self.request_timeout,
        )))
    }
}
