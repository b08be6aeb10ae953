use thiserror::Error;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Error types for the vacation responder
#[derive(Error, Debug)]
pub enum GmailError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Operation cancelled by a shutdown request
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Resource already exists (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid message format or encoding error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// A header required to build a reply is absent
    #[error("Message {message_id} is missing the {header} header")]
    MissingHeader { message_id: String, header: String },

    /// The From header has no usable angle-bracket address
    #[error("Cannot parse reply address from '{0}'")]
    AddressParse(String),

    /// Label-related errors
    #[error("Label error: {0}")]
    LabelError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl GmailError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GmailError::RateLimitExceeded { .. }
                | GmailError::ServerError { .. }
                | GmailError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// True when the provider rejected a create because the name is taken
    pub fn is_conflict(&self) -> bool {
        matches!(self, GmailError::Conflict(_))
    }

    /// Map an HTTP status code (and message) onto the error taxonomy
    fn from_status(status_code: u16, message: String, retry_after: u64) -> Self {
        match status_code {
            429 => GmailError::RateLimitExceeded { retry_after },
            404 => GmailError::MessageNotFound(message),
            400 => GmailError::BadRequest(message),
            401 => GmailError::AuthError(message),
            403 => GmailError::Forbidden(message),
            409 => GmailError::Conflict(message),
            500..=599 => GmailError::ServerError {
                status: status_code,
                message,
            },
            _ => GmailError::ApiError(message),
        }
    }
}

/// Default wait when a 429 carries no usable Retry-After header
const DEFAULT_RETRY_AFTER: u64 = 5;

/// Parse the Retry-After header from an HTTP response
///
/// The header is either delay-seconds ("120") or an HTTP-date. Missing,
/// invalid or past values fall back to [`DEFAULT_RETRY_AFTER`].
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

/// Extract `(code, message)` from Google's JSON error envelope
///
/// `{"error": {"code": 409, "message": "Label name exists or conflicts", ...}}`
fn parse_error_envelope(value: &serde_json::Value) -> Option<(u16, String)> {
    let error = value.get("error")?;
    let code = error.get("code")?.as_u64()?;
    let code = u16::try_from(code).ok()?;
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("no message")
        .to_string();
    Some((code, format!("HTTP {}: {}", code, message)))
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            // HTTP response with a status code and no parsable body
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let message = format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                );
                GmailError::from_status(
                    status.as_u16(),
                    message,
                    parse_retry_after_header(response),
                )
            }
            // Non-success response whose body is Google's JSON error envelope
            google_gmail1::Error::BadRequest(ref value) => match parse_error_envelope(value) {
                Some((code, message)) => {
                    GmailError::from_status(code, message, DEFAULT_RETRY_AFTER)
                }
                None => GmailError::BadRequest(value.to_string()),
            },
            google_gmail1::Error::MissingToken(ref err) => {
                GmailError::AuthError(format!("No token available: {}", err))
            }
            google_gmail1::Error::Cancelled => {
                GmailError::OperationCancelled("Request cancelled".to_string())
            }
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => GmailError::NetworkError(err.to_string()),
            _ => GmailError::ApiError(error.to_string()),
        }
    }
}
