use thiserror::Error;

/// Type alias for Result with SpamError
pub type Result<T> = std::result::Result<T, SpamError>;

/// Error types for the spam triage pipeline
///
/// Variants fall into two scopes:
/// - record-scoped (`MalformedRecord`, `RequestBuild`, `ClassificationParse`) only
///   ever affect a single message and never abort a batch
/// - capability-scoped (mailbox and model provider failures) abort the whole run
#[derive(Error, Debug)]
pub enum SpamError {
    /// A fetched message has no usable identifier
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A classification request could not be built for a record
    #[error("Cannot build classification request: {0}")]
    RequestBuild(String),

    /// The model response could not be read as structured data
    #[error("Unparseable classification for {email_id}: {reason}")]
    ClassificationParse { email_id: String, reason: String },

    /// Internal invariant violation (counts that do not add up)
    #[error("Logic error: {0}")]
    Logic(String),

    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Language model provider returned a non-transient error
    #[error("Model provider error: {0}")]
    ModelError(String),

    /// Caller passed an argument outside its domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SpamError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SpamError::RateLimitExceeded { .. }
                | SpamError::ServerError { .. }
                | SpamError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Errors that concern one message only and must not abort a batch
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            SpamError::MalformedRecord(_)
                | SpamError::RequestBuild(_)
                | SpamError::ClassificationParse { .. }
        )
    }
}

/// Parse the Retry-After header value
///
/// The header is either delay-seconds ("120") or an HTTP-date. Missing,
/// invalid or past values fall back to 5 seconds.
fn parse_retry_after(value: Option<&str>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_str) = value {
        if let Ok(seconds) = retry_after_str.trim().parse::<u64>() {
            return seconds;
        }

        if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
            let now = std::time::SystemTime::now();
            if let Ok(duration) = http_date.duration_since(now) {
                return duration.as_secs();
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

/// Map an HTTP status code from any provider onto an error variant
pub(crate) fn from_status(status: u16, message: String, retry_after: Option<&str>) -> SpamError {
    match status {
        429 => SpamError::RateLimitExceeded {
            retry_after: parse_retry_after(retry_after),
        },
        401 => SpamError::AuthError(message),
        404 => SpamError::MessageNotFound(message),
        400 => SpamError::BadRequest(message),
        403 => SpamError::Forbidden(message),
        500..=599 => SpamError::ServerError { status, message },
        _ => SpamError::ApiError(message),
    }
}

impl From<google_gmail1::Error> for SpamError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok());
                from_status(status_code, message, retry_after)
            }
            google_gmail1::Error::BadRequest(ref err) => SpamError::BadRequest(format!("{}", err)),
            google_gmail1::Error::HttpError(ref err) => {
                SpamError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => SpamError::NetworkError(err.to_string()),
            _ => SpamError::ApiError(error.to_string()),
        }
    }
}

impl From<reqwest::Error> for SpamError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return from_status(status.as_u16(), error.to_string(), None);
        }
        if error.is_timeout() || error.is_connect() || error.is_request() {
            return SpamError::NetworkError(error.to_string());
        }
        if error.is_decode() {
            return SpamError::ModelError(format!("Undecodable provider response: {}", error));
        }
        SpamError::NetworkError(error.to_string())
    }
}
