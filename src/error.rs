use thiserror::Error;

/// Errors raised by the indexing and answering pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing credential, unknown index, dimension or metric mismatch. Always fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Timeouts, connection failures, 429 and 5xx responses. Safe to retry.
    #[error("transient error from {service}: {message}")]
    TransientRemote {
        service: &'static str,
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Auth failures, malformed requests, exhausted quotas. Never retried.
    #[error("permanent error from {service}: {message}")]
    PermanentRemote {
        service: &'static str,
        message: String,
        status: Option<u16>,
    },

    #[error("question is empty")]
    EmptyInput,

    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A single record could not be embedded or stored.
    #[error("skipped {id}: {reason}")]
    IndexingSkip { id: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl RagError {
    pub fn transient(service: &'static str, message: impl Into<String>) -> Self {
        RagError::TransientRemote {
            service,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn permanent(service: &'static str, message: impl Into<String>) -> Self {
        RagError::PermanentRemote {
            service,
            message: message.into(),
            status: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::TransientRemote { .. })
    }

    /// Auth, quota and request-shape failures: retrying or moving on to the next item won't help.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RagError::PermanentRemote { .. })
    }

    pub fn is_config(&self) -> bool {
        matches!(self, RagError::Config(_))
    }

    /// HTTP status behind a permanent remote error, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RagError::PermanentRemote { status, .. } => *status,
            _ => None,
        }
    }

    /// Server-requested delay, if the remote sent one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            RagError::TransientRemote {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// Classify an HTTP status returned by `service`.
    pub fn from_status(
        service: &'static str,
        status: reqwest::StatusCode,
        body: &str,
        retry_after_secs: Option<u64>,
    ) -> Self {
        let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
        if is_retryable_status(status.as_u16()) {
            RagError::TransientRemote {
                service,
                message,
                retry_after_secs,
            }
        } else {
            RagError::PermanentRemote {
                service,
                message,
                status: Some(status.as_u16()),
            }
        }
    }

    /// Classify a transport-level failure.
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if !is_retryable_status(status.as_u16()) {
                return RagError::permanent(service, err.to_string());
            }
        }
        if err.is_decode() || err.is_builder() {
            return RagError::permanent(service, err.to_string());
        }
        RagError::transient(service, err.to_string())
    }
}

impl From<rusqlite::Error> for RagError {
    fn from(err: rusqlite::Error) -> Self {
        RagError::Storage(err.to_string())
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        let err = RagError::from_status("pinecone", StatusCode::SERVICE_UNAVAILABLE, "busy", None);
        assert!(err.is_transient());

        let err = RagError::from_status("pinecone", StatusCode::TOO_MANY_REQUESTS, "", Some(7));
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(7));

        let err = RagError::from_status("pinecone", StatusCode::UNAUTHORIZED, "bad key", None);
        assert!(!err.is_transient());
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = RagError::from_status("slack", StatusCode::BAD_REQUEST, &body, None);
        assert!(err.to_string().len() < 400);
    }
}
