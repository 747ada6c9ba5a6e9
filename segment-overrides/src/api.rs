use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("request to {resource} failed with status {status}: {body}")]
    FetchFailed {
        resource: String,
        status: u16,
        body: String,
    },
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid api url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid api token")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
    #[error("failed to parse response from {resource}: {source}")]
    ResponseParsing {
        resource: String,
        source: serde_json::Error,
    },
    #[error("failed to merge change sets: {0}")]
    ChangeSetMerge(String),
    #[error("segment {0} already has an override")]
    DuplicateSegment(i64),
    #[error("no overrides have been computed yet")]
    NothingComputed,
}

impl OverrideError {
    /// Returns a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            OverrideError::FetchFailed { .. } => "fetch_failed",
            OverrideError::Http(_) => "http_error",
            OverrideError::InvalidUrl(_) => "invalid_url",
            OverrideError::InvalidToken(_) => "invalid_token",
            OverrideError::ResponseParsing { .. } => "response_parsing_error",
            OverrideError::ChangeSetMerge(_) => "change_set_merge_error",
            OverrideError::DuplicateSegment(_) => "duplicate_segment",
            OverrideError::NothingComputed => "nothing_computed",
        }
    }

    /// Whether the caller could reasonably offer a retry. Nothing is retried automatically.
    pub fn is_retryable(&self) -> bool {
        match self {
            OverrideError::FetchFailed { status, .. } => *status >= 500 || *status == 429,
            OverrideError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        let err = OverrideError::FetchFailed {
            resource: "projects/1/segments/".to_string(),
            status: 503,
            body: String::new(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "fetch_failed");

        let err = OverrideError::FetchFailed {
            resource: "projects/1/segments/".to_string(),
            status: 403,
            body: "forbidden".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_merge_errors_are_not_retryable() {
        let err = OverrideError::ChangeSetMerge("boom".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "failed to merge change sets: boom");
    }
}
