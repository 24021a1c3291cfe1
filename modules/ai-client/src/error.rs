use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by provider (status {status})")]
    RateLimited { status: u16 },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl AiError {
    /// Build the error for a non-success HTTP status.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            AiError::RateLimited {
                status: status.as_u16(),
            }
        } else {
            AiError::Api {
                status: status.as_u16(),
                message: body,
            }
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AiError::Timeout(e.to_string())
        } else {
            AiError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_requests_maps_to_rate_limited() {
        let err = AiError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(matches!(err, AiError::RateLimited { status: 429 }));
    }

    #[test]
    fn server_error_keeps_body() {
        let err = AiError::from_status(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "overloaded".to_string(),
        );
        assert_eq!(err.to_string(), "API error (status 500): overloaded");
    }
}
