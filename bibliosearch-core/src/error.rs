use thiserror::Error;

/// Failures observed while talking to the search service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("connection to the search service failed: {0}")]
    Network(String),
    #[error("search service answered with HTTP {status}")]
    Status { status: u16, detail: Option<String> },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn status(status: u16, detail: Option<String>) -> Self {
        ClientError::Status {
            status,
            detail: detail.filter(|d| !d.trim().is_empty()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Status { status: 404, .. })
    }

    /// Message shown to the user for the failed action.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Status {
                detail: Some(detail),
                ..
            } => detail.clone(),
            ClientError::Status { status, .. } => format!("error {}", status),
            ClientError::Network(_) => "could not reach the search service".to_string(),
            ClientError::Decode(_) => "the search service sent an unreadable response".to_string(),
        }
    }
}
