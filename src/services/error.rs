use thiserror::Error;

/// Conditions that stop the relay loop.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Malformed worker reply: {0}")]
    MalformedReply(#[from] serde_json::Error),

    #[error("Request channel closed")]
    ChannelClosed,

    #[error("Failed to encode client result: {0}")]
    Encode(String),
}
