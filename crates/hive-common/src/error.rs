// Errors raised by the message channel.

use std::io;
use thiserror::Error;

/// A failure while talking to the parent process.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// One of the two byte streams is broken (closed pipe, EOF, I/O error).
    /// Nothing can be done locally; the worker has to exit.
    #[error("lost the connection to the parent process on {stream}")]
    LostConnection {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    /// A line from the parent could not be decoded as JSON.
    #[error("could not parse the message from the parent process: {line:?}")]
    MalformedMessage {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The parent replied something else than the expected acknowledgment.
    #[error("received '{0}' instead of OK")]
    UnexpectedResponse(serde_json::Value),
}

impl ChannelError {
    pub fn lost(stream: &'static str, source: io::Error) -> Self {
        ChannelError::LostConnection { stream, source }
    }

    /// Whether this error means the transport is gone.
    pub fn is_lost_connection(&self) -> bool {
        matches!(self, ChannelError::LostConnection { .. })
    }
}
