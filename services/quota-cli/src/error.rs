//! Gemini client errors
//!
//! `Display` output is what the router's classifier reads, so upstream
//! failures render as `"<status> <body>"` with the body verbatim.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeminiError {
    /// Non-2xx response from the API.
    #[error("{status} {body}")]
    Upstream { status: u16, body: String },

    /// Connection, TLS, or timeout failure before a response arrived.
    #[error("request to generation API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("no API key bound for this request")]
    Unbound,

    #[error("invalid generation response: {0}")]
    InvalidResponse(String),
}
