//! Operator-command errors.
//!
//! Only the command layer surfaces typed errors: configuration problems are
//! warn-and-skip, routing misses are log-and-skip (they must never abort the
//! fan-out of the remaining routes).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid endpoint `{0}` (expected channel@network)")]
    BadEndpoint(String),

    #[error("need at least two channel@network endpoints")]
    TooFewEndpoints,

    #[error("refusing to link {given} endpoints at once (limit {limit})")]
    TooManyEndpoints { given: usize, limit: usize },

    #[error("missing value for `{0}`")]
    MissingValue(String),

    #[error("unknown flag `{0}`")]
    UnknownFlag(String),

    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("invalid pattern `{pattern}`: {reason}")]
    BadPattern { pattern: String, reason: String },

    #[error("no channel given and none implied by the invoking context")]
    NoChannelContext,
}
