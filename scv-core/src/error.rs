use thiserror::Error;

/// Why a token failed to resolve to an active stream.
///
/// Kept distinct from the rest of `Error::InvalidToken` because callers that
/// audit-log token rejections need to tell a malformed client request apart
/// from a stale-but-well-formed one.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidTokenKind {
    #[error("token has no ':' separator")]
    Malformed,
    #[error("token's target prefix is not a known target")]
    UnknownTarget,
    #[error("token is not bound to any stream")]
    UnknownToken,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("stream {0} already exists")]
    AlreadyExists(String),

    #[error("stream {0} not found")]
    NotFound(String),

    #[error("target {0} not found")]
    UnknownTarget(String),

    #[error("target {0} has no inactive streams")]
    TargetDrained(String),

    #[error("invalid token: {kind}")]
    InvalidToken { kind: InvalidTokenKind },

    #[error("injector failed: {0}")]
    InjectorFailed(anyhow::Error),

    #[error("closure failed: {0}")]
    ClosureFailed(anyhow::Error),
}

impl Error {
    pub fn invalid_token(kind: InvalidTokenKind) -> Self {
        Error::InvalidToken { kind }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
