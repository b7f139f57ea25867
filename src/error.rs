use thiserror::Error;

use crate::sync::Op;

/// A document that does not have the `{id, todo, createdAt}` shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("document is missing field `{field}`")]
    MissingField { field: &'static str },
    #[error("field `{field}` is not a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("field `{field}` has an invalid timestamp `{value}`")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// Why a call to the auth service or document store failed.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid url {0}")]
    InvalidUrl(String),
    #[error("not signed in")]
    Unauthenticated,
    #[error("firebase is not configured: {0} is empty")]
    NotConfigured(&'static str),
    #[error("credential storage failed: {0}")]
    Storage(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Error)]
pub enum TodoError {
    #[error("{op} failed")]
    Auth {
        op: Op,
        #[source]
        source: RemoteError,
    },
    #[error("fetching todos failed")]
    Fetch {
        #[source]
        source: RemoteError,
    },
    #[error("{op} failed")]
    Write {
        op: Op,
        #[source]
        source: RemoteError,
    },
}

impl TodoError {
    pub fn op(&self) -> Op {
        match self {
            TodoError::Auth { op, .. } | TodoError::Write { op, .. } => *op,
            TodoError::Fetch { .. } => Op::Load,
        }
    }

    /// Short text for the footer. The cause goes to the log, not the user.
    pub fn notice(&self) -> &'static str {
        match self.op() {
            Op::SignIn => "Could not log in",
            Op::SignUp => "Could not sign up",
            Op::SignOut => "Could not log out",
            Op::Load => "Could not fetch todos",
            Op::Add => "Could not add todo",
            Op::Delete => "Could not delete todo",
        }
    }
}
