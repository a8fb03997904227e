//! The module contains the error the engine can throw.
//!
//! Errors fall in a few families:
//!
//! - transport failures ([`Http`], [`HttpStatus`], [`Decode`]);
//! - provider statuses ([`InsufficientPrivileges`], [`NoDataFound`],
//!   [`UnexpectedStatus`], [`Trading`]);
//! - authorization failures ([`ConfirmationTimeout`], [`Confirmation`],
//!   [`AuthorizationFailed`]);
//! - flow control ([`Cancelled`], [`Timeout`], [`Suspended`]);
//! - persistence ([`Database`]).
//!
//!  [`Http`]: EngineError::Http
//!  [`HttpStatus`]: EngineError::HttpStatus
//!  [`Decode`]: EngineError::Decode
//!  [`InsufficientPrivileges`]: EngineError::InsufficientPrivileges
//!  [`NoDataFound`]: EngineError::NoDataFound
//!  [`UnexpectedStatus`]: EngineError::UnexpectedStatus
//!  [`Trading`]: EngineError::Trading
//!  [`ConfirmationTimeout`]: EngineError::ConfirmationTimeout
//!  [`Confirmation`]: EngineError::Confirmation
//!  [`AuthorizationFailed`]: EngineError::AuthorizationFailed
//!  [`Cancelled`]: EngineError::Cancelled
//!  [`Timeout`]: EngineError::Timeout
//!  [`Suspended`]: EngineError::Suspended
//!  [`Database`]: EngineError::Database
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("insufficient privileges")]
    InsufficientPrivileges,
    #[error("no data found")]
    NoDataFound,
    #[error("expected result [{expected}], got [{actual}] with message [{message}]")]
    UnexpectedStatus {
        expected: String,
        actual: String,
        message: String,
    },
    #[error("{code} [{message}]")]
    Trading { code: String, message: String },
    #[error("confirmation code was not received in time")]
    ConfirmationTimeout,
    #[error("confirmation failed: {0}")]
    Confirmation(String),
    #[error("authorization already failed in this run: {0}")]
    AuthorizationFailed(String),
    #[error("request timed out")]
    Timeout,
    #[error("canceled")]
    Cancelled,
    #[error("receipt sync is suspended now, try again later")]
    Suspended,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("credentials: {0}")]
    Credentials(String),
    #[error("background task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    pub(crate) fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }

    /// The caller gave up: the whole sync walk has to stop.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Errors after which receipt lookups must pause until the next run.
    pub fn suspends_receipts(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout | Self::Suspended)
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Http(a), Self::Http(b)) => a.to_string() == b.to_string(),
            (Self::HttpStatus(a), Self::HttpStatus(b)) => a == b,
            (Self::Decode { context: a, .. }, Self::Decode { context: b, .. }) => a == b,
            (Self::InsufficientPrivileges, Self::InsufficientPrivileges) => true,
            (Self::NoDataFound, Self::NoDataFound) => true,
            (
                Self::UnexpectedStatus {
                    expected: e1,
                    actual: a1,
                    message: m1,
                },
                Self::UnexpectedStatus {
                    expected: e2,
                    actual: a2,
                    message: m2,
                },
            ) => e1 == e2 && a1 == a2 && m1 == m2,
            (
                Self::Trading {
                    code: c1,
                    message: m1,
                },
                Self::Trading {
                    code: c2,
                    message: m2,
                },
            ) => c1 == c2 && m1 == m2,
            (Self::ConfirmationTimeout, Self::ConfirmationTimeout) => true,
            (Self::Confirmation(a), Self::Confirmation(b)) => a == b,
            (Self::AuthorizationFailed(a), Self::AuthorizationFailed(b)) => a == b,
            (Self::Timeout, Self::Timeout) => true,
            (Self::Cancelled, Self::Cancelled) => true,
            (Self::Suspended, Self::Suspended) => true,
            (Self::InvalidRequest(a), Self::InvalidRequest(b)) => a == b,
            (Self::Credentials(a), Self::Credentials(b)) => a == b,
            (Self::Task(a), Self::Task(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
