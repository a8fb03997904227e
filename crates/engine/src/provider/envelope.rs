//! Response envelope shared by every provider endpoint.
//!
//! Common endpoints answer `{resultCode, payload, operationTicket, ...}`,
//! trading endpoints answer `{status, payload}`. Both decode into
//! [`Envelope`] and go through [`classify`].

use serde::Deserialize;
use serde_json::Value;

use crate::EngineError;

pub const OK: &str = "OK";
pub const TRADING_OK: &str = "Ok";
pub const WAITING_CONFIRMATION: &str = "WAITING_CONFIRMATION";
pub const REQUEST_RATE_LIMIT_EXCEEDED: &str = "REQUEST_RATE_LIMIT_EXCEEDED";
pub const INSUFFICIENT_PRIVILEGES: &str = "INSUFFICIENT_PRIVILEGES";
pub const NO_DATA_FOUND: &str = "NO_DATA_FOUND";

const TRADING_ERROR: &str = "ERROR";
const TRADING_INSUFFICIENT_PRIVILEGES: &str = "InsufficientPrivileges";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(alias = "status")]
    pub result_code: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub operation_ticket: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub plain_message: Option<String>,
}

impl Envelope {
    fn message(&self) -> String {
        self.error_message
            .as_deref()
            .or(self.plain_message.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct TradingError {
    code: String,
    #[serde(default)]
    message: String,
}

/// Classified outcome of one exchange.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Success {
        payload: Value,
        ticket: Option<String>,
    },
    RateLimited,
    PrivilegesLost,
    NoData,
    Failed(EngineError),
}

pub fn classify(envelope: Envelope, expected: &str) -> Outcome {
    let status = envelope.result_code.to_uppercase();
    if status == expected.to_uppercase() {
        return Outcome::Success {
            payload: envelope.payload,
            ticket: envelope.operation_ticket,
        };
    }

    match status.as_str() {
        REQUEST_RATE_LIMIT_EXCEEDED => Outcome::RateLimited,
        INSUFFICIENT_PRIVILEGES => Outcome::PrivilegesLost,
        NO_DATA_FOUND => Outcome::NoData,
        TRADING_ERROR => match serde_json::from_value::<TradingError>(envelope.payload.clone()) {
            Ok(err) if err.code == TRADING_INSUFFICIENT_PRIVILEGES => Outcome::PrivilegesLost,
            Ok(err) => Outcome::Failed(EngineError::Trading {
                code: err.code,
                message: err.message,
            }),
            Err(err) => {
                tracing::warn!("failed to decode trading error payload: {err}");
                Outcome::Failed(unexpected(expected, &envelope))
            }
        },
        _ => Outcome::Failed(unexpected(expected, &envelope)),
    }
}

fn unexpected(expected: &str, envelope: &Envelope) -> EngineError {
    EngineError::UnexpectedStatus {
        expected: expected.to_string(),
        actual: envelope.result_code.clone(),
        message: envelope.message(),
    }
}
