use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{BlockNumber, SequenceId},
    error::InvocationError,
};

/// One state-changing call to the verification program. Immutable once built;
/// a fresh request is constructed per attempt.
///
/// `value`, `gas_limit` and `gas_price` of zero are the "let the executor
/// estimate" sentinel: the request passes validation and the executor fills in
/// real figures before submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub contract_address: String,
    pub abi: Value,
    pub function_name: String,
    pub arguments: Vec<Value>,
    pub value: u64,
    pub gas_limit: u64,
    pub gas_price: u64,
}

impl InvocationRequest {
    pub fn new(
        contract_address: impl Into<String>,
        abi: Value,
        function_name: impl Into<String>,
        arguments: Vec<Value>,
        value: u64,
        gas_limit: u64,
        gas_price: u64,
    ) -> Result<Self, InvocationError> {
        let request = Self {
            contract_address: contract_address.into(),
            abi,
            function_name: function_name.into(),
            arguments,
            value,
            gas_limit,
            gas_price,
        };
        request.validate()?;
        Ok(request)
    }

    fn validate(&self) -> Result<(), InvocationError> {
        if self.contract_address.trim().is_empty() {
            return Err(InvocationError::Validation(
                "contract address must not be empty".into(),
            ));
        }
        if self.function_name.trim().is_empty() {
            return Err(InvocationError::Validation(
                "function name must not be empty".into(),
            ));
        }

        let entries = self.abi.as_array().ok_or_else(|| {
            InvocationError::Validation("interface descriptor must be a JSON array".into())
        })?;
        let function = entries
            .iter()
            .find(|entry| {
                entry.get("type").and_then(Value::as_str) == Some("function")
                    && entry.get("name").and_then(Value::as_str)
                        == Some(self.function_name.as_str())
            })
            .ok_or_else(|| {
                InvocationError::Validation(format!(
                    "interface descriptor does not declare function {}",
                    self.function_name
                ))
            })?;

        let declared_arity = function
            .get("inputs")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if declared_arity != self.arguments.len() {
            return Err(InvocationError::Validation(format!(
                "function {} expects {} argument(s), got {}",
                self.function_name,
                declared_arity,
                self.arguments.len()
            )));
        }

        Ok(())
    }
}

/// Success token returned by the executor for an accepted call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationReceipt {
    pub tx_hash: String,
}

/// Decoded payload of the verification program's verdict event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerdictEvent {
    pub result: bool,
    pub sequence_id: SequenceId,
}

/// Wire envelope on the live event feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FeedMessage {
    Subscribed {
        event_name: String,
    },
    Event {
        event_name: String,
        verdict: VerdictEvent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block_number: Option<BlockNumber>,
        observed_at: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
