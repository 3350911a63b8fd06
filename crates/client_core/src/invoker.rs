use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shared::{
    error::InvocationError,
    protocol::{InvocationRequest, InvocationReceipt},
};
use tracing::{debug, info};
use url::Url;

/// Seam to the remote ledger executor. One call per invocation, no retries:
/// the call is state-changing and not idempotent, so ambiguous failures must
/// surface to the caller instead of being re-submitted blindly.
#[async_trait]
pub trait ContractInvoker: Send + Sync {
    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationReceipt, InvocationError>;
}

pub struct MissingContractInvoker;

#[async_trait]
impl ContractInvoker for MissingContractInvoker {
    async fn invoke(
        &self,
        _request: &InvocationRequest,
    ) -> Result<InvocationReceipt, InvocationError> {
        Err(InvocationError::Transport(
            "contract executor is unavailable".into(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ExecutorErrorBody {
    #[serde(default)]
    kind: Option<String>,
    message: String,
}

/// Submits invocation requests to an HTTP contract executor.
#[derive(Debug)]
pub struct HttpContractInvoker {
    http: Client,
    executor_url: Url,
}

impl HttpContractInvoker {
    pub fn new(executor_url: &str) -> Result<Self, InvocationError> {
        let executor_url = Url::parse(executor_url)
            .map_err(|err| InvocationError::Validation(format!("invalid executor url: {err}")))?;
        Ok(Self {
            http: Client::new(),
            executor_url,
        })
    }

    fn execute_endpoint(&self) -> String {
        format!(
            "{}/contract/execute",
            self.executor_url.as_str().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ContractInvoker for HttpContractInvoker {
    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationReceipt, InvocationError> {
        debug!(
            contract = %request.contract_address,
            function = %request.function_name,
            "invoker: submitting contract call"
        );

        let response = self
            .http
            .post(self.execute_endpoint())
            .json(request)
            .send()
            .await
            .map_err(|err| InvocationError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .json::<ExecutorErrorBody>()
                .await
                .unwrap_or_else(|_| ExecutorErrorBody {
                    kind: None,
                    message: format!("executor returned status {status}"),
                });
            return Err(classify_executor_error(status, body));
        }

        let receipt: InvocationReceipt = response
            .json()
            .await
            .map_err(|err| InvocationError::Transport(format!("invalid executor response: {err}")))?;

        info!(
            contract = %request.contract_address,
            function = %request.function_name,
            tx_hash = %receipt.tx_hash,
            "invoker: contract call accepted"
        );
        Ok(receipt)
    }
}

fn classify_executor_error(status: StatusCode, body: ExecutorErrorBody) -> InvocationError {
    match body.kind.as_deref() {
        Some("validation") => InvocationError::Validation(body.message),
        Some("signing") => InvocationError::Signing(body.message),
        Some("rejected") => InvocationError::Rejected(body.message),
        _ if status.is_server_error() => InvocationError::Transport(body.message),
        _ => InvocationError::Rejected(body.message),
    }
}

#[cfg(test)]
#[path = "tests/invoker_tests.rs"]
mod tests;
