use ethers::types::{Address, Bytes};
use serde_json::Value;
use std::fmt;

/// A precondition the caller violated. Raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("chain id must be greater than zero")]
    InvalidChainId,

    #[error("personal signer has a zero address")]
    InvalidSigner,

    #[error("factory address must not be zero")]
    InvalidFactory,

    #[error("transaction targets chain {got}, account is on chain {expected}")]
    ChainMismatch { expected: u64, got: u64 },

    #[error("transaction has no recipient")]
    MissingRecipient,

    #[error("batch must contain at least one call")]
    EmptyBatch,

    #[error("ERC-20 paymaster requires EntryPoint v0.7")]
    Erc20PaymasterRequiresV07,

    #[error("cannot switch network while an ERC-20 paymaster is configured")]
    SwitchWithErc20Paymaster,

    #[error("{operation} is unsupported on chain {chain_id}")]
    UnsupportedOnChain {
        operation: &'static str,
        chain_id: u64,
    },

    #[error("{field} does not fit in 128 bits")]
    ValueOverflow { field: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A JSON-RPC `error` object returned by a bundler, paymaster or alternate-chain endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub method: String,
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    /// Builds an `RpcError` from the raw `error` member of a JSON-RPC response.
    pub fn from_response(method: &str, err: &Value) -> Self {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        let data = err.get("data").filter(|d| !d.is_null()).cloned();
        Self {
            method: method.to_string(),
            code,
            message,
            data,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} returned error {}: {}", self.method, self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " (data: {data})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// Failure talking to the chain RPC collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("execution reverted")]
    Reverted { data: Option<Bytes> },

    #[error("chain rpc failed: {0}")]
    Transport(String),

    #[error("could not decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("{method} transport failure: {reason}")]
    Transport { method: String, reason: String },

    #[error("{method} returned a malformed response: {reason}")]
    MalformedResponse { method: String, reason: String },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("signer failed: {0}")]
    Signer(String),

    #[error("invalid signature produced for account {account:?}")]
    InvalidSignature { account: Address },

    #[error("account deployment is already in progress")]
    DeploymentInProgress,

    #[error("approving tokens for ERC-20 paymaster spending failed: {0}")]
    ApprovalFailed(Box<AccountError>),

    #[error("operation canceled")]
    Canceled,

    #[error("abi error: {0}")]
    Abi(String),
}

impl AccountError {
    pub fn malformed(method: &str, reason: impl Into<String>) -> Self {
        AccountError::MalformedResponse {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, AccountError::Canceled)
    }
}

impl From<ethers::abi::Error> for AccountError {
    fn from(e: ethers::abi::Error) -> Self {
        AccountError::Abi(e.to_string())
    }
}

impl From<ethers::abi::ParseError> for AccountError {
    fn from(e: ethers::abi::ParseError) -> Self {
        AccountError::Abi(e.to_string())
    }
}

pub type Result<T, E = AccountError> = std::result::Result<T, E>;
