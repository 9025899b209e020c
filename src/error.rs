use crate::{
    amount::WagerError,
    wallets::WalletKind,
};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// EIP-1193: the user rejected the request.
pub const USER_REJECTED_REQUEST: i64 = 4001;
/// EIP-3326: the wallet does not know the requested chain.
pub const UNRECOGNIZED_CHAIN: i64 = 4902;
/// Used for failures below the JSON-RPC layer (HTTP, decoding).
pub const TRANSPORT_ERROR: i64 = -32603;

/// Error object returned by an EIP-1193 `request`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(TRANSPORT_ERROR, message)
    }

    pub fn user_rejected() -> Self {
        Self::new(USER_REJECTED_REQUEST, "User rejected the request.")
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == USER_REJECTED_REQUEST
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == UNRECOGNIZED_CHAIN
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Unsupported wallet provider: {0}")]
    UnsupportedWallet(String),
    #[error("{0} not found")]
    ProviderNotFound(WalletKind),
    #[error("Could not switch to the target network: {0}")]
    ChainSwitchRejected(RpcError),
    #[error("{0} returned no accounts")]
    NoAccounts(WalletKind),
    #[error("{0}")]
    Provider(RpcError),
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BetError {
    #[error("a flip is already in progress")]
    AlreadyInFlight,
    #[error("no contract connected")]
    NotConnected,
    #[error(transparent)]
    InvalidWager(#[from] WagerError),
    #[error("Transaction rejected: {0}")]
    SubmissionRejected(RpcError),
    #[error("Transaction {0} reverted")]
    Reverted(String),
    #[error("Failed to confirm transaction: {0}")]
    Confirmation(RpcError),
}

/// A chain read that failed. Never surfaced to the user; callers log it and
/// keep the previous value.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{what} read failed: {source}")]
pub struct ReadFailure {
    pub what: &'static str,
    pub source: RpcError,
}

impl ReadFailure {
    pub fn new(what: &'static str, source: RpcError) -> Self {
        Self { what, source }
    }
}
