// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AaError {
    #[error("Injected wallet not found")]
    NoWallet,

    #[error("AA client is not initialized yet")]
    NotInitialized,

    #[error("Bundler rejected user operation: {0}")]
    RelaySubmission(String),

    #[error("Failed to read allowance: {0}")]
    AllowanceRead(String),

    #[error("Ethereum provider error: {0}")]
    Provider(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Bundler chain id {bundler} does not match wallet chain id {wallet}")]
    ChainMismatch { wallet: u64, bundler: u64 },

    #[error("Refusing to submit an unsigned user operation")]
    UnsignedOperation,

    #[error("Pre-send check failed: {0}")]
    PreSendCheck(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Relay error: {0}")]
    Relay(String),
}
