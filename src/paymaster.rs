// src/paymaster.rs
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use tracing::debug;

use crate::error::AaError;
use crate::types::UserOperation;

/// Supplies the `paymasterAndData` field of a user operation.
#[async_trait]
pub trait PaymasterApi: Send + Sync {
    fn address(&self) -> Address;

    /// `user_op` is partially filled: no signature and an incomplete pre-verification gas.
    async fn paymaster_and_data(&self, user_op: &UserOperation) -> Result<Bytes, AaError>;
}

/// Payload produced by [`TokenPaymaster`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymasterAndData {
    pub paymaster: Address,
    pub fee_limit: U256,
}

impl PaymasterAndData {
    /// Paymaster address (20 bytes) followed by the fee limit (32 bytes, big endian)
    pub fn encode(&self) -> Bytes {
        let mut data = Vec::with_capacity(52);
        data.extend_from_slice(self.paymaster.as_bytes());

        let mut fee_limit = [0u8; 32];
        self.fee_limit.to_big_endian(&mut fee_limit);
        data.extend_from_slice(&fee_limit);

        Bytes::from(data)
    }
}

/// Sponsors operations in exchange for an ERC-20 allowance.
///
/// The fee limit is carried in the payload but never enforced here; the
/// default is unlimited.
#[derive(Debug, Clone)]
pub struct TokenPaymaster {
    pub paymaster_address: Address,
    fee_limit: U256,
}

impl TokenPaymaster {
    pub fn new(paymaster_address: Address) -> Self {
        Self {
            paymaster_address,
            fee_limit: U256::MAX,
        }
    }

    pub fn with_fee_limit(mut self, fee_limit: U256) -> Self {
        self.fee_limit = fee_limit;
        self
    }

    pub fn is_unlimited(&self) -> bool {
        self.fee_limit == U256::MAX
    }

    pub fn paymaster_data(&self) -> Bytes {
        PaymasterAndData {
            paymaster: self.paymaster_address,
            fee_limit: self.fee_limit,
        }
        .encode()
    }
}

#[async_trait]
impl PaymasterApi for TokenPaymaster {
    fn address(&self) -> Address {
        self.paymaster_address
    }

    async fn paymaster_and_data(&self, user_op: &UserOperation) -> Result<Bytes, AaError> {
        debug!(
            "Attaching paymaster {:?} to operation from {:?}",
            self.paymaster_address, user_op.sender
        );
        if !self.is_unlimited() {
            debug!("Paymaster fee limit capped at {}", self.fee_limit);
        }
        Ok(self.paymaster_data())
    }
}
