// src/types.rs
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

pub type UserOperationHash = H256;

/// ERC-4337 (entry point v0.6) user operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    /// Factory address followed by the deployment call, empty once the account exists
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    /// Paymaster address followed by its sponsorship payload, empty when self-paying
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// ABI encoding of every field, signature included. Used for calldata cost.
    pub fn pack(&self) -> Bytes {
        encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::Bytes(self.init_code.to_vec()),
            Token::Bytes(self.call_data.to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::Bytes(self.paymaster_and_data.to_vec()),
            Token::Bytes(self.signature.to_vec()),
        ])
        .into()
    }

    /// Encoding signed over: dynamic fields are replaced by their keccak256.
    pub fn pack_without_signature(&self) -> Bytes {
        encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ])
        .into()
    }

    /// Hash binding the operation to an entry point and chain
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> UserOperationHash {
        let packed_hash = keccak256(self.pack_without_signature());
        let encoded = encode(&[
            Token::FixedBytes(packed_hash.to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ]);
        H256::from(keccak256(encoded))
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = sender;
        self
    }

    pub fn nonce(mut self, nonce: U256) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn init_code(mut self, init_code: Bytes) -> Self {
        self.init_code = init_code;
        self
    }

    pub fn call_data(mut self, call_data: Bytes) -> Self {
        self.call_data = call_data;
        self
    }

    pub fn call_gas_limit(mut self, call_gas_limit: U256) -> Self {
        self.call_gas_limit = call_gas_limit;
        self
    }

    pub fn verification_gas_limit(mut self, verification_gas_limit: U256) -> Self {
        self.verification_gas_limit = verification_gas_limit;
        self
    }

    pub fn pre_verification_gas(mut self, pre_verification_gas: U256) -> Self {
        self.pre_verification_gas = pre_verification_gas;
        self
    }

    pub fn max_fee_per_gas(mut self, max_fee_per_gas: U256) -> Self {
        self.max_fee_per_gas = max_fee_per_gas;
        self
    }

    pub fn max_priority_fee_per_gas(mut self, max_priority_fee_per_gas: U256) -> Self {
        self.max_priority_fee_per_gas = max_priority_fee_per_gas;
        self
    }

    pub fn paymaster_and_data(mut self, paymaster_and_data: Bytes) -> Self {
        self.paymaster_and_data = paymaster_and_data;
        self
    }

    pub fn signature(mut self, signature: Bytes) -> Self {
        self.signature = signature;
        self
    }
}

/// What the smart account should execute on the caller's behalf
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionDetails {
    pub target: Address,
    pub value: U256,
    pub data: Bytes,
    /// Overrides the estimated call gas limit
    pub gas_limit: Option<U256>,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationGasEstimation {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
}

/// Fixed costs the bundler charges on top of the operation's own calldata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasOverheads {
    pub fixed: u64,
    pub per_user_op: u64,
    pub per_user_op_word: u64,
    pub zero_byte: u64,
    pub non_zero_byte: u64,
    pub bundle_size: u64,
    pub sig_size: usize,
}

impl Default for GasOverheads {
    fn default() -> Self {
        Self {
            fixed: 21_000,
            per_user_op: 18_300,
            per_user_op_word: 4,
            zero_byte: 4,
            non_zero_byte: 16,
            bundle_size: 1,
            sig_size: 65,
        }
    }
}

impl GasOverheads {
    pub fn calc_pre_verification_gas(&self, user_op: &UserOperation) -> U256 {
        // Dummy signature of the right size so the estimate holds once signed
        let op = user_op
            .clone()
            .pre_verification_gas(U256::from(self.fixed))
            .signature(Bytes::from(vec![1u8; self.sig_size]));
        let packed = op.pack();

        let length_in_word = ((packed.len() + 31) / 32) as u64;
        let call_data_cost: u64 = packed
            .iter()
            .map(|byte| if *byte == 0 { self.zero_byte } else { self.non_zero_byte })
            .sum();

        U256::from(
            call_data_cost
                + self.fixed / self.bundle_size
                + self.per_user_op
                + self.per_user_op_word * length_in_word,
        )
    }
}
