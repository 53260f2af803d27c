// src/test_utils.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use tokio::sync::broadcast;

use crate::account::AccountApi;
use crate::bundler::BundlerClient;
use crate::client::{Connector, NetworkConfig};
use crate::error::AaError;
use crate::token::TokenApi;
use crate::types::{TransactionDetails, UserOperation, UserOperationGasEstimation, UserOperationHash};
use crate::wallet::{WalletConnection, WalletEvent};

const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub struct MockWallet {
    signer: LocalWallet,
    pub events: broadcast::Sender<WalletEvent>,
}

impl MockWallet {
    pub const CHAIN_ID: u64 = 111;

    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            signer: KEY.parse().unwrap(),
            events,
        }
    }

    pub fn arc() -> Arc<dyn WalletConnection> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl WalletConnection for MockWallet {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn chain_id(&self) -> Result<u64, AaError> {
        Ok(Self::CHAIN_ID)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, AaError> {
        self.signer
            .sign_message(message)
            .await
            .map_err(|e| AaError::Signing(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

/// Account that records what it was asked to build and sign
pub struct RecordingAccount {
    pub address: Address,
    pub paymaster_and_data: Bytes,
    pub created: Mutex<Vec<TransactionDetails>>,
    pub signed: AtomicUsize,
}

impl Default for RecordingAccount {
    fn default() -> Self {
        Self {
            address: Address::repeat_byte(0x5a),
            paymaster_and_data: Bytes::from(vec![0x77; 52]),
            created: Mutex::new(Vec::new()),
            signed: AtomicUsize::new(0),
        }
    }
}

impl RecordingAccount {
    pub fn created(&self) -> Vec<TransactionDetails> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountApi for RecordingAccount {
    async fn account_address(&self) -> Result<Address, AaError> {
        Ok(self.address)
    }

    async fn create_unsigned_user_op(
        &self,
        details: TransactionDetails,
    ) -> Result<UserOperation, AaError> {
        let nonce = U256::from(self.created.lock().unwrap().len());
        let op = UserOperation::default()
            .sender(self.address)
            .nonce(nonce)
            .call_data(details.data.clone())
            .max_fee_per_gas(details.max_fee_per_gas)
            .max_priority_fee_per_gas(details.max_priority_fee_per_gas)
            .paymaster_and_data(self.paymaster_and_data.clone());
        self.created.lock().unwrap().push(details);
        Ok(op)
    }

    async fn sign_user_op(&self, user_op: UserOperation) -> Result<UserOperation, AaError> {
        self.signed.fetch_add(1, Ordering::SeqCst);
        Ok(user_op.signature(Bytes::from(vec![1u8; 65])))
    }
}

#[derive(Default)]
pub struct RecordingBundler {
    pub sent: Mutex<Vec<UserOperation>>,
    pub reject: AtomicBool,
    /// Accept this many operations, reject the rest
    pub reject_after: Mutex<Option<usize>>,
}

impl RecordingBundler {
    pub fn sent(&self) -> Vec<UserOperation> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl BundlerClient for RecordingBundler {
    async fn send_user_op(&self, user_op: &UserOperation) -> Result<UserOperationHash, AaError> {
        let limit_reached = match *self.reject_after.lock().unwrap() {
            Some(limit) => self.sent.lock().unwrap().len() >= limit,
            None => false,
        };
        if limit_reached || self.reject.load(Ordering::SeqCst) {
            return Err(AaError::RelaySubmission("AA31 paymaster deposit too low".into()));
        }
        self.sent.lock().unwrap().push(user_op.clone());
        Ok(user_op.hash(Address::zero(), MockWallet::CHAIN_ID))
    }

    async fn estimate_user_op_gas(
        &self,
        _user_op: &UserOperation,
    ) -> Result<UserOperationGasEstimation, AaError> {
        Ok(UserOperationGasEstimation {
            pre_verification_gas: U256::from(45_000),
            verification_gas_limit: U256::from(100_000),
            call_gas_limit: U256::from(35_000),
        })
    }
}

#[derive(Default)]
pub struct MockConnector {
    pub connects: AtomicUsize,
    pub account: Arc<RecordingAccount>,
    pub bundler: Arc<RecordingBundler>,
    network: Mutex<Option<NetworkConfig>>,
}

impl MockConnector {
    pub fn last_network(&self) -> Option<NetworkConfig> {
        self.network.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _wallet: Arc<dyn WalletConnection>,
        network: &NetworkConfig,
    ) -> Result<(Arc<dyn AccountApi>, Arc<dyn BundlerClient>), AaError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // Give concurrent initializers a chance to overlap
        tokio::time::sleep(Duration::from_millis(20)).await;
        *self.network.lock().unwrap() = Some(network.clone());
        Ok((self.account.clone(), self.bundler.clone()))
    }
}

#[derive(Default)]
pub struct MockTokens {
    pub allowances: Mutex<HashMap<(Address, Address, Address), U256>>,
    pub balances: Mutex<HashMap<(Address, Address), U256>>,
    pub fail_allowance: AtomicBool,
    pub allowance_reads: AtomicUsize,
}

impl MockTokens {
    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.allowances
            .lock()
            .unwrap()
            .insert((token, owner, spender), amount);
    }

    pub fn set_balance(&self, token: Address, owner: Address, amount: U256) {
        self.balances.lock().unwrap().insert((token, owner), amount);
    }
}

#[async_trait]
impl TokenApi for MockTokens {
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, AaError> {
        self.allowance_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_allowance.load(Ordering::SeqCst) {
            return Err(AaError::AllowanceRead("execution reverted".into()));
        }
        Ok(self
            .allowances
            .lock()
            .unwrap()
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, AaError> {
        self.balances
            .lock()
            .unwrap()
            .get(&(token, owner))
            .copied()
            .ok_or_else(|| AaError::Provider(format!("no balance for {token:?}")))
    }
}
