// src/account.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::AaError;
use crate::paymaster::PaymasterApi;
use crate::types::{GasOverheads, TransactionDetails, UserOperation};
use crate::wallet::WalletConnection;

abigen!(
    SimpleAccountFactory,
    r#"[
        function createAccount(address owner, uint256 salt) external returns (address)
        function getAddress(address owner, uint256 salt) external view returns (address)
    ]"#
);

abigen!(
    SimpleAccountContract,
    r#"[
        function execute(address dest, uint256 value, bytes func) external
    ]"#
);

abigen!(
    EntryPoint,
    r#"[
        function getNonce(address sender, uint192 key) external view returns (uint256)
        function balanceOf(address account) external view returns (uint256)
    ]"#
);

/// Gas reserved for the account's own signature validation
const VERIFICATION_GAS_LIMIT: u64 = 100_000;

/// A smart account controlled by an off-chain owner.
#[async_trait]
pub trait AccountApi: Send + Sync {
    /// Counterfactual address, valid before the account is deployed
    async fn account_address(&self) -> Result<Address, AaError>;

    async fn create_unsigned_user_op(
        &self,
        details: TransactionDetails,
    ) -> Result<UserOperation, AaError>;

    async fn sign_user_op(&self, user_op: UserOperation) -> Result<UserOperation, AaError>;
}

/// Account deployed by the simple account factory, executing through
/// `execute(dest, value, func)`.
pub struct SimpleAccount<M> {
    client: Arc<M>,
    owner: Arc<dyn WalletConnection>,
    pub entry_point: Address,
    pub factory: Address,
    pub index: U256,
    pub chain_id: u64,
    paymaster: Option<Arc<dyn PaymasterApi>>,
    overheads: GasOverheads,
    address: OnceCell<Address>,
}

impl<M: Middleware + 'static> SimpleAccount<M> {
    pub fn new(
        client: Arc<M>,
        owner: Arc<dyn WalletConnection>,
        entry_point: Address,
        factory: Address,
        chain_id: u64,
    ) -> Self {
        Self {
            client,
            owner,
            entry_point,
            factory,
            index: U256::zero(),
            chain_id,
            paymaster: None,
            overheads: GasOverheads::default(),
            address: OnceCell::new(),
        }
    }

    pub fn with_index(mut self, index: U256) -> Self {
        self.index = index;
        self
    }

    pub fn with_paymaster(mut self, paymaster: Option<Arc<dyn PaymasterApi>>) -> Self {
        self.paymaster = paymaster;
        self
    }

    /// Factory address followed by the `createAccount` call
    pub fn init_code(&self) -> Bytes {
        let call = CreateAccountCall {
            owner: self.owner.address(),
            salt: self.index,
        }
        .encode();

        let mut init_code = self.factory.as_bytes().to_vec();
        init_code.extend_from_slice(&call);
        Bytes::from(init_code)
    }

    pub fn encode_execute(&self, target: Address, value: U256, data: Bytes) -> Bytes {
        ExecuteCall {
            dest: target,
            value,
            func: data,
        }
        .encode()
        .into()
    }

    async fn is_deployed(&self, sender: Address) -> Result<bool, AaError> {
        let code = self
            .client
            .get_code(sender, None)
            .await
            .map_err(|e| AaError::Provider(e.to_string()))?;
        Ok(!code.is_empty())
    }

    async fn nonce(&self, sender: Address) -> Result<U256, AaError> {
        EntryPoint::new(self.entry_point, self.client.clone())
            .get_nonce(sender, U256::zero())
            .call()
            .await
            .map_err(|e| AaError::Provider(e.to_string()))
    }

    async fn estimate_gas(&self, tx: TypedTransaction) -> Result<U256, AaError> {
        self.client
            .estimate_gas(&tx, None)
            .await
            .map_err(|e| AaError::Provider(e.to_string()))
    }

    async fn verification_gas_limit(&self, init_code: &Bytes) -> Result<U256, AaError> {
        let mut gas = U256::from(VERIFICATION_GAS_LIMIT);
        if init_code.len() > 20 {
            let creation: TypedTransaction = TransactionRequest::new()
                .to(self.factory)
                .data(init_code[20..].to_vec())
                .into();
            gas += self.estimate_gas(creation).await?;
        }
        Ok(gas)
    }
}

#[async_trait]
impl<M: Middleware + 'static> AccountApi for SimpleAccount<M> {
    async fn account_address(&self) -> Result<Address, AaError> {
        let address = self
            .address
            .get_or_try_init(|| async {
                SimpleAccountFactory::new(self.factory, self.client.clone())
                    .get_address(self.owner.address(), self.index)
                    .call()
                    .await
                    .map_err(|e| AaError::Provider(e.to_string()))
            })
            .await?;
        Ok(*address)
    }

    async fn create_unsigned_user_op(
        &self,
        details: TransactionDetails,
    ) -> Result<UserOperation, AaError> {
        let sender = self.account_address().await?;
        let deployed = self.is_deployed(sender).await?;

        let (init_code, nonce) = if deployed {
            (Bytes::default(), self.nonce(sender).await?)
        } else {
            info!("Account {:?} not deployed yet, attaching init code", sender);
            (self.init_code(), U256::zero())
        };

        let call_data = self.encode_execute(details.target, details.value, details.data);
        let call_gas_limit = match details.gas_limit {
            Some(gas_limit) => gas_limit,
            None => {
                let call: TypedTransaction = TransactionRequest::new()
                    .from(self.entry_point)
                    .to(sender)
                    .data(call_data.clone())
                    .into();
                self.estimate_gas(call).await?
            }
        };
        let verification_gas_limit = self.verification_gas_limit(&init_code).await?;

        let mut user_op = UserOperation::default()
            .sender(sender)
            .nonce(nonce)
            .init_code(init_code)
            .call_data(call_data)
            .call_gas_limit(call_gas_limit)
            .verification_gas_limit(verification_gas_limit)
            .max_fee_per_gas(details.max_fee_per_gas)
            .max_priority_fee_per_gas(details.max_priority_fee_per_gas);

        if let Some(paymaster) = &self.paymaster {
            let paymaster_and_data = paymaster.paymaster_and_data(&user_op).await?;
            user_op = user_op.paymaster_and_data(paymaster_and_data);
        }
        user_op.pre_verification_gas = self.overheads.calc_pre_verification_gas(&user_op);

        debug!("Built unsigned user operation: {:?}", user_op);
        Ok(user_op)
    }

    async fn sign_user_op(&self, user_op: UserOperation) -> Result<UserOperation, AaError> {
        let hash = user_op.hash(self.entry_point, self.chain_id);
        let signature = self.owner.sign_message(hash.as_bytes()).await?;
        Ok(user_op.signature(signature.to_vec().into()))
    }
}
