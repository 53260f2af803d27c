// src/client.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::account::{AccountApi, EntryPoint, SimpleAccount};
use crate::bundler::{BundlerClient, HttpRpcClient};
use crate::config::AaClientConfig;
use crate::error::AaError;
use crate::paymaster::{PaymasterApi, TokenPaymaster};
use crate::types::{
    TransactionDetails, UserOperation, UserOperationGasEstimation, UserOperationHash,
};
use crate::wallet::WalletConnection;

/// Everything the account and bundler need once the wallet's chain is known
#[derive(Clone)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub entry_point: Address,
    pub bundler_url: String,
    pub factory: Address,
    pub account_index: U256,
    pub paymaster: Option<Arc<dyn PaymasterApi>>,
}

/// Builds the account facade and bundler client for a wallet
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        wallet: Arc<dyn WalletConnection>,
        network: &NetworkConfig,
    ) -> Result<(Arc<dyn AccountApi>, Arc<dyn BundlerClient>), AaError>;
}

/// Simple account over a JSON-RPC node, operations relayed over HTTP
pub struct SimpleAccountConnector<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> SimpleAccountConnector<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M: Middleware + 'static> Connector for SimpleAccountConnector<M> {
    async fn connect(
        &self,
        wallet: Arc<dyn WalletConnection>,
        network: &NetworkConfig,
    ) -> Result<(Arc<dyn AccountApi>, Arc<dyn BundlerClient>), AaError> {
        let account = SimpleAccount::new(
            self.client.clone(),
            wallet,
            network.entry_point,
            network.factory,
            network.chain_id,
        )
        .with_index(network.account_index)
        .with_paymaster(network.paymaster.clone());

        let bundler =
            HttpRpcClient::connect(&network.bundler_url, network.entry_point, network.chain_id)
                .await?;

        Ok((Arc::new(account), Arc::new(bundler)))
    }
}

/// Hook run before an operation is signed and sent. Failing aborts the send.
#[async_trait]
pub trait PreSendCheck: Send + Sync {
    async fn check(&self, session: &Session, user_op: &UserOperation) -> Result<(), AaError>;
}

/// Accepts every operation. Entry point deposits are not verified.
pub struct NoopPreSendCheck;

#[async_trait]
impl PreSendCheck for NoopPreSendCheck {
    async fn check(&self, _session: &Session, _user_op: &UserOperation) -> Result<(), AaError> {
        Ok(())
    }
}

/// Gas cost the entry point reserves up front for a self-paying operation
pub fn required_prefund(user_op: &UserOperation) -> U256 {
    user_op
        .call_gas_limit
        .saturating_add(user_op.verification_gas_limit)
        .saturating_add(user_op.pre_verification_gas)
        .saturating_mul(user_op.max_fee_per_gas)
}

fn ensure_funded(available: U256, required: U256) -> Result<(), AaError> {
    if available < required {
        return Err(AaError::PreSendCheck(format!(
            "account holds {available} wei, operation may cost up to {required} wei"
        )));
    }
    Ok(())
}

/// Refuses self-paying operations that the account's entry point deposit
/// and native balance together cannot cover. Sponsored operations pass.
pub struct EntryPointFundsCheck<M> {
    client: Arc<M>,
    entry_point: Address,
}

impl<M: Middleware + 'static> EntryPointFundsCheck<M> {
    pub fn new(client: Arc<M>, entry_point: Address) -> Self {
        Self {
            client,
            entry_point,
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> PreSendCheck for EntryPointFundsCheck<M> {
    async fn check(&self, session: &Session, user_op: &UserOperation) -> Result<(), AaError> {
        if !user_op.paymaster_and_data.is_empty() {
            return Ok(());
        }

        let account = session.smart_account_address;
        let deposit = EntryPoint::new(self.entry_point, self.client.clone())
            .balance_of(account)
            .call()
            .await
            .map_err(|e| AaError::Provider(e.to_string()))?;
        let balance = self
            .client
            .get_balance(account, None)
            .await
            .map_err(|e| AaError::Provider(e.to_string()))?;

        debug!("Account {:?} deposit {} balance {}", account, deposit, balance);
        ensure_funded(deposit.saturating_add(balance), required_prefund(user_op))
    }
}

/// State established by [`AaClient::initialize`]; immutable once set.
pub struct Session {
    pub chain_id: u64,
    pub smart_account_address: Address,
    account: Arc<dyn AccountApi>,
    bundler: Arc<dyn BundlerClient>,
}

pub struct AaClient {
    wallet: Arc<dyn WalletConnection>,
    config: AaClientConfig,
    connector: Arc<dyn Connector>,
    pre_send: Arc<dyn PreSendCheck>,
    session: OnceCell<Session>,
}

impl AaClient {
    /// Fails with [`AaError::NoWallet`] when `wallet` is absent. No network
    /// work happens until [`AaClient::initialize`].
    pub fn new(
        wallet: Option<Arc<dyn WalletConnection>>,
        config: AaClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, AaError> {
        let wallet = wallet.ok_or(AaError::NoWallet)?;
        Ok(Self {
            wallet,
            config,
            connector,
            pre_send: Arc::new(NoopPreSendCheck),
            session: OnceCell::new(),
        })
    }

    pub fn with_pre_send_check(mut self, pre_send: Arc<dyn PreSendCheck>) -> Self {
        self.pre_send = pre_send;
        self
    }

    /// Connects to the bundler and derives the smart account. Runs at most
    /// once; concurrent and repeated callers share the first outcome, and a
    /// failed attempt may be retried.
    pub async fn initialize(&self) -> Result<&Session, AaError> {
        self.session.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<Session, AaError> {
        let chain_id = self.wallet.chain_id().await?;
        let network = NetworkConfig {
            chain_id,
            entry_point: self.config.entry_point,
            bundler_url: self.config.bundler_url().to_string(),
            factory: self.config.factory,
            account_index: self.config.account_index,
            paymaster: self.config.paymaster.map(|address| {
                let mut paymaster = TokenPaymaster::new(address);
                if let Some(fee_limit) = self.config.paymaster_fee_limit {
                    paymaster = paymaster.with_fee_limit(fee_limit);
                }
                Arc::new(paymaster) as Arc<dyn PaymasterApi>
            }),
        };
        debug!("Initializing AA client on chain {}", chain_id);

        let (account, bundler) = self.connector.connect(self.wallet.clone(), &network).await?;
        let smart_account_address = account.account_address().await?;
        info!("Using smart account {:?}", smart_account_address);

        Ok(Session {
            chain_id,
            smart_account_address,
            account,
            bundler,
        })
    }

    pub fn session(&self) -> Result<&Session, AaError> {
        self.session.get().ok_or(AaError::NotInitialized)
    }

    pub fn smart_account_address(&self) -> Option<Address> {
        self.session.get().map(|session| session.smart_account_address)
    }

    pub fn paymaster_address(&self) -> Option<Address> {
        self.config.paymaster
    }

    /// Token the paymaster is paid in
    pub fn fee_token(&self) -> Address {
        self.config.fee_token
    }

    pub fn owner(&self) -> Address {
        self.wallet.address()
    }

    /// Builds an unsigned operation executing `call_data` on `target`
    pub async fn create_user_op(
        &self,
        target: Address,
        value: U256,
        call_data: Bytes,
    ) -> Result<UserOperation, AaError> {
        let session = self.session()?;
        let details = TransactionDetails {
            target,
            value,
            data: call_data,
            gas_limit: None,
            max_fee_per_gas: self.config.fees.max_fee_per_gas,
            max_priority_fee_per_gas: self.config.fees.max_priority_fee_per_gas,
        };
        session.account.create_unsigned_user_op(details).await
    }

    /// Asks the bundler for gas limits without submitting anything
    pub async fn estimate_user_op_gas(
        &self,
        user_op: &UserOperation,
    ) -> Result<UserOperationGasEstimation, AaError> {
        let session = self.session()?;
        let estimate = session.bundler.estimate_user_op_gas(user_op).await?;
        debug!("Bundler gas estimate for {:?}: {:?}", user_op.sender, estimate);
        Ok(estimate)
    }

    /// Signs `user_op` and hands it to the bundler, returning the operation hash
    pub async fn send_user_op(&self, user_op: UserOperation) -> Result<UserOperationHash, AaError> {
        let session = self.session()?;
        self.pre_send.check(session, &user_op).await?;

        let signed = session.account.sign_user_op(user_op).await?;
        if !signed.is_signed() {
            warn!("Account returned an unsigned operation for {:?}", signed.sender);
            return Err(AaError::UnsignedOperation);
        }

        session.bundler.send_user_op(&signed).await
    }
}
