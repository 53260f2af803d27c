// src/transfer.rs
use std::sync::Arc;

use ethers::types::{Address, Bytes, U256};
use tokio::sync::{watch, Notify};
use tracing::{error, info};

use crate::client::AaClient;
use crate::currency::Currency;
use crate::error::AaError;
use crate::token::{approve_call_data, transfer_call_data, TokenApi};
use crate::types::UserOperationHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Idle,
    CheckingAllowance,
    ApprovingSpend,
    AwaitingApprovalConfirmation,
    BuildingTransfer,
    SigningAndSending,
    Done,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub currency: Currency,
    pub recipient: Address,
    /// Human readable decimal amount, e.g. "0.5"
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub approval: Option<UserOperationHash>,
    pub transfer: UserOperationHash,
    pub atomic_amount: U256,
}

/// Token transfer from the smart account. When a paymaster sponsors it, the
/// paymaster is first granted an unlimited allowance on its fee token unless
/// it already holds one, whatever currency is being sent.
///
/// Nothing is rolled back: an approval that went through stays granted even
/// if the transfer fails.
pub struct TransferFlow {
    client: Arc<AaClient>,
    tokens: Arc<dyn TokenApi>,
    stage: watch::Sender<TransferStage>,
    balance_refresh: Option<Arc<Notify>>,
}

impl TransferFlow {
    pub fn new(client: Arc<AaClient>, tokens: Arc<dyn TokenApi>) -> Self {
        let (stage, _) = watch::channel(TransferStage::Idle);
        Self {
            client,
            tokens,
            stage,
            balance_refresh: None,
        }
    }

    /// Notified once a transfer has been accepted by the bundler
    pub fn with_balance_refresh(mut self, refresh: Arc<Notify>) -> Self {
        self.balance_refresh = Some(refresh);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferStage> {
        self.stage.subscribe()
    }

    fn set_stage(&self, stage: TransferStage) {
        self.stage.send_replace(stage);
    }

    pub async fn execute(&self, request: &TransferRequest) -> Result<TransferReceipt, AaError> {
        match self.run(request).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                error!("Transfer of {} {} failed: {}", request.amount, request.currency.ticker, e);
                self.set_stage(TransferStage::Idle);
                Err(e)
            }
        }
    }

    async fn run(&self, request: &TransferRequest) -> Result<TransferReceipt, AaError> {
        let smart_account = self.client.session()?.smart_account_address;
        let atomic_amount = request.currency.to_atomic(&request.amount)?;
        if atomic_amount.is_zero() {
            return Err(AaError::InvalidParameters("transfer amount must be positive".into()));
        }

        let approval = match self.client.paymaster_address() {
            Some(paymaster) => {
                self.approve_if_needed(self.client.fee_token(), smart_account, paymaster)
                    .await?
            }
            None => None,
        };

        self.set_stage(TransferStage::BuildingTransfer);
        let user_op = self
            .client
            .create_user_op(
                request.currency.address,
                U256::zero(),
                transfer_call_data(request.recipient, atomic_amount),
            )
            .await?;

        self.set_stage(TransferStage::SigningAndSending);
        let transfer = self.client.send_user_op(user_op).await?;
        info!(
            "Transfer of {} {} to {:?} submitted: {:?}",
            request.amount, request.currency.ticker, request.recipient, transfer
        );

        self.set_stage(TransferStage::Done);
        if let Some(refresh) = &self.balance_refresh {
            refresh.notify_one();
        }

        Ok(TransferReceipt {
            approval,
            transfer,
            atomic_amount,
        })
    }

    async fn approve_if_needed(
        &self,
        token: Address,
        owner: Address,
        paymaster: Address,
    ) -> Result<Option<UserOperationHash>, AaError> {
        self.set_stage(TransferStage::CheckingAllowance);
        let allowance = self.tokens.allowance(token, owner, paymaster).await?;
        if allowance >= U256::MAX {
            info!("Paymaster {:?} already holds an unlimited allowance", paymaster);
            return Ok(None);
        }

        self.set_stage(TransferStage::ApprovingSpend);
        // The approval itself is not sponsored
        let approval = self
            .client
            .create_user_op(token, U256::zero(), approve_call_data(paymaster, U256::MAX))
            .await?
            .paymaster_and_data(Bytes::default());

        self.set_stage(TransferStage::AwaitingApprovalConfirmation);
        let hash = self.client.send_user_op(approval).await?;
        info!("Approved paymaster {:?} to spend {:?}: {:?}", paymaster, token, hash);
        Ok(Some(hash))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use ethers::types::H160;

    use super::*;
    use crate::config::AaClientConfig;
    use crate::currency::Ticker;
    use crate::test_utils::{MockConnector, MockTokens, MockWallet};

    const PAYMASTER: Address = H160([0x77; 20]);

    struct Harness {
        connector: Arc<MockConnector>,
        tokens: Arc<MockTokens>,
        flow: TransferFlow,
    }

    async fn harness(paymaster: Option<Address>) -> Harness {
        let connector = Arc::new(MockConnector::default());
        let mut config = AaClientConfig::default();
        config.paymaster = paymaster;
        let client = AaClient::new(Some(MockWallet::arc()), config, connector.clone()).unwrap();
        client.initialize().await.unwrap();

        let tokens = Arc::new(MockTokens::default());
        let flow = TransferFlow::new(Arc::new(client), tokens.clone());
        Harness { connector, tokens, flow }
    }

    fn request(ticker: Ticker, amount: &str) -> TransferRequest {
        TransferRequest {
            currency: ticker.currency(),
            recipient: Address::repeat_byte(0x0f),
            amount: amount.to_string(),
        }
    }

    #[tokio::test]
    async fn zero_allowance_approves_then_transfers() {
        let h = harness(Some(PAYMASTER)).await;
        let wbtc = Ticker::Wbtc.currency();

        let receipt = h.flow.execute(&request(Ticker::Wbtc, "0.5")).await.unwrap();
        assert!(receipt.approval.is_some());
        assert_eq!(receipt.atomic_amount, U256::from(50_000_000u64));

        let created = h.connector.account.created();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].target, wbtc.address);
        assert_eq!(created[0].data, approve_call_data(PAYMASTER, U256::MAX));
        assert_eq!(created[1].target, wbtc.address);
        assert_eq!(
            created[1].data,
            transfer_call_data(Address::repeat_byte(0x0f), U256::from(50_000_000u64))
        );

        let sent = h.connector.bundler.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].paymaster_and_data.is_empty());
        assert_eq!(sent[1].paymaster_and_data, h.connector.account.paymaster_and_data);
        assert_eq!(*h.flow.subscribe().borrow(), TransferStage::Done);
    }

    #[tokio::test]
    async fn max_fee_token_allowance_skips_approval() {
        let h = harness(Some(PAYMASTER)).await;
        let wbtc = Ticker::Wbtc.currency();
        h.tokens
            .set_allowance(wbtc.address, h.connector.account.address, PAYMASTER, U256::MAX);

        let receipt = h.flow.execute(&request(Ticker::Usdt, "10")).await.unwrap();
        assert_eq!(receipt.approval, None);

        let created = h.connector.account.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].target, Ticker::Usdt.currency().address);
        assert_eq!(
            created[0].data,
            transfer_call_data(Address::repeat_byte(0x0f), U256::from(10_000_000u64))
        );
        assert_eq!(h.connector.bundler.sent().len(), 1);
    }

    #[tokio::test]
    async fn other_currency_still_approves_the_fee_token() {
        let h = harness(Some(PAYMASTER)).await;
        let usdt = Ticker::Usdt.currency();
        // Allowance on the transferred token is irrelevant to the paymaster
        h.tokens
            .set_allowance(usdt.address, h.connector.account.address, PAYMASTER, U256::MAX);

        let receipt = h.flow.execute(&request(Ticker::Usdt, "10")).await.unwrap();
        assert!(receipt.approval.is_some());

        let created = h.connector.account.created();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].target, Ticker::Wbtc.currency().address);
        assert_eq!(created[0].data, approve_call_data(PAYMASTER, U256::MAX));
        assert_eq!(created[1].target, usdt.address);
    }

    #[tokio::test]
    async fn partial_allowance_still_approves() {
        let h = harness(Some(PAYMASTER)).await;
        let wbtc = Ticker::Wbtc.currency();
        h.tokens.set_allowance(
            wbtc.address,
            h.connector.account.address,
            PAYMASTER,
            U256::from(1_000_000_000u64),
        );

        h.flow.execute(&request(Ticker::Usdt, "1")).await.unwrap();
        assert_eq!(h.connector.bundler.sent().len(), 2);
    }

    #[tokio::test]
    async fn no_paymaster_means_no_allowance_check() {
        let h = harness(None).await;

        let receipt = h.flow.execute(&request(Ticker::Wbtc, "1")).await.unwrap();
        assert_eq!(receipt.approval, None);
        assert_eq!(h.tokens.allowance_reads.load(Ordering::SeqCst), 0);
        assert_eq!(h.connector.bundler.sent().len(), 1);
    }

    #[tokio::test]
    async fn allowance_read_failure_aborts_before_any_operation() {
        let h = harness(Some(PAYMASTER)).await;
        h.tokens.fail_allowance.store(true, Ordering::SeqCst);

        let err = h.flow.execute(&request(Ticker::Wbtc, "0.5")).await.unwrap_err();
        assert!(matches!(err, AaError::AllowanceRead(_)));
        assert!(h.connector.account.created().is_empty());
        assert_eq!(*h.flow.subscribe().borrow(), TransferStage::Idle);
    }

    #[tokio::test]
    async fn transfer_failure_keeps_the_approval() {
        let h = harness(Some(PAYMASTER)).await;
        *h.connector.bundler.reject_after.lock().unwrap() = Some(1);

        let err = h.flow.execute(&request(Ticker::Wbtc, "0.5")).await.unwrap_err();
        assert!(matches!(err, AaError::RelaySubmission(_)));

        let sent = h.connector.bundler.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].call_data, approve_call_data(PAYMASTER, U256::MAX));
        assert_eq!(h.connector.account.created().len(), 2);
    }

    #[tokio::test]
    async fn rejects_zero_amount() {
        let h = harness(Some(PAYMASTER)).await;
        let err = h.flow.execute(&request(Ticker::Wbtc, "0")).await.unwrap_err();

        assert!(matches!(err, AaError::InvalidParameters(_)));
        assert!(h.connector.bundler.sent().is_empty());
    }

    #[tokio::test]
    async fn successful_transfer_requests_balance_refresh() {
        let h = harness(None).await;
        let refresh = Arc::new(Notify::new());
        let flow = h.flow.with_balance_refresh(refresh.clone());

        flow.execute(&request(Ticker::Usdt, "2")).await.unwrap();
        // notify_one stores a permit when nobody is waiting yet
        tokio::time::timeout(std::time::Duration::from_secs(1), refresh.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn uninitialized_client_is_refused() {
        let client = AaClient::new(
            Some(MockWallet::arc()),
            AaClientConfig::default(),
            Arc::new(MockConnector::default()),
        )
        .unwrap();
        let flow = TransferFlow::new(Arc::new(client), Arc::new(MockTokens::default()));

        let err = flow.execute(&request(Ticker::Wbtc, "1")).await.unwrap_err();
        assert!(matches!(err, AaError::NotInitialized));
    }
}
