// src/wallet.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::AaError;

/// Connection state changes announced by the wallet. Switching account or
/// chain is announced as a fresh `Connected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    Connected { chain_id: u64 },
    Disconnected,
}

/// The signer side of a wallet connection: owner address, active chain and
/// message signing.
#[async_trait]
pub trait WalletConnection: Send + Sync {
    fn address(&self) -> Address;

    async fn chain_id(&self) -> Result<u64, AaError>;

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, AaError>;

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Wallet backed by a local private key and a JSON-RPC node
pub struct InjectedWallet {
    signer: LocalWallet,
    client: Arc<Provider<Http>>,
    events: broadcast::Sender<WalletEvent>,
}

impl InjectedWallet {
    pub fn new(signer: LocalWallet, client: Arc<Provider<Http>>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            signer,
            client,
            events,
        }
    }

    /// Returns `None` when no key was supplied, the equivalent of a browser
    /// without an injected wallet.
    pub fn connect(
        private_key: Option<&str>,
        client: Arc<Provider<Http>>,
    ) -> Result<Option<Self>, AaError> {
        let Some(private_key) = private_key else {
            debug!("No private key configured, running without a wallet");
            return Ok(None);
        };

        let signer = private_key
            .parse::<LocalWallet>()
            .map_err(|e| AaError::InvalidParameters(format!("invalid private key: {e}")))?;
        info!("Connected wallet {:?}", signer.address());

        Ok(Some(Self::new(signer, client)))
    }

    /// Broadcasts an event to every subscriber. Having no subscribers is fine.
    pub fn announce(&self, event: WalletEvent) {
        debug!("Wallet event: {:?}", event);
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl WalletConnection for InjectedWallet {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn chain_id(&self) -> Result<u64, AaError> {
        let chain_id = self
            .client
            .get_chainid()
            .await
            .map_err(|e| AaError::Provider(e.to_string()))?;
        Ok(chain_id.as_u64())
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
