// src/app.rs
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::client::{AaClient, Connector, NoopPreSendCheck, PreSendCheck};
use crate::config::AaClientConfig;
use crate::error::AaError;
use crate::wallet::{WalletConnection, WalletEvent};

/// Owns the client session lifecycle. Every wallet connection, including a
/// switch to another account, gets a fresh session; disconnecting drops it.
pub struct App {
    wallet: Option<Arc<dyn WalletConnection>>,
    config: AaClientConfig,
    connector: Arc<dyn Connector>,
    pre_send: Arc<dyn PreSendCheck>,
    session: watch::Sender<Option<Arc<AaClient>>>,
}

impl App {
    pub fn new(
        wallet: Option<Arc<dyn WalletConnection>>,
        config: AaClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            wallet,
            config,
            connector,
            pre_send: Arc::new(NoopPreSendCheck),
            session: watch::channel(None).0,
        }
    }

    /// Installed on every client this app creates
    pub fn with_pre_send_check(mut self, pre_send: Arc<dyn PreSendCheck>) -> Self {
        self.pre_send = pre_send;
        self
    }

    /// Creates and initializes a fresh client, replacing the current one
    pub async fn connect(&self) -> Result<Arc<AaClient>, AaError> {
        let client = AaClient::new(
            self.wallet.clone(),
            self.config.clone(),
            self.connector.clone(),
        )?
        .with_pre_send_check(self.pre_send.clone());
        let client = Arc::new(client);
        client.initialize().await?;

        self.session.send_replace(Some(client.clone()));
        Ok(client)
    }

    pub fn disconnect(&self) {
        if self.session.send_replace(None).is_some() {
            info!("Client session dropped");
        }
    }

    /// Resolves once a session is present (`connected`) or gone (`!connected`)
    pub async fn wait_for(&self, connected: bool) -> Option<Arc<AaClient>> {
        let mut sessions = self.session.subscribe();
        loop {
            let current = sessions.borrow_and_update().clone();
            if current.is_some() == connected {
                return current;
            }
            if sessions.changed().await.is_err() {
                return None;
            }
        }
    }

    pub async fn handle_event(&self, event: WalletEvent) -> Result<(), AaError> {
        match event {
            WalletEvent::Connected { chain_id } => {
                debug!("Wallet connected on chain {}", chain_id);
                self.connect().await?;
            }
            WalletEvent::Disconnected => self.disconnect(),
        }
        Ok(())
    }

    /// Applies wallet events until the wallet goes away
    pub async fn follow(&self, mut events: broadcast::Receiver<WalletEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = self.handle_event(event).await {
                        warn!("Failed to apply wallet event: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} wallet events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
