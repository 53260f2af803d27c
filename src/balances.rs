// src/balances.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, U256};
use tokio::sync::{watch, Notify};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::currency::{Amount, Currency, Ticker};
use crate::error::AaError;
use crate::token::TokenApi;

pub const REFETCH_INTERVAL: Duration = Duration::from_secs(60);

pub type Balances = HashMap<Ticker, U256>;

/// Keeps the smart account's token balances fresh. After the caller's first
/// [`BalanceWatcher::fetch`], [`BalanceWatcher::run`] refetches on an interval
/// and whenever a refresh is requested.
pub struct BalanceWatcher {
    tokens: Arc<dyn TokenApi>,
    owner: Address,
    currencies: Vec<Currency>,
    interval: Duration,
    refresh: Arc<Notify>,
    latest: watch::Sender<Option<Balances>>,
}

impl BalanceWatcher {
    pub fn new(tokens: Arc<dyn TokenApi>, owner: Address) -> Self {
        Self {
            tokens,
            owner,
            currencies: Currency::all(),
            interval: REFETCH_INTERVAL,
            refresh: Arc::new(Notify::new()),
            latest: watch::channel(None).0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Handle to request an immediate refetch, e.g. after a transfer
    pub fn refresh_handle(&self) -> Arc<Notify> {
        self.refresh.clone()
    }

    pub async fn fetch(&self) -> Result<Balances, AaError> {
        let mut balances = Balances::new();
        for currency in &self.currencies {
            let balance = self.tokens.balance_of(currency.address, self.owner).await?;
            balances.insert(currency.ticker, balance);
        }

        debug!("Fetched balances for {:?}: {:?}", self.owner, balances);
        self.latest.send_replace(Some(balances.clone()));
        Ok(balances)
    }

    /// Changes on every successful fetch
    pub fn subscribe(&self) -> watch::Receiver<Option<Balances>> {
        self.latest.subscribe()
    }

    /// Last known balance, zero until the first successful fetch
    pub fn balance(&self, ticker: Ticker) -> Amount {
        let currency = ticker.currency();
        let atomic = self
            .latest
            .borrow()
            .as_ref()
            .and_then(|balances| balances.get(&ticker).copied());
        match atomic {
            Some(atomic) => Amount::new(currency, atomic),
            None => Amount::zero(currency),
        }
    }

    pub async fn run(self: Arc<Self>) {
        info!("Watching balances of {:?} every {:?}", self.owner, self.interval);
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.refresh.notified() => debug!("Balance refresh requested"),
            }
            if let Err(e) = self.fetch().await {
                warn!("Failed to refresh balances: {}", e);
            }
        }
    }
}
