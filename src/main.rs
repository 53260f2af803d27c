// src/main.rs
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::providers::{Http, Provider};
use ethers::types::U256;
use tokio::time::timeout;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod account;
mod app;
mod balances;
mod bundler;
mod client;
mod config;
mod currency;
mod error;
mod paymaster;
mod relay;
mod rpc;
mod token;
mod transfer;
mod types;
mod wallet;

#[cfg(test)]
mod test_utils;

use crate::app::App;
use crate::balances::BalanceWatcher;
use crate::client::{EntryPointFundsCheck, SimpleAccountConnector};
use crate::config::{
    parse_address, parse_u256, AaClientConfig, ENTRY_POINT_ADDRESS, SIMPLE_ACCOUNT_FACTORY,
};
use crate::currency::Ticker;
use crate::error::AaError;
use crate::relay::{RelayClient, RELAY_API_URL, RELAY_STATUS_URL};
use crate::token::{transfer_call_data, Erc20Reader};
use crate::transfer::{TransferFlow, TransferRequest};
use crate::wallet::{InjectedWallet, WalletConnection, WalletEvent};

const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, env = "ETH_RPC_URL")]
    eth_rpc_url: String,

    #[clap(short, long, env = "PRIVATE_KEY")]
    private_key: Option<String>,

    #[clap(long, env = "BUNDLER_URL")]
    bundler_url: Option<String>,

    #[clap(long, env = "ENTRY_POINT", default_value = ENTRY_POINT_ADDRESS)]
    entry_point: String,

    #[clap(long, env = "PAYMASTER")]
    paymaster: Option<String>,

    /// Most the paymaster may charge, in fee token units. Unlimited when unset.
    #[clap(long, env = "PAYMASTER_FEE_LIMIT")]
    paymaster_fee_limit: Option<String>,

    /// Token the paymaster is paid in, WBTC when unset
    #[clap(long, env = "FEE_TOKEN")]
    fee_token: Option<String>,

    #[clap(long, env = "ACCOUNT_FACTORY", default_value = SIMPLE_ACCOUNT_FACTORY)]
    factory: String,

    #[clap(long, env = "ACCOUNT_INDEX", default_value_t = 0)]
    account_index: u64,

    /// In wei
    #[clap(long, env = "MAX_FEE_PER_GAS")]
    max_fee_per_gas: Option<String>,

    /// In wei
    #[clap(long, env = "MAX_PRIORITY_FEE_PER_GAS")]
    max_priority_fee_per_gas: Option<String>,

    /// Refuse unsponsored operations the account cannot pay for
    #[clap(long, env = "CHECK_FUNDS")]
    check_funds: bool,

    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the owner and smart account addresses
    Address,
    /// Print the smart account's token balances
    Balances,
    /// Ask the bundler for the gas a transfer would use, without sending it
    Estimate {
        #[clap(long)]
        ticker: Ticker,
        #[clap(long)]
        amount: String,
        #[clap(long)]
        to: String,
    },
    /// Transfer tokens from the smart account
    Transfer {
        #[clap(long)]
        ticker: Ticker,
        #[clap(long)]
        amount: String,
        #[clap(long)]
        to: String,
    },
    /// Submit a sponsored call through the relay network
    Relay {
        #[clap(long)]
        target: String,
        /// Hex encoded call data
        #[clap(long)]
        data: String,
        #[clap(long, env = "SPONSOR_API_KEY")]
        sponsor_api_key: String,
        #[clap(long, env = "RELAY_API_URL", default_value = RELAY_API_URL)]
        relay_api_url: String,
        #[clap(long, env = "RELAY_STATUS_URL", default_value = RELAY_STATUS_URL)]
        relay_status_url: String,
    },
    /// Keep balances fresh and follow wallet events until Ctrl+C
    Watch {
        #[clap(long, env = "REFETCH_SECS", default_value_t = 60)]
        refetch_secs: u64,
    },
}

fn client_config(args: &Args) -> Result<AaClientConfig, AaError> {
    let mut config =
        AaClientConfig::from_strings(&args.entry_point, &args.factory, args.paymaster.as_deref())?
            .with_account_index(U256::from(args.account_index));
    if let Some(bundler_url) = &args.bundler_url {
        config = config.with_bundler_url(bundler_url.clone());
    }
    if let Some(fee_limit) = &args.paymaster_fee_limit {
        config = config.with_paymaster_fee_limit(parse_u256(fee_limit)?);
    }
    if let Some(fee_token) = &args.fee_token {
        config = config.with_fee_token(parse_address(fee_token)?);
    }

    let mut fees = config.fees;
    if let Some(max_fee) = &args.max_fee_per_gas {
        fees.max_fee_per_gas = parse_u256(max_fee)?;
    }
    if let Some(priority_fee) = &args.max_priority_fee_per_gas {
        fees.max_priority_fee_per_gas = parse_u256(priority_fee)?;
    }
    Ok(config.with_fees(fees))
}

fn log_balances(watcher: &BalanceWatcher) {
    for ticker in Ticker::ALL {
        let amount = watcher.balance(ticker);
        info!("{} ({})", amount, amount.currency.name);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let provider = Arc::new(Provider::<Http>::try_from(args.eth_rpc_url.as_str())?);
    let wallet = InjectedWallet::connect(args.private_key.as_deref(), provider.clone())?.map(Arc::new);
    let config = client_config(&args)?;

    let connector = Arc::new(SimpleAccountConnector::new(provider.clone()));
    let tokens = Arc::new(Erc20Reader::new(provider.clone()));
    let mut app = App::new(
        wallet.clone().map(|w| w as Arc<dyn WalletConnection>),
        config.clone(),
        connector,
    );
    if args.check_funds {
        app = app.with_pre_send_check(Arc::new(EntryPointFundsCheck::new(
            provider.clone(),
            config.entry_point,
        )));
    }
    let app = Arc::new(app);

    match args.command {
        Command::Address => {
            let client = app.connect().await?;
            let smart_account = client.smart_account_address().ok_or(AaError::NotInitialized)?;
            info!("Owner: {:?}", client.owner());
            info!("Smart account: {:?}", smart_account);
            info!("Chain: {}", client.session()?.chain_id);
            if let Some(paymaster) = client.paymaster_address() {
                info!("Paymaster: {:?}, paid in {:?}", paymaster, client.fee_token());
            }
        }
        Command::Balances => {
            let client = app.connect().await?;
            let watcher = BalanceWatcher::new(tokens, client.session()?.smart_account_address);
            watcher.fetch().await?;
            log_balances(&watcher);
        }
        Command::Estimate { ticker, amount, to } => {
            let client = app.connect().await?;
            let currency = ticker.currency();
            let atomic = currency.to_atomic(&amount)?;
            let call_data = transfer_call_data(parse_address(&to)?, atomic);

            let user_op = client.create_user_op(currency.address, U256::zero(), call_data).await?;
            let estimate = client.estimate_user_op_gas(&user_op).await?;
            info!("Call gas limit: {}", estimate.call_gas_limit);
            info!("Verification gas limit: {}", estimate.verification_gas_limit);
            info!("Pre-verification gas: {}", estimate.pre_verification_gas);
        }
        Command::Transfer { ticker, amount, to } => {
            let client = app.connect().await?;
            let watcher = Arc::new(BalanceWatcher::new(
                tokens.clone(),
                client.session()?.smart_account_address,
            ));
            watcher.fetch().await?;
            log_balances(&watcher);

            let mut updates = watcher.subscribe();
            let watch_handle = tokio::spawn(watcher.clone().run());
            let flow = TransferFlow::new(client, tokens).with_balance_refresh(watcher.refresh_handle());

            let mut stages = flow.subscribe();
            tokio::spawn(async move {
                while stages.changed().await.is_ok() {
                    info!("Transfer stage: {:?}", *stages.borrow());
                }
            });

            let request = TransferRequest {
                currency: ticker.currency(),
                recipient: parse_address(&to)?,
                amount,
            };
            let receipt = flow.execute(&request).await?;
            if let Some(approval) = receipt.approval {
                info!("Approval operation: {:?}", approval);
            }
            info!("Transfer operation: {:?} ({} atomic units)", receipt.transfer, receipt.atomic_amount);

            match timeout(SESSION_TIMEOUT, updates.changed()).await {
                Ok(Ok(())) => log_balances(&watcher),
                _ => warn!("Balances were not refreshed after the transfer"),
            }
            watch_handle.abort();
        }
        Command::Relay {
            target,
            data,
            sponsor_api_key,
            relay_api_url,
            relay_status_url,
        } => {
            let wallet = wallet.ok_or(AaError::NoWallet)?;
            let data = hex::decode(data.trim_start_matches("0x"))
                .map_err(|e| AaError::InvalidParameters(format!("invalid call data: {e}")))?;
            let chain_id = wallet.chain_id().await?;

            let relay = RelayClient::new(sponsor_api_key).with_urls(relay_api_url, relay_status_url);
            let task_id = relay
                .sponsored_call(chain_id, parse_address(&target)?, data.into(), wallet.address())
                .await?;
            info!("Relay task {}: {}", task_id, relay.task_status_url(&task_id));

            let status = relay.task_status(&task_id).await?;
            info!("Relay task {} state: {}", status.task_id, status.task_state);
            if let Some(hash) = status.transaction_hash {
                info!("Transaction: {:?}", hash);
            }
            if let Some(message) = status.last_check_message {
                info!("Last check: {}", message);
            }
        }
        Command::Watch { refetch_secs } => {
            let wallet = wallet.ok_or(AaError::NoWallet)?;
            let follow_handle = tokio::spawn({
                let app = app.clone();
                let events = wallet.subscribe();
                async move { app.follow(events).await }
            });

            // The follower owns session creation
            wallet.announce(WalletEvent::Connected {
                chain_id: wallet.chain_id().await?,
            });
            let client = timeout(SESSION_TIMEOUT, app.wait_for(true))
                .await?
                .ok_or(AaError::NotInitialized)?;

            let watcher = Arc::new(
                BalanceWatcher::new(tokens, client.session()?.smart_account_address)
                    .with_interval(Duration::from_secs(refetch_secs)),
            );
            match watcher.fetch().await {
                Ok(_) => log_balances(&watcher),
                Err(e) => warn!("Failed to fetch balances: {}", e),
            }
            let mut updates = watcher.subscribe();
            let watch_handle = tokio::spawn(watcher.clone().run());

            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        log_balances(&watcher);
                    }
                    _ = &mut shutdown => break,
                }
            }

            wallet.announce(WalletEvent::Disconnected);
            if timeout(SESSION_TIMEOUT, app.wait_for(false)).await.is_err() {
                warn!("Session was still open on shutdown");
            }
            watch_handle.abort();
            follow_handle.abort();
            info!("Stopped watching");
        }
    }

    Ok(())
}
