// src/config.rs
use ethers::types::{Address, U256};

use crate::currency::Ticker;
use crate::error::AaError;

pub const ENTRY_POINT_ADDRESS: &str = "0x7A660708DB3D56BB0dC3694344777c805716Fca7";
pub const DEFAULT_BUNDLER_URL: &str = "https://bundler-fluffy-bob.gobob.xyz/rpc";
pub const SIMPLE_ACCOUNT_FACTORY: &str = "0x9406Cc6185a346906296840746125a0E44976454";
pub const DEFAULT_MAX_FEE_PER_GAS: u64 = 0x6507a5d0;
pub const DEFAULT_MAX_PRIORITY_FEE_PER_GAS: u64 = 0x6507a5c0;

/// Fee parameters applied to every operation the client builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasFees {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl Default for GasFees {
    fn default() -> Self {
        Self {
            max_fee_per_gas: U256::from(DEFAULT_MAX_FEE_PER_GAS),
            max_priority_fee_per_gas: U256::from(DEFAULT_MAX_PRIORITY_FEE_PER_GAS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AaClientConfig {
    /// Entry point contract, defaults to [`ENTRY_POINT_ADDRESS`]
    pub entry_point: Address,
    /// Bundler JSON-RPC endpoint, `None` selects [`DEFAULT_BUNDLER_URL`]
    pub bundler_url: Option<String>,
    /// Sponsoring paymaster; operations pay their own gas when unset
    pub paymaster: Option<Address>,
    /// Fee limit encoded into the paymaster data, `None` means unlimited
    pub paymaster_fee_limit: Option<U256>,
    /// Token the paymaster charges fees in and must be approved to spend
    pub fee_token: Address,
    /// Simple account factory, defaults to [`SIMPLE_ACCOUNT_FACTORY`]
    pub factory: Address,
    /// Salt passed to the factory when deriving the account address
    pub account_index: U256,
    pub fees: GasFees,
}

impl AaClientConfig {
    pub fn new(entry_point: Address, factory: Address) -> Self {
        Self {
            entry_point,
            bundler_url: None,
            paymaster: None,
            paymaster_fee_limit: None,
            fee_token: Ticker::Wbtc.currency().address,
            factory,
            account_index: U256::zero(),
            fees: GasFees::default(),
        }
    }

    /// Builds a config from textual addresses, as read from the command line
    pub fn from_strings(
        entry_point: &str,
        factory: &str,
        paymaster: Option<&str>,
    ) -> Result<Self, AaError> {
        let mut config = Self::new(parse_address(entry_point)?, parse_address(factory)?);
        if let Some(paymaster) = paymaster {
            config.paymaster = Some(parse_address(paymaster)?);
        }
        Ok(config)
    }

    pub fn with_bundler_url(mut self, bundler_url: impl Into<String>) -> Self {
        self.bundler_url = Some(bundler_url.into());
        self
    }

    pub fn with_paymaster(mut self, paymaster: Address) -> Self {
        self.paymaster = Some(paymaster);
        self
    }

    pub fn with_paymaster_fee_limit(mut self, fee_limit: U256) -> Self {
        self.paymaster_fee_limit = Some(fee_limit);
        self
    }

    pub fn with_fee_token(mut self, fee_token: Address) -> Self {
        self.fee_token = fee_token;
        self
    }

    pub fn with_account_index(mut self, account_index: U256) -> Self {
        self.account_index = account_index;
        self
    }

    pub fn with_fees(mut self, fees: GasFees) -> Self {
        self.fees = fees;
        self
    }

    pub fn bundler_url(&self) -> &str {
        self.bundler_url.as_deref().unwrap_or(DEFAULT_BUNDLER_URL)
    }
}

impl Default for AaClientConfig {
    fn default() -> Self {
        Self::new(
            ENTRY_POINT_ADDRESS.parse().unwrap_or_default(),
            SIMPLE_ACCOUNT_FACTORY.parse().unwrap_or_default(),
        )
    }
}

pub fn parse_address(value: &str) -> Result<Address, AaError> {
    value
        .parse::<Address>()
        .map_err(|e| AaError::InvalidParameters(format!("invalid address {value}: {e}")))
}

/// Parses a base-10 integer such as a wei amount or a fee limit
pub fn parse_u256(value: &str) -> Result<U256, AaError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AaError::InvalidParameters("empty integer".into()));
    }
    U256::from_dec_str(trimmed)
        .map_err(|e| AaError::InvalidParameters(format!("invalid integer {value}: {e}")))
}
