// src/currency.rs
use std::fmt;
use std::str::FromStr;

use ethers::types::{Address, H160, U256};
use ethers::utils::{format_units, parse_units};

use crate::error::AaError;

const WBTC_ADDRESS: Address = H160([
    0x28, 0x68, 0xd7, 0x08, 0xe4, 0x42, 0xa6, 0xa9, 0x40, 0x67, 0x0d, 0x26, 0x10, 0x00, 0x36, 0xd4,
    0x26, 0xf1, 0xe1, 0x6b,
]);
const USDT_ADDRESS: Address = H160([
    0x3c, 0x25, 0x29, 0x53, 0x22, 0x49, 0x48, 0xe4, 0x41, 0xaa, 0xfd, 0xe7, 0xb3, 0x91, 0x68, 0x52,
    0x01, 0xcc, 0xd3, 0xbc,
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ticker {
    Wbtc,
    Usdt,
}

impl Ticker {
    pub const ALL: [Ticker; 2] = [Ticker::Wbtc, Ticker::Usdt];

    pub fn currency(self) -> Currency {
        match self {
            Ticker::Wbtc => Currency {
                ticker: self,
                name: "wBTC",
                decimals: 8,
                address: WBTC_ADDRESS,
            },
            Ticker::Usdt => Currency {
                ticker: self,
                name: "Tether USD",
                decimals: 6,
                address: USDT_ADDRESS,
            },
        }
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ticker::Wbtc => write!(f, "WBTC"),
            Ticker::Usdt => write!(f, "USDT"),
        }
    }
}

impl FromStr for Ticker {
    type Err = AaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WBTC" => Ok(Ticker::Wbtc),
            "USDT" => Ok(Ticker::Usdt),
            other => Err(AaError::InvalidParameters(format!("unknown currency {other}"))),
        }
    }
}

/// An ERC-20 token the app can hold and transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Currency {
    pub ticker: Ticker,
    pub name: &'static str,
    pub decimals: u32,
    pub address: Address,
}

impl Currency {
    pub fn all() -> Vec<Currency> {
        Ticker::ALL.iter().map(|ticker| ticker.currency()).collect()
    }

    /// Scales a human decimal amount ("0.5") to token base units
    pub fn to_atomic(&self, amount: &str) -> Result<U256, AaError> {
        let amount = amount.trim();
        if amount.is_empty() || amount.starts_with('-') {
            return Err(AaError::InvalidParameters(format!("invalid amount {amount:?}")));
        }
        if let Some((_, fraction)) = amount.split_once('.') {
            if fraction.len() > self.decimals as usize {
                return Err(AaError::InvalidParameters(format!(
                    "{} supports at most {} decimals, got {amount:?}",
                    self.ticker, self.decimals
                )));
            }
        }
        let atomic = parse_units(amount, self.decimals)
            .map_err(|e| AaError::InvalidParameters(format!("invalid amount {amount:?}: {e}")))?;
        Ok(atomic.into())
    }
}

/// Balance of one currency in base units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amount {
    pub currency: Currency,
    pub atomic: U256,
}

impl Amount {
    pub fn new(currency: Currency, atomic: U256) -> Self {
        Self { currency, atomic }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(currency, U256::zero())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted =
            format_units(self.atomic, self.currency.decimals).map_err(|_| fmt::Error)?;
        let trimmed = if formatted.contains('.') {
            formatted.trim_end_matches('0').trim_end_matches('.')
        } else {
            formatted.as_str()
        };
        write!(f, "{} {}", trimmed, self.currency.ticker)
    }
}
