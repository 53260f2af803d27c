// src/token.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::prelude::*;

use crate::error::AaError;

abigen!(
    Erc20,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#
);

/// Read access to ERC-20 token state
#[async_trait]
pub trait TokenApi: Send + Sync {
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, AaError>;

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, AaError>;
}

pub struct Erc20Reader<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> Erc20Reader<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M: Middleware + 'static> TokenApi for Erc20Reader<M> {
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, AaError> {
        Erc20::new(token, self.client.clone())
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| AaError::AllowanceRead(e.to_string()))
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, AaError> {
        Erc20::new(token, self.client.clone())
            .balance_of(owner)
            .call()
            .await
            .map_err(|e| AaError::Provider(e.to_string()))
    }
}

pub fn approve_call_data(spender: Address, amount: U256) -> Bytes {
    ApproveCall { spender, amount }.encode().into()
}

pub fn transfer_call_data(to: Address, amount: U256) -> Bytes {
    TransferCall { to, amount }.encode().into()
}

#[cfg(test)]
mod tests {
    use ethers::abi::AbiDecode;

    use super::*;

    #[test]
    fn approve_encodes_selector_and_arguments() {
        let data = approve_call_data(Address::repeat_byte(0xaa), U256::MAX);
        // approve(address,uint256)
        assert_eq!(&data[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[16..36], Address::repeat_byte(0xaa).as_bytes());
        assert!(data[36..].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn transfer_round_trips_through_the_abi() {
        let data = transfer_call_data(Address::repeat_byte(0xbb), U256::from(50_000_000u64));
        // transfer(address,uint256)
        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);

        let decoded = TransferCall::decode(&data).unwrap();
        assert_eq!(decoded.to, Address::repeat_byte(0xbb));
        assert_eq!(decoded.amount, U256::from(50_000_000u64));
    }
}
