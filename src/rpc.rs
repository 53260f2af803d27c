// src/rpc.rs
use ethers::types::{Address, U64};
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{UserOperation, UserOperationGasEstimation, UserOperationHash};

// Bundler JSON-RPC surface (ERC-4337 `eth_` namespace). The server half
// only backs the in-process bundler used by tests.
#[cfg_attr(not(test), rpc(client, namespace = "eth"))]
#[cfg_attr(test, rpc(client, server, namespace = "eth"))]
pub trait BundlerApi {
    #[method(name = "chainId")]
    async fn chain_id(&self) -> RpcResult<U64>;

    #[method(name = "supportedEntryPoints")]
    async fn supported_entry_points(&self) -> RpcResult<Vec<Address>>;

    /// Submits a signed operation, returning its hash
    #[method(name = "sendUserOperation")]
    async fn send_user_operation(
        &self,
        user_operation: UserOperation,
        entry_point: Address,
    ) -> RpcResult<UserOperationHash>;

    #[method(name = "estimateUserOperationGas")]
    async fn estimate_user_operation_gas(
        &self,
        user_operation: UserOperation,
        entry_point: Address,
    ) -> RpcResult<UserOperationGasEstimation>;
}
