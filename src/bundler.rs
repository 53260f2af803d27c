// src/bundler.rs
use async_trait::async_trait;
use ethers::types::Address;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use tracing::{debug, error, info, warn};

use crate::error::AaError;
use crate::rpc::BundlerApiClient;
use crate::types::{UserOperation, UserOperationGasEstimation, UserOperationHash};

/// Relays signed user operations to a bundler
#[async_trait]
pub trait BundlerClient: Send + Sync {
    async fn send_user_op(&self, user_op: &UserOperation) -> Result<UserOperationHash, AaError>;

    async fn estimate_user_op_gas(
        &self,
        user_op: &UserOperation,
    ) -> Result<UserOperationGasEstimation, AaError>;
}

pub struct HttpRpcClient {
    client: HttpClient,
    entry_point: Address,
    chain_id: u64,
}

impl HttpRpcClient {
    /// Connects to `bundler_url` and checks it serves `chain_id`
    pub async fn connect(
        bundler_url: &str,
        entry_point: Address,
        chain_id: u64,
    ) -> Result<Self, AaError> {
        let client = HttpClientBuilder::default()
            .build(bundler_url)
            .map_err(|e| AaError::InvalidParameters(format!("bundler url {bundler_url}: {e}")))?;

        let rpc_client = Self {
            client,
            entry_point,
            chain_id,
        };
        rpc_client.validate_chain_id().await?;

        match rpc_client.supported_entry_points().await {
            Ok(entry_points) if !entry_points.contains(&entry_point) => {
                warn!("Bundler does not list entry point {:?}", entry_point)
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read supported entry points: {}", e),
        }

        info!("Connected to bundler at {}", bundler_url);
        Ok(rpc_client)
    }

    async fn validate_chain_id(&self) -> Result<(), AaError> {
        let bundler_chain_id = self
            .client
            .chain_id()
            .await
            .map_err(|e| AaError::Provider(e.to_string()))?
            .as_u64();

        if bundler_chain_id != self.chain_id {
            return Err(AaError::ChainMismatch {
                wallet: self.chain_id,
                bundler: bundler_chain_id,
            });
        }
        Ok(())
    }

    pub async fn supported_entry_points(&self) -> Result<Vec<Address>, AaError> {
        self.client
            .supported_entry_points()
            .await
            .map_err(|e| AaError::Provider(e.to_string()))
    }
}

#[async_trait]
impl BundlerClient for HttpRpcClient {
    async fn send_user_op(&self, user_op: &UserOperation) -> Result<UserOperationHash, AaError> {
        debug!("Sending user operation from {:?} to bundler", user_op.sender);

        match self
            .client
            .send_user_operation(user_op.clone(), self.entry_point)
            .await
        {
            Ok(hash) => {
                info!("Bundler accepted user operation {:?}", hash);
                Ok(hash)
            }
            Err(e) => {
                error!("Bundler rejected user operation: {}", e);
                Err(AaError::RelaySubmission(e.to_string()))
            }
        }
    }

    async fn estimate_user_op_gas(
        &self,
        user_op: &UserOperation,
    ) -> Result<UserOperationGasEstimation, AaError> {
        self.client
            .estimate_user_operation_gas(user_op.clone(), self.entry_point)
            .await
            .map_err(|e| AaError::Provider(e.to_string()))
    }
}
