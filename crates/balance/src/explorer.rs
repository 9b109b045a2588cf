use crate::TokenBalanceApi;
use alloy_primitives::{Address, U256};
use client::{ApiKey, ClientError, ExplorerClient};

impl TokenBalanceApi for ExplorerClient {
    async fn token_balance(
        &self,
        chain_id: u64,
        contract: Address,
        wallet: Address,
        api_key: &ApiKey,
    ) -> Result<U256, ClientError> {
        Self::token_balance(self, chain_id, contract, wallet, api_key).await
    }
}
