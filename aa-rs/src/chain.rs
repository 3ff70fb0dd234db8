use crate::config::{url_for_chain, DEFAULT_RPC_URL};
use crate::encoding::fmt_h256;
use crate::error::{AccountError, ChainError, Result, UsageError};
use crate::transport::{HttpTransport, RpcTransport};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, MiddlewareError, Provider};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest,
    TransactionReceipt, H256, U256,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Read access to a chain's JSON-RPC node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError>;

    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
        data: Bytes,
    ) -> Result<U256, ChainError>;

    async fn gas_price(&self) -> Result<U256, ChainError>;

    async fn transaction_receipt(&self, hash: H256)
        -> Result<Option<TransactionReceipt>, ChainError>;
}

/// [`ChainClient`] over any ethers middleware stack.
#[derive(Debug)]
pub struct ProviderChain<M> {
    inner: M,
    chain_id: u64,
}

impl<M: Middleware> ProviderChain<M> {
    pub fn new(inner: M, chain_id: u64) -> Self {
        Self { inner, chain_id }
    }

    fn classify(err: M::Error) -> ChainError {
        if let Some(resp) = err.as_error_response() {
            if resp.is_revert() {
                return ChainError::Reverted {
                    data: resp.as_revert_data(),
                };
            }
        }
        ChainError::Transport(err.to_string())
    }
}

#[async_trait]
impl<M> ChainClient for ProviderChain<M>
where
    M: Middleware + Send + Sync,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
        self.inner
            .get_code(address, None)
            .await
            .map_err(Self::classify)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new().to(to).data(data).into();
        self.inner.call(&tx, None).await.map_err(Self::classify)
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError> {
        self.inner
            .get_transaction_count(address, None)
            .await
            .map_err(Self::classify)
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
        data: Bytes,
    ) -> Result<U256, ChainError> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(from)
            .to(to)
            .value(value)
            .data(data)
            .into();
        self.inner
            .estimate_gas(&tx, None)
            .await
            .map_err(Self::classify)
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.inner.get_gas_price().await.map_err(Self::classify)
    }

    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.inner
            .get_transaction_receipt(hash)
            .await
            .map_err(Self::classify)
    }
}

/// Polls the chain for a transaction receipt until one exists or `cancel` fires.
pub async fn wait_for_receipt(
    chain: &dyn ChainClient,
    tx_hash: H256,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<TransactionReceipt> {
    loop {
        let res = tokio::select! {
            _ = cancel.cancelled() => return Err(AccountError::Canceled),
            res = chain.transaction_receipt(tx_hash) => res,
        };
        match res {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {}
            Err(ChainError::Transport(reason)) => {
                tracing::warn!(tx_hash = %fmt_h256(tx_hash), %reason, "receipt poll error");
            }
            Err(e) => return Err(e.into()),
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(AccountError::Canceled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Builds the per-chain collaborators. Called again on network switch.
pub trait Connector: Send + Sync {
    fn chain(&self, chain_id: u64) -> Result<Arc<dyn ChainClient>>;

    fn rpc(&self, url: &str) -> Result<Arc<dyn RpcTransport>>;
}

/// HTTP collaborators. `rpc_url_template` may contain `{chain_id}`.
#[derive(Clone, Debug)]
pub struct HttpConnector {
    rpc_url_template: String,
    http: reqwest::Client,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_RPC_URL)
    }
}

impl HttpConnector {
    pub fn new(rpc_url_template: impl Into<String>) -> Self {
        Self {
            rpc_url_template: rpc_url_template.into(),
            http: reqwest::Client::new(),
        }
    }
}

impl Connector for HttpConnector {
    fn chain(&self, chain_id: u64) -> Result<Arc<dyn ChainClient>> {
        let url = url_for_chain(&self.rpc_url_template, chain_id);
        let provider = Provider::<Http>::try_from(url.as_str())
            .map_err(|e| UsageError::InvalidConfig(format!("invalid rpc url {url}: {e}")))?;
        Ok(Arc::new(ProviderChain::new(provider, chain_id)))
    }

    fn rpc(&self, url: &str) -> Result<Arc<dyn RpcTransport>> {
        Ok(Arc::new(HttpTransport::with_client(url, self.http.clone())))
    }
}
