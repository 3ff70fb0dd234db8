use super::{erc1271_check, WalletBackend};
use crate::bundler::BundlerClient;
use crate::chain::{ChainClient, Connector};
use crate::config::AccountConfig;
use crate::eip712::{ZkSyncTransaction, DEFAULT_GAS_PER_PUBDATA_BYTE_LIMIT};
use crate::encoding::{fmt_address, fmt_bytes, fmt_h256, fmt_u256};
use crate::error::{Result, UsageError};
use crate::guard::DeploymentState;
use crate::paymaster::PaymasterClient;
use crate::signer::PersonalSigner;
use crate::types::{Call, TransactionInput};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, Signature, H256, U256};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Native account abstraction: the owner key is the account, transactions
/// are EIP-712 typed and broadcast directly.
pub struct ZkSyncBackend {
    owner: Arc<dyn PersonalSigner>,
    config: AccountConfig,
    chain: Arc<dyn ChainClient>,
    bundler: BundlerClient,
    paymaster: PaymasterClient,
}

impl ZkSyncBackend {
    pub fn connect(
        owner: Arc<dyn PersonalSigner>,
        config: AccountConfig,
        connector: &dyn Connector,
    ) -> Result<Self> {
        let chain = connector.chain(config.chain_id)?;
        let bundler = BundlerClient::new(connector.rpc(&config.bundler_url())?);
        let paymaster = PaymasterClient::new(connector.rpc(&config.paymaster_url())?);
        tracing::info!(
            chain_id = config.chain_id,
            account = %fmt_address(owner.address()),
            "alternate-chain account connected"
        );
        Ok(Self {
            owner,
            config,
            chain,
            bundler,
            paymaster,
        })
    }

    async fn build_transaction(&self, tx: &TransactionInput, to: Address) -> Result<ZkSyncTransaction> {
        let from = self.owner.address();
        let nonce = self.chain.transaction_count(from).await?;
        let (max_fee_per_gas, max_priority_fee_per_gas) =
            match (tx.max_fee_per_gas, tx.max_priority_fee_per_gas) {
                (Some(max), Some(prio)) => (max, prio),
                _ => {
                    let price = self.chain.gas_price().await?;
                    (price, price)
                }
            };
        let gas_limit = match tx.gas {
            Some(gas) => gas,
            None => {
                self.chain
                    .estimate_gas(from, to, tx.value, tx.data.clone())
                    .await?
            }
        };

        Ok(ZkSyncTransaction {
            chain_id: self.config.chain_id,
            from,
            to,
            gas_limit,
            gas_per_pubdata_byte_limit: U256::from(DEFAULT_GAS_PER_PUBDATA_BYTE_LIMIT),
            max_fee_per_gas,
            max_priority_fee_per_gas,
            paymaster: Address::zero(),
            nonce,
            value: tx.value,
            data: tx.data.clone(),
            factory_deps: Vec::new(),
            paymaster_input: Bytes::new(),
        })
    }
}

/// RPC form of an unsigned alternate-chain transaction.
fn transaction_json(tx: &ZkSyncTransaction) -> Value {
    json!({
        "nonce": fmt_u256(tx.nonce),
        "from": fmt_address(tx.from),
        "to": fmt_address(tx.to),
        "gas": fmt_u256(tx.gas_limit),
        "gasPrice": fmt_u256(tx.max_fee_per_gas),
        "value": fmt_u256(tx.value),
        "data": fmt_bytes(&tx.data),
        "maxFeePerGas": fmt_u256(tx.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(tx.max_priority_fee_per_gas),
        "chainId": format!("{:#x}", tx.chain_id),
    })
}

#[async_trait]
impl WalletBackend for ZkSyncBackend {
    fn address(&self) -> Address {
        self.owner.address()
    }

    fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    fn supports_permissions(&self) -> bool {
        false
    }

    fn deployment_state(&self) -> DeploymentState {
        DeploymentState::Deployed
    }

    async fn is_deployed(&self) -> Result<bool> {
        Ok(true)
    }

    async fn send(&self, tx: &TransactionInput, _cancel: &CancellationToken) -> Result<H256> {
        let to = tx.to.ok_or(UsageError::MissingRecipient)?;
        let mut zk_tx = self.build_transaction(tx, to).await?;

        if self.config.gasless {
            if let Some(pm) = self
                .paymaster
                .zk_paymaster_data(transaction_json(&zk_tx))
                .await?
            {
                zk_tx.paymaster = pm.paymaster;
                zk_tx.paymaster_input = pm.paymaster_input;
            }
        }

        let signature = self.owner.sign_typed_digest(zk_tx.digest()).await?;

        let mut payload = transaction_json(&zk_tx);
        payload["signedTransaction"] = json!(fmt_bytes(&zk_tx.rlp_signed(&signature)));
        payload["paymaster"] = json!({
            "paymaster": fmt_address(zk_tx.paymaster),
            "paymasterInput": fmt_bytes(&zk_tx.paymaster_input),
        });
        let tx_hash = self.bundler.zk_broadcast_transaction(payload).await?;

        tracing::info!(
            chain_id = self.config.chain_id,
            from = %fmt_address(zk_tx.from),
            nonce = %zk_tx.nonce,
            sponsored = !zk_tx.paymaster.is_zero(),
            tx_hash = %fmt_h256(tx_hash),
            "alternate-chain transaction broadcast"
        );
        Ok(tx_hash)
    }

    async fn send_batch(&self, _calls: &[Call], _cancel: &CancellationToken) -> Result<H256> {
        Err(UsageError::UnsupportedOnChain {
            operation: "batch transactions",
            chain_id: self.config.chain_id,
        }
        .into())
    }

    async fn force_deploy(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn personal_sign(&self, message: &[u8], _cancel: &CancellationToken) -> Result<Bytes> {
        self.owner.personal_sign(message).await
    }

    async fn sign_typed_digest(&self, digest: H256, _cancel: &CancellationToken) -> Result<Bytes> {
        self.owner.sign_typed_digest(digest).await
    }

    async fn is_valid_signature(&self, hash: H256, signature: &Bytes) -> Result<bool> {
        if self.owner.is_contract_signer() {
            return erc1271_check(self.chain.as_ref(), self.address(), hash, signature).await;
        }
        let Ok(sig) = Signature::try_from(signature.as_ref()) else {
            return Ok(false);
        };
        Ok(sig
            .recover(hash)
            .map(|signer| signer == self.address())
            .unwrap_or(false))
    }
}
