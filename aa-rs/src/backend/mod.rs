//! Per-chain-family implementations of the smart account.
//!
//! The family is chosen once, from the chain id, when the account is
//! connected: [`EntryPointBackend`] drives ERC-4337 UserOperations through a
//! bundler, [`ZkSyncBackend`] signs and broadcasts native account-abstraction
//! transactions. Nothing outside this module branches on the chain family.

mod entrypoint;
mod zksync;

pub use entrypoint::EntryPointBackend;
pub use zksync::ZkSyncBackend;

use crate::chain::{ChainClient, Connector};
use crate::config::AccountConfig;
use crate::contracts::{self, ERC1271_MAGIC_VALUE};
use crate::error::{ChainError, Result};
use crate::guard::DeploymentState;
use crate::signer::PersonalSigner;
use crate::types::{Call, TransactionInput};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait WalletBackend: Send + Sync {
    fn address(&self) -> Address;

    fn chain(&self) -> &Arc<dyn ChainClient>;

    /// Whether `setPermissionsForSigner` style capability grants work here.
    fn supports_permissions(&self) -> bool;

    fn deployment_state(&self) -> DeploymentState;

    async fn is_deployed(&self) -> Result<bool>;

    /// Sends one transaction and returns its on-chain transaction hash.
    async fn send(&self, tx: &TransactionInput, cancel: &CancellationToken) -> Result<H256>;

    async fn send_batch(&self, calls: &[Call], cancel: &CancellationToken) -> Result<H256>;

    async fn force_deploy(&self, cancel: &CancellationToken) -> Result<()>;

    /// Signature over `message` that [`WalletBackend::is_valid_signature`]
    /// accepts for `hash_message(message)`.
    async fn personal_sign(&self, message: &[u8], cancel: &CancellationToken) -> Result<Bytes>;

    /// Signature over an EIP-712 digest, accepted for `digest` itself.
    async fn sign_typed_digest(&self, digest: H256, cancel: &CancellationToken) -> Result<Bytes>;

    /// `Ok(false)` for a signature the account rejects; `Err` when the check
    /// itself could not run.
    async fn is_valid_signature(&self, hash: H256, signature: &Bytes) -> Result<bool>;
}

/// Selects the backend for `config.chain_id`.
pub async fn connect(
    owner: Arc<dyn PersonalSigner>,
    config: AccountConfig,
    connector: &dyn Connector,
) -> Result<Arc<dyn WalletBackend>> {
    if config.is_alternate_chain() {
        Ok(Arc::new(ZkSyncBackend::connect(owner, config, connector)?))
    } else {
        Ok(Arc::new(
            EntryPointBackend::connect(owner, config, connector).await?,
        ))
    }
}

/// ERC-1271 check against `account`. A revert or a non-magic answer is an
/// invalid signature; a transport failure is an error.
pub(crate) async fn erc1271_check(
    chain: &dyn ChainClient,
    account: Address,
    hash: H256,
    signature: &Bytes,
) -> Result<bool> {
    let data = contracts::account_is_valid_signature(hash, signature);
    match chain.call(account, data).await {
        Ok(out) => Ok(contracts::decode_bytes4_output("isValidSignature", &out)
            .map(|magic| magic == ERC1271_MAGIC_VALUE)
            .unwrap_or(false)),
        Err(ChainError::Reverted { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
