use crate::backend::{self, WalletBackend};
use crate::chain::{self, Connector};
use crate::config::AccountConfig;
use crate::error::{AccountError, Result, UsageError};
use crate::guard::DeploymentState;
use crate::signer::PersonalSigner;
use crate::types::{Call, TransactionInput};
use async_trait::async_trait;
use ethers::types::transaction::eip712::Eip712;
use ethers::types::{Address, Bytes, TransactionReceipt, H256};
use ethers::utils::hash_message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A smart-contract wallet owned by a personal signer.
///
/// The handle is shared between concurrent callers; deployment and the
/// ERC-20 paymaster approval happen at most once no matter how many sends
/// race on a fresh account.
pub struct SmartAccount {
    owner: Arc<dyn PersonalSigner>,
    config: AccountConfig,
    connector: Arc<dyn Connector>,
    backend: Arc<dyn WalletBackend>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SmartAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartAccount")
            .field("owner", &self.owner.address())
            .field("address", &self.backend.address())
            .field("chain_id", &self.config.chain_id)
            .finish_non_exhaustive()
    }
}

impl SmartAccount {
    /// Validates the configuration and resolves the account address.
    pub async fn connect(
        owner: Arc<dyn PersonalSigner>,
        config: AccountConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        if owner.address().is_zero() {
            return Err(UsageError::InvalidSigner.into());
        }
        config.validate()?;

        let backend = backend::connect(owner.clone(), config.clone(), connector.as_ref()).await?;
        Ok(Self {
            owner,
            config,
            connector,
            backend,
            cancel: CancellationToken::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.backend.address()
    }

    pub fn owner_address(&self) -> Address {
        self.owner.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> &Arc<dyn WalletBackend> {
        &self.backend
    }

    pub(crate) fn owner(&self) -> &Arc<dyn PersonalSigner> {
        &self.owner
    }

    /// Token that cancels receipt waits of calls made without an explicit one.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn is_deployed(&self) -> Result<bool> {
        self.backend.is_deployed().await
    }

    /// Last known deployment state, without a chain round trip.
    pub fn deployment_state(&self) -> DeploymentState {
        self.backend.deployment_state()
    }

    /// Sends `tx` and returns the mined transaction hash. A `chain_id` of zero
    /// means the account's current chain.
    pub async fn send_transaction(&self, tx: &TransactionInput) -> Result<H256> {
        self.send_transaction_with_cancel(tx, &self.cancel).await
    }

    pub async fn send_transaction_with_cancel(
        &self,
        tx: &TransactionInput,
        cancel: &CancellationToken,
    ) -> Result<H256> {
        if tx.chain_id != 0 && tx.chain_id != self.config.chain_id {
            return Err(UsageError::ChainMismatch {
                expected: self.config.chain_id,
                got: tx.chain_id,
            }
            .into());
        }
        if tx.to.is_none() {
            return Err(UsageError::MissingRecipient.into());
        }
        self.backend.send(tx, cancel).await
    }

    /// Executes all `calls` in one operation.
    pub async fn send_batch(&self, calls: &[Call]) -> Result<H256> {
        if calls.is_empty() {
            return Err(UsageError::EmptyBatch.into());
        }
        self.backend.send_batch(calls, &self.cancel).await
    }

    /// Deploys the account with a no-op self call. Fails with
    /// [`AccountError::DeploymentInProgress`] while another deployment runs.
    pub async fn force_deploy(&self) -> Result<()> {
        self.backend.force_deploy(&self.cancel).await
    }

    /// Polls the chain until `tx_hash` is mined or `cancel` fires.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        cancel: &CancellationToken,
    ) -> Result<TransactionReceipt> {
        chain::wait_for_receipt(
            self.backend.chain().as_ref(),
            tx_hash,
            self.config.receipt_poll_interval,
            cancel,
        )
        .await
    }

    /// EIP-191 signature that the account itself accepts through ERC-1271.
    /// The signature is checked before it is returned.
    pub async fn personal_sign(&self, message: &[u8]) -> Result<Bytes> {
        let signature = self.backend.personal_sign(message, &self.cancel).await?;
        self.verify(hash_message(message), signature).await
    }

    /// EIP-712 signature over `data`, checked like [`Self::personal_sign`].
    pub async fn sign_typed_data<T>(&self, data: &T) -> Result<Bytes>
    where
        T: Eip712 + Sync,
    {
        let digest = data
            .encode_eip712()
            .map(H256::from)
            .map_err(|e| AccountError::Signer(e.to_string()))?;
        self.sign_digest(digest).await
    }

    async fn sign_digest(&self, digest: H256) -> Result<Bytes> {
        let signature = self.backend.sign_typed_digest(digest, &self.cancel).await?;
        self.verify(digest, signature).await
    }

    async fn verify(&self, hash: H256, signature: Bytes) -> Result<Bytes> {
        if self.backend.is_valid_signature(hash, &signature).await? {
            Ok(signature)
        } else {
            Err(AccountError::InvalidSignature {
                account: self.address(),
            })
        }
    }

    /// Checks a signature over `message` (EIP-191 hashed).
    pub async fn is_valid_signature(&self, message: &[u8], signature: &Bytes) -> Result<bool> {
        self.backend
            .is_valid_signature(hash_message(message), signature)
            .await
    }

    pub async fn is_valid_signature_hash(&self, hash: H256, signature: &Bytes) -> Result<bool> {
        self.backend.is_valid_signature(hash, signature).await
    }

    /// Rebinds the account to `chain_id`. Refused while an ERC-20 paymaster is
    /// configured since its token and paymaster addresses are per chain.
    pub async fn switch_network(&mut self, chain_id: u64) -> Result<()> {
        if self.config.erc20_paymaster.is_some() {
            return Err(UsageError::SwitchWithErc20Paymaster.into());
        }
        if chain_id == 0 {
            return Err(UsageError::InvalidChainId.into());
        }
        if chain_id == self.config.chain_id {
            return Ok(());
        }

        let mut config = self.config.clone();
        config.chain_id = chain_id;
        config.validate()?;
        let backend = backend::connect(self.owner.clone(), config.clone(), self.connector.as_ref()).await?;

        tracing::info!(
            from = self.config.chain_id,
            to = chain_id,
            "smart account switched network"
        );
        self.config = config;
        self.backend = backend;
        Ok(())
    }
}

/// A smart account can own another smart account.
#[async_trait]
impl PersonalSigner for SmartAccount {
    fn address(&self) -> Address {
        self.backend.address()
    }

    fn is_contract_signer(&self) -> bool {
        true
    }

    async fn personal_sign(&self, message: &[u8]) -> Result<Bytes> {
        SmartAccount::personal_sign(self, message).await
    }

    async fn sign_typed_digest(&self, digest: H256) -> Result<Bytes> {
        self.sign_digest(digest).await
    }
}
