use crate::error::{AccountError, Result};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};

/// The key (or contract) that owns a smart account.
///
/// `personal_sign` applies the EIP-191 prefix; `sign_typed_digest` signs an
/// EIP-712 digest as is.
#[async_trait]
pub trait PersonalSigner: Send + Sync {
    fn address(&self) -> Address;

    /// True when signatures are checked by a contract (ERC-1271) rather than by
    /// `ecrecover`.
    fn is_contract_signer(&self) -> bool {
        false
    }

    async fn personal_sign(&self, message: &[u8]) -> Result<Bytes>;

    async fn sign_typed_digest(&self, digest: H256) -> Result<Bytes>;
}

#[async_trait]
impl PersonalSigner for LocalWallet {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    async fn personal_sign(&self, message: &[u8]) -> Result<Bytes> {
        let sig = self
            .sign_message(message)
            .await
            .map_err(|e| AccountError::Signer(e.to_string()))?;
        Ok(Bytes::from(sig.to_vec()))
    }

    async fn sign_typed_digest(&self, digest: H256) -> Result<Bytes> {
        let sig = self
            .sign_hash(digest)
            .map_err(|e| AccountError::Signer(e.to_string()))?;
        Ok(Bytes::from(sig.to_vec()))
    }
}
