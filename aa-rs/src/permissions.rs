//! Admin and session-key management.
//!
//! Every change is a [`SignerPermissionRequest`] signed by the owner under the
//! account's own EIP-712 domain and executed as a self call, so it goes
//! through the same deployment and sponsorship handling as any send.

use crate::account::SmartAccount;
use crate::contracts;
use crate::eip712::{AdminAction, SignerPermissionRequest};
use crate::error::{AccountError, ChainError, Result, UsageError};
use crate::types::TransactionInput;
use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

/// Requests become valid an hour in the past to absorb clock skew.
const VALIDITY_BACKDATE_SECS: u128 = 60 * 60;
const TEN_YEARS_SECS: u128 = 10 * 365 * 24 * 60 * 60;

/// Scope of a session key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionKeyGrant {
    pub approved_targets: Vec<Address>,
    pub native_token_limit_per_transaction: U256,
    pub permission_start_timestamp: u128,
    pub permission_end_timestamp: u128,
}

/// One entry of `getAllActiveSigners()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignerPermissions {
    pub signer: Address,
    pub approved_targets: Vec<Address>,
    pub native_token_limit_per_transaction: U256,
    pub start_timestamp: u128,
    pub end_timestamp: u128,
}

fn now_secs() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u128::from(d.as_secs()))
        .unwrap_or_default()
}

fn random_uid() -> H256 {
    let mut uid = [0u8; 32];
    OsRng.fill_bytes(&mut uid);
    H256::from(uid)
}

fn admin_request(signer: Address, action: AdminAction, now: u128) -> SignerPermissionRequest {
    SignerPermissionRequest {
        signer,
        is_admin: action,
        permission_start_timestamp: now.saturating_sub(VALIDITY_BACKDATE_SECS),
        permission_end_timestamp: now + TEN_YEARS_SECS,
        req_validity_start_timestamp: now.saturating_sub(VALIDITY_BACKDATE_SECS),
        req_validity_end_timestamp: now + TEN_YEARS_SECS,
        uid: random_uid(),
        ..Default::default()
    }
}

fn session_request(signer: Address, grant: &SessionKeyGrant, now: u128) -> SignerPermissionRequest {
    SignerPermissionRequest {
        signer,
        is_admin: AdminAction::None,
        approved_targets: grant.approved_targets.clone(),
        native_token_limit_per_transaction: grant.native_token_limit_per_transaction,
        permission_start_timestamp: grant.permission_start_timestamp,
        permission_end_timestamp: grant.permission_end_timestamp,
        req_validity_start_timestamp: now.saturating_sub(VALIDITY_BACKDATE_SECS),
        req_validity_end_timestamp: now + TEN_YEARS_SECS,
        uid: random_uid(),
    }
}

/// Revocation is a grant of nothing: no targets, no value, a zero-width window.
fn revoke_request(signer: Address, now: u128) -> SignerPermissionRequest {
    session_request(signer, &SessionKeyGrant::default(), now)
}

fn u128_field(token: &Token) -> Option<u128> {
    let v = token.clone().into_uint()?;
    crate::encoding::u256_to_u128(v)
}

fn parse_signer_permissions(tokens: Vec<Token>) -> Option<SignerPermissions> {
    let [signer, targets, limit, start, end] = <[Token; 5]>::try_from(tokens).ok()?;
    Some(SignerPermissions {
        signer: signer.into_address()?,
        approved_targets: targets
            .into_array()?
            .into_iter()
            .map(Token::into_address)
            .collect::<Option<Vec<_>>>()?,
        native_token_limit_per_transaction: limit.into_uint()?,
        start_timestamp: u128_field(&start)?,
        end_timestamp: u128_field(&end)?,
    })
}

impl SmartAccount {
    fn require_permissions(&self, operation: &'static str) -> Result<()> {
        if self.backend().supports_permissions() {
            Ok(())
        } else {
            Err(UsageError::UnsupportedOnChain {
                operation,
                chain_id: self.chain_id(),
            }
            .into())
        }
    }

    /// Signs `request` with the owner and submits it as a self call.
    async fn submit_permission_request(&self, request: SignerPermissionRequest) -> Result<H256> {
        let account = self.address();
        let digest = request.digest(account, self.chain_id());
        let signature = self.owner().sign_typed_digest(digest).await?;

        tracing::info!(
            account = %crate::encoding::fmt_address(account),
            signer = %crate::encoding::fmt_address(request.signer),
            is_admin = request.is_admin as u8,
            targets = request.approved_targets.len(),
            "submitting signer permission request"
        );

        let data = contracts::account_set_permissions_for_signer(request.to_token(), &signature);
        let tx = TransactionInput::new(self.chain_id())
            .to(account)
            .data(data);
        self.send_transaction(&tx).await
    }

    pub async fn add_admin(&self, signer: Address) -> Result<H256> {
        self.require_permissions("add admin")?;
        self.submit_permission_request(admin_request(signer, AdminAction::Grant, now_secs()))
            .await
    }

    pub async fn remove_admin(&self, signer: Address) -> Result<H256> {
        self.require_permissions("remove admin")?;
        self.submit_permission_request(admin_request(signer, AdminAction::Revoke, now_secs()))
            .await
    }

    pub async fn create_session_key(&self, signer: Address, grant: &SessionKeyGrant) -> Result<H256> {
        self.require_permissions("create session key")?;
        self.submit_permission_request(session_request(signer, grant, now_secs()))
            .await
    }

    /// Safe to repeat: a second revocation grants nothing again.
    pub async fn revoke_session_key(&self, signer: Address) -> Result<H256> {
        self.require_permissions("revoke session key")?;
        self.submit_permission_request(revoke_request(signer, now_secs()))
            .await
    }

    pub async fn get_all_admins(&self) -> Result<Vec<Address>> {
        self.require_permissions("list admins")?;
        let out = self
            .backend()
            .chain()
            .call(self.address(), contracts::account_get_all_admins())
            .await?;
        contracts::decode_address_array_output("getAllAdmins", &out)
    }

    pub async fn get_all_active_signers(&self) -> Result<Vec<SignerPermissions>> {
        self.require_permissions("list active signers")?;
        let out = self
            .backend()
            .chain()
            .call(self.address(), contracts::account_get_all_active_signers())
            .await?;
        contracts::decode_signer_permissions_output("getAllActiveSigners", &out)?
            .into_iter()
            .map(|entry| {
                parse_signer_permissions(entry).ok_or_else(|| {
                    AccountError::Chain(ChainError::Decode {
                        what: "getAllActiveSigners",
                        reason: "unexpected signer permission layout".to_string(),
                    })
                })
            })
            .collect()
    }
}
