use super::{erc1271_check, WalletBackend};
use crate::bundler::BundlerClient;
use crate::chain::{ChainClient, Connector};
use crate::config::{AccountConfig, Erc20PaymasterConfig, DUMMY_SIGNATURE};
use crate::contracts;
use crate::eip712::AccountMessage;
use crate::encoding::{fmt_address, fmt_h256, parse_bytes, user_op_to_json};
use crate::error::{AccountError, Result, UsageError};
use crate::execution::encode_account_call;
use crate::gas::{apply_fees, apply_gas_limits};
use crate::guard::{DeploymentState, Latch, LatchState, Slot, TryAcquire};
use crate::hasher;
use crate::paymaster::{erc20_balance_override, erc20_sponsorship, PaymasterClient};
use crate::resolver::{draft_user_op, fetch_nonce, random_nonce_key, resolve_account_address, InitCode};
use crate::signer::PersonalSigner;
use crate::types::{Call, FeeSuggestion, TransactionInput, VersionedUserOp};
use async_trait::async_trait;
use ethers::providers::spoof;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::hash_message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// ERC-4337 account: UserOperations signed by the owner, sponsored by a
/// paymaster and submitted through a bundler.
pub struct EntryPointBackend {
    owner: Arc<dyn PersonalSigner>,
    config: AccountConfig,
    address: Address,
    chain: Arc<dyn ChainClient>,
    bundler: BundlerClient,
    paymaster: PaymasterClient,
    deployment: Latch,
    approval: Latch,
}

/// How the paymaster fields of one operation are filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sponsor {
    /// ERC-20 paymaster when configured, otherwise the default mode.
    Preferred,
    /// Never the ERC-20 paymaster. Used for the approval that bootstraps it.
    SkipErc20,
}

/// Caller-supplied fee caps and call gas for one operation.
#[derive(Clone, Debug, Default)]
struct OpLimits {
    fees: Option<FeeSuggestion>,
    call_gas: Option<U256>,
}

impl EntryPointBackend {
    pub async fn connect(
        owner: Arc<dyn PersonalSigner>,
        config: AccountConfig,
        connector: &dyn Connector,
    ) -> Result<Self> {
        let chain = connector.chain(config.chain_id)?;
        let bundler = BundlerClient::new(connector.rpc(&config.bundler_url())?);
        let paymaster = PaymasterClient::new(connector.rpc(&config.paymaster_url())?);

        let address = resolve_account_address(
            chain.as_ref(),
            config.factory,
            owner.address(),
            config.account_address_override,
        )
        .await?;
        let deployed = !chain.get_code(address).await?.is_empty();

        tracing::info!(
            chain_id = config.chain_id,
            entry_point_version = %config.entry_point_version,
            owner = %fmt_address(owner.address()),
            account = %fmt_address(address),
            deployed,
            "smart account connected"
        );

        Ok(Self {
            owner,
            config,
            address,
            chain,
            bundler,
            paymaster,
            deployment: Latch::new(deployed),
            approval: Latch::default(),
        })
    }

    /// Waits out any in-flight deployment and returns a slot if this caller
    /// has to include the init code.
    async fn deployment_slot(&self, cancel: &CancellationToken) -> Result<Option<Slot<'_>>> {
        if self.is_deployed().await? {
            return Ok(None);
        }
        self.deployment.acquire(cancel).await
    }

    async fn send_calls(
        &self,
        calls: &[Call],
        limits: OpLimits,
        cancel: &CancellationToken,
    ) -> Result<H256> {
        let call_data = encode_account_call(self.config.variant, calls)?;
        self.ensure_erc20_approval(cancel).await?;
        let slot = self.deployment_slot(cancel).await?;
        self.execute(call_data, slot, Sponsor::Preferred, limits, cancel)
            .await
    }

    /// Builds, signs, submits and waits for one UserOperation. A deployment
    /// slot, when held, is completed once the receipt arrives and released on
    /// any error before that.
    async fn execute<'a>(
        &'a self,
        call_data: Bytes,
        slot: Option<Slot<'a>>,
        sponsor: Sponsor,
        limits: OpLimits,
        cancel: &CancellationToken,
    ) -> Result<H256> {
        let entry_point = self.config.entry_point();
        let init_code = slot
            .as_ref()
            .map(|_| InitCode::new(self.config.factory, self.owner.address()));

        let nonce = fetch_nonce(
            self.chain.as_ref(),
            entry_point,
            self.address,
            random_nonce_key(),
        )
        .await?;
        let mut op = draft_user_op(
            self.config.entry_point_version,
            self.address,
            nonce,
            call_data,
            init_code.as_ref(),
            dummy_signature(),
        );

        apply_fees(&self.bundler, &mut op, limits.fees.as_ref()).await?;
        self.apply_paymaster_and_gas(&mut op, sponsor, limits.call_gas).await?;

        let hash = hasher::user_op_hash(self.chain.as_ref(), entry_point, &op).await?;
        let signature = hasher::sign_user_op_hash(self.owner.as_ref(), hash).await?;
        op.set_signature(signature);

        let user_op_hash = self
            .bundler
            .send_user_operation(user_op_to_json(&op), entry_point)
            .await?;
        if user_op_hash != hash {
            tracing::warn!(
                local = %fmt_h256(hash),
                bundler = %fmt_h256(user_op_hash),
                "bundler returned a different user operation hash"
            );
        }
        tracing::info!(
            account = %fmt_address(self.address),
            user_op_hash = %fmt_h256(user_op_hash),
            deploying = slot.is_some(),
            "user operation submitted"
        );

        let receipt = self
            .bundler
            .wait_user_operation_receipt(user_op_hash, self.config.receipt_poll_interval, cancel)
            .await?;

        if let Some(slot) = slot {
            slot.complete();
            tracing::info!(account = %fmt_address(self.address), "account deployed");
        }
        if !receipt.success {
            tracing::warn!(
                user_op_hash = %fmt_h256(user_op_hash),
                "user operation reverted"
            );
        }

        let tx_hash = receipt.receipt.transaction_hash;
        tracing::info!(
            user_op_hash = %fmt_h256(user_op_hash),
            tx_hash = %fmt_h256(tx_hash),
            success = receipt.success,
            "user operation mined"
        );
        Ok(tx_hash)
    }

    /// A caller gas limit raises the estimated callGasLimit. Limits priced by
    /// the sponsor are kept as signed.
    async fn apply_paymaster_and_gas(
        &self,
        op: &mut VersionedUserOp,
        sponsor: Sponsor,
        call_gas: Option<U256>,
    ) -> Result<()> {
        let entry_point = self.config.entry_point();

        if let (Some(pm), Sponsor::Preferred) = (self.config.erc20_paymaster.as_ref(), sponsor) {
            op.set_paymaster(&erc20_sponsorship(pm));
            let state = erc20_balance_override(pm, self.address);
            return self.estimate_gas(op, Some(&state), call_gas).await;
        }

        if !self.config.gasless {
            return self.estimate_gas(op, None, call_gas).await;
        }

        let sponsorship = self
            .paymaster
            .sponsor_user_operation(user_op_to_json(op), entry_point)
            .await?;
        op.set_paymaster(&sponsorship);
        if sponsorship.gas.is_some() {
            return apply_gas_limits(&self.bundler, entry_point, op, sponsorship.gas.as_ref(), None)
                .await;
        }

        // The sponsor signs over the gas limits, so ask again once they are known.
        self.estimate_gas(op, None, call_gas).await?;
        let priced = self
            .paymaster
            .sponsor_user_operation(user_op_to_json(op), entry_point)
            .await?;
        op.set_paymaster(&priced);
        if let Some(gas) = &priced.gas {
            op.set_gas(gas);
        }
        Ok(())
    }

    async fn estimate_gas(
        &self,
        op: &mut VersionedUserOp,
        state_override: Option<&spoof::State>,
        call_gas: Option<U256>,
    ) -> Result<()> {
        apply_gas_limits(&self.bundler, self.config.entry_point(), op, None, state_override).await?;
        if let Some(floor) = call_gas {
            op.raise_call_gas_limit(floor);
        }
        Ok(())
    }

    /// Approves the ERC-20 paymaster to spend the account's tokens, once.
    /// Concurrent callers wait for the approving caller.
    async fn ensure_erc20_approval(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(pm) = self.config.erc20_paymaster.as_ref() else {
            return Ok(());
        };
        let Some(slot) = self.approval.acquire(cancel).await? else {
            return Ok(());
        };

        match self.approve_paymaster(pm, cancel).await {
            Ok(()) => {
                slot.complete();
                Ok(())
            }
            Err(e) => {
                drop(slot);
                if e.is_canceled() {
                    Err(e)
                } else {
                    Err(AccountError::ApprovalFailed(Box::new(e)))
                }
            }
        }
    }

    async fn approve_paymaster(
        &self,
        pm: &Erc20PaymasterConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let out = self
            .chain
            .call(pm.token, contracts::erc20_allowance(self.address, pm.paymaster))
            .await?;
        let allowance = contracts::decode_u256_output("allowance", &out)?;
        if !allowance.is_zero() {
            tracing::debug!(%allowance, "paymaster allowance already set");
            return Ok(());
        }

        tracing::info!(
            token = %fmt_address(pm.token),
            paymaster = %fmt_address(pm.paymaster),
            "approving ERC-20 paymaster"
        );
        let amount = (U256::one() << 96) - U256::one();
        let call = Call::new(pm.token, U256::zero(), contracts::erc20_approve(pm.paymaster, amount));
        let call_data = encode_account_call(self.config.variant, &[call])?;
        let slot = self.deployment_slot(cancel).await?;
        self.execute(call_data, slot, Sponsor::SkipErc20, OpLimits::default(), cancel)
            .await?;
        Ok(())
    }

    /// ERC-1271 verification needs code at the account address.
    async fn ensure_deployed(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if self.is_deployed().await? {
                return Ok(());
            }
            if self.deployment.settled(cancel).await? == LatchState::Done {
                return Ok(());
            }
            match self.force_deploy(cancel).await {
                Err(AccountError::DeploymentInProgress) => continue,
                other => return other,
            }
        }
    }

    async fn sign_account_message(&self, hash: H256) -> Result<Bytes> {
        let digest = AccountMessage::new(self.address, self.config.chain_id, hash).digest();
        self.owner.sign_typed_digest(digest).await
    }
}

#[async_trait]
impl WalletBackend for EntryPointBackend {
    fn address(&self) -> Address {
        self.address
    }

    fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    fn supports_permissions(&self) -> bool {
        true
    }

    fn deployment_state(&self) -> DeploymentState {
        self.deployment.state().into()
    }

    async fn is_deployed(&self) -> Result<bool> {
        if self.deployment.is_done() {
            return Ok(true);
        }
        let code = self.chain.get_code(self.address).await?;
        if code.is_empty() {
            return Ok(false);
        }
        self.deployment.mark_done();
        Ok(true)
    }

    async fn send(&self, tx: &TransactionInput, cancel: &CancellationToken) -> Result<H256> {
        let to = tx.to.ok_or(UsageError::MissingRecipient)?;
        let fees = match (tx.max_fee_per_gas, tx.max_priority_fee_per_gas) {
            (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => Some(FeeSuggestion {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }),
            _ => None,
        };
        let limits = OpLimits {
            fees,
            call_gas: tx.gas,
        };
        self.send_calls(&[Call::new(to, tx.value, tx.data.clone())], limits, cancel)
            .await
    }

    async fn send_batch(&self, calls: &[Call], cancel: &CancellationToken) -> Result<H256> {
        self.send_calls(calls, OpLimits::default(), cancel).await
    }

    async fn force_deploy(&self, cancel: &CancellationToken) -> Result<()> {
        if self.is_deployed().await? {
            return Ok(());
        }
        if self.deployment.state() == LatchState::InFlight {
            return Err(AccountError::DeploymentInProgress);
        }

        // The approval is itself the first operation and deploys the account.
        self.ensure_erc20_approval(cancel).await?;

        match self.deployment.try_acquire() {
            TryAcquire::Done => Ok(()),
            TryAcquire::InFlight => Err(AccountError::DeploymentInProgress),
            TryAcquire::Acquired(slot) => {
                let noop = Call::new(self.address, U256::zero(), Bytes::new());
                let call_data = encode_account_call(self.config.variant, &[noop])?;
                self.execute(call_data, Some(slot), Sponsor::Preferred, OpLimits::default(), cancel)
                    .await?;
                Ok(())
            }
        }
    }

    async fn personal_sign(&self, message: &[u8], cancel: &CancellationToken) -> Result<Bytes> {
        self.ensure_deployed(cancel).await?;
        self.sign_account_message(hash_message(message)).await
    }

    async fn sign_typed_digest(&self, digest: H256, cancel: &CancellationToken) -> Result<Bytes> {
        self.ensure_deployed(cancel).await?;
        self.sign_account_message(digest).await
    }

    async fn is_valid_signature(&self, hash: H256, signature: &Bytes) -> Result<bool> {
        erc1271_check(self.chain.as_ref(), self.address, hash, signature).await
    }
}

fn dummy_signature() -> Bytes {
    parse_bytes(DUMMY_SIGNATURE).unwrap_or_default()
}
