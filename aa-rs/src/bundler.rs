use crate::encoding::{fmt_address, fmt_h256, opt_u256_field, parse_h256, parse_u256_quantity};
use crate::error::{AccountError, Result};
use crate::transport::RpcTransport;
use crate::types::{FeeSuggestion, GasEstimates, UserOperationReceipt};
use ethers::providers::spoof;
use ethers::types::{Address, TransactionReceipt, H256, U256};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const METHOD_GAS_PRICE: &str = "thirdweb_getUserOperationGasPrice";
pub const METHOD_ESTIMATE_GAS: &str = "eth_estimateUserOperationGas";
pub const METHOD_SEND: &str = "eth_sendUserOperation";
pub const METHOD_RECEIPT: &str = "eth_getUserOperationReceipt";
pub const METHOD_ZK_BROADCAST: &str = "zk_broadcastTransaction";

#[derive(Clone)]
pub struct BundlerClient {
    transport: Arc<dyn RpcTransport>,
}

impl std::fmt::Debug for BundlerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundlerClient").finish_non_exhaustive()
    }
}

impl BundlerClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    pub async fn get_user_operation_gas_price(&self) -> Result<FeeSuggestion> {
        let res = self
            .transport
            .call(METHOD_GAS_PRICE, serde_json::json!([]))
            .await?;
        Ok(FeeSuggestion {
            max_fee_per_gas: parse_u256_field(METHOD_GAS_PRICE, &res, "maxFeePerGas")?,
            max_priority_fee_per_gas: parse_u256_field(
                METHOD_GAS_PRICE,
                &res,
                "maxPriorityFeePerGas",
            )?,
        })
    }

    /// `state_override` is passed as the optional third parameter; simulation
    /// sees it, the real execution does not.
    pub async fn estimate_user_operation_gas(
        &self,
        user_op: Value,
        entrypoint: Address,
        state_override: Option<&spoof::State>,
    ) -> Result<GasEstimates> {
        let mut params = vec![user_op, Value::String(fmt_address(entrypoint))];
        if let Some(state) = state_override {
            let state = serde_json::to_value(state)
                .map_err(|e| AccountError::malformed(METHOD_ESTIMATE_GAS, e.to_string()))?;
            params.push(state);
        }
        let res = self
            .transport
            .call(METHOD_ESTIMATE_GAS, Value::Array(params))
            .await?;
        parse_gas_estimates(METHOD_ESTIMATE_GAS, &res)
    }

    pub async fn send_user_operation(&self, user_op: Value, entrypoint: Address) -> Result<H256> {
        let params = serde_json::json!([user_op, fmt_address(entrypoint)]);
        let res = self.transport.call(METHOD_SEND, params).await?;
        parse_userop_hash(&res)
    }

    /// One receipt lookup; `None` while the operation is still pending.
    pub async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>> {
        let params = serde_json::json!([fmt_h256(user_op_hash)]);
        let res = self.transport.call(METHOD_RECEIPT, params).await?;
        if res.is_null() {
            return Ok(None);
        }
        parse_user_op_receipt(user_op_hash, &res).map(Some)
    }

    /// Polls for a receipt every `interval` until one is returned or `cancel` fires.
    ///
    /// There is no timeout: cancellation is the only way out of a stuck operation.
    pub async fn wait_user_operation_receipt(
        &self,
        user_op_hash: H256,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<UserOperationReceipt> {
        loop {
            let res = tokio::select! {
                _ = cancel.cancelled() => return Err(AccountError::Canceled),
                res = self.get_user_operation_receipt(user_op_hash) => res,
            };

            match res {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(AccountError::Transport { reason, .. }) => {
                    // transient errors are common on free-tier bundlers; keep polling
                    tracing::warn!(user_op_hash = %fmt_h256(user_op_hash), %reason, "bundler receipt poll error");
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(AccountError::Canceled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Broadcasts a signed alternate-chain transaction. Returns the transaction hash.
    pub async fn zk_broadcast_transaction(&self, tx: Value) -> Result<H256> {
        let res = self
            .transport
            .call(METHOD_ZK_BROADCAST, serde_json::json!([tx]))
            .await?;
        let hash = res
            .get("transactionHash")
            .and_then(Value::as_str)
            .ok_or_else(|| AccountError::malformed(METHOD_ZK_BROADCAST, "missing transactionHash"))?;
        parse_h256(hash).map_err(|e| AccountError::malformed(METHOD_ZK_BROADCAST, e.to_string()))
    }
}

fn parse_u256_field(method: &str, v: &Value, key: &str) -> Result<U256> {
    let s = v
        .get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| AccountError::malformed(method, format!("missing or invalid field {key}")))?;
    parse_u256_quantity(s)
        .map_err(|e| AccountError::malformed(method, format!("field {key}: {e}")))
}

pub(crate) fn parse_gas_estimates(method: &str, res: &Value) -> Result<GasEstimates> {
    let optional = |key: &str| {
        opt_u256_field(res, key).map_err(|e| AccountError::malformed(method, e.to_string()))
    };
    Ok(GasEstimates {
        call_gas_limit: parse_u256_field(method, res, "callGasLimit")?,
        verification_gas_limit: parse_u256_field(method, res, "verificationGasLimit")?,
        pre_verification_gas: parse_u256_field(method, res, "preVerificationGas")?,
        paymaster_verification_gas_limit: optional("paymasterVerificationGasLimit")?,
        paymaster_post_op_gas_limit: optional("paymasterPostOpGasLimit")?,
    })
}

fn parse_user_op_receipt(user_op_hash: H256, res: &Value) -> Result<UserOperationReceipt> {
    let raw = res
        .get("receipt")
        .ok_or_else(|| AccountError::malformed(METHOD_RECEIPT, "missing receipt"))?;
    let receipt: TransactionReceipt = serde_json::from_value(raw.clone())
        .map_err(|e| AccountError::malformed(METHOD_RECEIPT, e.to_string()))?;
    let success = match res.get("success") {
        Some(Value::Bool(b)) => *b,
        _ => receipt.status.map(|s| s.as_u64() == 1).unwrap_or(true),
    };
    Ok(UserOperationReceipt {
        user_op_hash,
        success,
        receipt,
    })
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string; a few wrap it.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(AccountError::malformed(
            METHOD_SEND,
            format!("unexpected result shape (expected string or {{result: ...}}): {res}"),
        ));
    };

    parse_h256(hash_str).map_err(|e| AccountError::malformed(METHOD_SEND, e.to_string()))
}
