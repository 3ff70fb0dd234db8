use crate::bundler::parse_gas_estimates;
use crate::config::Erc20PaymasterConfig;
use crate::encoding::{fmt_address, parse_address, parse_bytes};
use crate::error::{AccountError, Result};
use crate::transport::RpcTransport;
use crate::types::PaymasterSponsorship;
use ethers::providers::spoof;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde_json::Value;
use std::sync::Arc;

pub const METHOD_SPONSOR: &str = "pm_sponsorUserOperation";
pub const METHOD_ZK_PAYMASTER_DATA: &str = "zk_paymasterData";

/// Sponsorship client for the gasless mode. The paymaster endpoint is often the
/// bundler endpoint.
#[derive(Clone)]
pub struct PaymasterClient {
    transport: Arc<dyn RpcTransport>,
}

impl std::fmt::Debug for PaymasterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymasterClient").finish_non_exhaustive()
    }
}

/// `zk_paymasterData` answer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ZkPaymasterData {
    pub paymaster: Address,
    pub paymaster_input: Bytes,
}

impl PaymasterClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    pub async fn sponsor_user_operation(
        &self,
        user_op: Value,
        entrypoint: Address,
    ) -> Result<PaymasterSponsorship> {
        let params = serde_json::json!([user_op, { "entryPoint": fmt_address(entrypoint) }]);
        let res = self.transport.call(METHOD_SPONSOR, params).await?;
        parse_sponsorship(&res)
    }

    /// Paymaster data for an alternate-chain transaction; `None` when the
    /// service declines to sponsor.
    pub async fn zk_paymaster_data(&self, tx: Value) -> Result<Option<ZkPaymasterData>> {
        let res = self
            .transport
            .call(METHOD_ZK_PAYMASTER_DATA, serde_json::json!([tx]))
            .await?;
        parse_zk_paymaster_data(&res)
    }
}

fn field_str<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

fn bad(method: &str, e: impl std::fmt::Display) -> AccountError {
    AccountError::malformed(method, e.to_string())
}

fn parse_sponsorship(result: &Value) -> Result<PaymasterSponsorship> {
    // Sponsors answer in one of three shapes:
    //   { "paymaster": "0x..", "paymasterData": "0x..", ...gas }   (v0.7)
    //   { "paymasterAndData": "0x..", ...gas }                      (v0.6)
    //   { "entrypointV06Response": { "paymasterAndData": "0x.." } } (wrapped v0.6)
    // or as a bare paymasterAndData string.
    if let Some(s) = result.as_str() {
        return Ok(PaymasterSponsorship {
            paymaster_and_data: Some(parse_bytes(s).map_err(|e| bad(METHOD_SPONSOR, e))?),
            ..Default::default()
        });
    }

    let body = result
        .get("entrypointV06Response")
        .or_else(|| result.get("entryPointV06Response"))
        .unwrap_or(result);

    let mut out = PaymasterSponsorship::default();

    if let Some(s) = field_str(body, "paymaster") {
        out.paymaster = Some(parse_address(s).map_err(|e| bad(METHOD_SPONSOR, e))?);
    }
    if let Some(s) = field_str(body, "paymasterData") {
        out.paymaster_data = parse_bytes(s).map_err(|e| bad(METHOD_SPONSOR, e))?;
    }
    if let Some(s) = field_str(body, "paymasterAndData") {
        out.paymaster_and_data = Some(parse_bytes(s).map_err(|e| bad(METHOD_SPONSOR, e))?);
    }

    if out.paymaster.is_none() && out.paymaster_and_data.is_none() {
        return Err(AccountError::malformed(
            METHOD_SPONSOR,
            "missing paymaster (expected paymaster or paymasterAndData)",
        ));
    }

    // Gas limits are only taken when the sponsor priced all three; a partial
    // answer is re-estimated.
    let has_gas = ["callGasLimit", "verificationGasLimit", "preVerificationGas"]
        .iter()
        .all(|k| body.get(*k).is_some_and(|v| !v.is_null()));
    if has_gas {
        out.gas = Some(parse_gas_estimates(METHOD_SPONSOR, body)?);
    }

    Ok(out)
}

fn parse_zk_paymaster_data(result: &Value) -> Result<Option<ZkPaymasterData>> {
    if result.is_null() {
        return Ok(None);
    }
    match (field_str(result, "paymaster"), field_str(result, "paymasterInput")) {
        (Some(pm), Some(input)) => Ok(Some(ZkPaymasterData {
            paymaster: parse_address(pm).map_err(|e| bad(METHOD_ZK_PAYMASTER_DATA, e))?,
            paymaster_input: parse_bytes(input).map_err(|e| bad(METHOD_ZK_PAYMASTER_DATA, e))?,
        })),
        (None, None) => Ok(None),
        _ => Err(AccountError::malformed(
            METHOD_ZK_PAYMASTER_DATA,
            "paymaster and paymasterInput must both be set or both be null",
        )),
    }
}

/// ERC-20 paymaster fields are not negotiated: the paymaster is called with the
/// token address as its data.
pub fn erc20_sponsorship(cfg: &Erc20PaymasterConfig) -> PaymasterSponsorship {
    PaymasterSponsorship {
        paymaster: Some(cfg.paymaster),
        paymaster_data: Bytes::from(cfg.token.as_bytes().to_vec()),
        paymaster_and_data: None,
        gas: None,
    }
}

/// Storage slot of `balanceOf[holder]` for a Solidity `mapping(address => uint256)`
/// declared at `mapping_slot`.
pub fn balance_storage_key(holder: Address, mapping_slot: U256) -> H256 {
    let mut preimage = [0u8; 64];
    preimage[12..32].copy_from_slice(holder.as_bytes());
    mapping_slot.to_big_endian(&mut preimage[32..]);
    H256::from(keccak256(preimage))
}

/// Estimation-only override giving `holder` a maximal token balance.
pub fn erc20_balance_override(cfg: &Erc20PaymasterConfig, holder: Address) -> spoof::State {
    let mut state = spoof::State::default();
    state.account(cfg.token).store(
        balance_storage_key(holder, cfg.balance_storage_slot),
        H256::repeat_byte(0xff),
    );
    state
}
