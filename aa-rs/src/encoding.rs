use crate::types::{UserOperationV06, UserOperationV07, VersionedUserOp};
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::{Map, Value};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

pub fn user_op_to_json(op: &VersionedUserOp) -> Value {
    match op {
        VersionedUserOp::V06(op) => user_op_v06_to_json(op),
        VersionedUserOp::V07(op) => user_op_v07_to_json(op),
    }
}

pub fn user_op_v06_to_json(op: &UserOperationV06) -> Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    })
}

/// v0.7 RPC shape: the unpacked fields. Factory and paymaster blocks are omitted
/// entirely when absent; bundlers reject a zero factory.
pub fn user_op_v07_to_json(op: &UserOperationV07) -> Value {
    let mut m = Map::new();
    m.insert("sender".into(), Value::String(fmt_address(op.sender)));
    m.insert("nonce".into(), Value::String(fmt_u256(op.nonce)));
    if let Some(factory) = op.factory {
        m.insert("factory".into(), Value::String(fmt_address(factory)));
        m.insert("factoryData".into(), Value::String(fmt_bytes(&op.factory_data)));
    }
    m.insert("callData".into(), Value::String(fmt_bytes(&op.call_data)));
    m.insert("callGasLimit".into(), Value::String(fmt_u256(op.call_gas_limit)));
    m.insert(
        "verificationGasLimit".into(),
        Value::String(fmt_u256(op.verification_gas_limit)),
    );
    m.insert(
        "preVerificationGas".into(),
        Value::String(fmt_u256(op.pre_verification_gas)),
    );
    m.insert("maxFeePerGas".into(), Value::String(fmt_u256(op.max_fee_per_gas)));
    m.insert(
        "maxPriorityFeePerGas".into(),
        Value::String(fmt_u256(op.max_priority_fee_per_gas)),
    );
    if let Some(pm) = op.paymaster {
        m.insert("paymaster".into(), Value::String(fmt_address(pm)));
        m.insert(
            "paymasterVerificationGasLimit".into(),
            Value::String(fmt_u256(op.paymaster_verification_gas_limit)),
        );
        m.insert(
            "paymasterPostOpGasLimit".into(),
            Value::String(fmt_u256(op.paymaster_post_op_gas_limit)),
        );
        m.insert("paymasterData".into(), Value::String(fmt_bytes(&op.paymaster_data)));
    }
    m.insert("signature".into(), Value::String(fmt_bytes(&op.signature)));
    Value::Object(m)
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(H256(arr))
}

pub fn parse_bytes(s: &str) -> anyhow::Result<Bytes> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    Ok(Bytes::from(hex::decode(s)?))
}

pub fn parse_address(s: &str) -> anyhow::Result<Address> {
    let bytes = parse_bytes(s)?;
    if bytes.len() != 20 {
        anyhow::bail!("expected 20-byte address, got {} bytes", bytes.len());
    }
    Ok(Address::from_slice(&bytes))
}

/// Reads `key` from a JSON object as a hex quantity. Missing keys, `null` and
/// non-string values are reported as `None`; unparsable strings are errors.
pub fn opt_u256_field(v: &Value, key: &str) -> anyhow::Result<Option<U256>> {
    match v.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(parse_u256_quantity(s)?)),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| Some(U256::from(n)))
            .ok_or_else(|| anyhow::anyhow!("field {key} is not an unsigned integer")),
        Some(other) => anyhow::bail!("field {key} has unexpected type: {other}"),
    }
}

/// Packs two `uint128` values big-endian into one 32-byte word (`hi ‖ lo`).
///
/// Used for `accountGasLimits` (verification ‖ call) and `gasFees`
/// (maxPriorityFee ‖ maxFee).
pub fn pack_u128_pair(hi: u128, lo: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&hi.to_be_bytes());
    word[16..].copy_from_slice(&lo.to_be_bytes());
    word
}

pub fn unpack_u128_pair(word: &[u8; 32]) -> (u128, u128) {
    let mut hi = [0u8; 16];
    let mut lo = [0u8; 16];
    hi.copy_from_slice(&word[..16]);
    lo.copy_from_slice(&word[16..]);
    (u128::from_be_bytes(hi), u128::from_be_bytes(lo))
}

/// Narrows a U256 to u128, or `None` if it does not fit.
pub fn u256_to_u128(v: U256) -> Option<u128> {
    if v > U256::from(u128::MAX) {
        None
    } else {
        Some(v.as_u128())
    }
}
