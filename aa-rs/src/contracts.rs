//! ABI fragments for the contracts the engine talks to.
//!
//! Calls are built as `selector ‖ abi.encode(args)` so the same helpers serve both
//! the engine (encoding calls, decoding results) and the in-memory test chain
//! (decoding calls, encoding results).

use crate::error::{AccountError, ChainError, Result};
use crate::types::{PackedUserOperation, UserOperationV06};
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::id;

// Account factory.
pub const FACTORY_GET_ADDRESS: &str = "getAddress(address,bytes)";
pub const FACTORY_CREATE_ACCOUNT: &str = "createAccount(address,bytes)";

// EntryPoint.
pub const ENTRY_POINT_GET_NONCE: &str = "getNonce(address,uint192)";
pub const ENTRY_POINT_GET_USER_OP_HASH_V06: &str =
    "getUserOpHash((address,uint256,bytes,bytes,uint256,uint256,uint256,uint256,uint256,bytes,bytes))";
pub const ENTRY_POINT_GET_USER_OP_HASH_V07: &str =
    "getUserOpHash((address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes))";

// Account.
pub const ACCOUNT_EXECUTE: &str = "execute(address,uint256,bytes)";
pub const ACCOUNT_EXECUTE_BATCH: &str = "executeBatch(address[],uint256[],bytes[])";
pub const ACCOUNT_EXECUTE_MODE: &str = "execute(bytes32,bytes)";
pub const ACCOUNT_IS_VALID_SIGNATURE: &str = "isValidSignature(bytes32,bytes)";
pub const ACCOUNT_SET_PERMISSIONS_FOR_SIGNER: &str =
    "setPermissionsForSigner((address,uint8,address[],uint256,uint128,uint128,uint128,uint128,bytes32),bytes)";
pub const ACCOUNT_GET_ALL_ADMINS: &str = "getAllAdmins()";
pub const ACCOUNT_GET_ALL_ACTIVE_SIGNERS: &str = "getAllActiveSigners()";

// ERC-20.
pub const ERC20_APPROVE: &str = "approve(address,uint256)";
pub const ERC20_ALLOWANCE: &str = "allowance(address,address)";

/// ERC-1271 `isValidSignature` success value.
pub const ERC1271_MAGIC_VALUE: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

pub fn selector(signature: &str) -> [u8; 4] {
    id(signature)
}

pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut v = selector(signature).to_vec();
    v.extend_from_slice(&abi::encode(args));
    Bytes::from(v)
}

/// Splits calldata into selector and argument words.
pub fn split_call(data: &[u8]) -> Option<([u8; 4], &[u8])> {
    if data.len() < 4 {
        return None;
    }
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&data[..4]);
    Some((sel, &data[4..]))
}

/// Decodes the arguments of `data` if it is a call to `signature`.
pub fn decode_call(signature: &str, types: &[ParamType], data: &[u8]) -> Option<Vec<Token>> {
    let (sel, args) = split_call(data)?;
    if sel != selector(signature) {
        return None;
    }
    abi::decode(types, args).ok()
}

fn decode_output(what: &'static str, types: &[ParamType], data: &[u8]) -> Result<Vec<Token>> {
    abi::decode(types, data).map_err(|e| {
        AccountError::Chain(ChainError::Decode {
            what,
            reason: e.to_string(),
        })
    })
}

fn bad_output(what: &'static str) -> AccountError {
    AccountError::Chain(ChainError::Decode {
        what,
        reason: "unexpected token layout".to_string(),
    })
}

pub fn decode_address_output(what: &'static str, data: &[u8]) -> Result<Address> {
    match decode_output(what, &[ParamType::Address], data)?.as_slice() {
        [Token::Address(a)] => Ok(*a),
        _ => Err(bad_output(what)),
    }
}

pub fn decode_u256_output(what: &'static str, data: &[u8]) -> Result<U256> {
    match decode_output(what, &[ParamType::Uint(256)], data)?.as_slice() {
        [Token::Uint(v)] => Ok(*v),
        _ => Err(bad_output(what)),
    }
}

pub fn decode_bytes32_output(what: &'static str, data: &[u8]) -> Result<H256> {
    match decode_output(what, &[ParamType::FixedBytes(32)], data)?.as_slice() {
        [Token::FixedBytes(b)] if b.len() == 32 => Ok(H256::from_slice(b)),
        _ => Err(bad_output(what)),
    }
}

pub fn decode_bytes4_output(what: &'static str, data: &[u8]) -> Result<[u8; 4]> {
    match decode_output(what, &[ParamType::FixedBytes(4)], data)?.as_slice() {
        [Token::FixedBytes(b)] if b.len() == 4 => {
            let mut out = [0u8; 4];
            out.copy_from_slice(b);
            Ok(out)
        }
        _ => Err(bad_output(what)),
    }
}

pub fn decode_address_array_output(what: &'static str, data: &[u8]) -> Result<Vec<Address>> {
    let ty = ParamType::Array(Box::new(ParamType::Address));
    match decode_output(what, &[ty], data)?.as_slice() {
        [Token::Array(items)] => items
            .iter()
            .map(|t| t.clone().into_address().ok_or_else(|| bad_output(what)))
            .collect(),
        _ => Err(bad_output(what)),
    }
}

pub fn factory_get_address(owner: Address, data: &Bytes) -> Bytes {
    encode_call(
        FACTORY_GET_ADDRESS,
        &[Token::Address(owner), Token::Bytes(data.to_vec())],
    )
}

pub fn factory_create_account(owner: Address, data: &Bytes) -> Bytes {
    encode_call(
        FACTORY_CREATE_ACCOUNT,
        &[Token::Address(owner), Token::Bytes(data.to_vec())],
    )
}

pub fn entry_point_get_nonce(account: Address, key: U256) -> Bytes {
    encode_call(
        ENTRY_POINT_GET_NONCE,
        &[Token::Address(account), Token::Uint(key)],
    )
}

pub fn user_op_v06_token(op: &UserOperationV06) -> Token {
    Token::Tuple(vec![
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::Bytes(op.init_code.to_vec()),
        Token::Bytes(op.call_data.to_vec()),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        Token::Bytes(op.paymaster_and_data.to_vec()),
        Token::Bytes(op.signature.to_vec()),
    ])
}

pub fn user_op_v06_param() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Bytes,
        ParamType::Bytes,
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Bytes,
        ParamType::Bytes,
    ])
}

pub fn packed_user_op_token(op: &PackedUserOperation) -> Token {
    Token::Tuple(vec![
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::Bytes(op.init_code.to_vec()),
        Token::Bytes(op.call_data.to_vec()),
        Token::FixedBytes(op.account_gas_limits.to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(op.gas_fees.to_vec()),
        Token::Bytes(op.paymaster_and_data.to_vec()),
        Token::Bytes(op.signature.to_vec()),
    ])
}

pub fn packed_user_op_param() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Bytes,
        ParamType::Bytes,
        ParamType::FixedBytes(32),
        ParamType::Uint(256),
        ParamType::FixedBytes(32),
        ParamType::Bytes,
        ParamType::Bytes,
    ])
}

pub fn entry_point_get_user_op_hash_v06(op: &UserOperationV06) -> Bytes {
    encode_call(ENTRY_POINT_GET_USER_OP_HASH_V06, &[user_op_v06_token(op)])
}

pub fn entry_point_get_user_op_hash_v07(op: &PackedUserOperation) -> Bytes {
    encode_call(ENTRY_POINT_GET_USER_OP_HASH_V07, &[packed_user_op_token(op)])
}

pub fn account_is_valid_signature(hash: H256, signature: &Bytes) -> Bytes {
    encode_call(
        ACCOUNT_IS_VALID_SIGNATURE,
        &[
            Token::FixedBytes(hash.as_bytes().to_vec()),
            Token::Bytes(signature.to_vec()),
        ],
    )
}

pub fn erc20_approve(spender: Address, amount: U256) -> Bytes {
    encode_call(ERC20_APPROVE, &[Token::Address(spender), Token::Uint(amount)])
}

pub fn erc20_allowance(owner: Address, spender: Address) -> Bytes {
    encode_call(ERC20_ALLOWANCE, &[Token::Address(owner), Token::Address(spender)])
}

/// `setPermissionsForSigner(request, signature)`; `request` is the tuple
/// token of a signed permission request.
pub fn account_set_permissions_for_signer(request: Token, signature: &Bytes) -> Bytes {
    encode_call(
        ACCOUNT_SET_PERMISSIONS_FOR_SIGNER,
        &[request, Token::Bytes(signature.to_vec())],
    )
}

pub fn signer_permission_request_param() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Uint(8),
        ParamType::Array(Box::new(ParamType::Address)),
        ParamType::Uint(256),
        ParamType::Uint(128),
        ParamType::Uint(128),
        ParamType::Uint(128),
        ParamType::Uint(128),
        ParamType::FixedBytes(32),
    ])
}

pub fn account_get_all_admins() -> Bytes {
    encode_call(ACCOUNT_GET_ALL_ADMINS, &[])
}

pub fn account_get_all_active_signers() -> Bytes {
    encode_call(ACCOUNT_GET_ALL_ACTIVE_SIGNERS, &[])
}

/// `(signer, approvedTargets, nativeTokenLimitPerTransaction, startTimestamp, endTimestamp)`
pub fn signer_permissions_param() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Array(Box::new(ParamType::Address)),
        ParamType::Uint(256),
        ParamType::Uint(128),
        ParamType::Uint(128),
    ])
}

/// Raw `getAllActiveSigners()` entries: one token list per signer.
pub fn decode_signer_permissions_output(what: &'static str, data: &[u8]) -> Result<Vec<Vec<Token>>> {
    let ty = ParamType::Array(Box::new(signer_permissions_param()));
    match decode_output(what, &[ty], data)?.as_slice() {
        [Token::Array(items)] => items
            .iter()
            .map(|t| t.clone().into_tuple().ok_or_else(|| bad_output(what)))
            .collect(),
        _ => Err(bad_output(what)),
    }
}
