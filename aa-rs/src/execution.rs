//! Execution payloads for the account's `execute` entry points.
//!
//! The simple account exposes `execute(address,uint256,bytes)` and
//! `executeBatch(address[],uint256[],bytes[])`. The modular account takes an
//! ERC-7579 mode word plus an execution calldata blob.

use crate::contracts::{
    self, ACCOUNT_EXECUTE, ACCOUNT_EXECUTE_BATCH, ACCOUNT_EXECUTE_MODE,
};
use crate::error::UsageError;
use crate::types::Call;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountVariant {
    #[default]
    Simple,
    Modular,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallType {
    Single,
    Batch,
    Static,
    Delegate,
}

impl CallType {
    pub fn as_byte(self) -> u8 {
        match self {
            CallType::Single => 0x00,
            CallType::Batch => 0x01,
            CallType::Static => 0xfe,
            CallType::Delegate => 0xff,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(CallType::Single),
            0x01 => Some(CallType::Batch),
            0xfe => Some(CallType::Static),
            0xff => Some(CallType::Delegate),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecType {
    /// Revert the whole execution on the first failing call.
    Default,
    /// Keep going and report failures.
    Try,
}

impl ExecType {
    pub fn as_byte(self) -> u8 {
        match self {
            ExecType::Default => 0x00,
            ExecType::Try => 0x01,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(ExecType::Default),
            0x01 => Some(ExecType::Try),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("unknown call type 0x{0:02x}")]
    UnknownCallType(u8),
    #[error("unknown exec type 0x{0:02x}")]
    UnknownExecType(u8),
    #[error("single execution calldata must be at least 52 bytes, got {0}")]
    ShortSingle(usize),
    #[error("invalid batch execution calldata: {0}")]
    InvalidBatch(String),
    #[error("unsupported execution: {0}")]
    Unsupported(String),
}

/// ERC-7579 ModeCode:
/// `callType(1) ‖ execType(1) ‖ unused(4) ‖ modeSelector(4) ‖ modePayload(22)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionMode {
    pub call_type: CallType,
    pub exec_type: ExecType,
    pub selector: [u8; 4],
    pub payload: [u8; 22],
}

impl ExecutionMode {
    pub fn single() -> Self {
        Self::new(CallType::Single)
    }

    pub fn batch() -> Self {
        Self::new(CallType::Batch)
    }

    fn new(call_type: CallType) -> Self {
        Self {
            call_type,
            exec_type: ExecType::Default,
            selector: [0u8; 4],
            payload: [0u8; 22],
        }
    }

    pub fn with_exec_type(mut self, exec_type: ExecType) -> Self {
        self.exec_type = exec_type;
        self
    }

    pub fn encode(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[0] = self.call_type.as_byte();
        word[1] = self.exec_type.as_byte();
        word[6..10].copy_from_slice(&self.selector);
        word[10..].copy_from_slice(&self.payload);
        word
    }

    pub fn decode(word: &[u8; 32]) -> Result<Self, ExecutionError> {
        let call_type =
            CallType::from_byte(word[0]).ok_or(ExecutionError::UnknownCallType(word[0]))?;
        let exec_type =
            ExecType::from_byte(word[1]).ok_or(ExecutionError::UnknownExecType(word[1]))?;
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&word[6..10]);
        let mut payload = [0u8; 22];
        payload.copy_from_slice(&word[10..]);
        Ok(Self {
            call_type,
            exec_type,
            selector,
            payload,
        })
    }
}

/// `target(20) ‖ value(32) ‖ callData`
pub fn encode_single(call: &Call) -> Bytes {
    let mut v = Vec::with_capacity(52 + call.data.len());
    v.extend_from_slice(call.target.as_bytes());
    let mut value = [0u8; 32];
    call.value.to_big_endian(&mut value);
    v.extend_from_slice(&value);
    v.extend_from_slice(call.data.as_ref());
    Bytes::from(v)
}

pub fn decode_single(data: &[u8]) -> Result<Call, ExecutionError> {
    if data.len() < 52 {
        return Err(ExecutionError::ShortSingle(data.len()));
    }
    Ok(Call {
        target: Address::from_slice(&data[..20]),
        value: U256::from_big_endian(&data[20..52]),
        data: Bytes::from(data[52..].to_vec()),
    })
}

fn execution_param() -> ParamType {
    ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Bytes,
    ])))
}

/// `abi.encode(Execution[])` with `Execution(address target, uint256 value, bytes callData)`.
pub fn encode_batch(calls: &[Call]) -> Bytes {
    let items = calls
        .iter()
        .map(|c| {
            Token::Tuple(vec![
                Token::Address(c.target),
                Token::Uint(c.value),
                Token::Bytes(c.data.to_vec()),
            ])
        })
        .collect();
    Bytes::from(abi::encode(&[Token::Array(items)]))
}

pub fn decode_batch(data: &[u8]) -> Result<Vec<Call>, ExecutionError> {
    let tokens = abi::decode(&[execution_param()], data)
        .map_err(|e| ExecutionError::InvalidBatch(e.to_string()))?;
    let Some(Token::Array(items)) = tokens.into_iter().next() else {
        return Err(ExecutionError::InvalidBatch("expected an array".to_string()));
    };
    items
        .into_iter()
        .map(|item| match item {
            Token::Tuple(fields) => match fields.as_slice() {
                [Token::Address(target), Token::Uint(value), Token::Bytes(data)] => Ok(Call {
                    target: *target,
                    value: *value,
                    data: Bytes::from(data.clone()),
                }),
                _ => Err(ExecutionError::InvalidBatch("bad tuple fields".to_string())),
            },
            _ => Err(ExecutionError::InvalidBatch("expected a tuple".to_string())),
        })
        .collect()
}

/// Encodes `calls` as the account's execute calldata. One call uses the single
/// form; several use the batch form.
pub fn encode_account_call(variant: AccountVariant, calls: &[Call]) -> Result<Bytes, UsageError> {
    match (variant, calls) {
        (_, []) => Err(UsageError::EmptyBatch),
        (AccountVariant::Simple, [call]) => Ok(contracts::encode_call(
            ACCOUNT_EXECUTE,
            &[
                Token::Address(call.target),
                Token::Uint(call.value),
                Token::Bytes(call.data.to_vec()),
            ],
        )),
        (AccountVariant::Simple, calls) => {
            let targets = calls.iter().map(|c| Token::Address(c.target)).collect();
            let values = calls.iter().map(|c| Token::Uint(c.value)).collect();
            let datas = calls.iter().map(|c| Token::Bytes(c.data.to_vec())).collect();
            Ok(contracts::encode_call(
                ACCOUNT_EXECUTE_BATCH,
                &[
                    Token::Array(targets),
                    Token::Array(values),
                    Token::Array(datas),
                ],
            ))
        }
        (AccountVariant::Modular, [call]) => Ok(contracts::encode_call(
            ACCOUNT_EXECUTE_MODE,
            &[
                Token::FixedBytes(ExecutionMode::single().encode().to_vec()),
                Token::Bytes(encode_single(call).to_vec()),
            ],
        )),
        (AccountVariant::Modular, calls) => Ok(contracts::encode_call(
            ACCOUNT_EXECUTE_MODE,
            &[
                Token::FixedBytes(ExecutionMode::batch().encode().to_vec()),
                Token::Bytes(encode_batch(calls).to_vec()),
            ],
        )),
    }
}

/// Inverse of [`encode_account_call`] for any of the three execute shapes.
pub fn decode_account_call(data: &[u8]) -> Result<Vec<Call>, ExecutionError> {
    if let Some(tokens) = contracts::decode_call(
        ACCOUNT_EXECUTE,
        &[ParamType::Address, ParamType::Uint(256), ParamType::Bytes],
        data,
    ) {
        if let [Token::Address(target), Token::Uint(value), Token::Bytes(data)] = tokens.as_slice()
        {
            return Ok(vec![Call::new(*target, *value, Bytes::from(data.clone()))]);
        }
    }

    if let Some(tokens) = contracts::decode_call(
        ACCOUNT_EXECUTE_BATCH,
        &[
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Array(Box::new(ParamType::Uint(256))),
            ParamType::Array(Box::new(ParamType::Bytes)),
        ],
        data,
    ) {
        if let [Token::Array(targets), Token::Array(values), Token::Array(datas)] =
            tokens.as_slice()
        {
            if targets.len() != values.len() || targets.len() != datas.len() {
                return Err(ExecutionError::InvalidBatch("length mismatch".to_string()));
            }
            return targets
                .iter()
                .zip(values)
                .zip(datas)
                .map(|((t, v), d)| match (t, v, d) {
                    (Token::Address(t), Token::Uint(v), Token::Bytes(d)) => {
                        Ok(Call::new(*t, *v, Bytes::from(d.clone())))
                    }
                    _ => Err(ExecutionError::InvalidBatch("bad element".to_string())),
                })
                .collect();
        }
    }

    let tokens = contracts::decode_call(
        ACCOUNT_EXECUTE_MODE,
        &[ParamType::FixedBytes(32), ParamType::Bytes],
        data,
    )
    .ok_or_else(|| ExecutionError::Unsupported("not an execute call".to_string()))?;
    let [Token::FixedBytes(mode), Token::Bytes(exec)] = tokens.as_slice() else {
        return Err(ExecutionError::Unsupported("bad execute arguments".to_string()));
    };
    let mut word = [0u8; 32];
    word.copy_from_slice(mode);
    let mode = ExecutionMode::decode(&word)?;
    match mode.call_type {
        CallType::Single => Ok(vec![decode_single(exec)?]),
        CallType::Batch => decode_batch(exec),
        other => Err(ExecutionError::Unsupported(format!("{other:?} call type"))),
    }
}
