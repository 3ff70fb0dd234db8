//! In-memory collaborators for tests: a scripted JSON-RPC transport and a
//! fake network whose chain, bundler and paymaster check signatures with real
//! keys.

use crate::account::SmartAccount;
use crate::bundler::{
    METHOD_ESTIMATE_GAS, METHOD_GAS_PRICE, METHOD_RECEIPT, METHOD_SEND, METHOD_ZK_BROADCAST,
};
use crate::chain::{ChainClient, Connector};
use crate::config::{AccountConfig, Erc20PaymasterConfig};
use crate::contracts::{self, selector, split_call};
use crate::eip712::{
    AccountMessage, AdminAction, SignerPermissionRequest, ZkSyncTransaction, ZKSYNC_TX_TYPE,
};
use crate::encoding::{
    fmt_address, fmt_bytes, fmt_h256, parse_address, parse_bytes, parse_h256, parse_u256_quantity,
};
use crate::error::{AccountError, ChainError, Result, RpcError, UsageError};
use crate::execution::decode_account_call;
use crate::hasher::{packed_user_op_hash, user_op_v06_hash};
use crate::paymaster::{METHOD_SPONSOR, METHOD_ZK_PAYMASTER_DATA};
use crate::permissions::SignerPermissions;
use crate::transport::RpcTransport;
use crate::types::{
    Call, EntryPointVersion, PackedUserOperation, UserOperationV06, UserOperationV07,
    VersionedUserOp,
};
use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, Signature, TransactionReceipt, H160, H256, U256};
use ethers::utils::rlp::{DecoderError, Rlp};
use ethers::utils::{hash_message, keccak256};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// Answers each method with a fixed response and records every call.
/// Unscripted methods fail with `-32601`.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<HashMap<String, Result<Value, Value>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `Ok` is returned as `result`, `Err` as the JSON-RPC `error` object.
    pub(crate) fn respond(&self, method: &str, response: Result<Value, Value>) {
        self.responses
            .lock()
            .unwrap()
            .insert(method.to_string(), response);
    }

    pub(crate) fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub(crate) fn last_params(&self, method: &str) -> Option<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        let response = self.responses.lock().unwrap().get(method).cloned();
        match response {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(RpcError::from_response(method, &e).into()),
            None => Err(rpc_error(method, -32601, "method not found")),
        }
    }
}

// ---------------------------------------------------------------------------
// Fake network
// ---------------------------------------------------------------------------

pub(crate) const SPONSOR_PAYMASTER: Address = H160([0x9a; 20]);
pub(crate) const ZK_PAYMASTER: Address = H160([0x2c; 20]);
pub(crate) const ERC20_PAYMASTER: Address = H160([0xe2; 20]);
pub(crate) const TOKEN: Address = H160([0x70; 20]);

const SPONSOR_DATA: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];
const ACCOUNT_CODE: [u8; 1] = [0xfe];

pub(crate) fn owner_wallet(seed: u8) -> Arc<LocalWallet> {
    Arc::new(LocalWallet::from_bytes(&[seed; 32]).unwrap())
}

/// v0.7 gasless config with a short receipt poll interval.
pub(crate) fn fast_config(chain_id: u64) -> AccountConfig {
    AccountConfig::new(chain_id, EntryPointVersion::V07)
        .with_receipt_poll_interval(Duration::from_millis(5))
}

pub(crate) fn erc20_config() -> Erc20PaymasterConfig {
    Erc20PaymasterConfig {
        paymaster: ERC20_PAYMASTER,
        token: TOKEN,
        balance_storage_slot: U256::from(9),
    }
}

struct PendingReceipt {
    user_op_hash: H256,
    receipt: TransactionReceipt,
    nulls_left: usize,
    /// Account whose code appears once the operation is mined.
    deploys: Option<Address>,
}

#[derive(Default)]
struct ChainState {
    code: HashMap<Address, Bytes>,
    deploying: HashSet<Address>,
    owners: HashMap<Address, Address>,
    admins: HashMap<Address, BTreeSet<Address>>,
    session_keys: HashMap<Address, BTreeMap<Address, SignerPermissions>>,
    used_uids: HashSet<H256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    receipts: HashMap<H256, TransactionReceipt>,
    user_op_receipts: HashMap<H256, PendingReceipt>,
    nonces: HashMap<Address, U256>,
    deployments: usize,
    executed: Vec<(Address, Call)>,
}

impl ChainState {
    fn authorised(&self, account: Address, signer: Address) -> bool {
        self.owners.get(&account) == Some(&signer)
            || self
                .admins
                .get(&account)
                .is_some_and(|admins| admins.contains(&signer))
    }

    /// ERC-1271 check against a deployed account.
    fn accepts_signature(&self, chain_id: u64, account: Address, hash: H256, signature: &[u8]) -> bool {
        if !self.code.contains_key(&account) {
            return false;
        }
        let digest = AccountMessage::new(account, chain_id, hash).digest();
        recover(signature, digest).is_some_and(|s| self.authorised(account, s))
    }
}

struct NetState {
    chains: HashMap<u64, ChainState>,
    rpc_log: Vec<(u64, String, Value)>,
    sponsor_prices_gas: bool,
    fail_sends: usize,
    receipt_null_polls: usize,
    tx_counter: u64,
}

impl Default for NetState {
    fn default() -> Self {
        Self {
            chains: HashMap::new(),
            rpc_log: Vec::new(),
            sponsor_prices_gas: true,
            fail_sends: 0,
            receipt_null_polls: 1,
            tx_counter: 0,
        }
    }
}

/// Chain, bundler and paymaster of every chain id, sharing one state.
#[derive(Clone, Default)]
pub(crate) struct FakeNetwork {
    state: Arc<Mutex<NetState>>,
}

impl FakeNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut NetState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn with_chain<R>(&self, chain_id: u64, f: impl FnOnce(&mut ChainState) -> R) -> R {
        self.with(|s| f(s.chains.entry(chain_id).or_default()))
    }

    /// The sponsor answers without gas limits, so the operation is estimated
    /// and then sponsored a second time.
    pub(crate) fn unpriced_sponsor(self) -> Self {
        self.with(|s| s.sponsor_prices_gas = false);
        self
    }

    /// The next `n` `eth_sendUserOperation` calls fail with a paymaster revert.
    pub(crate) fn fail_next_sends(&self, n: usize) {
        self.with(|s| s.fail_sends = n);
    }

    /// Receipts of operations sent from now on stay pending for `polls` polls.
    pub(crate) fn delay_receipts(&self, polls: usize) {
        self.with(|s| s.receipt_null_polls = polls);
    }

    pub(crate) fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        self.with(|s| s.rpc_log.iter().map(|(_, m, _)| m.clone()).collect())
    }

    pub(crate) fn methods_on(&self, chain_id: u64) -> Vec<String> {
        self.with(|s| {
            s.rpc_log
                .iter()
                .filter(|(c, _, _)| *c == chain_id)
                .map(|(_, m, _)| m.clone())
                .collect()
        })
    }

    pub(crate) fn count(&self, method: &str) -> usize {
        self.with(|s| s.rpc_log.iter().filter(|(_, m, _)| m == method).count())
    }

    pub(crate) fn last_params(&self, method: &str) -> Option<Value> {
        self.with(|s| {
            s.rpc_log
                .iter()
                .rev()
                .find(|(_, m, _)| m == method)
                .map(|(_, _, p)| p.clone())
        })
    }

    pub(crate) fn deployments(&self, chain_id: u64) -> usize {
        self.with_chain(chain_id, |c| c.deployments)
    }

    pub(crate) fn executed(&self, chain_id: u64) -> Vec<(Address, Call)> {
        self.with_chain(chain_id, |c| c.executed.clone())
    }

    pub(crate) fn allowance(&self, chain_id: u64, token: Address, owner: Address, spender: Address) -> U256 {
        self.with_chain(chain_id, |c| {
            c.allowances
                .get(&(token, owner, spender))
                .copied()
                .unwrap_or_default()
        })
    }

    pub(crate) fn chain_receipt(&self, chain_id: u64, tx_hash: H256) -> Option<TransactionReceipt> {
        self.with_chain(chain_id, |c| c.receipts.get(&tx_hash).cloned())
    }

    /// Deploys `account` for `owner` outside the pipeline.
    pub(crate) fn deploy(&self, chain_id: u64, account: Address, owner: Address) {
        self.with_chain(chain_id, |c| {
            c.code.insert(account, Bytes::from(ACCOUNT_CODE.to_vec()));
            c.owners.insert(account, owner);
        });
    }

    /// Address the fake factory assigns to `owner`.
    pub(crate) fn counterfactual_address(factory: Address, owner: Address, salt: &[u8]) -> Address {
        let mut preimage = factory.as_bytes().to_vec();
        preimage.extend_from_slice(owner.as_bytes());
        preimage.extend_from_slice(salt);
        Address::from_slice(&keccak256(preimage)[12..])
    }

    pub(crate) async fn account(&self, owner: Arc<LocalWallet>, config: AccountConfig) -> SmartAccount {
        SmartAccount::connect(owner, config, self.connector())
            .await
            .unwrap()
    }
}

fn chain_id_from_url(url: &str) -> Option<u64> {
    let rest = url.split("://").nth(1)?;
    rest.split(['.', '/']).next()?.parse().ok()
}

impl Connector for FakeNetwork {
    fn chain(&self, chain_id: u64) -> Result<Arc<dyn ChainClient>> {
        Ok(Arc::new(FakeChain {
            net: self.clone(),
            chain_id,
        }))
    }

    fn rpc(&self, url: &str) -> Result<Arc<dyn RpcTransport>> {
        let chain_id = chain_id_from_url(url)
            .ok_or_else(|| UsageError::InvalidConfig(format!("no chain id in {url}")))?;
        Ok(Arc::new(FakeRpc {
            net: self.clone(),
            chain_id,
        }))
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

struct FakeChain {
    net: FakeNetwork,
    chain_id: u64,
}

fn reverted() -> ChainError {
    ChainError::Reverted { data: None }
}

fn args(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, ChainError> {
    abi::decode(types, data).map_err(|_| reverted())
}

fn recover(signature: &[u8], hash: H256) -> Option<Address> {
    Signature::try_from(signature).ok()?.recover(hash).ok()
}

const ZK_TYPE_BYTE: u8 = ZKSYNC_TX_TYPE as u8;

/// Splits a `0x71` envelope into the transaction and its custom signature.
fn decode_signed_zk_transaction(raw: &[u8]) -> std::result::Result<(ZkSyncTransaction, Bytes), String> {
    let Some((&ZK_TYPE_BYTE, body)) = raw.split_first() else {
        return Err("not a 0x71 transaction".to_string());
    };
    let rlp = Rlp::new(body);
    if rlp.item_count().map_err(|e| e.to_string())? != 16 {
        return Err("expected 16 fields".to_string());
    }
    let field = |e: DecoderError| e.to_string();
    let pm = rlp.at(15).map_err(field)?;
    let (paymaster, paymaster_input) = if pm.item_count().map_err(field)? == 2 {
        (
            pm.val_at::<Address>(0).map_err(field)?,
            Bytes::from(pm.val_at::<Vec<u8>>(1).map_err(field)?),
        )
    } else {
        (Address::zero(), Bytes::new())
    };
    let tx = ZkSyncTransaction {
        nonce: rlp.val_at(0).map_err(field)?,
        max_priority_fee_per_gas: rlp.val_at(1).map_err(field)?,
        max_fee_per_gas: rlp.val_at(2).map_err(field)?,
        gas_limit: rlp.val_at(3).map_err(field)?,
        to: rlp.val_at(4).map_err(field)?,
        value: rlp.val_at(5).map_err(field)?,
        data: Bytes::from(rlp.val_at::<Vec<u8>>(6).map_err(field)?),
        chain_id: rlp.val_at(10).map_err(field)?,
        from: rlp.val_at(11).map_err(field)?,
        gas_per_pubdata_byte_limit: rlp.val_at(12).map_err(field)?,
        factory_deps: rlp.list_at(13).map_err(field)?,
        paymaster,
        paymaster_input,
    };
    let signature = Bytes::from(rlp.val_at::<Vec<u8>>(14).map_err(field)?);
    Ok((tx, signature))
}

fn bytes_token(t: &Token) -> Bytes {
    Bytes::from(t.clone().into_bytes().unwrap_or_default())
}

fn uint_token(t: &Token) -> U256 {
    t.clone().into_uint().unwrap_or_default()
}

fn word_token(t: &Token) -> [u8; 32] {
    let mut out = [0u8; 32];
    if let Some(b) = t.clone().into_fixed_bytes() {
        if b.len() == 32 {
            out.copy_from_slice(&b);
        }
    }
    out
}

fn user_op_v06_from_tokens(t: &[Token]) -> Option<UserOperationV06> {
    Some(UserOperationV06 {
        sender: t.first()?.clone().into_address()?,
        nonce: uint_token(t.get(1)?),
        init_code: bytes_token(t.get(2)?),
        call_data: bytes_token(t.get(3)?),
        call_gas_limit: uint_token(t.get(4)?),
        verification_gas_limit: uint_token(t.get(5)?),
        pre_verification_gas: uint_token(t.get(6)?),
        max_fee_per_gas: uint_token(t.get(7)?),
        max_priority_fee_per_gas: uint_token(t.get(8)?),
        paymaster_and_data: bytes_token(t.get(9)?),
        signature: bytes_token(t.get(10)?),
    })
}

fn packed_user_op_from_tokens(t: &[Token]) -> Option<PackedUserOperation> {
    Some(PackedUserOperation {
        sender: t.first()?.clone().into_address()?,
        nonce: uint_token(t.get(1)?),
        init_code: bytes_token(t.get(2)?),
        call_data: bytes_token(t.get(3)?),
        account_gas_limits: word_token(t.get(4)?),
        pre_verification_gas: uint_token(t.get(5)?),
        gas_fees: word_token(t.get(6)?),
        paymaster_and_data: bytes_token(t.get(7)?),
        signature: bytes_token(t.get(8)?),
    })
}

fn permissions_token(p: &SignerPermissions) -> Token {
    Token::Tuple(vec![
        Token::Address(p.signer),
        Token::Array(p.approved_targets.iter().map(|a| Token::Address(*a)).collect()),
        Token::Uint(p.native_token_limit_per_transaction),
        Token::Uint(U256::from(p.start_timestamp)),
        Token::Uint(U256::from(p.end_timestamp)),
    ])
}

impl FakeChain {
    fn dispatch(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let (sel, input) = split_call(data).ok_or_else(reverted)?;

        if sel == selector(contracts::FACTORY_GET_ADDRESS) {
            let a = args(&[ParamType::Address, ParamType::Bytes], input)?;
            let owner = a[0].clone().into_address().ok_or_else(reverted)?;
            let salt = bytes_token(&a[1]);
            let account = FakeNetwork::counterfactual_address(to, owner, &salt);
            self.net.with_chain(self.chain_id, |c| {
                c.owners.insert(account, owner);
            });
            return Ok(abi::encode(&[Token::Address(account)]));
        }

        if sel == selector(contracts::ENTRY_POINT_GET_NONCE) {
            let a = args(&[ParamType::Address, ParamType::Uint(192)], input)?;
            let key = uint_token(&a[1]);
            return Ok(abi::encode(&[Token::Uint(key << 64)]));
        }

        if sel == selector(contracts::ENTRY_POINT_GET_USER_OP_HASH_V06) {
            let a = args(&[contracts::user_op_v06_param()], input)?;
            let fields = a[0].clone().into_tuple().ok_or_else(reverted)?;
            let op = user_op_v06_from_tokens(&fields).ok_or_else(reverted)?;
            let hash = user_op_v06_hash(&op, to, self.chain_id);
            return Ok(abi::encode(&[Token::FixedBytes(hash.as_bytes().to_vec())]));
        }

        if sel == selector(contracts::ENTRY_POINT_GET_USER_OP_HASH_V07) {
            let a = args(&[contracts::packed_user_op_param()], input)?;
            let fields = a[0].clone().into_tuple().ok_or_else(reverted)?;
            let op = packed_user_op_from_tokens(&fields).ok_or_else(reverted)?;
            let hash = packed_user_op_hash(&op, to, self.chain_id);
            return Ok(abi::encode(&[Token::FixedBytes(hash.as_bytes().to_vec())]));
        }

        if sel == selector(contracts::ACCOUNT_IS_VALID_SIGNATURE) {
            let a = args(&[ParamType::FixedBytes(32), ParamType::Bytes], input)?;
            let hash = H256::from(word_token(&a[0]));
            let signature = bytes_token(&a[1]);
            let valid = self.net.with_chain(self.chain_id, |c| {
                if !c.code.contains_key(&to) {
                    return Err(reverted());
                }
                Ok(c.accepts_signature(self.chain_id, to, hash, &signature))
            })?;
            let magic = if valid {
                contracts::ERC1271_MAGIC_VALUE.to_vec()
            } else {
                vec![0xff; 4]
            };
            return Ok(abi::encode(&[Token::FixedBytes(magic)]));
        }

        if sel == selector(contracts::ERC20_ALLOWANCE) {
            let a = args(&[ParamType::Address, ParamType::Address], input)?;
            let owner = a[0].clone().into_address().ok_or_else(reverted)?;
            let spender = a[1].clone().into_address().ok_or_else(reverted)?;
            let allowance = self.net.allowance(self.chain_id, to, owner, spender);
            return Ok(abi::encode(&[Token::Uint(allowance)]));
        }

        if sel == selector(contracts::ACCOUNT_GET_ALL_ADMINS) {
            let admins = self.net.with_chain(self.chain_id, |c| {
                c.admins.get(&to).cloned().unwrap_or_default()
            });
            let items = admins.into_iter().map(Token::Address).collect();
            return Ok(abi::encode(&[Token::Array(items)]));
        }

        if sel == selector(contracts::ACCOUNT_GET_ALL_ACTIVE_SIGNERS) {
            let signers = self.net.with_chain(self.chain_id, |c| {
                c.session_keys
                    .get(&to)
                    .map(|m| m.values().cloned().collect::<Vec<_>>())
                    .unwrap_or_default()
            });
            let items = signers.iter().map(permissions_token).collect();
            return Ok(abi::encode(&[Token::Array(items)]));
        }

        Err(reverted())
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
        Ok(self.net.with_chain(self.chain_id, |c| {
            c.code.get(&address).cloned().unwrap_or_default()
        }))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        self.dispatch(to, &data).map(Bytes::from)
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self.net.with_chain(self.chain_id, |c| {
            c.nonces.get(&address).copied().unwrap_or_default()
        }))
    }

    async fn estimate_gas(
        &self,
        _from: Address,
        _to: Address,
        _value: U256,
        _data: Bytes,
    ) -> Result<U256, ChainError> {
        Ok(U256::from(21_000))
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        Ok(U256::from(1_000_000_000u64))
    }

    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.net.chain_receipt(self.chain_id, hash))
    }
}

// ---------------------------------------------------------------------------
// Bundler and paymaster
// ---------------------------------------------------------------------------

struct FakeRpc {
    net: FakeNetwork,
    chain_id: u64,
}

fn rpc_error(method: &str, code: i64, message: &str) -> AccountError {
    RpcError::from_response(method, &json!({ "code": code, "message": message })).into()
}

fn str_of<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("0x")
}

fn gas_json() -> Value {
    json!({
        "callGasLimit": "0x186a0",
        "verificationGasLimit": "0x3d090",
        "preVerificationGas": "0xc350",
        "paymasterVerificationGasLimit": "0x7530",
        "paymasterPostOpGasLimit": "0x2710",
    })
}

fn is_v06(entry_point: &Value) -> bool {
    entry_point
        .as_str()
        .and_then(|s| parse_address(s).ok())
        .is_some_and(|a| a == EntryPointVersion::V06.entry_point())
}

fn parse_user_op(version: EntryPointVersion, v: &Value) -> anyhow::Result<VersionedUserOp> {
    let q = |key: &str| parse_u256_quantity(str_of(v, key));
    let b = |key: &str| parse_bytes(str_of(v, key));
    let opt_addr = |key: &str| {
        v.get(key)
            .and_then(Value::as_str)
            .map(parse_address)
            .transpose()
    };
    Ok(match version {
        EntryPointVersion::V06 => VersionedUserOp::V06(UserOperationV06 {
            sender: parse_address(str_of(v, "sender"))?,
            nonce: q("nonce")?,
            init_code: b("initCode")?,
            call_data: b("callData")?,
            call_gas_limit: q("callGasLimit")?,
            verification_gas_limit: q("verificationGasLimit")?,
            pre_verification_gas: q("preVerificationGas")?,
            max_fee_per_gas: q("maxFeePerGas")?,
            max_priority_fee_per_gas: q("maxPriorityFeePerGas")?,
            paymaster_and_data: b("paymasterAndData")?,
            signature: b("signature")?,
        }),
        EntryPointVersion::V07 => VersionedUserOp::V07(UserOperationV07 {
            sender: parse_address(str_of(v, "sender"))?,
            nonce: q("nonce")?,
            factory: opt_addr("factory")?,
            factory_data: b("factoryData")?,
            call_data: b("callData")?,
            call_gas_limit: q("callGasLimit")?,
            verification_gas_limit: q("verificationGasLimit")?,
            pre_verification_gas: q("preVerificationGas")?,
            max_fee_per_gas: q("maxFeePerGas")?,
            max_priority_fee_per_gas: q("maxPriorityFeePerGas")?,
            paymaster: opt_addr("paymaster")?,
            paymaster_verification_gas_limit: q("paymasterVerificationGasLimit")?,
            paymaster_post_op_gas_limit: q("paymasterPostOpGasLimit")?,
            paymaster_data: b("paymasterData")?,
            signature: b("signature")?,
        }),
    })
}

fn init_code_parts(op: &VersionedUserOp) -> Option<(Address, Bytes)> {
    match op {
        VersionedUserOp::V06(op) if op.init_code.len() >= 20 => Some((
            Address::from_slice(&op.init_code[..20]),
            Bytes::from(op.init_code[20..].to_vec()),
        )),
        VersionedUserOp::V06(_) => None,
        VersionedUserOp::V07(op) => op.factory.map(|f| (f, op.factory_data.clone())),
    }
}

fn request_from_tokens(t: Vec<Token>) -> Option<SignerPermissionRequest> {
    let [signer, is_admin, targets, limit, ps, pe, vs, ve, uid] = <[Token; 9]>::try_from(t).ok()?;
    let is_admin = match uint_token(&is_admin).as_u64() {
        0 => AdminAction::None,
        1 => AdminAction::Grant,
        2 => AdminAction::Revoke,
        _ => return None,
    };
    Some(SignerPermissionRequest {
        signer: signer.into_address()?,
        is_admin,
        approved_targets: targets
            .into_array()?
            .into_iter()
            .map(Token::into_address)
            .collect::<Option<Vec<_>>>()?,
        native_token_limit_per_transaction: uint_token(&limit),
        permission_start_timestamp: uint_token(&ps).as_u128(),
        permission_end_timestamp: uint_token(&pe).as_u128(),
        req_validity_start_timestamp: uint_token(&vs).as_u128(),
        req_validity_end_timestamp: uint_token(&ve).as_u128(),
        uid: H256::from(word_token(&uid)),
    })
}

fn apply_permission_request(
    chain: &mut ChainState,
    chain_id: u64,
    account: Address,
    tokens: Vec<Token>,
) -> Result<()> {
    let revert = |msg: &str| rpc_error(METHOD_SEND, -32521, msg);
    let mut tokens = tokens.into_iter();
    let request = tokens
        .next()
        .and_then(Token::into_tuple)
        .and_then(request_from_tokens)
        .ok_or_else(|| revert("malformed permission request"))?;
    let signature = tokens.next().map(|t| bytes_token(&t)).unwrap_or_default();

    let signer = recover(&signature, request.digest(account, chain_id))
        .ok_or_else(|| revert("unrecoverable permission signature"))?;
    if !chain.authorised(account, signer) {
        return Err(revert("AccountPermissions: invalid signer"));
    }
    if !chain.used_uids.insert(request.uid) {
        return Err(revert("AccountPermissions: uid already used"));
    }

    match request.is_admin {
        AdminAction::Grant => {
            chain.admins.entry(account).or_default().insert(request.signer);
        }
        AdminAction::Revoke => {
            chain.admins.entry(account).or_default().remove(&request.signer);
        }
        AdminAction::None => {
            let keys = chain.session_keys.entry(account).or_default();
            let revoked = request.approved_targets.is_empty()
                && request.native_token_limit_per_transaction.is_zero()
                && request.permission_start_timestamp == request.permission_end_timestamp;
            if revoked {
                keys.remove(&request.signer);
            } else {
                keys.insert(
                    request.signer,
                    SignerPermissions {
                        signer: request.signer,
                        approved_targets: request.approved_targets.clone(),
                        native_token_limit_per_transaction: request
                            .native_token_limit_per_transaction,
                        start_timestamp: request.permission_start_timestamp,
                        end_timestamp: request.permission_end_timestamp,
                    },
                );
            }
        }
    }
    Ok(())
}

fn apply_call(chain: &mut ChainState, chain_id: u64, sender: Address, call: &Call) -> Result<()> {
    if call.target == sender {
        let types = [contracts::signer_permission_request_param(), ParamType::Bytes];
        if let Some(tokens) =
            contracts::decode_call(contracts::ACCOUNT_SET_PERMISSIONS_FOR_SIGNER, &types, &call.data)
        {
            apply_permission_request(chain, chain_id, sender, tokens)?;
        }
        return Ok(());
    }
    if let Some(a) = contracts::decode_call(
        contracts::ERC20_APPROVE,
        &[ParamType::Address, ParamType::Uint(256)],
        &call.data,
    ) {
        if let (Some(spender), Some(amount)) = (a[0].clone().into_address(), a[1].clone().into_uint()) {
            chain.allowances.insert((call.target, sender, spender), amount);
        }
    }
    Ok(())
}

fn receipt_for(tx_hash: H256, from: Address, to: Option<Address>) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: tx_hash,
        from,
        to,
        status: Some(1u64.into()),
        ..Default::default()
    }
}

impl FakeRpc {
    fn send_user_operation(&self, s: &mut NetState, params: &Value) -> Result<Value> {
        let bad = |e: &dyn std::fmt::Display| rpc_error(METHOD_SEND, -32602, &e.to_string());
        if s.fail_sends > 0 {
            s.fail_sends -= 1;
            return Err(rpc_error(METHOD_SEND, -32500, "AA33 reverted: paymaster rejected"));
        }

        let entry_point = parse_address(params[1].as_str().unwrap_or_default()).map_err(|e| bad(&e))?;
        let version = if is_v06(&params[1]) {
            EntryPointVersion::V06
        } else {
            EntryPointVersion::V07
        };
        let op = parse_user_op(version, &params[0]).map_err(|e| bad(&e))?;
        let user_op_hash = op.local_hash(entry_point, self.chain_id).map_err(|e| bad(&e))?;
        let sender = op.sender();

        let chain = s.chains.entry(self.chain_id).or_default();
        let known = chain.code.contains_key(&sender) || chain.deploying.contains(&sender);
        let mut deploys = None;
        match init_code_parts(&op) {
            Some(_) if known => {
                return Err(rpc_error(METHOD_SEND, -32500, "AA10 sender already constructed"));
            }
            Some((factory, factory_data)) => {
                let a = contracts::decode_call(
                    contracts::FACTORY_CREATE_ACCOUNT,
                    &[ParamType::Address, ParamType::Bytes],
                    &factory_data,
                )
                .ok_or_else(|| rpc_error(METHOD_SEND, -32500, "AA13 initCode failed"))?;
                let owner = a[0].clone().into_address().unwrap_or_default();
                let salt = bytes_token(&a[1]);
                if FakeNetwork::counterfactual_address(factory, owner, &salt) != sender {
                    return Err(rpc_error(METHOD_SEND, -32500, "AA14 initCode must return sender"));
                }
                chain.deploying.insert(sender);
                chain.owners.insert(sender, owner);
                chain.deployments += 1;
                deploys = Some(sender);
            }
            None if !known => {
                return Err(rpc_error(METHOD_SEND, -32500, "AA20 account not deployed"));
            }
            None => {}
        }

        let signer = recover(op.signature(), hash_message(user_op_hash.as_bytes()));
        // an account owner signs the hex form of the hash through its own ERC-1271
        let by_contract_owner = chain.owners.get(&sender).is_some_and(|&owner| {
            chain.accepts_signature(
                self.chain_id,
                owner,
                hash_message(fmt_h256(user_op_hash)),
                op.signature(),
            )
        });
        if !signer.is_some_and(|s| chain.authorised(sender, s)) && !by_contract_owner {
            return Err(rpc_error(METHOD_SEND, -32507, "AA24 signature error"));
        }

        let calls = decode_account_call(op.call_data()).map_err(|e| bad(&e))?;
        for call in calls {
            apply_call(chain, self.chain_id, sender, &call)?;
            chain.executed.push((sender, call));
        }

        s.tx_counter += 1;
        let mut preimage = user_op_hash.as_bytes().to_vec();
        preimage.extend_from_slice(&s.tx_counter.to_be_bytes());
        let tx_hash = H256::from(keccak256(preimage));
        let receipt = receipt_for(tx_hash, sender, Some(entry_point));

        let nulls_left = s.receipt_null_polls;
        let chain = s.chains.entry(self.chain_id).or_default();
        chain.receipts.insert(tx_hash, receipt.clone());
        chain.user_op_receipts.insert(
            user_op_hash,
            PendingReceipt {
                user_op_hash,
                receipt,
                nulls_left,
                deploys,
            },
        );
        Ok(json!(fmt_h256(user_op_hash)))
    }

    fn user_operation_receipt(&self, s: &mut NetState, params: &Value) -> Result<Value> {
        let hash = parse_h256(params[0].as_str().unwrap_or_default())
            .map_err(|e| rpc_error(METHOD_RECEIPT, -32602, &e.to_string()))?;
        let chain = s.chains.entry(self.chain_id).or_default();
        let Some(pending) = chain.user_op_receipts.get_mut(&hash) else {
            return Ok(Value::Null);
        };
        if pending.nulls_left > 0 {
            pending.nulls_left -= 1;
            return Ok(Value::Null);
        }
        if let Some(account) = pending.deploys.take() {
            chain.deploying.remove(&account);
            chain.code.insert(account, Bytes::from(ACCOUNT_CODE.to_vec()));
        }
        let receipt = serde_json::to_value(&pending.receipt)
            .map_err(|e| rpc_error(METHOD_RECEIPT, -32603, &e.to_string()))?;
        Ok(json!({
            "userOpHash": fmt_h256(pending.user_op_hash),
            "success": true,
            "receipt": receipt,
        }))
    }

    fn sponsor(&self, s: &NetState, params: &Value) -> Value {
        let mut res = gas_json();
        if is_v06(&params[1]["entryPoint"]) {
            let mut blob = SPONSOR_PAYMASTER.as_bytes().to_vec();
            blob.extend_from_slice(&SPONSOR_DATA);
            res["paymasterAndData"] = json!(fmt_bytes(&Bytes::from(blob)));
        } else {
            res["paymaster"] = json!(fmt_address(SPONSOR_PAYMASTER));
            res["paymasterData"] = json!(fmt_bytes(&Bytes::from(SPONSOR_DATA.to_vec())));
        }
        if !s.sponsor_prices_gas {
            if let Some(obj) = res.as_object_mut() {
                for key in [
                    "callGasLimit",
                    "verificationGasLimit",
                    "preVerificationGas",
                    "paymasterVerificationGasLimit",
                    "paymasterPostOpGasLimit",
                ] {
                    obj.remove(key);
                }
            }
        }
        res
    }

    fn broadcast(&self, s: &mut NetState, params: &Value) -> Result<Value> {
        let bad = |e: &dyn std::fmt::Display| rpc_error(METHOD_ZK_BROADCAST, -32602, &e.to_string());
        let raw = parse_bytes(str_of(&params[0], "signedTransaction")).map_err(|e| bad(&e))?;
        let (zk, signature) = decode_signed_zk_transaction(&raw).map_err(|e| bad(&e))?;
        if zk.chain_id != self.chain_id {
            return Err(rpc_error(METHOD_ZK_BROADCAST, -32000, "chain id mismatch"));
        }
        let digest = zk.digest();
        if recover(&signature, digest) != Some(zk.from) {
            return Err(rpc_error(METHOD_ZK_BROADCAST, -32000, "invalid signature"));
        }

        let chain = s.chains.entry(self.chain_id).or_default();
        let expected = chain.nonces.get(&zk.from).copied().unwrap_or_default();
        if zk.nonce != expected {
            return Err(rpc_error(METHOD_ZK_BROADCAST, -32000, "nonce mismatch"));
        }
        chain.nonces.insert(zk.from, expected + 1);

        let mut preimage = digest.as_bytes().to_vec();
        preimage.extend_from_slice(&signature);
        let tx_hash = H256::from(keccak256(preimage));
        chain
            .receipts
            .insert(tx_hash, receipt_for(tx_hash, zk.from, Some(zk.to)));
        chain
            .executed
            .push((zk.from, Call::new(zk.to, zk.value, zk.data.clone())));
        Ok(json!({ "transactionHash": fmt_h256(tx_hash) }))
    }
}

#[async_trait]
impl RpcTransport for FakeRpc {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut s = self.net.state.lock().unwrap();
        s.rpc_log
            .push((self.chain_id, method.to_string(), params.clone()));
        match method {
            METHOD_GAS_PRICE => Ok(json!({
                "maxFeePerGas": "0x77359400",
                "maxPriorityFeePerGas": "0x3b9aca00",
            })),
            METHOD_ESTIMATE_GAS => Ok(gas_json()),
            METHOD_SPONSOR => Ok(self.sponsor(&s, &params)),
            METHOD_SEND => self.send_user_operation(&mut s, &params),
            METHOD_RECEIPT => self.user_operation_receipt(&mut s, &params),
            METHOD_ZK_PAYMASTER_DATA => Ok(json!({
                "paymaster": fmt_address(ZK_PAYMASTER),
                "paymasterInput": fmt_bytes(&Bytes::from(SPONSOR_DATA.to_vec())),
            })),
            METHOD_ZK_BROADCAST => self.broadcast(&mut s, &params),
            other => Err(rpc_error(other, -32601, "method not found")),
        }
    }
}
